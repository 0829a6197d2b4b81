use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::beliefs::{BeliefScale, PaneBeliefPayload};

/// A visitor's belief vector: slug -> non-empty list of held values.
/// Empty lists are never stored; `UNSET` removes the slug entirely.
pub type BeliefMap = BTreeMap<String, Vec<String>>;

// ─── Content Nodes ──────────────────────────────────────────────────────

/// A pane, the smallest visible content unit. `options` is the typed form
/// of the stored `optionsPayload` JSON, parsed once on cache load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pane {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub options: PaneOptions,
}

/// Parsed `optionsPayload` of a pane: belief gates plus the element tree
/// the renderer composes into HTML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaneOptions {
    #[serde(default)]
    pub held_beliefs: BeliefMap,
    #[serde(default)]
    pub withheld_beliefs: BeliefMap,
    #[serde(default)]
    pub nodes: Vec<PaneNode>,
}

impl PaneOptions {
    /// The belief gates of this pane as an evaluation payload.
    pub fn belief_payload(&self) -> PaneBeliefPayload {
        PaneBeliefPayload {
            held_beliefs: self.held_beliefs.clone(),
            withheld_beliefs: self.withheld_beliefs.clone(),
        }
    }

    /// Belief slugs this pane's markup or gates reference. Used to filter
    /// the user belief vector down to the subset that affects rendering.
    pub fn referenced_slugs(&self) -> Vec<String> {
        let mut slugs: Vec<String> = self
            .held_beliefs
            .keys()
            .chain(self.withheld_beliefs.keys())
            .cloned()
            .collect();
        for node in &self.nodes {
            if let PaneNode::Widget(w) = node {
                if let Some(slug) = w.belief_slug() {
                    slugs.push(slug.to_string());
                }
            }
        }
        slugs.sort();
        slugs.dedup();
        slugs
    }
}

/// One element of a pane's content tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PaneNode {
    Heading { level: u8, text: String },
    Paragraph { text: String },
    Markdown { body: String },
    Image { src: String, alt: Option<String> },
    Button { label: String, href: String },
    Link { label: String, href: String },
    Widget(WidgetNode),
}

/// Interactive widgets. Each renders with `data-belief` / `data-pane-id`
/// attributes so clicks post back to the event endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "widget", rename_all = "camelCase")]
pub enum WidgetNode {
    Belief {
        slug: String,
        scale: BeliefScale,
        prompt: String,
    },
    Toggle {
        slug: String,
        prompt: String,
    },
    IdentifyAs {
        slug: String,
        target: String,
        prompt: String,
    },
    Youtube {
        embed_code: String,
        title: String,
    },
    Signup {
        persona: String,
        prompt: String,
        clarify_consent: bool,
    },
}

impl WidgetNode {
    /// The belief slug this widget reads or writes, if any.
    pub fn belief_slug(&self) -> Option<&str> {
        match self {
            WidgetNode::Belief { slug, .. }
            | WidgetNode::Toggle { slug, .. }
            | WidgetNode::IdentifyAs { slug, .. } => Some(slug),
            WidgetNode::Youtube { .. } | WidgetNode::Signup { .. } => None,
        }
    }
}

/// An ordered collection of panes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryFragment {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub tract_stack_id: String,
    /// Pane ids in weight order.
    pub pane_ids: Vec<String>,
}

/// The outermost content grouping; story fragments compose into a tract stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TractStack {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub story_fragment_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Menu {
    pub id: String,
    pub title: String,
    pub theme: String,
    pub links: Vec<MenuLink>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuLink {
    pub name: String,
    pub description: Option<String>,
    pub featured: bool,
    pub actions: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub category: Option<String>,
    pub payload: serde_json::Value,
}

/// A belief definition. The scale determines the legal verb set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Belief {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub scale: BeliefScale,
    #[serde(default)]
    pub custom_values: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub id: String,
    pub filename: String,
    pub alt_description: Option<String>,
    pub url: String,
}

// ─── Visitor State ──────────────────────────────────────────────────────

/// Per-browser belief state. The cache is authoritative; the durable
/// `heldbeliefs` table is an eventually consistent mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintState {
    pub fingerprint_id: String,
    #[serde(default)]
    pub held_beliefs: BeliefMap,
    #[serde(default)]
    pub held_badges: BTreeMap<String, String>,
    pub last_activity: DateTime<Utc>,
}

impl FingerprintState {
    pub fn new(fingerprint_id: String) -> Self {
        Self {
            fingerprint_id,
            held_beliefs: BeliefMap::new(),
            held_badges: BTreeMap::new(),
            last_activity: Utc::now(),
        }
    }
}

/// One browsing session grouping, durable, possibly campaign-tagged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visit {
    pub id: String,
    pub fingerprint_id: String,
    pub campaign_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Ephemeral server-side correlation key for one browsing context.
/// Lives as long as the SSE connection plus a short grace period.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub session_id: String,
    pub tenant_id: String,
    pub fingerprint_id: String,
    pub visit_id: String,
}

/// Append-only analytics record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    pub object_id: String,
    pub object_type: ObjectType,
    pub verb: String,
    pub duration: Option<u32>,
    pub visit_id: String,
    pub fingerprint_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ObjectType {
    Pane,
    StoryFragment,
    Belief,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Pane => "Pane",
            ObjectType::StoryFragment => "StoryFragment",
            ObjectType::Belief => "Belief",
        }
    }
}

/// Durable held-belief row; at most one per `(belief_id, fingerprint_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeldBeliefRow {
    pub id: String,
    pub belief_id: String,
    pub fingerprint_id: String,
    pub verb: String,
    pub object: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Cached snapshot of the belief vector a session last evaluated against,
/// used as the diff baseline for SSE updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBeliefContext {
    pub tenant_id: String,
    pub session_id: String,
    pub storyfragment_id: String,
    pub user_beliefs: BeliefMap,
    /// pane id -> last visibility verdict.
    pub last_evaluation: BTreeMap<String, bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pane_options_parse_camel_case() {
        let json = r#"{
            "heldBeliefs": {"mood": ["happy"]},
            "withheldBeliefs": {"banned": ["*"]},
            "nodes": [
                {"type": "heading", "level": 2, "text": "Hello"},
                {"type": "widget", "widget": "toggle", "slug": "mood", "prompt": "Happy?"}
            ]
        }"#;
        let options: PaneOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.held_beliefs["mood"], vec!["happy"]);
        assert_eq!(options.withheld_beliefs["banned"], vec!["*"]);
        assert_eq!(options.nodes.len(), 2);
        assert_eq!(
            options.referenced_slugs(),
            vec!["banned".to_string(), "mood".to_string()]
        );
    }

    #[test]
    fn test_pane_options_defaults_are_empty() {
        let options: PaneOptions = serde_json::from_str("{}").unwrap();
        assert!(options.held_beliefs.is_empty());
        assert!(options.withheld_beliefs.is_empty());
        assert!(options.nodes.is_empty());
    }
}
