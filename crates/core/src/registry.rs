//! Storyfragment belief registry: a derived index built on first touch of
//! a story fragment, answering "which panes does this belief slug affect?"
//! without walking pane payloads per event.
//!
//! Registries are replace-by-copy: once published into the cache they are
//! never mutated, only rebuilt after an invalidation signal.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::beliefs::PaneBeliefPayload;
use crate::types::{Pane, StoryFragment};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryfragmentBeliefRegistry {
    pub storyfragment_id: String,
    /// Every constituent pane's belief gates, keyed by pane id.
    pub pane_payloads: HashMap<String, PaneBeliefPayload>,
    /// Transposed index: belief slug -> panes whose verdict depends on it.
    pub beliefs_to_panes: HashMap<String, BTreeSet<String>>,
    pub built_at: DateTime<Utc>,
}

impl StoryfragmentBeliefRegistry {
    /// Walk every constituent pane and extract its gates. Panes referenced
    /// by the fragment but missing from `panes` are skipped; the content
    /// layer surfaces those separately as hard misses.
    pub fn build(fragment: &StoryFragment, panes: &[Pane]) -> Self {
        let mut pane_payloads = HashMap::new();
        let mut beliefs_to_panes: HashMap<String, BTreeSet<String>> = HashMap::new();

        for pane_id in &fragment.pane_ids {
            let Some(pane) = panes.iter().find(|p| &p.id == pane_id) else {
                continue;
            };
            let payload = pane.options.belief_payload();
            for slug in payload
                .held_beliefs
                .keys()
                .chain(payload.withheld_beliefs.keys())
            {
                beliefs_to_panes
                    .entry(slug.clone())
                    .or_default()
                    .insert(pane.id.clone());
            }
            pane_payloads.insert(pane.id.clone(), payload);
        }

        Self {
            storyfragment_id: fragment.id.clone(),
            pane_payloads,
            beliefs_to_panes,
            built_at: Utc::now(),
        }
    }

    /// True if no pane in the fragment carries a belief gate.
    pub fn is_ungated(&self) -> bool {
        self.beliefs_to_panes.is_empty()
    }

    /// True if any of the given slugs affects a pane in this fragment.
    pub fn references_any(&self, slugs: &[String]) -> bool {
        slugs.iter().any(|s| self.beliefs_to_panes.contains_key(s))
    }

    /// Union of panes affected by the given belief slugs.
    pub fn panes_for_slugs(&self, slugs: &[String]) -> BTreeSet<String> {
        let mut panes = BTreeSet::new();
        for slug in slugs {
            if let Some(ids) = self.beliefs_to_panes.get(slug) {
                panes.extend(ids.iter().cloned());
            }
        }
        panes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PaneOptions;

    fn pane(id: &str, held: &[(&str, &[&str])], withheld: &[(&str, &[&str])]) -> Pane {
        let to_map = |pairs: &[(&str, &[&str])]| {
            pairs
                .iter()
                .map(|(slug, values)| {
                    (
                        slug.to_string(),
                        values.iter().map(|v| v.to_string()).collect(),
                    )
                })
                .collect()
        };
        Pane {
            id: id.to_string(),
            slug: format!("pane-{id}"),
            title: format!("Pane {id}"),
            options: PaneOptions {
                held_beliefs: to_map(held),
                withheld_beliefs: to_map(withheld),
                nodes: Vec::new(),
            },
        }
    }

    fn fragment(pane_ids: &[&str]) -> StoryFragment {
        StoryFragment {
            id: "sf-1".to_string(),
            slug: "home".to_string(),
            title: "Home".to_string(),
            tract_stack_id: "ts-1".to_string(),
            pane_ids: pane_ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_build_transposes_belief_index() {
        let panes = vec![
            pane("p1", &[], &[]),
            pane("p2", &[("mood", &["happy"])], &[]),
            pane("p3", &[("mood", &["sad"])], &[("banned", &["*"])]),
        ];
        let registry = StoryfragmentBeliefRegistry::build(&fragment(&["p1", "p2", "p3"]), &panes);

        assert_eq!(registry.pane_payloads.len(), 3);
        assert_eq!(
            registry.beliefs_to_panes["mood"],
            BTreeSet::from(["p2".to_string(), "p3".to_string()])
        );
        assert_eq!(
            registry.beliefs_to_panes["banned"],
            BTreeSet::from(["p3".to_string()])
        );
    }

    #[test]
    fn test_panes_for_slugs_unions() {
        let panes = vec![
            pane("p2", &[("mood", &["happy"])], &[]),
            pane("p3", &[], &[("banned", &["*"])]),
        ];
        let registry = StoryfragmentBeliefRegistry::build(&fragment(&["p2", "p3"]), &panes);

        let affected =
            registry.panes_for_slugs(&["mood".to_string(), "banned".to_string()]);
        assert_eq!(affected, BTreeSet::from(["p2".to_string(), "p3".to_string()]));
        assert!(registry.panes_for_slugs(&["unknown".to_string()]).is_empty());
    }

    #[test]
    fn test_ungated_fragment() {
        let panes = vec![pane("p1", &[], &[])];
        let registry = StoryfragmentBeliefRegistry::build(&fragment(&["p1"]), &panes);
        assert!(registry.is_ungated());
        assert!(!registry.references_any(&["mood".to_string()]));
    }

    #[test]
    fn test_missing_pane_is_skipped() {
        let panes = vec![pane("p1", &[("mood", &["*"])], &[])];
        let registry = StoryfragmentBeliefRegistry::build(&fragment(&["p1", "ghost"]), &panes);
        assert_eq!(registry.pane_payloads.len(), 1);
    }
}
