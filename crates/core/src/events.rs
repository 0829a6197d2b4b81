//! Client event model: the JSON batch posted to `/auth/state`.

use serde::{Deserialize, Serialize};

use crate::error::{TractError, TractResult};

/// One element of an event batch. Belief events carry the belief *slug* in
/// `id`; pane and story fragment events carry the entity id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub id: String,
    pub verb: String,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub duration: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum EventKind {
    Belief,
    Pane,
    StoryFragment,
    /// Anything else on the wire; logged and skipped, never batch-fatal.
    Unknown,
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "Belief" => EventKind::Belief,
            "Pane" => EventKind::Pane,
            "StoryFragment" => EventKind::StoryFragment,
            _ => EventKind::Unknown,
        })
    }
}

/// The full request body of `POST /auth/state`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBatch {
    pub events: Vec<ClientEvent>,
    #[serde(default)]
    pub current_pane_id: Option<String>,
    #[serde(default)]
    pub goto_pane_id: Option<String>,
    #[serde(default)]
    pub storyfragment_id: Option<String>,
}

impl EventBatch {
    /// Belief slugs mentioned by the batch, in input order, deduplicated.
    pub fn belief_slugs(&self) -> Vec<String> {
        let mut slugs = Vec::new();
        for event in &self.events {
            if event.kind == EventKind::Belief && !slugs.contains(&event.id) {
                slugs.push(event.id.clone());
            }
        }
        slugs
    }

    pub fn has_belief_events(&self) -> bool {
        self.events.iter().any(|e| e.kind == EventKind::Belief)
    }
}

impl ClientEvent {
    /// Analytics verbs are uppercase tokens; reject anything else before it
    /// reaches the durable action log.
    pub fn validate_verb(&self) -> TractResult<()> {
        if self.verb.is_empty()
            || !self
                .verb
                .chars()
                .all(|c| c.is_ascii_uppercase() || c == '_')
        {
            return Err(TractError::InvalidEvent(format!(
                "malformed verb {:?} for {:?} event",
                self.verb, self.kind
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_deserializes_wire_shape() {
        let json = r#"{
            "events": [
                {"type": "Belief", "id": "mood", "verb": "IDENTIFY_AS", "object": "happy"},
                {"type": "Pane", "id": "01HZX3T9V0Q8F7M2K4C6B8N0AA", "verb": "READ", "duration": 12}
            ],
            "currentPaneId": "01HZX3T9V0Q8F7M2K4C6B8N0AA",
            "gotoPaneId": null
        }"#;
        let batch: EventBatch = serde_json::from_str(json).unwrap();
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.events[0].kind, EventKind::Belief);
        assert_eq!(batch.events[0].object.as_deref(), Some("happy"));
        assert_eq!(batch.events[1].duration, Some(12));
        assert_eq!(batch.belief_slugs(), vec!["mood".to_string()]);
        assert!(batch.has_belief_events());
    }

    #[test]
    fn test_unknown_event_type_parses_as_unknown() {
        let json = r#"{"type": "Widget", "id": "x", "verb": "CLICKED"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind, EventKind::Unknown);
    }

    #[test]
    fn test_verb_validation() {
        let mut event = ClientEvent {
            kind: EventKind::Pane,
            id: "p1".to_string(),
            verb: "READ".to_string(),
            object: None,
            duration: None,
        };
        assert!(event.validate_verb().is_ok());
        event.verb = "read".to_string();
        assert!(event.validate_verb().is_err());
        event.verb = String::new();
        assert!(event.validate_verb().is_err());
    }

    #[test]
    fn test_belief_slugs_dedup_preserves_order() {
        let batch = EventBatch {
            events: vec![
                ClientEvent {
                    kind: EventKind::Belief,
                    id: "b".to_string(),
                    verb: "UNSET".to_string(),
                    object: None,
                    duration: None,
                },
                ClientEvent {
                    kind: EventKind::Belief,
                    id: "a".to_string(),
                    verb: "UNSET".to_string(),
                    object: None,
                    duration: None,
                },
                ClientEvent {
                    kind: EventKind::Belief,
                    id: "b".to_string(),
                    verb: "UNSET".to_string(),
                    object: None,
                    duration: None,
                },
            ],
            ..Default::default()
        };
        assert_eq!(batch.belief_slugs(), vec!["b".to_string(), "a".to_string()]);
    }
}
