//! Visibility diffing: evaluate every candidate pane of a story fragment
//! against a belief vector and compare verdicts between two vectors.

use std::collections::BTreeMap;

use tractstack_core::beliefs::evaluate_pane_visibility;
use tractstack_core::registry::StoryfragmentBeliefRegistry;
use tractstack_core::types::BeliefMap;

/// Verdict for every pane the registry tracks.
pub fn evaluate_fragment(
    registry: &StoryfragmentBeliefRegistry,
    beliefs: &BeliefMap,
) -> BTreeMap<String, bool> {
    registry
        .pane_payloads
        .iter()
        .map(|(pane_id, payload)| (pane_id.clone(), evaluate_pane_visibility(payload, beliefs)))
        .collect()
}

/// Panes whose verdict differs between two evaluations. `after` covers
/// every registry pane; a pane absent from the baseline counts as changed.
pub fn changed_panes(
    baseline: &BTreeMap<String, bool>,
    after: &BTreeMap<String, bool>,
) -> Vec<String> {
    after
        .iter()
        .filter(|(pane_id, verdict)| baseline.get(*pane_id) != Some(verdict))
        .map(|(pane_id, _)| pane_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tractstack_core::types::{Pane, PaneOptions, StoryFragment};

    fn gated_pane(id: &str, slug: &str, values: &[&str]) -> Pane {
        let mut options = PaneOptions::default();
        options.held_beliefs.insert(
            slug.to_string(),
            values.iter().map(|v| v.to_string()).collect(),
        );
        Pane {
            id: id.to_string(),
            slug: format!("pane-{id}"),
            title: String::new(),
            options,
        }
    }

    fn registry(panes: Vec<Pane>) -> StoryfragmentBeliefRegistry {
        let fragment = StoryFragment {
            id: "sf1".to_string(),
            slug: "home".to_string(),
            title: String::new(),
            tract_stack_id: "ts1".to_string(),
            pane_ids: panes.iter().map(|p| p.id.clone()).collect(),
        };
        StoryfragmentBeliefRegistry::build(&fragment, &panes)
    }

    #[test]
    fn test_diff_flags_exactly_the_flipped_panes() {
        let registry = registry(vec![
            gated_pane("p1", "mood", &["happy"]),
            gated_pane("p2", "tier", &["gold"]),
        ]);

        let before = evaluate_fragment(&registry, &BeliefMap::new());
        let mut beliefs = BeliefMap::new();
        beliefs.insert("mood".to_string(), vec!["happy".to_string()]);
        let after = evaluate_fragment(&registry, &beliefs);

        assert_eq!(changed_panes(&before, &after), vec!["p1".to_string()]);
    }

    #[test]
    fn test_identical_vectors_produce_empty_diff() {
        let registry = registry(vec![gated_pane("p1", "mood", &["happy"])]);
        let verdicts = evaluate_fragment(&registry, &BeliefMap::new());
        assert!(changed_panes(&verdicts, &verdicts).is_empty());
    }

    #[test]
    fn test_missing_baseline_pane_counts_as_changed() {
        let registry = registry(vec![gated_pane("p1", "mood", &["happy"])]);
        let after = evaluate_fragment(&registry, &BeliefMap::new());
        assert_eq!(changed_panes(&BTreeMap::new(), &after), vec!["p1".to_string()]);
    }
}
