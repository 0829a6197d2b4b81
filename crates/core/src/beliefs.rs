//! Belief scales, typed verbs, and the pane visibility evaluation engine.
//!
//! The engine is a pure function over `(pane belief payload, user beliefs)`.
//! It holds no state and its verdicts are independent of evaluation order,
//! which is what makes visibility diffs cheap to recompute per session.

use serde::{Deserialize, Serialize};

use crate::error::{TractError, TractResult};
use crate::types::BeliefMap;

// ─── Scales & Verbs ─────────────────────────────────────────────────────

/// The scale of a belief determines which verbs the event processor accepts
/// for it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BeliefScale {
    Yn,
    Tf,
    Likert,
    Agreement,
    Interest,
    Custom,
}

impl BeliefScale {
    /// Scale verbs legal for this scale. `IDENTIFY_AS` and `UNSET` are
    /// legal for every scale and handled separately.
    pub fn legal_verbs(&self) -> &'static [&'static str] {
        match self {
            BeliefScale::Yn => &["BELIEVES_YES", "BELIEVES_NO"],
            BeliefScale::Tf => &["BELIEVES_TRUE", "BELIEVES_FALSE"],
            BeliefScale::Likert => &[
                "STRONGLY_AGREES",
                "AGREES",
                "NEITHER_AGREES_NOR_DISAGREES",
                "DISAGREES",
                "STRONGLY_DISAGREES",
            ],
            BeliefScale::Agreement => &["AGREES", "DISAGREES"],
            BeliefScale::Interest => &["INTERESTED", "NOT_INTERESTED"],
            // Custom beliefs carry their value in the event object.
            BeliefScale::Custom => &[],
        }
    }
}

/// A belief verb, parsed and validated against the belief's scale before
/// any state is touched. Illegal verbs are rejected at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeliefVerb {
    /// Stores the accompanying event object as the held value.
    IdentifyAs,
    /// Removes the belief from the visitor's state entirely.
    Unset,
    /// A scale verb (e.g. `BELIEVES_YES`); stored verbatim as the value.
    Scale(String),
}

impl BeliefVerb {
    pub fn as_str(&self) -> &str {
        match self {
            BeliefVerb::IdentifyAs => "IDENTIFY_AS",
            BeliefVerb::Unset => "UNSET",
            BeliefVerb::Scale(verb) => verb,
        }
    }

    pub fn parse(raw: &str, scale: BeliefScale) -> TractResult<Self> {
        match raw {
            "IDENTIFY_AS" => Ok(BeliefVerb::IdentifyAs),
            "UNSET" => Ok(BeliefVerb::Unset),
            v if scale.legal_verbs().contains(&v) => Ok(BeliefVerb::Scale(v.to_string())),
            v => Err(TractError::InvalidEvent(format!(
                "verb {v} is not legal for scale {scale:?}"
            ))),
        }
    }
}

// ─── Evaluation Engine ──────────────────────────────────────────────────

/// The belief gates of one pane, extracted from its options payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaneBeliefPayload {
    #[serde(default)]
    pub held_beliefs: BeliefMap,
    #[serde(default)]
    pub withheld_beliefs: BeliefMap,
}

impl PaneBeliefPayload {
    /// A pane with neither clause is always visible and never flips.
    pub fn is_ungated(&self) -> bool {
        self.held_beliefs.is_empty() && self.withheld_beliefs.is_empty()
    }
}

/// Compute the visibility verdict for one pane.
///
/// `held_beliefs` is a conjunction: every slug present must be satisfied.
/// `withheld_beliefs` hides the pane if any of its slugs is satisfied, and
/// overrides a satisfied held clause.
pub fn evaluate_pane_visibility(payload: &PaneBeliefPayload, user_beliefs: &BeliefMap) -> bool {
    let held_ok = payload
        .held_beliefs
        .iter()
        .all(|(slug, required)| slug_satisfied(required, user_beliefs.get(slug)));

    if !held_ok {
        return false;
    }

    let withheld_hit = payload
        .withheld_beliefs
        .iter()
        .any(|(slug, required)| slug_satisfied(required, user_beliefs.get(slug)));

    !withheld_hit
}

/// One slug clause: `["*"]` matches any held value but never an absent
/// slug; otherwise the user must hold at least one of the required values.
fn slug_satisfied(required: &[String], held: Option<&Vec<String>>) -> bool {
    let Some(held) = held else {
        return false;
    };
    if held.is_empty() {
        // The state store never persists empty lists; treat as absent.
        return false;
    }
    if required.iter().any(|v| v == "*") {
        return true;
    }
    required.iter().any(|v| held.contains(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn beliefs(pairs: &[(&str, &[&str])]) -> BeliefMap {
        pairs
            .iter()
            .map(|(slug, values)| {
                (
                    slug.to_string(),
                    values.iter().map(|v| v.to_string()).collect(),
                )
            })
            .collect()
    }

    fn payload(held: &[(&str, &[&str])], withheld: &[(&str, &[&str])]) -> PaneBeliefPayload {
        PaneBeliefPayload {
            held_beliefs: beliefs(held),
            withheld_beliefs: beliefs(withheld),
        }
    }

    #[test]
    fn test_ungated_pane_is_visible() {
        let p = PaneBeliefPayload::default();
        assert!(p.is_ungated());
        assert!(evaluate_pane_visibility(&p, &BeliefMap::new()));
        assert!(evaluate_pane_visibility(&p, &beliefs(&[("mood", &["happy"])])));
    }

    #[test]
    fn test_held_requires_matching_value() {
        let p = payload(&[("mood", &["happy"])], &[]);
        assert!(!evaluate_pane_visibility(&p, &BeliefMap::new()));
        assert!(!evaluate_pane_visibility(&p, &beliefs(&[("mood", &["sad"])])));
        assert!(evaluate_pane_visibility(&p, &beliefs(&[("mood", &["happy"])])));
    }

    #[test]
    fn test_held_is_conjunction_across_slugs() {
        let p = payload(&[("mood", &["happy"]), ("tier", &["gold"])], &[]);
        assert!(!evaluate_pane_visibility(&p, &beliefs(&[("mood", &["happy"])])));
        assert!(evaluate_pane_visibility(
            &p,
            &beliefs(&[("mood", &["happy"]), ("tier", &["gold"])])
        ));
    }

    #[test]
    fn test_star_matches_any_value_but_not_absent() {
        let p = payload(&[("mood", &["*"])], &[]);
        assert!(!evaluate_pane_visibility(&p, &BeliefMap::new()));
        assert!(evaluate_pane_visibility(&p, &beliefs(&[("mood", &["anything"])])));
    }

    #[test]
    fn test_withheld_hides_when_any_slug_satisfied() {
        let p = payload(&[], &[("banned", &["*"])]);
        assert!(evaluate_pane_visibility(&p, &BeliefMap::new()));
        assert!(!evaluate_pane_visibility(&p, &beliefs(&[("banned", &["yes"])])));
    }

    #[test]
    fn test_withheld_overrides_held() {
        let p = payload(&[("mood", &["happy"])], &[("banned", &["*"])]);
        let user = beliefs(&[("mood", &["happy"]), ("banned", &["x"])]);
        assert!(!evaluate_pane_visibility(&p, &user));
    }

    #[test]
    fn test_verdict_is_deterministic() {
        let p = payload(&[("a", &["1", "2"]), ("b", &["*"])], &[("c", &["3"])]);
        let user = beliefs(&[("a", &["2"]), ("b", &["9"])]);
        let first = evaluate_pane_visibility(&p, &user);
        for _ in 0..10 {
            assert_eq!(first, evaluate_pane_visibility(&p, &user));
        }
        assert!(first);
    }

    #[test]
    fn test_verb_parse_respects_scale() {
        assert_eq!(
            BeliefVerb::parse("BELIEVES_YES", BeliefScale::Yn).unwrap(),
            BeliefVerb::Scale("BELIEVES_YES".to_string())
        );
        assert!(BeliefVerb::parse("BELIEVES_YES", BeliefScale::Likert).is_err());
        assert_eq!(
            BeliefVerb::parse("IDENTIFY_AS", BeliefScale::Custom).unwrap(),
            BeliefVerb::IdentifyAs
        );
        assert_eq!(
            BeliefVerb::parse("UNSET", BeliefScale::Yn).unwrap(),
            BeliefVerb::Unset
        );
    }

    #[test]
    fn test_empty_held_list_treated_as_absent() {
        let p = payload(&[("mood", &["*"])], &[]);
        let mut user = BeliefMap::new();
        user.insert("mood".to_string(), Vec::new());
        assert!(!evaluate_pane_visibility(&p, &user));
    }
}
