//! Final approval step of the pipeline

use super::rules::{ReviewContext, RuleTable, SafetyThresholds};
use crate::alignment::AlignmentScore;
use crate::types::{now, Action, ActionCandidate, Decision};

/// Action substituted for a vetoed candidate
pub const VETO_FALLBACK: Action = Action::Hover;

/// Applies the rule table to scored candidates
#[derive(Debug, Clone, Default)]
pub struct SafetyController {
    rules: RuleTable,
    thresholds: SafetyThresholds,
}

impl SafetyController {
    /// Controller applying `rules` with `thresholds`
    pub fn new(rules: RuleTable, thresholds: SafetyThresholds) -> Self {
        Self { rules, thresholds }
    }

    /// The active rule table
    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// The configured thresholds
    pub fn thresholds(&self) -> &SafetyThresholds {
        &self.thresholds
    }

    /// Approve or veto a scored candidate
    ///
    /// The first matching rule wins and later rules are not evaluated. A veto
    /// keeps the alignment score for auditing but actuates [`VETO_FALLBACK`].
    pub fn review(
        &self,
        candidate: &ActionCandidate,
        alignment: AlignmentScore,
        context: &ReviewContext,
    ) -> Decision {
        match self.rules.first_match(candidate, context, &self.thresholds) {
            Some(rule) => Decision {
                sequence: context.sequence,
                action: VETO_FALLBACK,
                alignment: Some(alignment),
                vetoed: true,
                veto_rule: Some(rule),
                proposed: Some(candidate.action),
                degraded: None,
                decided_at: now(),
            },
            None => Decision {
                sequence: context.sequence,
                action: candidate.action,
                alignment: Some(alignment),
                vetoed: false,
                veto_rule: None,
                proposed: None,
                degraded: None,
                decided_at: now(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::{AlignmentScorer, WeightTable};
    use crate::safety::VetoRule;
    use crate::types::FeatureVector;
    use std::collections::BTreeMap;

    fn score(candidate: &ActionCandidate) -> AlignmentScore {
        let weights: BTreeMap<String, f64> = [("safety".to_string(), 1.0)].into();
        AlignmentScorer::new(WeightTable::from_weights(1, &weights).unwrap()).score(candidate)
    }

    fn candidate(action: Action, features: [f64; 5]) -> ActionCandidate {
        ActionCandidate {
            action,
            probabilities: [0.0, 0.0, 0.0, 0.0, 1.0],
            value_estimate: 0.3,
            features: FeatureVector::new(features),
            fallback: false,
        }
    }

    #[test]
    fn test_altitude_floor_vetoes_to_hover() {
        let controller = SafetyController::new(
            RuleTable::from_ids(&["altitude_floor"]).unwrap(),
            SafetyThresholds::default(),
        );
        let c = candidate(Action::Forward, [0.1, 0.9, 0.5, 0.05, 0.02]);
        let decision = controller.review(&c, score(&c), &ReviewContext::new(42));

        assert!(decision.vetoed);
        assert_eq!(decision.action, Action::Hover);
        assert_eq!(decision.veto_rule, Some(VetoRule::AltitudeFloor));
        assert_eq!(decision.proposed, Some(Action::Forward));
        assert_eq!(decision.sequence, 42);
        assert!(decision.alignment.is_some());
    }

    #[test]
    fn test_clean_candidate_is_approved_as_is() {
        let controller = SafetyController::default();
        let c = candidate(Action::Forward, [0.8, 0.9, 0.5, 0.5, 0.8]);
        let expected = score(&c);
        let decision = controller.review(&c, expected.clone(), &ReviewContext::new(3));

        assert!(decision.is_approved());
        assert_eq!(decision.action, Action::Forward);
        assert_eq!(decision.alignment, Some(expected));
        assert_eq!(decision.veto_rule, None);
    }

    #[test]
    fn test_empty_rule_table_approves_everything() {
        let controller = SafetyController::new(
            RuleTable::from_ids::<&str>(&[]).unwrap(),
            SafetyThresholds::default(),
        );
        let c = candidate(Action::Climb, [0.0, 0.0, 0.0, 1.0, 0.0]);
        assert!(!controller.review(&c, score(&c), &ReviewContext::new(0)).vetoed);
    }
}
