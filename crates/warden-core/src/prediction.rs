//! Turning an untrusted policy output into an action candidate

use crate::error::StageError;
use crate::integrity::{Assessment, Classification, IntegrityValidator};
use crate::types::{Action, ActionCandidate, FeatureVector, PolicyOutput, ACTION_COUNT};

/// A candidate plus everything learned while producing it
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// The candidate handed to scoring
    pub candidate: ActionCandidate,
    /// Validator verdicts for the policy output
    pub assessment: Assessment,
    /// Why the policy output was replaced, if it was
    pub error: Option<StageError>,
}

impl Prediction {
    /// Fallback for a policy call that produced nothing (error, timeout)
    pub fn failed(features: FeatureVector, error: StageError) -> Self {
        Self {
            candidate: ActionCandidate::fallback(features),
            assessment: Assessment::new(),
            error: Some(error),
        }
    }

    /// Whether the policy output was replaced by hover
    pub fn is_fallback(&self) -> bool {
        self.candidate.fallback
    }
}

/// Validate `output` and build the candidate for `features`
///
/// The nominated action is used when present, otherwise the greedy one.
/// Anything classified as hallucination is replaced by the hover fallback.
pub fn resolve(
    validator: &IntegrityValidator,
    features: FeatureVector,
    output: &PolicyOutput,
) -> Prediction {
    let selected = output.action.or_else(|| output.argmax()).unwrap_or(ACTION_COUNT);
    let assessment = validator.validate_policy_output(output, selected);

    if assessment.classification() == Classification::Hallucination {
        let error = match Action::from_index(selected) {
            None => StageError::InvalidAction {
                index: selected,
                len: ACTION_COUNT,
            },
            Some(_) => StageError::InvalidDistribution(assessment.summary()),
        };
        return Prediction {
            candidate: ActionCandidate::fallback(features),
            assessment,
            error: Some(error),
        };
    }

    let probabilities = <[f64; ACTION_COUNT]>::try_from(output.probabilities.as_slice());
    match (Action::from_index(selected), probabilities) {
        (Some(action), Ok(probabilities)) => Prediction {
            candidate: ActionCandidate {
                action,
                probabilities,
                value_estimate: output.value_estimate,
                features,
                fallback: false,
            },
            assessment,
            error: None,
        },
        // Unreachable after a clean assessment; kept total.
        _ => Prediction {
            candidate: ActionCandidate::fallback(features),
            assessment,
            error: Some(StageError::InvalidDistribution(
                "malformed policy output".to_string(),
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features() -> FeatureVector {
        FeatureVector::new([0.8, 0.9, 0.5, 0.5, 0.5])
    }

    #[test]
    fn test_nominated_hover_on_split_distribution_is_ok() {
        let output = PolicyOutput::new(vec![0.5, 0.5, 0.0, 0.0, 0.0], 0.1).with_action(0);
        let prediction = resolve(&IntegrityValidator::new(), features(), &output);

        assert!(prediction.assessment.is_ok());
        assert!(prediction.error.is_none());
        assert_eq!(prediction.candidate.action, Action::Hover);
        assert!(!prediction.is_fallback());
    }

    #[test]
    fn test_greedy_when_not_nominated() {
        let output = PolicyOutput::new(vec![0.1, 0.1, 0.1, 0.1, 0.6], 0.0);
        let prediction = resolve(&IntegrityValidator::new(), features(), &output);
        assert_eq!(prediction.candidate.action, Action::Forward);
    }

    #[test]
    fn test_overfull_distribution_falls_back() {
        let output = PolicyOutput::new(vec![0.6, 0.6, 0.0, 0.0, 0.0], 0.0).with_action(1);
        let prediction = resolve(&IntegrityValidator::new(), features(), &output);

        assert!(prediction.assessment.has_hallucination());
        assert!(prediction.is_fallback());
        assert_eq!(prediction.candidate.action, Action::Hover);
        assert!(matches!(
            prediction.error,
            Some(StageError::InvalidDistribution(_))
        ));
    }

    #[test]
    fn test_out_of_set_action() {
        let output = PolicyOutput::new(vec![0.2; 5], 0.0).with_action(9);
        let prediction = resolve(&IntegrityValidator::new(), features(), &output);
        assert_eq!(
            prediction.error,
            Some(StageError::InvalidAction { index: 9, len: 5 })
        );
        assert!(prediction.is_fallback());
    }

    #[test]
    fn test_wrong_length_and_nan_value() {
        let output = PolicyOutput::new(vec![0.5, 0.5], 0.0);
        assert!(resolve(&IntegrityValidator::new(), features(), &output).is_fallback());

        let output = PolicyOutput::new(vec![0.2; 5], f64::NAN);
        assert!(resolve(&IntegrityValidator::new(), features(), &output).is_fallback());

        let output = PolicyOutput::new(vec![], 0.0);
        assert!(resolve(&IntegrityValidator::new(), features(), &output).is_fallback());
    }

    #[test]
    fn test_strict_tolerance() {
        let output = PolicyOutput::new(vec![0.2, 0.2, 0.2, 0.2, 0.2005], 0.0);
        assert!(!resolve(&IntegrityValidator::new(), features(), &output).is_fallback());
        assert!(resolve(&IntegrityValidator::strict(), features(), &output).is_fallback());
    }
}
