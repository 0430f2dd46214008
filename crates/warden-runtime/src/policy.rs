//! Policy boundary
//!
//! The policy is an external, untrusted scoring function. Whatever it returns
//! is validated downstream before it can influence a decision.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use warden_core::types::{Action, FeatureVector, PolicyOutput, ACTION_COUNT, FEATURE_DIM};

/// Maps features to a distribution over the action set
#[async_trait]
pub trait Policy: Send + Sync {
    /// Evaluate one feature vector
    async fn evaluate(&self, features: &FeatureVector) -> Result<PolicyOutput>;

    /// Short identifier for logs
    fn name(&self) -> &str {
        "policy"
    }

    /// Health probe run after a restart
    ///
    /// Defaults to evaluating a neutral feature vector.
    async fn probe(&self) -> Result<()> {
        self.evaluate(&FeatureVector::new([0.5; FEATURE_DIM]))
            .await
            .map(|_| ())
    }
}

/// Deterministic hand-tuned policy used by the CLI simulator
///
/// Preferences per action are turned into probabilities with a softmax; the
/// greedy choice is left to the pipeline.
#[derive(Debug, Clone)]
pub struct HeuristicPolicy {
    temperature: f64,
}

impl HeuristicPolicy {
    pub fn new() -> Self {
        Self { temperature: 0.5 }
    }

    /// Lower temperature gives sharper distributions
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature.max(1e-3);
        self
    }

    fn preferences(features: &FeatureVector) -> [f64; ACTION_COUNT] {
        let energy = features.energy();
        let stability = features.stability();
        let altitude = features.altitude_ratio();
        let proximity = features.proximity();
        let heading_left = features.orientation() < 0.5;

        let mut prefs = [0.0; ACTION_COUNT];
        prefs[Action::Hover.index()] = 0.5 + 1.5 * (1.0 - energy) + (1.0 - stability);
        prefs[Action::Climb.index()] = 2.0 * (1.0 - altitude) - (1.0 - energy);
        let turn = 1.5 * (1.0 - proximity);
        prefs[Action::TurnLeft.index()] = if heading_left { turn } else { 0.5 * turn };
        prefs[Action::TurnRight.index()] = if heading_left { 0.5 * turn } else { turn };
        prefs[Action::Forward.index()] = 2.0 * proximity + 0.5 * energy;
        prefs
    }

    fn softmax(&self, prefs: [f64; ACTION_COUNT]) -> Vec<f64> {
        let max = prefs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = prefs
            .iter()
            .map(|p| ((p - max) / self.temperature).exp())
            .collect();
        let total: f64 = exps.iter().sum();
        exps.into_iter().map(|e| e / total).collect()
    }
}

impl Default for HeuristicPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Policy for HeuristicPolicy {
    async fn evaluate(&self, features: &FeatureVector) -> Result<PolicyOutput> {
        let probabilities = self.softmax(Self::preferences(features));
        let value_estimate = features.energy() * features.stability();
        Ok(PolicyOutput::new(probabilities, value_estimate))
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}

/// Adapter turning a plain closure into a [`Policy`]
pub struct FnPolicy<F> {
    name: String,
    f: F,
}

impl<F> FnPolicy<F>
where
    F: Fn(&FeatureVector) -> Result<PolicyOutput> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> fmt::Debug for FnPolicy<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPolicy").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Policy for FnPolicy<F>
where
    F: Fn(&FeatureVector) -> Result<PolicyOutput> + Send + Sync,
{
    async fn evaluate(&self, features: &FeatureVector) -> Result<PolicyOutput> {
        (self.f)(features)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::IntegrityValidator;

    #[tokio::test]
    async fn test_heuristic_output_is_a_valid_distribution() {
        let policy = HeuristicPolicy::new();
        let validator = IntegrityValidator::strict();
        for features in [
            FeatureVector::new([0.9, 0.9, 0.2, 0.5, 0.9]),
            FeatureVector::new([0.05, 0.1, 0.7, 0.02, 0.01]),
            FeatureVector::new([0.0; FEATURE_DIM]),
            FeatureVector::new([1.0; FEATURE_DIM]),
        ] {
            let output = policy.evaluate(&features).await.unwrap();
            let selected = output.argmax().unwrap();
            assert!(validator.validate_policy_output(&output, selected).is_ok());
        }
    }

    #[tokio::test]
    async fn test_heuristic_prefers_forward_in_open_space() {
        let policy = HeuristicPolicy::new();
        let output = policy
            .evaluate(&FeatureVector::new([0.9, 0.95, 0.3, 0.9, 1.0]))
            .await
            .unwrap();
        assert_eq!(output.argmax(), Some(Action::Forward.index()));
    }

    #[tokio::test]
    async fn test_heuristic_hovers_when_drained_and_shaky() {
        let policy = HeuristicPolicy::new();
        let output = policy
            .evaluate(&FeatureVector::new([0.05, 0.2, 0.3, 0.9, 0.3]))
            .await
            .unwrap();
        assert_eq!(output.argmax(), Some(Action::Hover.index()));
    }

    #[tokio::test]
    async fn test_fn_policy_and_default_probe() {
        let ok = FnPolicy::new("uniform", |_: &FeatureVector| {
            Ok(PolicyOutput::new(vec![0.2; ACTION_COUNT], 0.0))
        });
        assert_eq!(ok.name(), "uniform");
        assert!(ok.probe().await.is_ok());

        let broken = FnPolicy::new("broken", |_: &FeatureVector| -> Result<PolicyOutput> {
            anyhow::bail!("model unavailable")
        });
        assert!(broken.probe().await.is_err());
    }
}
