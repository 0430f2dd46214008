//! Synchronous decision logic shared by every pipeline stage
//!
//! The runtime splits these calls across tasks; [`DecisionEngine::step`]
//! chains them for a single sample and is what the scenario tests drive.

use crate::alignment::AlignmentScorer;
use crate::config::SessionConfig;
use crate::error::{ConfigError, StageError};
use crate::features::FeatureExtractor;
use crate::integrity::{Assessment, IntegrityStats, IntegrityValidator, Verdict};
use crate::prediction::{self, Prediction};
use crate::safety::{Geofence, ReviewContext, SafetyController};
use crate::types::{Action, ActionCandidate, Decision, FeatureVector, PolicyOutput, SensorSample, Timestamp};

/// Features of one sample plus what safety review needs to know about it
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Normalized features
    pub features: FeatureVector,
    /// Normalized distance to the nearest no-fly zone boundary
    pub no_fly_zone_distance: Option<f64>,
}

impl Observation {
    /// Observation with no geofence information
    pub fn new(features: FeatureVector) -> Self {
        Self {
            features,
            no_fly_zone_distance: None,
        }
    }

    /// Review context for the sample `sequence`
    pub fn review_context(&self, sequence: u64) -> ReviewContext {
        ReviewContext {
            sequence,
            no_fly_zone_distance: self.no_fly_zone_distance,
        }
    }
}

/// Result of the preprocess stage for one sample
#[derive(Debug, Clone, PartialEq)]
pub enum Preprocessed {
    /// The sample continues to prediction
    Features(Observation),
    /// The sample leaves the pipeline here
    Dropped {
        /// Why the sample was rejected
        error: StageError,
        /// Drift verdict recorded for the dropped step
        verdict: Verdict,
    },
}

/// Scoring + review result for one candidate
#[derive(Debug, Clone, PartialEq)]
pub struct Reviewed {
    /// The reviewed decision
    pub decision: Decision,
    /// Integrity of the alignment score
    pub assessment: Assessment,
}

/// Validator, extractor, scorer and controller built from one configuration
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    validator: IntegrityValidator,
    extractor: FeatureExtractor,
    geofence: Geofence,
    scorer: AlignmentScorer,
    controller: SafetyController,
}

impl DecisionEngine {
    /// Validate `config` and build every component from it
    pub fn from_config(config: &SessionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            validator: config.validator(),
            extractor: FeatureExtractor::new(config.preprocess.clone(), config.staleness_threshold()),
            geofence: config.geofence(),
            scorer: AlignmentScorer::new(config.weight_table()?).with_top_k(config.candidate_top_k),
            controller: SafetyController::new(config.rule_table()?, config.safety.clone()),
        })
    }

    /// The configured validator
    pub fn validator(&self) -> &IntegrityValidator {
        &self.validator
    }

    /// The configured scorer
    pub fn scorer(&self) -> &AlignmentScorer {
        &self.scorer
    }

    /// The configured safety controller
    pub fn controller(&self) -> &SafetyController {
        &self.controller
    }

    /// Freshness, extraction, range validation and geofence distance
    pub fn preprocess(&self, sample: &SensorSample, now: Timestamp) -> Preprocessed {
        let features = match self.extractor.transform(sample, now) {
            Ok(features) => features,
            Err(error) => {
                let field = match &error {
                    StageError::OutOfRangeFeature { feature, .. } => *feature,
                    _ => "sample",
                };
                let verdict = Verdict::drift(field, error.to_string());
                return Preprocessed::Dropped { error, verdict };
            }
        };

        let assessment = self.validator.validate_features(&features);
        match assessment.issues().first() {
            None => Preprocessed::Features(Observation {
                features,
                no_fly_zone_distance: self.geofence.distance(&sample.frame.gps),
            }),
            Some(verdict) => Preprocessed::Dropped {
                error: StageError::OutOfRangeFeature {
                    feature: "features",
                    value: f64::NAN,
                },
                verdict: verdict.clone(),
            },
        }
    }

    /// Validate a policy output for `features`
    pub fn predict(&self, features: FeatureVector, output: &PolicyOutput) -> Prediction {
        prediction::resolve(&self.validator, features, output)
    }

    /// Score, validate the score and run safety review
    pub fn decide(&self, candidate: &ActionCandidate, context: &ReviewContext) -> Reviewed {
        let (chosen, score) = self.scorer.select(candidate);
        let assessment = self.validator.validate_alignment(&score);
        let decision = self.controller.review(&chosen, score, context);
        Reviewed {
            decision,
            assessment,
        }
    }

    /// Decision for a sample whose normal path is out of rotation
    ///
    /// With features the substitute action still goes through safety review;
    /// without them the only safe answer is hover.
    pub fn decide_degraded(
        &self,
        action: Action,
        features: Option<FeatureVector>,
        context: &ReviewContext,
        reason: &str,
    ) -> Reviewed {
        match features {
            Some(features) => {
                let candidate = ActionCandidate::substitute(action, features);
                let mut reviewed = self.decide(&candidate, context);
                reviewed.decision.degraded = Some(reason.to_string());
                reviewed
            }
            None => Reviewed {
                decision: Decision::degraded(context.sequence, Action::Hover, reason),
                assessment: Assessment::new(),
            },
        }
    }

    /// Run one sample through every stage, recording the step in `stats`
    ///
    /// A geofence distance in `context` takes precedence over the one computed
    /// from the sample. Returns `None` when the sample was dropped.
    pub fn step(
        &self,
        sample: &SensorSample,
        now: Timestamp,
        output: &PolicyOutput,
        context: &ReviewContext,
        stats: &IntegrityStats,
    ) -> Option<Decision> {
        let observation = match self.preprocess(sample, now) {
            Preprocessed::Features(observation) => observation,
            Preprocessed::Dropped { verdict, .. } => {
                stats.record_dropped([&verdict]);
                return None;
            }
        };

        let context = ReviewContext {
            no_fly_zone_distance: context
                .no_fly_zone_distance
                .or(observation.no_fly_zone_distance),
            ..context.clone()
        };
        let prediction = self.predict(observation.features, output);
        let reviewed = self.decide(&prediction.candidate, &context);

        let mut assessment = prediction.assessment;
        assessment.extend(reviewed.assessment);
        stats.record_step(assessment.issues());
        Some(reviewed.decision)
    }
}
