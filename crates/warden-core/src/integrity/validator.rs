//! Integrity Validator - stateless checks on pipeline values
//!
//! A single [`Check`] enum covers every kind of check the pipeline needs.
//! Continuous values that leave their range are **drift**; broken structural
//! invariants (illegal action, malformed distribution, non-finite estimate)
//! are **hallucination**. Validation never fails: callers decide whether to
//! drop, replace or halt based on the returned [`Verdict`].

use crate::alignment::AlignmentScore;
use crate::types::{FeatureVector, PolicyOutput, ACTION_COUNT};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default tolerance on the probability sum
pub const DEFAULT_SIMPLEX_TOLERANCE: f64 = 1e-3;

/// Tolerance used in strict mode
pub const STRICT_SIMPLEX_TOLERANCE: f64 = 1e-5;

/// Outcome category of a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Passed every check
    Ok,
    /// Plausible but out of expected range
    Drift,
    /// Structurally impossible output
    Hallucination,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Classification::Ok => "ok",
            Classification::Drift => "drift",
            Classification::Hallucination => "hallucination",
        };
        f.write_str(s)
    }
}

/// Result of a single check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Outcome of the check
    pub classification: Classification,
    /// Which value was checked
    pub field: String,
    /// Human-readable diagnostic
    pub reason: String,
}

impl Verdict {
    /// Passing verdict for `field`
    pub fn ok(field: impl Into<String>) -> Self {
        Self {
            classification: Classification::Ok,
            field: field.into(),
            reason: String::new(),
        }
    }

    /// Drift verdict for `field`
    pub fn drift(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            classification: Classification::Drift,
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Hallucination verdict for `field`
    pub fn hallucination(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            classification: Classification::Hallucination,
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether the check passed
    pub fn is_ok(&self) -> bool {
        self.classification == Classification::Ok
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            write!(f, "{}: ok", self.field)
        } else {
            write!(f, "{} [{}]: {}", self.field, self.classification, self.reason)
        }
    }
}

/// One check to run; dispatch is on the variant
#[derive(Debug, Clone, Copy)]
pub enum Check<'a> {
    /// Continuous value must be finite and inside `[min, max]`
    Range {
        /// Name reported in the verdict
        field: &'a str,
        /// Value under test
        value: f64,
        /// Lower bound
        min: f64,
        /// Upper bound
        max: f64,
    },
    /// Distribution must have `expected_len` non-negative entries summing to ~1
    Simplex {
        /// Name reported in the verdict
        field: &'a str,
        /// Distribution under test
        probabilities: &'a [f64],
        /// Size of the action set
        expected_len: usize,
    },
    /// Discrete index must belong to a set of `len` members
    Membership {
        /// Name reported in the verdict
        field: &'a str,
        /// Index under test
        index: usize,
        /// Size of the set
        len: usize,
    },
    /// Estimate must be a finite number
    Finite {
        /// Name reported in the verdict
        field: &'a str,
        /// Value under test
        value: f64,
    },
}

/// Accumulated verdicts of a composite validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    issues: Vec<Verdict>,
}

impl Assessment {
    /// Empty, passing assessment
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep a verdict if it is not OK
    pub fn push(&mut self, verdict: Verdict) {
        if !verdict.is_ok() {
            self.issues.push(verdict);
        }
    }

    /// Merge another assessment into this one
    pub fn extend(&mut self, other: Assessment) {
        self.issues.extend(other.issues);
    }

    /// Worst classification seen
    pub fn classification(&self) -> Classification {
        self.issues
            .iter()
            .map(|v| v.classification)
            .max()
            .unwrap_or(Classification::Ok)
    }

    /// Whether no verdict is an issue
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    /// Whether any verdict is Drift
    pub fn has_drift(&self) -> bool {
        self.issues
            .iter()
            .any(|v| v.classification == Classification::Drift)
    }

    /// Whether any verdict is Hallucination
    pub fn has_hallucination(&self) -> bool {
        self.issues
            .iter()
            .any(|v| v.classification == Classification::Hallucination)
    }

    /// Failing verdicts only
    pub fn issues(&self) -> &[Verdict] {
        &self.issues
    }

    /// Reasons joined into one line, for logs and decision annotations
    pub fn summary(&self) -> String {
        self.issues
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl From<Verdict> for Assessment {
    fn from(verdict: Verdict) -> Self {
        let mut assessment = Assessment::new();
        assessment.push(verdict);
        assessment
    }
}

/// Stateless validator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegrityValidator {
    simplex_tolerance: f64,
}

impl Default for IntegrityValidator {
    fn default() -> Self {
        Self {
            simplex_tolerance: DEFAULT_SIMPLEX_TOLERANCE,
        }
    }
}

impl IntegrityValidator {
    /// Validator with the lenient simplex tolerance
    pub fn new() -> Self {
        Self::default()
    }

    /// Tight tolerance on probability sums
    pub fn strict() -> Self {
        Self {
            simplex_tolerance: STRICT_SIMPLEX_TOLERANCE,
        }
    }

    /// Validator with a custom simplex tolerance
    pub fn with_tolerance(simplex_tolerance: f64) -> Self {
        Self { simplex_tolerance }
    }

    /// Allowed distance of a probability sum from 1
    pub fn simplex_tolerance(&self) -> f64 {
        self.simplex_tolerance
    }

    /// Run one check
    pub fn check(&self, check: &Check<'_>) -> Verdict {
        match *check {
            Check::Range {
                field,
                value,
                min,
                max,
            } => {
                if !value.is_finite() {
                    Verdict::drift(field, format!("non-finite value {value}"))
                } else if value < min || value > max {
                    Verdict::drift(field, format!("{value} outside [{min}, {max}]"))
                } else {
                    Verdict::ok(field)
                }
            }
            Check::Simplex {
                field,
                probabilities,
                expected_len,
            } => self.check_simplex(field, probabilities, expected_len),
            Check::Membership { field, index, len } => {
                if index < len {
                    Verdict::ok(field)
                } else {
                    Verdict::hallucination(
                        field,
                        format!("index {index} outside action set of {len}"),
                    )
                }
            }
            Check::Finite { field, value } => {
                if value.is_finite() {
                    Verdict::ok(field)
                } else {
                    Verdict::hallucination(field, format!("non-finite estimate {value}"))
                }
            }
        }
    }

    fn check_simplex(&self, field: &str, probabilities: &[f64], expected_len: usize) -> Verdict {
        if probabilities.len() != expected_len {
            return Verdict::hallucination(
                field,
                format!(
                    "expected {expected_len} probabilities, got {}",
                    probabilities.len()
                ),
            );
        }
        if let Some(p) = probabilities.iter().find(|p| !p.is_finite()) {
            return Verdict::hallucination(field, format!("non-finite probability {p}"));
        }
        if let Some(p) = probabilities.iter().find(|p| **p < 0.0) {
            return Verdict::hallucination(field, format!("negative probability {p}"));
        }
        let sum: f64 = probabilities.iter().sum();
        if (sum - 1.0).abs() > self.simplex_tolerance {
            return Verdict::hallucination(
                field,
                format!(
                    "probabilities sum to {sum:.6}, not 1 (tolerance {})",
                    self.simplex_tolerance
                ),
            );
        }
        Verdict::ok(field)
    }

    /// Every feature must lie in [0, 1]
    pub fn validate_features(&self, features: &FeatureVector) -> Assessment {
        let mut assessment = Assessment::new();
        for (feature, value) in features.iter() {
            assessment.push(self.check(&Check::Range {
                field: feature.name(),
                value,
                min: 0.0,
                max: 1.0,
            }));
        }
        assessment
    }

    /// Shape, simplex, legality and finiteness of a policy output
    ///
    /// `selected` is the action index the pipeline intends to use.
    pub fn validate_policy_output(&self, output: &PolicyOutput, selected: usize) -> Assessment {
        let mut assessment = Assessment::new();
        assessment.push(self.check(&Check::Simplex {
            field: "probabilities",
            probabilities: &output.probabilities,
            expected_len: ACTION_COUNT,
        }));
        assessment.push(self.check(&Check::Finite {
            field: "value_estimate",
            value: output.value_estimate,
        }));
        assessment.push(self.check(&Check::Membership {
            field: "action",
            index: selected,
            len: ACTION_COUNT,
        }));
        assessment
    }

    /// The normalized alignment score must stay in [0, 1]
    pub fn validate_alignment(&self, score: &AlignmentScore) -> Assessment {
        self.check(&Check::Range {
            field: "alignment_score",
            value: score.value,
            min: 0.0,
            max: 1.0,
        })
        .into()
    }
}
