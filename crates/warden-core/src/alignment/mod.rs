//! Alignment scoring
//!
//! Candidates are graded against weighted principles (safety, energy,
//! smoothness, progress, confidence). The weight table is versioned and
//! fingerprinted so every score can be traced back to the weights that
//! produced it.

pub mod principle;
pub mod scorer;

pub use principle::{Principle, WeightTable};
pub use scorer::{AlignmentScore, AlignmentScorer, PrincipleScore};
