//! Pairwise compatibility signals.
//!
//! `extract` turns two profiles into typed, weighted signals, `scoring` sums
//! them into a score with human-readable reasons, and `decay` weights
//! observations by age for the trend clusters.

pub mod decay;
pub mod extract;
pub mod scoring;

pub use extract::{Signal, SignalExtractor, SignalKind};
pub use scoring::{KeywordPolicy, MatchMode, ModeConfig, Score, ScoringEngine};
