//! Connection recommendations for small communities.
//!
//! Scores member pairs from explainable signals, ranks candidates for one
//! member on demand, and sweeps the population in the background for
//! opportunities that only matter right now.

pub mod db;
pub mod error;
mod migrations;
pub mod matching;
pub mod proactive;
pub mod repository;
pub mod signals;
pub mod state;
pub mod trends;
pub mod types;

pub use error::{ErrorReport, MatchError};
pub use matching::{Deduplicator, MatchResult, MatchService, MemorySuggestionStore, SuggestionStore};
pub use proactive::{default_monitor, Opportunity, ProactiveMonitor, SweepMode, TickOutcome, TickReport};
pub use repository::{MemoryRepository, ProfileRepository, SqliteRepository};
pub use signals::{MatchMode, ModeConfig, ScoringEngine};
pub use trends::{TopicCluster, TrendDetector};
pub use types::{Config, Profile};
