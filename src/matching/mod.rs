//! Candidate ranking for a single member, and the suggestion history that
//! keeps the same pair from coming up twice.

pub mod dedup;
pub mod ranker;
pub mod suggest;

pub use dedup::{Deduplicator, MemorySuggestionStore, SuggestionStore};
pub use ranker::{MatchRanker, MatchResult, ProfileSummary};
pub use suggest::MatchService;
