//! Pair scoring (pure, no I/O).
//!
//! One engine for every call site. "General discovery", "workshop pairing",
//! "both online" and "dormant re-engagement" differ only in the `ModeConfig`
//! they are built with.

use serde::{Deserialize, Serialize};

use super::extract::{Signal, SignalExtractor};
use crate::types::{Profile, SuggestionType, Thresholds};

/// Maximum number of reasons attached to a score.
pub const MAX_REASONS: usize = 3;

/// Call site a score is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    Discovery,
    Workshop,
    BothOnline,
    Dormant,
}

impl MatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMode::Discovery => "discovery",
            MatchMode::Workshop => "workshop",
            MatchMode::BothOnline => "both_online",
            MatchMode::Dormant => "dormant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "discovery" | "general" => Some(MatchMode::Discovery),
            "workshop" => Some(MatchMode::Workshop),
            "both_online" | "online" => Some(MatchMode::BothOnline),
            "dormant" => Some(MatchMode::Dormant),
            _ => None,
        }
    }

    /// Suggestion type used for cooldown bookkeeping.
    pub fn suggestion_type(&self) -> SuggestionType {
        match self {
            MatchMode::Discovery => SuggestionType::Discovery,
            MatchMode::Workshop => SuggestionType::Workshop,
            MatchMode::BothOnline => SuggestionType::BothOnline,
            MatchMode::Dormant => SuggestionType::Dormant,
        }
    }

    fn threshold(&self, thresholds: &Thresholds) -> f64 {
        match self {
            MatchMode::Discovery => thresholds.discovery,
            MatchMode::Workshop => thresholds.workshop,
            MatchMode::BothOnline => thresholds.both_online,
            MatchMode::Dormant => thresholds.dormant,
        }
    }
}

/// How shared words in `building` are found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordPolicy {
    /// Any whitespace token longer than 3 characters.
    AnyToken,
    /// Only words from the bounded domain list.
    DomainList,
}

/// Weight-and-threshold table for one mode. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeConfig {
    pub mode: MatchMode,
    pub interest_weight: f64,
    pub skill_weight: f64,
    pub complement_weight: f64,
    pub keyword_weight: f64,
    pub keyword_policy: KeywordPolicy,
    pub co_active_close_hours: i64,
    pub co_active_close_weight: f64,
    pub co_active_loose_hours: i64,
    pub co_active_loose_weight: f64,
    /// Replaces co-activity when set; only in "both online right now" sweeps.
    pub online_now_bonus: Option<f64>,
    /// Experience-level proximity; workshop pairing only.
    pub experience_weight: Option<f64>,
    /// Matches must score strictly above this.
    pub threshold: f64,
}

impl ModeConfig {
    /// Weight table with the default thresholds.
    pub fn for_mode(mode: MatchMode) -> Self {
        Self::with_thresholds(mode, &Thresholds::default())
    }

    /// Weight table with thresholds taken from configuration.
    pub fn with_thresholds(mode: MatchMode, thresholds: &Thresholds) -> Self {
        let base = ModeConfig {
            mode,
            interest_weight: 15.0,
            skill_weight: 12.0,
            complement_weight: 8.0,
            keyword_weight: 10.0,
            keyword_policy: KeywordPolicy::AnyToken,
            co_active_close_hours: 2,
            co_active_close_weight: 20.0,
            co_active_loose_hours: 12,
            co_active_loose_weight: 10.0,
            online_now_bonus: None,
            experience_weight: None,
            threshold: mode.threshold(thresholds),
        };

        match mode {
            MatchMode::Discovery | MatchMode::Dormant => base,
            MatchMode::Workshop => ModeConfig {
                complement_weight: 30.0,
                keyword_weight: 15.0,
                keyword_policy: KeywordPolicy::DomainList,
                experience_weight: Some(15.0),
                ..base
            },
            MatchMode::BothOnline => ModeConfig {
                online_now_bonus: Some(20.0),
                ..base
            },
        }
    }
}

/// Combined score for one pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Score {
    pub total: f64,
    /// At most three, most specific first.
    pub reasons: Vec<String>,
}

/// Sums signal weights and picks the reasons to show.
#[derive(Debug, Clone, Copy)]
pub struct ScoringEngine {
    extractor: SignalExtractor,
}

impl ScoringEngine {
    pub fn new(config: ModeConfig) -> Self {
        Self { extractor: SignalExtractor::new(config) }
    }

    pub fn config(&self) -> &ModeConfig {
        self.extractor.config()
    }

    pub fn threshold(&self) -> f64 {
        self.extractor.config().threshold
    }

    /// Extract and score. `None` for a member paired with themself.
    pub fn evaluate(&self, a: &Profile, b: &Profile) -> Option<Score> {
        if a.handle == b.handle {
            return None;
        }
        let signals = self.extractor.extract(a, b);
        Some(self.score(&signals))
    }

    /// Sum weights. Reasons are ordered by specificity tier, then weight,
    /// then signal priority and computation order; deduplicated, capped at 3.
    /// Timing evidence only fills slots the profile overlap leaves free.
    pub fn score(&self, signals: &[Signal]) -> Score {
        let total = signals.iter().map(|s| s.weight).sum();

        let mut order: Vec<usize> = (0..signals.len()).collect();
        order.sort_by(|&i, &j| {
            let (a, b) = (&signals[i], &signals[j]);
            a.kind
                .specificity()
                .cmp(&b.kind.specificity())
                .then(b.weight.total_cmp(&a.weight))
                .then(a.kind.priority().cmp(&b.kind.priority()))
                .then(i.cmp(&j))
        });

        let mut reasons: Vec<String> = Vec::with_capacity(MAX_REASONS);
        for idx in order {
            let evidence = &signals[idx].evidence;
            if !reasons.contains(evidence) {
                reasons.push(evidence.clone());
            }
            if reasons.len() == MAX_REASONS {
                break;
            }
        }

        Score { total, reasons }
    }
}
