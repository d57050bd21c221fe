//! Affinity signals between two profiles (pure, no I/O).
//!
//! Each signal is computed independently. Missing or malformed fields simply
//! contribute nothing; extraction never fails.

use std::collections::BTreeSet;

use serde::Serialize;

use super::scoring::{KeywordPolicy, ModeConfig};
use crate::types::Profile;

/// Kind of evidence a signal carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    SharedInterest,
    ComplementarySkill,
    SharedSkill,
    ProjectKeyword,
    ExperienceLevel,
    CoActivity,
    OnlineNow,
}

impl SignalKind {
    /// Tie-break order for reasons: most specific evidence first.
    pub fn priority(&self) -> u8 {
        match self {
            SignalKind::SharedInterest => 0,
            SignalKind::ComplementarySkill => 1,
            SignalKind::SharedSkill => 2,
            SignalKind::ProjectKeyword => 3,
            SignalKind::ExperienceLevel => 4,
            SignalKind::CoActivity => 5,
            SignalKind::OnlineNow => 6,
        }
    }

    /// Reason tier. Interest and complement evidence outrank other profile
    /// overlap, which outranks timing evidence regardless of weight.
    pub fn specificity(&self) -> u8 {
        match self {
            SignalKind::SharedInterest | SignalKind::ComplementarySkill => 0,
            SignalKind::SharedSkill | SignalKind::ProjectKeyword | SignalKind::ExperienceLevel => 1,
            SignalKind::CoActivity | SignalKind::OnlineNow => 2,
        }
    }
}

/// One independently computed piece of match evidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub weight: f64,
    pub evidence: String,
}

/// Symmetric skill pairings. Lookup checks both directions.
const COMPLEMENTARY_SKILLS: &[(&str, &[&str])] = &[
    ("frontend", &["backend", "design", "api"]),
    ("backend", &["devops", "mobile", "data"]),
    ("design", &["engineering", "product"]),
    ("ai", &["data", "ml", "product"]),
    ("ml", &["data", "infra"]),
    ("mobile", &["design"]),
    ("product", &["engineering", "marketing"]),
    ("marketing", &["writing", "growth"]),
    ("hardware", &["firmware", "embedded"]),
    ("music", &["audio", "visuals"]),
];

/// Topic keywords matched on in domain-list mode.
pub const DOMAIN_KEYWORDS: &[&str] = &[
    "ai", "web", "mobile", "fintech", "game", "games", "music", "health", "climate", "crypto",
    "education", "hardware", "data", "social", "devtools", "art", "productivity", "security",
];

/// Filler words that never count as a project keyword.
const STOPWORDS: &[&str] = &[
    "with", "that", "this", "from", "just", "have", "into", "your", "about", "what", "using",
    "built", "made", "make", "some", "more", "thing", "shipped", "launched", "first", "new",
];

pub fn is_complementary(a: &str, b: &str) -> bool {
    let one_way = |x: &str, y: &str| {
        COMPLEMENTARY_SKILLS
            .iter()
            .any(|(skill, partners)| *skill == x && partners.contains(&y))
    };
    one_way(a, b) || one_way(b, a)
}

/// Trim, lower-case and drop empties.
pub fn normalized_set(items: &BTreeSet<String>) -> BTreeSet<String> {
    items
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Whitespace tokens, lower-cased, edge punctuation trimmed.
pub fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|t| !t.is_empty())
}

/// Project keywords: whitespace tokens longer than 3 characters.
pub fn keywords(text: &str) -> BTreeSet<String> {
    tokens(text).filter(|t| t.chars().count() > 3).collect()
}

/// Keywords minus filler words. Used for ship announcements.
pub fn topic_keywords(text: &str) -> BTreeSet<String> {
    keywords(text)
        .into_iter()
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Experience level: `min(5, |tags| + |interests| + (building ? 1 : 0))`.
pub fn experience_level(profile: &Profile) -> usize {
    let building = usize::from(profile.building_text().is_some());
    (normalized_set(&profile.tags).len() + normalized_set(&profile.interests).len() + building).min(5)
}

/// Computes signals for a pair of profiles under one mode's weight table.
#[derive(Debug, Clone, Copy)]
pub struct SignalExtractor {
    config: ModeConfig,
}

impl SignalExtractor {
    pub fn new(config: ModeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ModeConfig {
        &self.config
    }

    /// All signals between `a` and `b`, in computation order.
    pub fn extract(&self, a: &Profile, b: &Profile) -> Vec<Signal> {
        let cfg = &self.config;
        let mut signals = Vec::new();

        let a_interests = normalized_set(&a.interests);
        let b_interests = normalized_set(&b.interests);
        for interest in a_interests.intersection(&b_interests) {
            signals.push(Signal {
                kind: SignalKind::SharedInterest,
                weight: cfg.interest_weight,
                evidence: format!("both into {}", interest),
            });
        }

        let a_tags = normalized_set(&a.tags);
        let b_tags = normalized_set(&b.tags);
        for tag in a_tags.intersection(&b_tags) {
            signals.push(Signal {
                kind: SignalKind::SharedSkill,
                weight: cfg.skill_weight,
                evidence: format!("both do {}", tag),
            });
        }

        // Each unordered skill pairing counts once, whichever side holds which skill
        let mut pairings: BTreeSet<(String, String)> = BTreeSet::new();
        for x in &a_tags {
            for y in &b_tags {
                if x != y && is_complementary(x, y) {
                    pairings.insert((x.clone(), y.clone()));
                }
            }
        }
        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
        for (x, y) in pairings {
            let canonical = if x < y { (x.clone(), y.clone()) } else { (y.clone(), x.clone()) };
            if !seen.insert(canonical) {
                continue;
            }
            signals.push(Signal {
                kind: SignalKind::ComplementarySkill,
                weight: cfg.complement_weight,
                evidence: format!("{} + {}", x, y),
            });
        }

        if let (Some(a_building), Some(b_building)) = (a.building_text(), b.building_text()) {
            for word in shared_project_keywords(a_building, b_building, cfg.keyword_policy) {
                signals.push(Signal {
                    kind: SignalKind::ProjectKeyword,
                    weight: cfg.keyword_weight,
                    evidence: format!("both building {}", word),
                });
            }
        }

        if let Some(weight) = cfg.experience_weight {
            let (la, lb) = (experience_level(a), experience_level(b));
            if la.abs_diff(lb) <= 1 {
                signals.push(Signal {
                    kind: SignalKind::ExperienceLevel,
                    weight,
                    evidence: "similar experience level".to_string(),
                });
            }
        }

        if let Some(bonus) = cfg.online_now_bonus {
            signals.push(Signal {
                kind: SignalKind::OnlineNow,
                weight: bonus,
                evidence: "both online right now".to_string(),
            });
        } else if let Some(signal) = co_activity(a, b, cfg) {
            signals.push(signal);
        }

        signals
    }
}

fn shared_project_keywords(a: &str, b: &str, policy: KeywordPolicy) -> Vec<String> {
    match policy {
        KeywordPolicy::AnyToken => keywords(a).intersection(&keywords(b)).cloned().collect(),
        KeywordPolicy::DomainList => {
            let a_tokens: BTreeSet<String> = tokens(a).collect();
            let b_tokens: BTreeSet<String> = tokens(b).collect();
            DOMAIN_KEYWORDS
                .iter()
                .filter(|k| a_tokens.contains(**k) && b_tokens.contains(**k))
                .map(|k| k.to_string())
                .collect()
        }
    }
}

fn co_activity(a: &Profile, b: &Profile, cfg: &ModeConfig) -> Option<Signal> {
    // Epoch timestamps mean "never seen": no signal
    if a.last_seen.timestamp() <= 0 || b.last_seen.timestamp() <= 0 {
        return None;
    }
    let gap_minutes = (a.last_seen - b.last_seen).num_minutes().abs();
    if gap_minutes <= cfg.co_active_close_hours * 60 {
        Some(Signal {
            kind: SignalKind::CoActivity,
            weight: cfg.co_active_close_weight,
            evidence: format!("active within {}h of each other", cfg.co_active_close_hours),
        })
    } else if gap_minutes <= cfg.co_active_loose_hours * 60 {
        Some(Signal {
            kind: SignalKind::CoActivity,
            weight: cfg.co_active_loose_weight,
            evidence: format!("active within {}h of each other", cfg.co_active_loose_hours),
        })
    } else {
        None
    }
}
