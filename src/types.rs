use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::MatchError;

// =============================================================================
// Profiles
// =============================================================================

/// One community member, as read from the profile repository.
///
/// The matching core treats a `Profile` as an immutable snapshot for the
/// duration of one scoring pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub handle: String,
    /// Free-text description of what the member is working on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub building: Option<String>,
    #[serde(default)]
    pub interests: BTreeSet<String>,
    /// Skills.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Append-only, most recent last.
    #[serde(default)]
    pub ships: Vec<Ship>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Profile {
    /// A bare profile first seen (and last seen) at `at`.
    pub fn new(handle: &str, at: DateTime<Utc>) -> Self {
        Self {
            handle: handle.to_string(),
            building: None,
            interests: BTreeSet::new(),
            tags: BTreeSet::new(),
            ships: Vec::new(),
            first_seen: at,
            last_seen: at,
            connections: Vec::new(),
        }
    }

    /// Non-empty, trimmed building text.
    pub fn building_text(&self) -> Option<&str> {
        self.building
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
    }

    pub fn is_connected_to(&self, peer: &str) -> bool {
        self.connections.iter().any(|c| c.peer_handle == peer)
    }

    /// Most recent ship, if any.
    pub fn latest_ship(&self) -> Option<&Ship> {
        self.ships.iter().max_by_key(|s| s.timestamp)
    }
}

/// Something a member shipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ship {
    pub what: String,
    pub timestamp: DateTime<Utc>,
}

/// An existing connection between two members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub peer_handle: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub reason: String,
}

/// Partial profile update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default)]
    pub building: Option<String>,
    #[serde(default)]
    pub interests: Option<BTreeSet<String>>,
    #[serde(default)]
    pub tags: Option<BTreeSet<String>>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ship: Option<Ship>,
}

impl ProfileUpdate {
    /// Apply the update to an in-memory profile.
    pub fn apply_to(&self, profile: &mut Profile) {
        if let Some(building) = &self.building {
            profile.building = Some(building.clone());
        }
        if let Some(interests) = &self.interests {
            profile.interests = interests.clone();
        }
        if let Some(tags) = &self.tags {
            profile.tags = tags.clone();
        }
        if let Some(seen) = self.last_seen {
            if seen > profile.last_seen {
                profile.last_seen = seen;
            }
        }
        if let Some(ship) = &self.ship {
            profile.ships.push(ship.clone());
        }
    }
}

// =============================================================================
// Handles
// =============================================================================

fn handle_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{0,38}$").expect("static handle regex"))
}

/// Normalize a user-supplied handle: trims, drops a leading `@`, lower-cases.
///
/// Returns `InvalidInput` for anything that is not a well-formed handle.
pub fn normalize_handle(raw: &str) -> Result<String, MatchError> {
    let trimmed = raw.trim();
    let handle = trimmed.strip_prefix('@').unwrap_or(trimmed).to_lowercase();
    if handle_pattern().is_match(&handle) {
        Ok(handle)
    } else {
        Err(MatchError::InvalidInput(format!("malformed handle {:?}", raw)))
    }
}

// =============================================================================
// Suggestion history
// =============================================================================

/// Unordered pair of handles. `PairKey::new(a, b) == PairKey::new(b, a)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    low: String,
    high: String,
}

impl PairKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self { low: a.to_string(), high: b.to_string() }
        } else {
            Self { low: b.to_string(), high: a.to_string() }
        }
    }

    /// Key for topic-level records (trending clusters) that involve no single pair.
    pub fn topic(topic: &str) -> Self {
        let key = format!("#{}", topic);
        Self { low: key.clone(), high: key }
    }

    pub fn handles(&self) -> (&str, &str) {
        (&self.low, &self.high)
    }

    pub fn is_topic(&self) -> bool {
        self.low.starts_with('#')
    }

    /// Storage form: `low|high`.
    pub fn as_storage_key(&self) -> String {
        format!("{}|{}", self.low, self.high)
    }

    pub fn from_storage_key(key: &str) -> Option<Self> {
        let (low, high) = key.split_once('|')?;
        Some(Self::new(low, high))
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <> {}", self.low, self.high)
    }
}

/// What kind of suggestion was made. Cooldowns are tracked per type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionType {
    Discovery,
    Workshop,
    Dormant,
    BothOnline,
    JustJoined,
    TrendingTopic,
    JustShipped,
}

impl SuggestionType {
    pub const ALL: [SuggestionType; 7] = [
        SuggestionType::Discovery,
        SuggestionType::Workshop,
        SuggestionType::Dormant,
        SuggestionType::BothOnline,
        SuggestionType::JustJoined,
        SuggestionType::TrendingTopic,
        SuggestionType::JustShipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionType::Discovery => "discovery",
            SuggestionType::Workshop => "workshop",
            SuggestionType::Dormant => "dormant",
            SuggestionType::BothOnline => "both_online",
            SuggestionType::JustJoined => "just_joined",
            SuggestionType::TrendingTopic => "trending_topic",
            SuggestionType::JustShipped => "just_shipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

/// A persisted record that a pair was suggested. Read back on every later
/// pass to keep the same pair from being suggested again too soon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionRecord {
    pub pair_key: PairKey,
    pub suggestion_type: SuggestionType,
    pub suggested_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// How long a pair stays ineligible after being suggested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Cooldown {
    /// Never suggest the pair again for this type.
    #[default]
    Forever,
    Hours(u32),
}

impl Cooldown {
    /// Whether a pair last suggested at `last` may be suggested again at `now`.
    pub fn has_elapsed(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Cooldown::Forever => false,
            Cooldown::Hours(h) => now - last >= Duration::hours(i64::from(*h)),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Application configuration, read from `~/.crossings/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// SQLite file. Defaults to `~/.crossings/crossings.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
    #[serde(default)]
    pub thresholds: Thresholds,
    /// Per-type cooldowns; unlisted types never repeat.
    #[serde(default)]
    pub cooldowns: HashMap<SuggestionType, Cooldown>,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            thresholds: Thresholds::default(),
            cooldowns: HashMap::new(),
            monitor: MonitorConfig::default(),
            default_limit: default_limit(),
        }
    }
}

fn default_limit() -> usize {
    5
}

/// Minimum scores per call site. A match must score strictly above these.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    #[serde(default = "default_discovery_threshold")]
    pub discovery: f64,
    #[serde(default = "default_workshop_threshold")]
    pub workshop: f64,
    #[serde(default = "default_both_online_threshold")]
    pub both_online: f64,
    #[serde(default = "default_dormant_threshold")]
    pub dormant: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            discovery: default_discovery_threshold(),
            workshop: default_workshop_threshold(),
            both_online: default_both_online_threshold(),
            dormant: default_dormant_threshold(),
        }
    }
}

fn default_discovery_threshold() -> f64 {
    10.0
}
fn default_workshop_threshold() -> f64 {
    20.0
}
fn default_both_online_threshold() -> f64 {
    30.0
}
fn default_dormant_threshold() -> f64 {
    15.0
}

/// Proactive monitor timing and windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// "Online now" means active within this many minutes.
    #[serde(default = "default_online_window_minutes")]
    pub online_window_minutes: i64,
    #[serde(default = "default_new_member_window_minutes")]
    pub new_member_window_minutes: i64,
    #[serde(default = "default_ship_window_minutes")]
    pub ship_window_minutes: i64,
    #[serde(default = "default_dormant_after_days")]
    pub dormant_after_days: i64,
    #[serde(default = "default_dormant_max_days")]
    pub dormant_max_days: i64,
    #[serde(default = "default_trend_window_hours")]
    pub trend_window_hours: i64,
    #[serde(default = "default_cluster_half_life_days")]
    pub cluster_half_life_days: f64,
    /// Cap on candidates a single detector may surface per tick.
    #[serde(default = "default_max_per_detector")]
    pub max_per_detector: usize,
    /// Run the digest detectors every Nth scheduled tick.
    #[serde(default = "default_digest_every_ticks")]
    pub digest_every_ticks: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            online_window_minutes: default_online_window_minutes(),
            new_member_window_minutes: default_new_member_window_minutes(),
            ship_window_minutes: default_ship_window_minutes(),
            dormant_after_days: default_dormant_after_days(),
            dormant_max_days: default_dormant_max_days(),
            trend_window_hours: default_trend_window_hours(),
            cluster_half_life_days: default_cluster_half_life_days(),
            max_per_detector: default_max_per_detector(),
            digest_every_ticks: default_digest_every_ticks(),
        }
    }
}

fn default_tick_interval_secs() -> u64 {
    300
}
fn default_online_window_minutes() -> i64 {
    10
}
fn default_new_member_window_minutes() -> i64 {
    60
}
fn default_ship_window_minutes() -> i64 {
    120
}
fn default_dormant_after_days() -> i64 {
    7
}
fn default_dormant_max_days() -> i64 {
    90
}
fn default_trend_window_hours() -> i64 {
    168
}
fn default_cluster_half_life_days() -> f64 {
    3.0
}
fn default_max_per_detector() -> usize {
    10
}
fn default_digest_every_ticks() -> u64 {
    12
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_handle() {
        assert_eq!(normalize_handle("@Alice").unwrap(), "alice");
        assert_eq!(normalize_handle("  bob_2 ").unwrap(), "bob_2");
        assert!(normalize_handle("").is_err());
        assert!(normalize_handle("@").is_err());
        assert!(normalize_handle("has space").is_err());
        assert!(normalize_handle("-leading").is_err());
        assert!(normalize_handle(&"x".repeat(40)).is_err());
    }

    #[test]
    fn test_pair_key_is_unordered() {
        assert_eq!(PairKey::new("alice", "bob"), PairKey::new("bob", "alice"));
        let key = PairKey::new("zed", "amy");
        assert_eq!(key.handles(), ("amy", "zed"));
        assert_eq!(PairKey::from_storage_key(&key.as_storage_key()), Some(key));
    }

    #[test]
    fn test_topic_key_differs_from_pairs() {
        assert_ne!(PairKey::topic("rust"), PairKey::new("rust", "rust"));
    }

    #[test]
    fn test_cooldown_elapsed() {
        let last = Utc::now();
        assert!(!Cooldown::Forever.has_elapsed(last, last + Duration::days(3650)));
        assert!(!Cooldown::Hours(24).has_elapsed(last, last + Duration::hours(23)));
        assert!(Cooldown::Hours(24).has_elapsed(last, last + Duration::hours(24)));
    }

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config: Config = serde_json::from_str("{}").expect("empty config parses");
        assert_eq!(config.thresholds.discovery, 10.0);
        assert_eq!(config.thresholds.both_online, 30.0);
        assert_eq!(config.monitor.online_window_minutes, 10);
        assert_eq!(config.default_limit, 5);
        assert!(config.cooldowns.is_empty(), "unlisted types default to forever");
    }

    #[test]
    fn test_config_cooldown_parsing() {
        let config: Config = serde_json::from_str(
            r#"{ "cooldowns": { "trending_topic": { "hours": 168 }, "discovery": "forever" },
                 "thresholds": { "workshop": 25 } }"#,
        )
        .expect("config parses");
        assert_eq!(config.cooldowns.get(&SuggestionType::TrendingTopic), Some(&Cooldown::Hours(168)));
        assert_eq!(config.cooldowns.get(&SuggestionType::Discovery), Some(&Cooldown::Forever));
        assert_eq!(config.thresholds.workshop, 25.0);
        assert_eq!(config.thresholds.dormant, 15.0, "unlisted thresholds keep defaults");
    }

    #[test]
    fn test_update_never_moves_last_seen_backwards() {
        let now = Utc::now();
        let mut profile = Profile::new("alice", now);
        ProfileUpdate { last_seen: Some(now - Duration::hours(1)), ..Default::default() }
            .apply_to(&mut profile);
        assert_eq!(profile.last_seen, now);
    }
}
