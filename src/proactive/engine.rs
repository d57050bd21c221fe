//! Proactive opportunity monitor.
//!
//! Manages a registry of opportunity detectors, runs them against a profile
//! snapshot, deduplicates candidates against the suggestion history, and
//! commits everything a tick emits in one write.
//!
//! States: `Idle -> Scanning -> Emitting -> Idle`. A tick with no candidates
//! goes straight back to `Idle`. Per-pair cooldowns live in the suggestion
//! history, not in the monitor. A tick that fails anywhere leaves the
//! suggestion history untouched.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::MatchError;
use crate::matching::dedup::Deduplicator;
use crate::repository::ProfileRepository;
use crate::signals::decay::window_start;
use crate::signals::scoring::{MatchMode, ModeConfig, ScoringEngine};
use crate::types::{Config, PairKey, Profile, SuggestionRecord, SuggestionType};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Idle,
    Scanning,
    Emitting,
}

/// Which detectors a sweep runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    /// Time-sensitive detectors, every tick.
    Realtime,
    /// Slower-moving detectors, every few ticks.
    Digest,
    All,
}

impl SweepMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "realtime" => Some(SweepMode::Realtime),
            "digest" => Some(SweepMode::Digest),
            "all" => Some(SweepMode::All),
            _ => None,
        }
    }
}

/// A candidate produced by a detector, before dedup.
#[derive(Debug, Clone)]
pub struct RawOpportunity {
    pub detector_name: String,
    pub kind: SuggestionType,
    pub primary: String,
    pub peer: Option<String>,
    pub topic: Option<String>,
    pub score: f64,
    pub reasons: Vec<String>,
    pub headline: String,
}

impl RawOpportunity {
    /// Dedup key: the member pair, or the topic when there is no peer.
    pub fn pair_key(&self) -> PairKey {
        match (&self.peer, &self.topic) {
            (Some(peer), _) => PairKey::new(&self.primary, peer),
            (None, Some(topic)) => PairKey::topic(topic),
            (None, None) => PairKey::new(&self.primary, &self.primary),
        }
    }
}

/// An emitted opportunity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub id: String,
    pub fingerprint: String,
    pub kind: SuggestionType,
    pub primary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub score: f64,
    pub reasons: Vec<String>,
    pub headline: String,
    pub detected_at: DateTime<Utc>,
}

/// What one tick did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub mode: SweepMode,
    pub started_at: DateTime<Utc>,
    /// Candidates per detector, before dedup.
    pub candidates: BTreeMap<String, usize>,
    pub opportunities: Vec<Opportunity>,
    pub transitions: Vec<MonitorState>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.opportunities.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// Another tick was still running.
    Skipped,
    Completed(TickReport),
}

/// Snapshot passed to each detector.
pub struct DetectorContext<'a> {
    pub profiles: &'a [Profile],
    pub config: &'a Config,
    pub now: DateTime<Utc>,
}

impl<'a> DetectorContext<'a> {
    /// Members whose last activity is at most `minutes` old.
    pub fn active_within(&self, minutes: i64) -> Vec<&'a Profile> {
        let cutoff = window_start(self.now, Duration::try_minutes(minutes));
        self.profiles.iter().filter(|p| p.last_seen >= cutoff).collect()
    }

    pub fn engine(&self, mode: MatchMode) -> ScoringEngine {
        ScoringEngine::new(ModeConfig::with_thresholds(mode, &self.config.thresholds))
    }
}

/// Function signature for an opportunity detector.
pub type DetectorFn = fn(&DetectorContext) -> Vec<RawOpportunity>;

/// A registered detector with the sweep modes it runs in.
pub struct DetectorEntry {
    pub name: String,
    pub modes: Vec<SweepMode>,
    /// Opportunities kept per primary member, counted after dedup.
    pub per_primary: Option<usize>,
    pub detector: DetectorFn,
}

impl DetectorEntry {
    fn runs_in(&self, mode: SweepMode) -> bool {
        mode == SweepMode::All || self.modes.contains(&mode)
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

pub struct ProactiveMonitor {
    repo: Arc<dyn ProfileRepository>,
    dedup: Arc<Deduplicator>,
    config: Config,
    detectors: Vec<DetectorEntry>,
    state: RwLock<MonitorState>,
    running: AtomicBool,
    last_report: RwLock<Option<TickReport>>,
}

/// Clears the running flag and returns to `Idle` however the tick ends.
struct TickGuard<'a>(&'a ProactiveMonitor);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        *self.0.state.write() = MonitorState::Idle;
        self.0.running.store(false, Ordering::Release);
    }
}

impl ProactiveMonitor {
    pub fn new(repo: Arc<dyn ProfileRepository>, dedup: Arc<Deduplicator>, config: Config) -> Self {
        Self {
            repo,
            dedup,
            config,
            detectors: Vec::new(),
            state: RwLock::new(MonitorState::Idle),
            running: AtomicBool::new(false),
            last_report: RwLock::new(None),
        }
    }

    /// Register a detector with the sweep modes it applies to.
    pub fn register(&mut self, name: &str, modes: &[SweepMode], detector: DetectorFn) {
        self.register_with_limit(name, modes, None, detector);
    }

    /// Register a detector that keeps at most `per_primary` eligible
    /// opportunities for each primary member.
    pub fn register_with_limit(
        &mut self,
        name: &str,
        modes: &[SweepMode],
        per_primary: Option<usize>,
        detector: DetectorFn,
    ) {
        self.detectors.push(DetectorEntry {
            name: name.to_string(),
            modes: modes.to_vec(),
            per_primary,
            detector,
        });
    }

    pub fn detector_names(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn state(&self) -> MonitorState {
        *self.state.read()
    }

    /// The most recent tick that emitted something.
    pub fn last_report(&self) -> Option<TickReport> {
        self.last_report.read().clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one sweep.
    ///
    /// Returns `Skipped` if a sweep is already in progress. A repository or
    /// store failure aborts the tick with nothing recorded.
    pub fn run_sweep(&self, mode: SweepMode, now: DateTime<Utc>) -> Result<TickOutcome, MatchError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            log::info!("ProactiveMonitor: tick already running, skipping");
            return Ok(TickOutcome::Skipped);
        }
        let _guard = TickGuard(self);

        let mut report = TickReport {
            mode,
            started_at: now,
            candidates: BTreeMap::new(),
            opportunities: Vec::new(),
            transitions: vec![MonitorState::Idle],
        };

        self.transition(&mut report, MonitorState::Scanning);
        let pending = self.scan(mode, now, &mut report)?;

        if pending.is_empty() {
            self.transition(&mut report, MonitorState::Idle);
            log::info!("ProactiveMonitor: {:?} sweep found no opportunities", mode);
            return Ok(TickOutcome::Completed(report));
        }

        self.transition(&mut report, MonitorState::Emitting);
        report.opportunities = self.emit(pending, now)?;

        self.transition(&mut report, MonitorState::Idle);

        log::info!(
            "ProactiveMonitor: {:?} sweep emitted {} opportunit(ies)",
            mode,
            report.opportunities.len()
        );
        if !report.is_empty() {
            *self.last_report.write() = Some(report.clone());
        }
        Ok(TickOutcome::Completed(report))
    }

    /// Run matching detectors and keep candidates that pass dedup, then cap
    /// per primary member and per detector. Ineligible candidates never use
    /// up a slot.
    fn scan(
        &self,
        mode: SweepMode,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<Vec<RawOpportunity>, MatchError> {
        let profiles = self.repo.get_all_profiles()?;
        let ctx = DetectorContext {
            profiles: &profiles,
            config: &self.config,
            now,
        };

        let mut seen: HashSet<(PairKey, SuggestionType)> = HashSet::new();
        let mut pending = Vec::new();

        for entry in self.detectors.iter().filter(|e| e.runs_in(mode)) {
            let mut raw = (entry.detector)(&ctx);
            raw.sort_by(|a, b| b.score.total_cmp(&a.score));
            report.candidates.insert(entry.name.clone(), raw.len());

            let mut kept = 0usize;
            let mut per_primary: HashMap<String, usize> = HashMap::new();
            for candidate in raw {
                if kept >= self.config.monitor.max_per_detector {
                    break;
                }
                let taken = per_primary.get(&candidate.primary).copied().unwrap_or(0);
                if entry.per_primary.is_some_and(|cap| taken >= cap) {
                    continue;
                }
                let key = candidate.pair_key();
                if !seen.insert((key.clone(), candidate.kind)) {
                    continue;
                }
                if !self.dedup.is_key_eligible(&key, candidate.kind, now)? {
                    continue;
                }
                kept += 1;
                *per_primary.entry(candidate.primary.clone()).or_insert(0) += 1;
                pending.push(candidate);
            }
        }

        Ok(pending)
    }

    /// Commit every pending candidate in one write, then build the opportunities.
    fn emit(&self, pending: Vec<RawOpportunity>, now: DateTime<Utc>) -> Result<Vec<Opportunity>, MatchError> {
        let records: Vec<SuggestionRecord> = pending
            .iter()
            .map(|c| SuggestionRecord {
                pair_key: c.pair_key(),
                suggestion_type: c.kind,
                suggested_at: now,
                detail: Some(c.headline.clone()),
            })
            .collect();

        let committed: HashSet<(PairKey, SuggestionType)> = self
            .dedup
            .commit(&records)?
            .into_iter()
            .map(|r| (r.pair_key, r.suggestion_type))
            .collect();

        let opportunities = pending
            .into_iter()
            .filter(|c| committed.contains(&(c.pair_key(), c.kind)))
            .map(|c| {
                let key = c.pair_key();
                let opportunity = Opportunity {
                    id: Uuid::new_v4().to_string(),
                    fingerprint: fingerprint(&[c.kind.as_str(), &key.as_storage_key()]),
                    kind: c.kind,
                    primary: c.primary,
                    peer: c.peer,
                    topic: c.topic,
                    score: c.score,
                    reasons: c.reasons,
                    headline: c.headline,
                    detected_at: now,
                };
                log::info!(
                    "ProactiveMonitor: [{}] {} ({})",
                    c.detector_name,
                    opportunity.headline,
                    opportunity.kind.as_str()
                );
                opportunity
            })
            .collect();

        Ok(opportunities)
    }

    fn transition(&self, report: &mut TickReport, next: MonitorState) {
        *self.state.write() = next;
        report.transitions.push(next);
    }
}

/// Matches surfaced per newcomer.
const JUST_JOINED_PER_MEMBER: usize = 3;
/// Peers surfaced per ship.
const JUST_SHIPPED_PER_MEMBER: usize = 3;
/// One nudge per dormant member.
const DORMANT_PER_MEMBER: usize = 1;

/// Build a monitor with all 5 detectors registered.
pub fn default_monitor(
    repo: Arc<dyn ProfileRepository>,
    dedup: Arc<Deduplicator>,
    config: Config,
) -> ProactiveMonitor {
    use super::detectors;

    let mut monitor = ProactiveMonitor::new(repo, dedup, config);

    monitor.register(
        "detect_both_online",
        &[SweepMode::Realtime],
        detectors::detect_both_online,
    );
    monitor.register_with_limit(
        "detect_just_joined",
        &[SweepMode::Realtime],
        Some(JUST_JOINED_PER_MEMBER),
        detectors::detect_just_joined,
    );
    monitor.register_with_limit(
        "detect_just_shipped",
        &[SweepMode::Realtime],
        Some(JUST_SHIPPED_PER_MEMBER),
        detectors::detect_just_shipped,
    );
    monitor.register(
        "detect_trending_topic",
        &[SweepMode::Digest],
        detectors::detect_trending_topic,
    );
    monitor.register_with_limit(
        "detect_dormant_reengagement",
        &[SweepMode::Digest],
        Some(DORMANT_PER_MEMBER),
        detectors::detect_dormant_reengagement,
    );

    monitor
}

/// Compute a stable fingerprint from key components.
pub fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"|");
    }
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
