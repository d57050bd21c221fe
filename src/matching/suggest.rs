//! On-demand suggestions and cluster queries.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::dedup::{Deduplicator, SuggestionStore};
use super::ranker::{MatchRanker, MatchResult};
use crate::error::MatchError;
use crate::repository::ProfileRepository;
use crate::signals::decay::window_start;
use crate::signals::scoring::{MatchMode, ModeConfig, ScoringEngine};
use crate::trends::{TopicCluster, TrendDetector};
use crate::types::{normalize_handle, Config, PairKey, Profile, SuggestionRecord};

/// Entry point for presentation layers: `suggest`, `suggest_and_record`, `clusters`.
pub struct MatchService {
    repo: Arc<dyn ProfileRepository>,
    dedup: Arc<Deduplicator>,
    config: Config,
}

impl MatchService {
    pub fn new(
        repo: Arc<dyn ProfileRepository>,
        store: Arc<dyn SuggestionStore>,
        config: Config,
    ) -> Self {
        let dedup = Arc::new(Deduplicator::new(repo.clone(), store, &config));
        Self::with_dedup(repo, dedup, config)
    }

    /// Share a deduplicator with the proactive monitor.
    pub fn with_dedup(repo: Arc<dyn ProfileRepository>, dedup: Arc<Deduplicator>, config: Config) -> Self {
        Self { repo, dedup, config }
    }

    pub fn dedup(&self) -> &Arc<Deduplicator> {
        &self.dedup
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self, mode: MatchMode) -> ScoringEngine {
        ScoringEngine::new(ModeConfig::with_thresholds(mode, &self.config.thresholds))
    }

    /// Ranked matches for one member. Read-only.
    ///
    /// An unknown handle is `NotFound`; an empty or fully filtered pool is
    /// `Ok(vec![])`.
    pub fn suggest(
        &self,
        for_handle: &str,
        mode: MatchMode,
        limit: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<Vec<MatchResult>, MatchError> {
        let handle = normalize_handle(for_handle)?;
        let me = self
            .repo
            .get_profile(&handle)?
            .ok_or_else(|| MatchError::NotFound(handle.clone()))?;
        let population = self.repo.get_all_profiles()?;

        let engine = self.engine(mode);
        let candidates: Vec<MatchResult> = population
            .iter()
            .filter(|c| c.handle != me.handle && self.in_pool(mode, c, now))
            .filter_map(|c| {
                let score = engine.evaluate(&me, c)?;
                log::debug!("MatchService: @{} ~ @{} scored {:.1}", me.handle, c.handle, score.total);
                Some(MatchResult::new(c, score, now))
            })
            .collect();

        let kind = mode.suggestion_type();
        let ranker = MatchRanker::new(engine.threshold(), limit.unwrap_or(self.config.default_limit));
        let ranked = ranker.rank(&me.handle, candidates, |peer| {
            self.dedup.is_eligible(&me.handle, peer, kind, now)
        })?;

        log::info!(
            "MatchService: {} {} match(es) for @{} out of {} member(s)",
            ranked.len(),
            mode.as_str(),
            me.handle,
            population.len().saturating_sub(1)
        );
        Ok(ranked)
    }

    /// `suggest`, then record what was returned so it is not repeated.
    /// Matches that lost a race with a concurrent writer are dropped.
    pub fn suggest_and_record(
        &self,
        for_handle: &str,
        mode: MatchMode,
        limit: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<Vec<MatchResult>, MatchError> {
        let handle = normalize_handle(for_handle)?;
        let mut results = self.suggest(&handle, mode, limit, now)?;
        let records: Vec<SuggestionRecord> = results
            .iter()
            .map(|r| SuggestionRecord {
                pair_key: PairKey::new(&handle, &r.handle),
                suggestion_type: mode.suggestion_type(),
                suggested_at: now,
                detail: r.reasons.first().cloned(),
            })
            .collect();

        let committed: HashSet<PairKey> = self
            .dedup
            .commit(&records)?
            .into_iter()
            .map(|r| r.pair_key)
            .collect();
        results.retain(|r| committed.contains(&PairKey::new(&handle, &r.handle)));
        Ok(results)
    }

    /// All topic clusters in the trailing window, largest first.
    ///
    /// A window longer than recorded time covers everything; a negative one
    /// is `InvalidInput`.
    pub fn clusters(&self, window_hours: i64, now: DateTime<Utc>) -> Result<Vec<TopicCluster>, MatchError> {
        if window_hours < 0 {
            return Err(MatchError::InvalidInput(format!(
                "window must be at least 0 hours, got {}",
                window_hours
            )));
        }
        let profiles = self.repo.get_all_profiles()?;
        let detector = TrendDetector::new(self.config.monitor.cluster_half_life_days);
        Ok(TrendDetector::ranked(detector.build_clusters(&profiles, window_hours, now)))
    }

    /// Which candidates a mode considers at all.
    fn in_pool(&self, mode: MatchMode, candidate: &Profile, now: DateTime<Utc>) -> bool {
        let monitor = &self.config.monitor;
        match mode {
            MatchMode::Discovery | MatchMode::Workshop => true,
            MatchMode::BothOnline => {
                candidate.last_seen >= window_start(now, Duration::try_minutes(monitor.online_window_minutes))
            }
            // Re-engage a quiet member with people who are around.
            MatchMode::Dormant => {
                candidate.last_seen >= window_start(now, Duration::try_days(monitor.dormant_after_days))
            }
        }
    }
}
