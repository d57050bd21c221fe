//! Suggestion deduplication.
//!
//! A pair with a connection (either direction) is never eligible again. A pair
//! already suggested for a type stays ineligible until that type's cooldown
//! elapses. Writes are serialized per pair key so an on-demand request and a
//! monitor tick cannot both record the same pair.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::error::MatchError;
use crate::repository::ProfileRepository;
use crate::types::{Config, Cooldown, PairKey, SuggestionRecord, SuggestionType};

/// Persistent suggestion history.
pub trait SuggestionStore: Send + Sync {
    /// Most recent record for this key and type, if any.
    fn last_suggested(
        &self,
        key: &PairKey,
        kind: SuggestionType,
    ) -> Result<Option<DateTime<Utc>>, MatchError>;

    /// Persist a batch. All records land or none do.
    fn record_all(&self, records: &[SuggestionRecord]) -> Result<(), MatchError>;
}

/// In-process suggestion history. Writes can be made to fail for testing the
/// all-or-nothing tick commit.
#[derive(Default)]
pub struct MemorySuggestionStore {
    records: RwLock<Vec<SuggestionRecord>>,
    failing: AtomicBool,
}

impl MemorySuggestionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SuggestionRecord> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl SuggestionStore for MemorySuggestionStore {
    fn last_suggested(
        &self,
        key: &PairKey,
        kind: SuggestionType,
    ) -> Result<Option<DateTime<Utc>>, MatchError> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| &r.pair_key == key && r.suggestion_type == kind)
            .map(|r| r.suggested_at)
            .max())
    }

    fn record_all(&self, records: &[SuggestionRecord]) -> Result<(), MatchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MatchError::TransientRepository(
                "suggestion store rejected write".to_string(),
            ));
        }
        self.records.write().extend_from_slice(records);
        Ok(())
    }
}

/// Eligibility checks and record keeping for suggestions.
pub struct Deduplicator {
    repo: Arc<dyn ProfileRepository>,
    store: Arc<dyn SuggestionStore>,
    cooldowns: HashMap<SuggestionType, Cooldown>,
    locks: DashMap<PairKey, Arc<Mutex<()>>>,
}

impl Deduplicator {
    pub fn new(
        repo: Arc<dyn ProfileRepository>,
        store: Arc<dyn SuggestionStore>,
        config: &Config,
    ) -> Self {
        Self::with_cooldowns(repo, store, config.cooldowns.clone())
    }

    pub fn with_cooldowns(
        repo: Arc<dyn ProfileRepository>,
        store: Arc<dyn SuggestionStore>,
        cooldowns: HashMap<SuggestionType, Cooldown>,
    ) -> Self {
        Self {
            repo,
            store,
            cooldowns,
            locks: DashMap::new(),
        }
    }

    /// Unlisted types never repeat.
    pub fn cooldown_for(&self, kind: SuggestionType) -> Cooldown {
        self.cooldowns.get(&kind).copied().unwrap_or_default()
    }

    /// Whether `a` and `b` may be suggested to each other for `kind` at `now`.
    /// Symmetric in `a` and `b`.
    pub fn is_eligible(
        &self,
        a: &str,
        b: &str,
        kind: SuggestionType,
        now: DateTime<Utc>,
    ) -> Result<bool, MatchError> {
        if a == b {
            return Ok(false);
        }
        self.is_key_eligible(&PairKey::new(a, b), kind, now)
    }

    /// Eligibility by key. Topic keys skip the connection check.
    pub fn is_key_eligible(
        &self,
        key: &PairKey,
        kind: SuggestionType,
        now: DateTime<Utc>,
    ) -> Result<bool, MatchError> {
        if !key.is_topic() {
            let (low, high) = key.handles();
            if low == high || self.repo.has_connection(low, high)? {
                return Ok(false);
            }
        }
        match self.store.last_suggested(key, kind)? {
            None => Ok(true),
            Some(last) => Ok(self.cooldown_for(kind).has_elapsed(last, now)),
        }
    }

    /// Record a single suggestion. Returns false if the pair was no longer
    /// eligible by the time the lock was taken.
    pub fn record(
        &self,
        a: &str,
        b: &str,
        kind: SuggestionType,
        now: DateTime<Utc>,
    ) -> Result<bool, MatchError> {
        let committed = self.commit(&[SuggestionRecord {
            pair_key: PairKey::new(a, b),
            suggestion_type: kind,
            suggested_at: now,
            detail: None,
        }])?;
        Ok(!committed.is_empty())
    }

    /// Commit a batch of records in one write.
    ///
    /// Locks every key in the batch (sorted, so two batches never deadlock),
    /// re-checks eligibility under the locks, and writes the survivors. On
    /// error nothing is written. Returns the records that were written.
    pub fn commit(&self, records: &[SuggestionRecord]) -> Result<Vec<SuggestionRecord>, MatchError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let keys: BTreeSet<&PairKey> = records.iter().map(|r| &r.pair_key).collect();
        let _guards: Vec<_> = keys.iter().map(|k| self.lock_for(k).lock_arc()).collect();

        let mut seen = HashSet::new();
        let mut accepted = Vec::with_capacity(records.len());
        for record in records {
            if !seen.insert((record.pair_key.clone(), record.suggestion_type)) {
                continue;
            }
            if self.is_key_eligible(&record.pair_key, record.suggestion_type, record.suggested_at)? {
                accepted.push(record.clone());
            } else {
                log::debug!(
                    "Deduplicator: dropping {} ({}), already suggested",
                    record.pair_key,
                    record.suggestion_type.as_str()
                );
            }
        }

        self.store.record_all(&accepted)?;
        Ok(accepted)
    }

    fn lock_for(&self, key: &PairKey) -> Arc<Mutex<()>> {
        Arc::clone(
            &self
                .locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::repository::{MemoryRepository, SqliteRepository};
    use crate::types::Profile;

    fn setup(cooldowns: HashMap<SuggestionType, Cooldown>) -> (Arc<MemoryRepository>, Arc<MemorySuggestionStore>, Deduplicator) {
        let now = Utc::now();
        let repo = Arc::new(MemoryRepository::with_profiles([
            Profile::new("alice", now),
            Profile::new("bob", now),
            Profile::new("carol", now),
            Profile::new("dave", now),
        ]));
        let store = Arc::new(MemorySuggestionStore::new());
        let dedup = Deduplicator::with_cooldowns(repo.clone(), store.clone(), cooldowns);
        (repo, store, dedup)
    }

    #[test]
    fn test_record_then_ineligible_both_directions() {
        let (_, _, dedup) = setup(HashMap::new());
        let now = Utc::now();
        assert!(dedup.is_eligible("alice", "bob", SuggestionType::Discovery, now).unwrap());
        assert!(dedup.record("alice", "bob", SuggestionType::Discovery, now).unwrap());
        assert!(!dedup.is_eligible("alice", "bob", SuggestionType::Discovery, now).unwrap());
        assert!(!dedup.is_eligible("bob", "alice", SuggestionType::Discovery, now).unwrap());
        // Other types are tracked separately.
        assert!(dedup.is_eligible("bob", "alice", SuggestionType::Workshop, now).unwrap());
    }

    #[test]
    fn test_connected_pair_never_eligible() {
        let (repo, _, dedup) = setup(HashMap::new());
        let now = Utc::now();
        repo.connect("carol", "dave", "met at demo night", now);
        for kind in SuggestionType::ALL {
            assert!(!dedup.is_eligible("carol", "dave", kind, now).unwrap());
            assert!(!dedup.is_eligible("dave", "carol", kind, now).unwrap());
        }
    }

    #[test]
    fn test_self_pair_never_eligible() {
        let (_, _, dedup) = setup(HashMap::new());
        assert!(!dedup.is_eligible("alice", "alice", SuggestionType::Discovery, Utc::now()).unwrap());
    }

    #[test]
    fn test_hour_cooldown_expires() {
        let mut cooldowns = HashMap::new();
        cooldowns.insert(SuggestionType::BothOnline, Cooldown::Hours(24));
        let (_, _, dedup) = setup(cooldowns);
        let then = Utc::now() - Duration::hours(30);
        dedup.record("alice", "bob", SuggestionType::BothOnline, then).unwrap();

        assert!(!dedup
            .is_eligible("alice", "bob", SuggestionType::BothOnline, then + Duration::hours(23))
            .unwrap());
        assert!(dedup
            .is_eligible("alice", "bob", SuggestionType::BothOnline, then + Duration::hours(24))
            .unwrap());
    }

    #[test]
    fn test_commit_drops_duplicates_within_batch() {
        let (_, store, dedup) = setup(HashMap::new());
        let now = Utc::now();
        let rec = |a: &str, b: &str| SuggestionRecord {
            pair_key: PairKey::new(a, b),
            suggestion_type: SuggestionType::JustJoined,
            suggested_at: now,
            detail: None,
        };
        let written = dedup.commit(&[rec("alice", "bob"), rec("bob", "alice"), rec("carol", "dave")]).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_failed_write_records_nothing() {
        let (_, store, dedup) = setup(HashMap::new());
        store.set_failing(true);
        let err = dedup.record("alice", "bob", SuggestionType::Discovery, Utc::now()).unwrap_err();
        assert!(err.is_retryable());
        store.set_failing(false);
        assert!(store.is_empty());
        assert!(dedup.is_eligible("alice", "bob", SuggestionType::Discovery, Utc::now()).unwrap());
    }

    #[test]
    fn test_topic_keys_skip_connection_check() {
        let (_, _, dedup) = setup(HashMap::new());
        let key = PairKey::topic("rust");
        let now = Utc::now();
        assert!(dedup.is_key_eligible(&key, SuggestionType::TrendingTopic, now).unwrap());
        dedup
            .commit(&[SuggestionRecord {
                pair_key: key.clone(),
                suggestion_type: SuggestionType::TrendingTopic,
                suggested_at: now,
                detail: Some("rust".to_string()),
            }])
            .unwrap();
        assert!(!dedup.is_key_eligible(&key, SuggestionType::TrendingTopic, now).unwrap());
    }

    #[test]
    fn test_concurrent_commits_record_pair_once() {
        let (_, store, dedup) = setup(HashMap::new());
        let dedup = Arc::new(dedup);
        let now = Utc::now();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let dedup = Arc::clone(&dedup);
                std::thread::spawn(move || {
                    let (a, b) = if i % 2 == 0 { ("alice", "bob") } else { ("bob", "alice") };
                    dedup.record(a, b, SuggestionType::Discovery, now).unwrap()
                })
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1, "exactly one writer should win the pair");
        assert_eq!(store.len(), 1, "pair must be recorded exactly once");
    }

    #[test]
    fn test_sqlite_store_backs_deduplicator() {
        let repo = Arc::new(SqliteRepository::new(crate::db::test_utils::test_db()));
        let now = Utc::now();
        repo.with_db(|db| {
            db.upsert_profile(&Profile::new("alice", now))?;
            db.upsert_profile(&Profile::new("bob", now))
        })
        .unwrap();
        let dedup = Deduplicator::new(repo.clone(), repo.clone(), &Config::default());
        assert!(dedup.record("bob", "alice", SuggestionType::Dormant, now).unwrap());
        assert!(!dedup.is_eligible("alice", "bob", SuggestionType::Dormant, now).unwrap());
    }
}
