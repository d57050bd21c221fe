//! Profile repository seam.
//!
//! The matching core never reaches into a global store: every component is
//! handed an `Arc<dyn ProfileRepository>`. Two implementations ship here:
//! `SqliteRepository` over [`ProfileDb`] and `MemoryRepository` for tests and
//! embedding.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::db::{DbError, ProfileDb};
use crate::error::MatchError;
use crate::matching::dedup::SuggestionStore;
use crate::types::{Connection, PairKey, Profile, ProfileUpdate, SuggestionRecord, SuggestionType};

/// Read access to member profiles and connection history.
///
/// All reads are synchronous. A failed read surfaces as
/// `MatchError::TransientRepository`.
pub trait ProfileRepository: Send + Sync {
    fn get_profile(&self, handle: &str) -> Result<Option<Profile>, MatchError>;

    /// Snapshot of the whole population. May be large.
    fn get_all_profiles(&self) -> Result<Vec<Profile>, MatchError>;

    /// Whether `a` and `b` are connected, in either direction.
    fn has_connection(&self, a: &str, b: &str) -> Result<bool, MatchError>;

    /// Apply a partial update. Used by profile-editing callers, not by matching.
    fn update_profile(&self, handle: &str, update: &ProfileUpdate) -> Result<(), MatchError>;
}

// =============================================================================
// SQLite
// =============================================================================

/// `ProfileDb` behind a mutex, shareable between the CLI, the on-demand
/// service and the scanner loop.
pub struct SqliteRepository {
    db: Mutex<ProfileDb>,
}

impl SqliteRepository {
    pub fn new(db: ProfileDb) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Run a closure against the underlying database.
    pub fn with_db<T>(&self, f: impl FnOnce(&ProfileDb) -> Result<T, DbError>) -> Result<T, MatchError> {
        let db = self.db.lock();
        f(&db).map_err(MatchError::from)
    }
}

impl ProfileRepository for SqliteRepository {
    fn get_profile(&self, handle: &str) -> Result<Option<Profile>, MatchError> {
        self.with_db(|db| db.get_profile(handle))
    }

    fn get_all_profiles(&self) -> Result<Vec<Profile>, MatchError> {
        self.with_db(|db| db.get_all_profiles())
    }

    fn has_connection(&self, a: &str, b: &str) -> Result<bool, MatchError> {
        self.with_db(|db| db.has_connection(a, b))
    }

    fn update_profile(&self, handle: &str, update: &ProfileUpdate) -> Result<(), MatchError> {
        if self.with_db(|db| db.update_profile(handle, update))? {
            Ok(())
        } else {
            Err(MatchError::NotFound(handle.to_string()))
        }
    }
}

impl SuggestionStore for SqliteRepository {
    fn last_suggested(
        &self,
        key: &PairKey,
        kind: SuggestionType,
    ) -> Result<Option<DateTime<Utc>>, MatchError> {
        self.with_db(|db| db.last_suggested(key, kind))
    }

    fn record_all(&self, records: &[SuggestionRecord]) -> Result<(), MatchError> {
        self.with_db(|db| db.record_suggestions(records))
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Process-local repository. Reads can be switched off to exercise the
/// transient-failure paths.
#[derive(Default)]
pub struct MemoryRepository {
    profiles: RwLock<BTreeMap<String, Profile>>,
    unavailable: RwLock<bool>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: impl IntoIterator<Item = Profile>) -> Self {
        let repo = Self::new();
        for p in profiles {
            repo.insert(p);
        }
        repo
    }

    pub fn insert(&self, profile: Profile) {
        self.profiles.write().insert(profile.handle.clone(), profile);
    }

    /// Connect two members, recording the connection on both profiles.
    pub fn connect(&self, a: &str, b: &str, reason: &str, at: DateTime<Utc>) {
        let mut profiles = self.profiles.write();
        for (me, peer) in [(a, b), (b, a)] {
            if let Some(p) = profiles.get_mut(me) {
                if !p.is_connected_to(peer) {
                    p.connections.push(Connection {
                        peer_handle: peer.to_string(),
                        timestamp: at,
                        reason: reason.to_string(),
                    });
                }
            }
        }
    }

    /// Simulate a backing store outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write() = unavailable;
    }

    fn check_available(&self) -> Result<(), MatchError> {
        if *self.unavailable.read() {
            Err(MatchError::TransientRepository("memory repository marked unavailable".into()))
        } else {
            Ok(())
        }
    }
}

impl ProfileRepository for MemoryRepository {
    fn get_profile(&self, handle: &str) -> Result<Option<Profile>, MatchError> {
        self.check_available()?;
        Ok(self.profiles.read().get(handle).cloned())
    }

    fn get_all_profiles(&self) -> Result<Vec<Profile>, MatchError> {
        self.check_available()?;
        Ok(self.profiles.read().values().cloned().collect())
    }

    fn has_connection(&self, a: &str, b: &str) -> Result<bool, MatchError> {
        self.check_available()?;
        let profiles = self.profiles.read();
        let one_way = |x: &str, y: &str| profiles.get(x).is_some_and(|p| p.is_connected_to(y));
        Ok(one_way(a, b) || one_way(b, a))
    }

    fn update_profile(&self, handle: &str, update: &ProfileUpdate) -> Result<(), MatchError> {
        self.check_available()?;
        let mut profiles = self.profiles.write();
        let profile = profiles
            .get_mut(handle)
            .ok_or_else(|| MatchError::NotFound(handle.to_string()))?;
        update.apply_to(profile);
        Ok(())
    }
}
