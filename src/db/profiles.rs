use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::*;
use crate::types::{Connection as PeerConnection, Profile, ProfileUpdate, Ship};

impl ProfileDb {
    // =========================================================================
    // Profiles
    // =========================================================================

    /// Insert or update a profile and merge in its ships and connections.
    ///
    /// `last_seen` never moves backwards, `first_seen` never moves forwards and
    /// ships already on record are kept, so re-importing an older export is
    /// harmless.
    pub fn upsert_profile(&self, profile: &Profile) -> Result<(), DbError> {
        self.with_transaction(|db| {
            db.conn.execute(
                "INSERT INTO profiles (handle, building, interests, tags, first_seen, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(handle) DO UPDATE SET
                    building = excluded.building,
                    interests = excluded.interests,
                    tags = excluded.tags,
                    first_seen = MIN(profiles.first_seen, excluded.first_seen),
                    last_seen = MAX(profiles.last_seen, excluded.last_seen)",
                params![
                    profile.handle,
                    profile.building,
                    encode_string_set(&profile.interests),
                    encode_string_set(&profile.tags),
                    fmt_timestamp(&profile.first_seen),
                    fmt_timestamp(&profile.last_seen),
                ],
            )?;

            for ship in &profile.ships {
                db.insert_ship(&profile.handle, ship)?;
            }
            for conn in &profile.connections {
                db.add_connection(&profile.handle, &conn.peer_handle, &conn.reason, conn.timestamp)?;
            }
            Ok(())
        })
    }

    /// Look up a single profile by handle.
    pub fn get_profile(&self, handle: &str) -> Result<Option<Profile>, DbError> {
        let profile = self
            .conn
            .query_row(
                "SELECT handle, building, interests, tags, first_seen, last_seen
                 FROM profiles WHERE handle = ?1",
                params![handle],
                Self::map_profile_row,
            )
            .optional()?;

        let Some(mut profile) = profile else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT what, shipped_at FROM ships WHERE handle = ?1 ORDER BY shipped_at, id",
        )?;
        let ships = stmt.query_map(params![handle], |row| {
            Ok(Ship {
                what: row.get(0)?,
                timestamp: parse_timestamp(&row.get::<_, String>(1)?),
            })
        })?;
        for ship in ships {
            profile.ships.push(ship?);
        }

        profile.connections = self.connections_for(handle)?;
        Ok(Some(profile))
    }

    /// Snapshot of every profile, ships and connections included.
    ///
    /// Three queries regardless of population size.
    pub fn get_all_profiles(&self) -> Result<Vec<Profile>, DbError> {
        let mut ships_by_handle: HashMap<String, Vec<Ship>> = HashMap::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT handle, what, shipped_at FROM ships ORDER BY shipped_at, id")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    Ship {
                        what: row.get(1)?,
                        timestamp: parse_timestamp(&row.get::<_, String>(2)?),
                    },
                ))
            })?;
            for row in rows {
                let (handle, ship) = row?;
                ships_by_handle.entry(handle).or_default().push(ship);
            }
        }

        let mut conns_by_handle: HashMap<String, Vec<PeerConnection>> = HashMap::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT handle_a, handle_b, reason, connected_at FROM connections")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    parse_timestamp(&row.get::<_, String>(3)?),
                ))
            })?;
            for row in rows {
                let (a, b, reason, at) = row?;
                conns_by_handle.entry(a.clone()).or_default().push(PeerConnection {
                    peer_handle: b.clone(),
                    timestamp: at,
                    reason: reason.clone(),
                });
                conns_by_handle.entry(b).or_default().push(PeerConnection {
                    peer_handle: a,
                    timestamp: at,
                    reason,
                });
            }
        }

        let mut stmt = self.conn.prepare(
            "SELECT handle, building, interests, tags, first_seen, last_seen
             FROM profiles ORDER BY handle",
        )?;
        let rows = stmt.query_map([], Self::map_profile_row)?;
        let mut profiles = Vec::new();
        for row in rows {
            let mut profile = row?;
            profile.ships = ships_by_handle.remove(&profile.handle).unwrap_or_default();
            profile.connections = conns_by_handle.remove(&profile.handle).unwrap_or_default();
            profiles.push(profile);
        }
        Ok(profiles)
    }

    /// Apply a partial update. Returns false if the handle does not exist.
    pub fn update_profile(&self, handle: &str, update: &ProfileUpdate) -> Result<bool, DbError> {
        self.with_transaction(|db| {
            let exists: bool = db.conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM profiles WHERE handle = ?1)",
                params![handle],
                |row| row.get(0),
            )?;
            if !exists {
                return Ok(false);
            }

            if let Some(building) = &update.building {
                db.conn.execute(
                    "UPDATE profiles SET building = ?2 WHERE handle = ?1",
                    params![handle, building],
                )?;
            }
            if let Some(interests) = &update.interests {
                db.conn.execute(
                    "UPDATE profiles SET interests = ?2 WHERE handle = ?1",
                    params![handle, encode_string_set(interests)],
                )?;
            }
            if let Some(tags) = &update.tags {
                db.conn.execute(
                    "UPDATE profiles SET tags = ?2 WHERE handle = ?1",
                    params![handle, encode_string_set(tags)],
                )?;
            }
            if let Some(seen) = update.last_seen {
                db.touch_last_seen(handle, seen)?;
            }
            if let Some(ship) = &update.ship {
                db.insert_ship(handle, ship)?;
            }
            Ok(true)
        })
    }

    /// Move `last_seen` forward (never backwards).
    pub fn touch_last_seen(&self, handle: &str, at: DateTime<Utc>) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE profiles SET last_seen = ?2 WHERE handle = ?1 AND last_seen < ?2",
            params![handle, fmt_timestamp(&at)],
        )?;
        Ok(())
    }

    /// Append a ship to a member's history. Recording the same ship twice is a no-op.
    pub fn add_ship(&self, handle: &str, ship: &Ship) -> Result<(), DbError> {
        self.insert_ship(handle, ship)
    }

    fn insert_ship(&self, handle: &str, ship: &Ship) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO ships (handle, what, shipped_at) VALUES (?1, ?2, ?3)",
            params![handle, ship.what, fmt_timestamp(&ship.timestamp)],
        )?;
        Ok(())
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Record a connection between two members. Idempotent per unordered pair.
    pub fn add_connection(
        &self,
        a: &str,
        b: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        if a == b {
            return Ok(());
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        self.conn.execute(
            "INSERT OR IGNORE INTO connections (handle_a, handle_b, reason, connected_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![low, high, reason, fmt_timestamp(&at)],
        )?;
        Ok(())
    }

    /// Whether the two members are connected, in either direction.
    pub fn has_connection(&self, a: &str, b: &str) -> Result<bool, DbError> {
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let found: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM connections WHERE handle_a = ?1 AND handle_b = ?2)",
            params![low, high],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    fn connections_for(&self, handle: &str) -> Result<Vec<PeerConnection>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT CASE WHEN handle_a = ?1 THEN handle_b ELSE handle_a END,
                    reason, connected_at
             FROM connections WHERE handle_a = ?1 OR handle_b = ?1
             ORDER BY connected_at",
        )?;
        let rows = stmt.query_map(params![handle], |row| {
            Ok(PeerConnection {
                peer_handle: row.get(0)?,
                reason: row.get(1)?,
                timestamp: parse_timestamp(&row.get::<_, String>(2)?),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn map_profile_row(row: &Row) -> rusqlite::Result<Profile> {
        let interests: Option<String> = row.get(2)?;
        let tags: Option<String> = row.get(3)?;
        Ok(Profile {
            handle: row.get(0)?,
            building: row.get(1)?,
            interests: parse_string_set(interests.as_deref()),
            tags: parse_string_set(tags.as_deref()),
            ships: Vec::new(),
            first_seen: parse_timestamp(&row.get::<_, String>(4)?),
            last_seen: parse_timestamp(&row.get::<_, String>(5)?),
            connections: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Duration;

    use super::*;
    use crate::db::test_utils::test_db;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn sample(handle: &str) -> Profile {
        let now = Utc::now();
        let mut p = Profile::new(handle, now - Duration::days(3));
        p.last_seen = now;
        p.building = Some("ai chat app".into());
        p.interests = set(&["ai", "music"]);
        p.tags = set(&["frontend"]);
        p.ships.push(Ship { what: "landing page".into(), timestamp: now - Duration::hours(1) });
        p
    }

    #[test]
    fn test_upsert_and_get_round_trip() {
        let db = test_db();
        let alice = sample("alice");
        db.upsert_profile(&alice).expect("upsert");

        let loaded = db.get_profile("alice").expect("get").expect("present");
        assert_eq!(loaded.interests, alice.interests);
        assert_eq!(loaded.tags, alice.tags);
        assert_eq!(loaded.building, alice.building);
        assert_eq!(loaded.ships.len(), 1);
        assert!(db.get_profile("nobody").unwrap().is_none());
    }

    #[test]
    fn test_connections_are_symmetric() {
        let db = test_db();
        db.upsert_profile(&sample("carol")).unwrap();
        db.upsert_profile(&sample("dave")).unwrap();
        db.add_connection("dave", "carol", "paired at workshop", Utc::now()).unwrap();
        db.add_connection("carol", "dave", "dup", Utc::now()).unwrap();

        assert!(db.has_connection("carol", "dave").unwrap());
        assert!(db.has_connection("dave", "carol").unwrap());

        let carol = db.get_profile("carol").unwrap().unwrap();
        assert_eq!(carol.connections.len(), 1, "duplicate connection should be ignored");
        assert_eq!(carol.connections[0].peer_handle, "dave");

        let all = db.get_all_profiles().unwrap();
        let dave = all.iter().find(|p| p.handle == "dave").unwrap();
        assert!(dave.is_connected_to("carol"));
    }

    #[test]
    fn test_update_profile_partial() {
        let db = test_db();
        db.upsert_profile(&sample("alice")).unwrap();

        let update = ProfileUpdate {
            tags: Some(set(&["backend", "rust"])),
            ship: Some(Ship { what: "cli v1".into(), timestamp: Utc::now() }),
            ..Default::default()
        };
        assert!(db.update_profile("alice", &update).unwrap());
        assert!(!db.update_profile("ghost", &update).unwrap());

        let alice = db.get_profile("alice").unwrap().unwrap();
        assert_eq!(alice.tags, set(&["backend", "rust"]));
        assert_eq!(alice.interests, set(&["ai", "music"]), "interests untouched");
        assert_eq!(alice.ships.len(), 2);
        assert_eq!(alice.latest_ship().unwrap().what, "cli v1");
    }

    #[test]
    fn test_reimport_keeps_ship_history() {
        let db = test_db();
        let alice = sample("alice");
        db.upsert_profile(&alice).unwrap();
        db.add_ship("alice", &Ship { what: "cli v1".into(), timestamp: Utc::now() }).unwrap();

        let mut stale = alice.clone();
        stale.ships.clear();
        db.upsert_profile(&stale).unwrap();
        assert_eq!(db.get_profile("alice").unwrap().unwrap().ships.len(), 2);

        // The same export again adds nothing new.
        db.upsert_profile(&alice).unwrap();
        let loaded = db.get_profile("alice").unwrap().unwrap();
        assert_eq!(loaded.ships.len(), 2, "{:?}", loaded.ships);
        assert_eq!(loaded.latest_ship().unwrap().what, "cli v1");
    }

    #[test]
    fn test_last_seen_only_moves_forward() {
        let db = test_db();
        let alice = sample("alice");
        db.upsert_profile(&alice).unwrap();
        db.touch_last_seen("alice", alice.last_seen - Duration::hours(5)).unwrap();
        let loaded = db.get_profile("alice").unwrap().unwrap();
        assert_eq!(loaded.last_seen.timestamp(), alice.last_seen.timestamp());
    }

    #[test]
    fn test_malformed_fields_read_as_empty() {
        let db = test_db();
        db.conn_ref()
            .execute(
                "INSERT INTO profiles (handle, building, interests, tags, first_seen, last_seen)
                 VALUES ('odd', NULL, 'oops', '{', 'never', 'never')",
                [],
            )
            .unwrap();
        let odd = db.get_profile("odd").unwrap().expect("row still readable");
        assert!(odd.interests.is_empty());
        assert!(odd.tags.is_empty());
        assert_eq!(odd.last_seen, DateTime::UNIX_EPOCH);
    }
}
