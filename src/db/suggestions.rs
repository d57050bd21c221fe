use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::*;
use crate::types::{PairKey, SuggestionRecord, SuggestionType};

impl ProfileDb {
    // =========================================================================
    // Suggestion history
    // =========================================================================

    /// Persist a batch of suggestion records atomically. Either every record
    /// lands or none do.
    pub fn record_suggestions(&self, records: &[SuggestionRecord]) -> Result<(), DbError> {
        if records.is_empty() {
            return Ok(());
        }
        self.with_transaction(|db| {
            let mut stmt = db.conn.prepare(
                "INSERT INTO suggestions (pair_key, suggestion_type, suggested_at, detail)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.pair_key.as_storage_key(),
                    record.suggestion_type.as_str(),
                    fmt_timestamp(&record.suggested_at),
                    record.detail,
                ])?;
            }
            Ok(())
        })
    }

    /// Most recent time this pair was suggested with this type.
    pub fn last_suggested(
        &self,
        key: &PairKey,
        kind: SuggestionType,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT MAX(suggested_at) FROM suggestions
                 WHERE pair_key = ?1 AND suggestion_type = ?2",
                params![key.as_storage_key(), kind.as_str()],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(raw.as_deref().map(parse_timestamp))
    }

    /// Full history, newest first. Rows with an unknown type are skipped.
    pub fn list_suggestions(&self, limit: usize) -> Result<Vec<SuggestionRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT pair_key, suggestion_type, suggested_at, detail
             FROM suggestions ORDER BY suggested_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (key, kind, at, detail) = row?;
            let (Some(pair_key), Some(suggestion_type)) =
                (PairKey::from_storage_key(&key), SuggestionType::parse(&kind))
            else {
                log::warn!("ProfileDb: skipping unreadable suggestion row {:?}/{:?}", key, kind);
                continue;
            };
            out.push(SuggestionRecord {
                pair_key,
                suggestion_type,
                suggested_at: parse_timestamp(&at),
                detail,
            });
        }
        Ok(out)
    }

    pub fn count_suggestions(&self) -> Result<usize, DbError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM suggestions", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
