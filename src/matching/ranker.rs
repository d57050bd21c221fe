//! Threshold, ordering and truncation of scored candidates.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::MatchError;
use crate::signals::scoring::Score;
use crate::types::Profile;

/// Presentation metadata for a suggested member.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub building: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub last_seen_label: String,
}

impl ProfileSummary {
    pub fn of(profile: &Profile, now: DateTime<Utc>) -> Self {
        Self {
            building: profile.building_text().map(str::to_string),
            last_seen: profile.last_seen,
            last_seen_label: humanize_last_seen(profile.last_seen, now),
        }
    }
}

/// One ranked candidate. Built fresh per request, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub handle: String,
    pub score: f64,
    pub reasons: Vec<String>,
    pub profile_summary: ProfileSummary,
}

impl MatchResult {
    pub fn new(candidate: &Profile, score: Score, now: DateTime<Utc>) -> Self {
        Self {
            handle: candidate.handle.clone(),
            score: score.total,
            reasons: score.reasons,
            profile_summary: ProfileSummary::of(candidate, now),
        }
    }
}

/// "just now", "12m ago", "3h ago", "2d ago". Unknown activity reads "never".
pub fn humanize_last_seen(last_seen: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if last_seen.timestamp() <= 0 {
        return "never".to_string();
    }
    let elapsed = now - last_seen;
    let minutes = elapsed.num_minutes();
    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if elapsed.num_hours() < 24 {
        format!("{}h ago", elapsed.num_hours())
    } else {
        format!("{}d ago", elapsed.num_days())
    }
}

/// Filters by a strict score threshold, orders by score then recency, and
/// keeps the top `limit`.
#[derive(Debug, Clone, Copy)]
pub struct MatchRanker {
    pub threshold: f64,
    pub limit: usize,
}

impl MatchRanker {
    pub fn new(threshold: f64, limit: usize) -> Self {
        Self { threshold, limit }
    }

    /// Rank candidates for `for_handle`.
    ///
    /// `is_eligible` is consulted in rank order, only until `limit` results
    /// are found; its first error aborts the ranking.
    pub fn rank<F>(
        &self,
        for_handle: &str,
        mut candidates: Vec<MatchResult>,
        mut is_eligible: F,
    ) -> Result<Vec<MatchResult>, MatchError>
    where
        F: FnMut(&str) -> Result<bool, MatchError>,
    {
        candidates.retain(|c| c.handle != for_handle && c.score > self.threshold);
        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(b.profile_summary.last_seen.cmp(&a.profile_summary.last_seen))
                .then(a.handle.cmp(&b.handle))
        });

        let mut ranked = Vec::with_capacity(self.limit.min(candidates.len()));
        for candidate in candidates {
            if ranked.len() >= self.limit {
                break;
            }
            if is_eligible(&candidate.handle)? {
                ranked.push(candidate);
            }
        }
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn result(handle: &str, score: f64, last_seen: DateTime<Utc>) -> MatchResult {
        MatchResult {
            handle: handle.to_string(),
            score,
            reasons: vec![],
            profile_summary: ProfileSummary {
                building: None,
                last_seen,
                last_seen_label: String::new(),
            },
        }
    }

    fn always(_: &str) -> Result<bool, MatchError> {
        Ok(true)
    }

    #[test]
    fn test_threshold_is_strict() {
        let now = Utc::now();
        let ranked = MatchRanker::new(10.0, 5)
            .rank("me", vec![result("a", 10.0, now), result("b", 10.5, now)], always)
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].handle, "b");
    }

    #[test]
    fn test_ties_broken_by_recency() {
        let now = Utc::now();
        let ranked = MatchRanker::new(0.0, 5)
            .rank(
                "me",
                vec![
                    result("old", 30.0, now - Duration::hours(5)),
                    result("top", 45.0, now - Duration::days(3)),
                    result("fresh", 30.0, now),
                ],
                always,
            )
            .unwrap();
        let order: Vec<&str> = ranked.iter().map(|r| r.handle.as_str()).collect();
        assert_eq!(order, vec!["top", "fresh", "old"]);
        for pair in ranked.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_excludes_self_and_ineligible() {
        let now = Utc::now();
        let ranked = MatchRanker::new(0.0, 5)
            .rank(
                "me",
                vec![result("me", 99.0, now), result("dave", 80.0, now), result("erin", 20.0, now)],
                |h| Ok(h != "dave"),
            )
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].handle, "erin");
    }

    #[test]
    fn test_truncates_to_limit() {
        let now = Utc::now();
        let candidates = (0..10).map(|i| result(&format!("m{}", i), 20.0 + i as f64, now)).collect();
        let ranked = MatchRanker::new(0.0, 3).rank("me", candidates, always).unwrap();
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].handle, "m9");
    }

    #[test]
    fn test_eligibility_error_aborts() {
        let now = Utc::now();
        let err = MatchRanker::new(0.0, 3)
            .rank("me", vec![result("a", 20.0, now)], |_| {
                Err(MatchError::TransientRepository("down".into()))
            })
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_humanize_last_seen() {
        let now = Utc::now();
        assert_eq!(humanize_last_seen(now - Duration::seconds(20), now), "just now");
        assert_eq!(humanize_last_seen(now - Duration::minutes(12), now), "12m ago");
        assert_eq!(humanize_last_seen(now - Duration::hours(3), now), "3h ago");
        assert_eq!(humanize_last_seen(now - Duration::days(2), now), "2d ago");
        assert_eq!(humanize_last_seen(DateTime::<Utc>::UNIX_EPOCH, now), "never");
    }
}
