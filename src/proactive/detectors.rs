//! Opportunity detectors for the proactive monitor.
//!
//! Each detector is a pure function over a profile snapshot that returns zero
//! or more `RawOpportunity` values, best first for each primary member.
//! Detectors return every candidate above threshold; the monitor applies the
//! per-member caps after dedup. Pairwise scoring is restricted to a small
//! subset (the online set, newcomers, recent shippers, dormant members);
//! no detector scores the whole population against itself.

use std::collections::BTreeSet;

use chrono::Duration;

use super::engine::{DetectorContext, RawOpportunity};
use crate::signals::decay::window_start;
use crate::signals::extract::{keywords, normalized_set, topic_keywords};
use crate::signals::scoring::{MatchMode, Score};
use crate::trends::TrendDetector;
use crate::types::{Profile, SuggestionType};

/// "Currently active" for dormant re-engagement.
const ACTIVE_TODAY_HOURS: i64 = 24;
/// Weight per overlapping keyword between a ship and a peer.
const SHIP_OVERLAP_WEIGHT: f64 = 10.0;

// ---------------------------------------------------------------------------
// Detector 1: Both online
// ---------------------------------------------------------------------------

/// Compatible pairs among members active within the online window.
pub fn detect_both_online(ctx: &DetectorContext) -> Vec<RawOpportunity> {
    let online = ctx.active_within(ctx.config.monitor.online_window_minutes);
    if online.len() < 2 {
        return Vec::new();
    }

    let engine = ctx.engine(MatchMode::BothOnline);
    let mut out = Vec::new();
    for (i, a) in online.iter().enumerate() {
        for b in &online[i + 1..] {
            let Some(score) = engine.evaluate(a, b) else {
                continue;
            };
            if score.total <= engine.threshold() {
                continue;
            }
            out.push(RawOpportunity {
                detector_name: "detect_both_online".to_string(),
                kind: SuggestionType::BothOnline,
                primary: a.handle.clone(),
                peer: Some(b.handle.clone()),
                topic: None,
                score: score.total,
                headline: format!("@{} and @{} are both online right now", a.handle, b.handle),
                reasons: score.reasons,
            });
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Detector 2: Just joined
// ---------------------------------------------------------------------------

/// Newcomers paired with every existing member they match, best first.
pub fn detect_just_joined(ctx: &DetectorContext) -> Vec<RawOpportunity> {
    let cutoff = window_start(ctx.now, Duration::try_minutes(ctx.config.monitor.new_member_window_minutes));
    let engine = ctx.engine(MatchMode::Discovery);

    let mut out = Vec::new();
    for newcomer in ctx.profiles.iter().filter(|p| p.first_seen >= cutoff) {
        let mut matches: Vec<(&Profile, f64, Vec<String>)> = ctx
            .profiles
            .iter()
            .filter_map(|peer| {
                let score = engine.evaluate(newcomer, peer)?;
                (score.total > engine.threshold()).then_some((peer, score.total, score.reasons))
            })
            .collect();
        matches.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then(b.0.last_seen.cmp(&a.0.last_seen))
                .then(a.0.handle.cmp(&b.0.handle))
        });

        for (peer, score, reasons) in matches {
            out.push(RawOpportunity {
                detector_name: "detect_just_joined".to_string(),
                kind: SuggestionType::JustJoined,
                primary: newcomer.handle.clone(),
                peer: Some(peer.handle.clone()),
                topic: None,
                score,
                reasons,
                headline: format!("@{} just joined; @{} looks like a good first hello", newcomer.handle, peer.handle),
            });
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Detector 3: Trending topic
// ---------------------------------------------------------------------------

/// Emerging clusters in the trend window, one per topic.
pub fn detect_trending_topic(ctx: &DetectorContext) -> Vec<RawOpportunity> {
    let detector = TrendDetector::new(ctx.config.monitor.cluster_half_life_days);
    detector
        .emerging(ctx.profiles, ctx.config.monitor.trend_window_hours, ctx.now)
        .into_iter()
        .filter_map(|cluster| {
            let primary = cluster.members.iter().next()?.clone();
            let members: Vec<String> = cluster.members.iter().map(|h| format!("@{}", h)).collect();
            Some(RawOpportunity {
                detector_name: "detect_trending_topic".to_string(),
                kind: SuggestionType::TrendingTopic,
                primary,
                peer: None,
                topic: Some(cluster.topic.clone()),
                score: cluster.weight,
                reasons: vec![
                    format!("{} members into {}", cluster.members.len(), cluster.topic),
                    members.join(", "),
                ],
                headline: format!("#{} is trending ({} members)", cluster.topic, cluster.members.len()),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Detector 4: Just shipped
// ---------------------------------------------------------------------------

/// A recent ship whose keywords overlap what another member is into.
pub fn detect_just_shipped(ctx: &DetectorContext) -> Vec<RawOpportunity> {
    let cutoff = window_start(ctx.now, Duration::try_minutes(ctx.config.monitor.ship_window_minutes));

    let mut out = Vec::new();
    for shipper in ctx.profiles {
        let Some(ship) = shipper.latest_ship().filter(|s| s.timestamp >= cutoff) else {
            continue;
        };
        let ship_words = topic_keywords(&ship.what);
        if ship_words.is_empty() {
            continue;
        }

        let mut peers: Vec<(&Profile, Vec<String>)> = ctx
            .profiles
            .iter()
            .filter(|p| p.handle != shipper.handle)
            .filter_map(|peer| {
                let overlap: Vec<String> = ship_words.intersection(&peer_topics(peer)).cloned().collect();
                (!overlap.is_empty()).then_some((peer, overlap))
            })
            .collect();
        peers.sort_by(|a, b| {
            b.1.len()
                .cmp(&a.1.len())
                .then(b.0.last_seen.cmp(&a.0.last_seen))
                .then(a.0.handle.cmp(&b.0.handle))
        });

        for (peer, overlap) in peers {
            out.push(RawOpportunity {
                detector_name: "detect_just_shipped".to_string(),
                kind: SuggestionType::JustShipped,
                primary: shipper.handle.clone(),
                peer: Some(peer.handle.clone()),
                topic: None,
                score: SHIP_OVERLAP_WEIGHT * overlap.len() as f64,
                reasons: overlap.iter().map(|w| format!("shipped something with {}", w)).take(3).collect(),
                headline: format!("@{} just shipped \"{}\"; @{} is into that", shipper.handle, ship.what, peer.handle),
            });
        }
    }
    out
}

fn peer_topics(peer: &Profile) -> BTreeSet<String> {
    let mut topics = normalized_set(&peer.interests);
    topics.extend(normalized_set(&peer.tags));
    if let Some(building) = peer.building_text() {
        topics.extend(keywords(building));
    }
    topics
}

// ---------------------------------------------------------------------------
// Detector 5: Dormant re-engagement
// ---------------------------------------------------------------------------

/// Members gone quiet, paired with currently active matches, best first.
pub fn detect_dormant_reengagement(ctx: &DetectorContext) -> Vec<RawOpportunity> {
    let monitor = &ctx.config.monitor;
    let quiet_since = window_start(ctx.now, Duration::try_days(monitor.dormant_after_days));
    let gone_since = window_start(ctx.now, Duration::try_days(monitor.dormant_max_days));

    let dormant: Vec<&Profile> = ctx
        .profiles
        .iter()
        .filter(|p| p.last_seen <= quiet_since && p.last_seen >= gone_since)
        .collect();
    if dormant.is_empty() {
        return Vec::new();
    }
    let active = ctx.active_within(ACTIVE_TODAY_HOURS * 60);
    let engine = ctx.engine(MatchMode::Dormant);

    let mut out = Vec::new();
    for quiet in dormant {
        let mut matches: Vec<(&Profile, Score)> = active
            .iter()
            .filter_map(|peer| engine.evaluate(quiet, peer).map(|s| (*peer, s)))
            .filter(|(_, s)| s.total > engine.threshold())
            .collect();
        matches.sort_by(|a, b| {
            b.1.total
                .total_cmp(&a.1.total)
                .then(b.0.last_seen.cmp(&a.0.last_seen))
                .then(a.0.handle.cmp(&b.0.handle))
        });

        let days = (ctx.now - quiet.last_seen).num_days();
        for (peer, score) in matches {
            out.push(RawOpportunity {
                detector_name: "detect_dormant_reengagement".to_string(),
                kind: SuggestionType::Dormant,
                primary: quiet.handle.clone(),
                peer: Some(peer.handle.clone()),
                topic: None,
                score: score.total,
                reasons: score.reasons,
                headline: format!("@{} has been quiet for {}d; @{} might pull them back in", quiet.handle, days, peer.handle),
            });
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::types::{Config, Ship};

    fn member(handle: &str, interests: &[&str], tags: &[&str], first_seen: DateTime<Utc>, last_seen: DateTime<Utc>) -> Profile {
        let mut p = Profile::new(handle, first_seen);
        p.last_seen = last_seen;
        p.interests = interests.iter().map(|s| s.to_string()).collect();
        p.tags = tags.iter().map(|s| s.to_string()).collect();
        p
    }

    fn ctx<'a>(profiles: &'a [Profile], config: &'a Config, now: DateTime<Utc>) -> DetectorContext<'a> {
        DetectorContext { profiles, config, now }
    }

    #[test]
    fn test_both_online_needs_two_online() {
        let now = Utc::now();
        let config = Config::default();
        let profiles = vec![
            member("ana", &["ai", "rust"], &["frontend"], now - Duration::days(9), now),
            member("ben", &["ai", "rust"], &["backend"], now - Duration::days(9), now - Duration::hours(3)),
        ];
        assert!(detect_both_online(&ctx(&profiles, &config, now)).is_empty());
    }

    #[test]
    fn test_both_online_high_bar() {
        let now = Utc::now();
        let config = Config::default();
        let profiles = vec![
            member("ana", &["ai", "rust"], &["frontend"], now - Duration::days(9), now),
            member("ben", &["ai", "rust"], &["backend"], now - Duration::days(9), now - Duration::minutes(4)),
            // Online, but only the online bonus in common.
            member("cy", &["knitting"], &[], now - Duration::days(9), now - Duration::minutes(2)),
        ];
        let found = detect_both_online(&ctx(&profiles, &config, now));
        assert_eq!(found.len(), 1, "{:?}", found);
        assert_eq!(found[0].primary, "ana");
        assert_eq!(found[0].peer.as_deref(), Some("ben"));
        assert!(found[0].score > config.thresholds.both_online);
        // interests 15 + 15, frontend/backend 8, online bonus 20
        assert_eq!(found[0].score, 58.0);
        assert!(found[0].headline.contains("both online"));
    }

    #[test]
    fn test_just_joined_returns_every_match_best_first() {
        let now = Utc::now();
        let config = Config::default();
        let old = now - Duration::days(30);
        let mut profiles = vec![member("newbie", &["ai"], &["frontend"], now - Duration::minutes(5), now)];
        for i in 0..5 {
            profiles.push(member(&format!("vet{}", i), &["ai"], &["backend"], old, old));
        }
        profiles[3].interests.insert("music".to_string());
        profiles[0].interests.insert("music".to_string());
        let found = detect_just_joined(&ctx(&profiles, &config, now));
        assert_eq!(found.len(), 5);
        assert!(found.iter().all(|o| o.primary == "newbie"));
        assert_eq!(found[0].peer.as_deref(), Some("vet2"));
    }

    #[test]
    fn test_trending_topic_one_per_topic() {
        let now = Utc::now();
        let config = Config::default();
        let profiles = vec![
            member("ana", &["rust"], &[], now - Duration::hours(2), now),
            member("ben", &["rust"], &[], now - Duration::hours(1), now),
            member("cy", &["rust", "games"], &[], now - Duration::hours(1), now),
        ];
        let found = detect_trending_topic(&ctx(&profiles, &config, now));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].topic.as_deref(), Some("rust"));
        assert!(found[0].peer.is_none());
        assert_eq!(found[0].headline, "#rust is trending (3 members)");
    }

    #[test]
    fn test_just_shipped_matches_interests() {
        let now = Utc::now();
        let config = Config::default();
        let old = now - Duration::days(30);
        let mut shipper = member("ana", &[], &[], old, now);
        shipper.ships.push(Ship { what: "a tiny parser for TOML".to_string(), timestamp: now - Duration::minutes(30) });
        let profiles = vec![
            shipper,
            member("ben", &["parser"], &[], old, old),
            member("cy", &["gardening"], &[], old, old),
        ];
        let found = detect_just_shipped(&ctx(&profiles, &config, now));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].peer.as_deref(), Some("ben"));
        assert_eq!(found[0].reasons, vec!["shipped something with parser"]);
    }

    #[test]
    fn test_old_ship_ignored() {
        let now = Utc::now();
        let config = Config::default();
        let mut shipper = member("ana", &[], &[], now, now);
        shipper.ships.push(Ship { what: "parser".to_string(), timestamp: now - Duration::days(2) });
        let profiles = vec![shipper, member("ben", &["parser"], &[], now, now)];
        assert!(detect_just_shipped(&ctx(&profiles, &config, now)).is_empty());
    }

    #[test]
    fn test_dormant_paired_with_active() {
        let now = Utc::now();
        let config = Config::default();
        let old = now - Duration::days(60);
        let profiles = vec![
            member("quiet", &["ai", "music"], &["design"], old, now - Duration::days(14)),
            member("busy", &["ai"], &["engineering"], old, now - Duration::hours(1)),
            member("gone", &["ai", "music"], &["design"], old, now - Duration::days(200)),
        ];
        let found = detect_dormant_reengagement(&ctx(&profiles, &config, now));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].primary, "quiet");
        assert_eq!(found[0].peer.as_deref(), Some("busy"));
    }

    #[test]
    fn test_dormant_lists_all_active_matches_best_first() {
        let now = Utc::now();
        let config = Config::default();
        let old = now - Duration::days(60);
        let profiles = vec![
            member("quiet", &["ai", "music"], &["design"], old, now - Duration::days(14)),
            member("friend", &["ai", "music"], &["design"], old, now - Duration::hours(2)),
            member("other", &["ai"], &["engineering"], old, now - Duration::hours(1)),
        ];
        let found = detect_dormant_reengagement(&ctx(&profiles, &config, now));
        let peers: Vec<&str> = found.iter().filter_map(|o| o.peer.as_deref()).collect();
        assert_eq!(peers, vec!["friend", "other"]);
    }
}
