//! Topic clusters over a trailing window.
//!
//! Rebuilt from the profile snapshot on every call; nothing is carried
//! between sweeps. Each contributing event adds a decayed weight to its
//! topic, so a burst of fresh activity outweighs the same count spread
//! over a week.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::signals::decay::{age_days_between, decayed_weight, window_start};
use crate::signals::extract::{normalized_set, topic_keywords};
use crate::types::Profile;

/// Base weight for a topic carried by a member who joined inside the window.
pub const NEW_PROFILE_WEIGHT: f64 = 1.0;
/// Base weight for a keyword from a ship inside the window.
pub const SHIP_WEIGHT: f64 = 1.5;
/// Base weight for a topic carried by an existing member active inside the window.
pub const ACTIVITY_WEIGHT: f64 = 0.5;

/// Minimum distinct members for a cluster to count as emerging.
pub const EMERGING_MIN_MEMBERS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicCluster {
    pub topic: String,
    pub members: BTreeSet<String>,
    pub first_observed: DateTime<Utc>,
    pub last_observed: DateTime<Utc>,
    /// Sum of decayed event weights.
    pub weight: f64,
}

impl TopicCluster {
    fn observe(&mut self, handle: &str, at: DateTime<Utc>, weight: f64) {
        self.members.insert(handle.to_string());
        self.first_observed = self.first_observed.min(at);
        self.last_observed = self.last_observed.max(at);
        self.weight += weight;
    }

    pub fn is_emerging(&self) -> bool {
        self.members.len() >= EMERGING_MIN_MEMBERS
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrendDetector {
    half_life_days: f64,
}

impl TrendDetector {
    pub fn new(half_life_days: f64) -> Self {
        Self { half_life_days }
    }

    /// Group recent interests, tags and ship keywords into clusters keyed by topic.
    pub fn build_clusters(
        &self,
        profiles: &[Profile],
        window_hours: i64,
        now: DateTime<Utc>,
    ) -> HashMap<String, TopicCluster> {
        let cutoff = window_start(now, Duration::try_hours(window_hours.max(0)));
        let mut clusters: HashMap<String, TopicCluster> = HashMap::new();

        let mut add = |topic: &str, handle: &str, at: DateTime<Utc>, base: f64| {
            let weight = decayed_weight(base, age_days_between(now, at), self.half_life_days);
            clusters
                .entry(topic.to_string())
                .or_insert_with(|| TopicCluster {
                    topic: topic.to_string(),
                    members: BTreeSet::new(),
                    first_observed: at,
                    last_observed: at,
                    weight: 0.0,
                })
                .observe(handle, at, weight);
        };

        for profile in profiles {
            let mut topics = normalized_set(&profile.interests);
            topics.extend(normalized_set(&profile.tags));

            if profile.first_seen >= cutoff {
                for topic in &topics {
                    add(topic, &profile.handle, profile.first_seen, NEW_PROFILE_WEIGHT);
                }
            } else if profile.last_seen >= cutoff {
                for topic in &topics {
                    add(topic, &profile.handle, profile.last_seen, ACTIVITY_WEIGHT);
                }
            }

            for ship in profile.ships.iter().filter(|s| s.timestamp >= cutoff) {
                for keyword in topic_keywords(&ship.what) {
                    add(&keyword, &profile.handle, ship.timestamp, SHIP_WEIGHT);
                }
            }
        }

        clusters
    }

    /// Member count descending, then most recent event, then topic name.
    pub fn ranked(clusters: HashMap<String, TopicCluster>) -> Vec<TopicCluster> {
        let mut ranked: Vec<TopicCluster> = clusters.into_values().collect();
        ranked.sort_by(|a, b| {
            b.members
                .len()
                .cmp(&a.members.len())
                .then(b.last_observed.cmp(&a.last_observed))
                .then(a.topic.cmp(&b.topic))
        });
        ranked
    }

    /// Ranked clusters with at least two distinct members.
    pub fn emerging(&self, profiles: &[Profile], window_hours: i64, now: DateTime<Utc>) -> Vec<TopicCluster> {
        let mut ranked = Self::ranked(self.build_clusters(profiles, window_hours, now));
        ranked.retain(TopicCluster::is_emerging);
        ranked
    }
}
