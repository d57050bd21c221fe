//! Application state: configuration plus the shared components built from it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Duration;

use crate::db::ProfileDb;
use crate::error::MatchError;
use crate::matching::dedup::Deduplicator;
use crate::matching::suggest::MatchService;
use crate::proactive::engine::{default_monitor, ProactiveMonitor};
use crate::repository::SqliteRepository;
use crate::types::Config;

/// Default config location: `~/.crossings/config.json`.
pub fn config_path() -> Result<PathBuf, MatchError> {
    let home = dirs::home_dir()
        .ok_or_else(|| MatchError::Configuration("Could not find home directory".to_string()))?;
    Ok(home.join(".crossings").join("config.json"))
}

/// Load config from `path`, or from the default location.
///
/// A missing file is not an error: every field has a default.
pub fn load_config(path: Option<&Path>) -> Result<Config, MatchError> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => config_path()?,
    };

    if !config_path.exists() {
        log::info!(
            "Config: no file at {}, using defaults",
            config_path.display()
        );
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&config_path)
        .map_err(|e| MatchError::Configuration(format!("Failed to read config: {}", e)))?;
    let config: Config = serde_json::from_str(&content)
        .map_err(|e| MatchError::Configuration(format!("Failed to parse config: {}", e)))?;

    validate(&config)?;
    log::info!("Config: loaded {}", config_path.display());
    Ok(config)
}

/// Longest window any monitor setting may span.
const MAX_WINDOW_DAYS: i64 = 36_500;

fn validate(config: &Config) -> Result<(), MatchError> {
    let t = &config.thresholds;
    if [t.discovery, t.workshop, t.both_online, t.dormant]
        .iter()
        .any(|v| !v.is_finite() || *v < 0.0)
    {
        return Err(MatchError::Configuration(
            "thresholds must be non-negative numbers".to_string(),
        ));
    }
    let m = &config.monitor;
    if m.tick_interval_secs == 0 {
        return Err(MatchError::Configuration(
            "monitor.tickIntervalSecs must be at least 1".to_string(),
        ));
    }
    let windows = [
        ("onlineWindowMinutes", Duration::try_minutes(m.online_window_minutes)),
        ("newMemberWindowMinutes", Duration::try_minutes(m.new_member_window_minutes)),
        ("shipWindowMinutes", Duration::try_minutes(m.ship_window_minutes)),
        ("dormantAfterDays", Duration::try_days(m.dormant_after_days)),
        ("dormantMaxDays", Duration::try_days(m.dormant_max_days)),
        ("trendWindowHours", Duration::try_hours(m.trend_window_hours)),
    ];
    for (name, span) in windows {
        if !span.is_some_and(|d| d >= Duration::zero() && d <= Duration::days(MAX_WINDOW_DAYS)) {
            return Err(MatchError::Configuration(format!(
                "monitor.{} must be between 0 and {} days",
                name, MAX_WINDOW_DAYS
            )));
        }
    }
    if m.dormant_after_days > m.dormant_max_days {
        return Err(MatchError::Configuration(
            "monitor.dormantAfterDays must not exceed monitor.dormantMaxDays".to_string(),
        ));
    }
    Ok(())
}

/// Everything the CLI and the scanner share. One repository, one
/// deduplicator; the service and monitor both go through them.
pub struct AppState {
    pub config: Config,
    pub repo: Arc<SqliteRepository>,
    pub dedup: Arc<Deduplicator>,
    pub service: MatchService,
    pub monitor: Arc<ProactiveMonitor>,
}

impl AppState {
    pub fn open(config: Config) -> Result<Self, MatchError> {
        let db = ProfileDb::open_configured(config.db_path.as_deref())?;
        Ok(Self::with_db(db, config))
    }

    pub fn with_db(db: ProfileDb, config: Config) -> Self {
        let repo = Arc::new(SqliteRepository::new(db));
        let dedup = Arc::new(Deduplicator::new(repo.clone(), repo.clone(), &config));
        let service = MatchService::with_dedup(repo.clone(), dedup.clone(), config.clone());
        let monitor = Arc::new(default_monitor(repo.clone(), dedup.clone(), config.clone()));
        Self {
            config,
            repo,
            dedup,
            service,
            monitor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::types::{Cooldown, SuggestionType};

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("nope.json"))).unwrap();
        assert_eq!(config.default_limit, 5);
        assert_eq!(config.thresholds.discovery, 10.0);
    }

    #[test]
    fn test_partial_file_merges_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "thresholds": { "workshop": 25 }, "cooldowns": { "both_online": { "hours": 24 } } }"#,
        )
        .unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.thresholds.workshop, 25.0);
        assert_eq!(config.thresholds.discovery, 10.0);
        assert_eq!(config.cooldowns.get(&SuggestionType::BothOnline), Some(&Cooldown::Hours(24)));
        let dedup = AppState::with_db(test_db(), config.clone()).dedup;
        assert_eq!(dedup.cooldown_for(SuggestionType::BothOnline), Cooldown::Hours(24));
        assert_eq!(dedup.cooldown_for(SuggestionType::Discovery), Cooldown::Forever);
        assert_eq!(config.monitor.digest_every_ticks, 12);
    }

    #[test]
    fn test_bad_json_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, MatchError::Configuration(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "thresholds": { "discovery": -1 } }"#).unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_out_of_range_windows_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        for body in [
            r#"{ "monitor": { "trendWindowHours": 9223372036854775807 } }"#,
            r#"{ "monitor": { "onlineWindowMinutes": -5 } }"#,
            r#"{ "monitor": { "dormantAfterDays": 7, "dormantMaxDays": 40000 } }"#,
        ] {
            fs::write(&path, body).unwrap();
            let err = load_config(Some(&path)).unwrap_err();
            assert!(matches!(err, MatchError::Configuration(_)), "{}: {:?}", body, err);
        }
    }

    #[test]
    fn test_app_state_wires_shared_components() {
        let state = AppState::with_db(test_db(), Config::default());
        assert_eq!(state.monitor.detector_names().len(), 5);
        assert!(Arc::ptr_eq(state.service.dedup(), &state.dedup));
    }
}
