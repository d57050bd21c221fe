//! Background proactive scanner.
//!
//! Drives the monitor from a fixed-interval timer. Ticks never overlap: each
//! sweep runs on the blocking pool and the loop waits for it before the next
//! tick, and late ticks are skipped rather than queued. Shutdown is checked
//! between ticks only, so a sweep in progress always finishes its commit.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::engine::{ProactiveMonitor, SweepMode, TickOutcome};

/// Sweep mode for the `n`th tick (0-based): a full sweep on the first tick and
/// every `digest_every` ticks after it, realtime otherwise.
pub fn mode_for_tick(n: u64, digest_every: u64) -> SweepMode {
    if digest_every == 0 || n % digest_every == 0 {
        SweepMode::All
    } else {
        SweepMode::Realtime
    }
}

/// Run the scanner until `shutdown` flips to `true` (or its sender is dropped).
/// Returns the number of ticks that ran.
pub async fn run_scanner(
    monitor: Arc<ProactiveMonitor>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    let digest_every = monitor.config().monitor.digest_every_ticks;
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    log::info!(
        "Scanner: started, every {}s, digest every {} tick(s)",
        period.as_secs(),
        digest_every
    );

    let mut ticks = 0u64;
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let mode = mode_for_tick(ticks, digest_every);
        ticks += 1;

        let worker = Arc::clone(&monitor);
        match tokio::task::spawn_blocking(move || worker.run_sweep(mode, Utc::now())).await {
            Ok(Ok(TickOutcome::Completed(report))) => {
                log::debug!(
                    "Scanner: tick {} ({:?}) emitted {}",
                    ticks,
                    mode,
                    report.opportunities.len()
                );
            }
            Ok(Ok(TickOutcome::Skipped)) => {
                log::info!("Scanner: tick {} skipped, previous sweep still running", ticks);
            }
            Ok(Err(e)) if e.is_retryable() => {
                log::warn!("Scanner: tick {} failed, will retry next tick: {}", ticks, e);
            }
            Ok(Err(e)) => {
                log::warn!("Scanner: tick {} failed: {}", ticks, e);
            }
            Err(e) => {
                log::warn!("Scanner: tick {} panicked: {}", ticks, e);
            }
        }
    }

    log::info!("Scanner: stopped after {} tick(s)", ticks);
    ticks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::dedup::{Deduplicator, MemorySuggestionStore};
    use crate::proactive::engine::default_monitor;
    use crate::repository::MemoryRepository;
    use crate::types::Config;

    #[test]
    fn test_mode_for_tick() {
        assert_eq!(mode_for_tick(0, 12), SweepMode::All);
        assert_eq!(mode_for_tick(1, 12), SweepMode::Realtime);
        assert_eq!(mode_for_tick(12, 12), SweepMode::All);
        assert_eq!(mode_for_tick(5, 0), SweepMode::All);
    }

    #[tokio::test]
    async fn test_scanner_runs_until_shutdown() {
        let repo = Arc::new(MemoryRepository::new());
        let store = Arc::new(MemorySuggestionStore::new());
        let dedup = Arc::new(Deduplicator::new(repo.clone(), store, &Config::default()));
        let monitor = Arc::new(default_monitor(repo, dedup, Config::default()));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_scanner(monitor.clone(), Duration::from_millis(10), rx));
        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();

        let ticks = handle.await.unwrap();
        assert!(ticks >= 1, "expected at least one tick, got {}", ticks);
        assert_eq!(monitor.state(), crate::proactive::engine::MonitorState::Idle);
    }
}
