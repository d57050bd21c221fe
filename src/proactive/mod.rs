//! Proactive opportunity surfacing.
//!
//! Periodically sweeps the profile snapshot for opportunities that only
//! matter right now (two compatible members online, a newcomer, a fresh
//! ship, a topic heating up) and records each one so it is surfaced once.

pub mod detectors;
pub mod engine;
pub mod scanner;

pub use engine::{
    default_monitor, MonitorState, Opportunity, ProactiveMonitor, SweepMode, TickOutcome, TickReport,
};
