//! Time math: decay for cluster weighting and trailing windows (pure, no DB).

use chrono::{DateTime, Duration, Utc};

/// Compute the decayed weight of an observation using exponential half-life decay.
///
/// `base * 2^(-age_days / half_life_days)`
pub fn decayed_weight(base_weight: f64, age_days: f64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 || age_days < 0.0 {
        return base_weight;
    }
    base_weight * (2.0_f64).powf(-age_days / half_life_days)
}

/// Fractional days between `then` and `now`, clamped at zero for future stamps.
pub fn age_days_between(now: DateTime<Utc>, then: DateTime<Utc>) -> f64 {
    let secs = (now - then).num_seconds() as f64;
    (secs / 86400.0).max(0.0)
}

/// Start of the trailing window of length `span` ending at `now`.
///
/// `span` is `None` when the length did not fit in a `Duration`; that window,
/// like any reaching past the representable range, starts at the earliest
/// representable instant.
pub fn window_start(now: DateTime<Utc>, span: Option<Duration>) -> DateTime<Utc> {
    span.and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
