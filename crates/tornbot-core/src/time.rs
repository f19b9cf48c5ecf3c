use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since UNIX epoch.
pub type EpochMs = i64;

pub fn now_ms() -> EpochMs {
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    dur.as_millis() as i64
}

/// Saturating `at + d`.
pub fn add_duration(at: EpochMs, d: Duration) -> EpochMs {
    at.saturating_add(d.as_millis().min(i64::MAX as u128) as i64)
}

/// Time left until `at`, zero if `at` is already in the past.
pub fn until(now: EpochMs, at: EpochMs) -> Duration {
    Duration::from_millis(at.saturating_sub(now).max(0) as u64)
}
