//! Time helpers.

use chrono::{DateTime, Duration, DurationRound, Utc};

/// A timestamp, always UTC.
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp at microsecond precision, the resolution
/// PostgreSQL stores for `timestamptz`. Rows created in memory and rows read
/// back from the database therefore compare equal.
pub fn now() -> Timestamp {
    let now = Utc::now();
    now.duration_trunc(Duration::microseconds(1)).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_now_has_microsecond_precision() {
        let ts = now();
        assert_eq!(ts.nanosecond() % 1_000, 0);
    }
}
