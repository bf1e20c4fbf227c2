//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Ground clock helpers shared by time-tagging code."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Current ground time.
pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert a std duration into a chrono duration, saturating on overflow.
pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Milliseconds since the Unix epoch as a timestamp, if representable.
pub fn from_unix_ms(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Render a millisecond uptime as `HHh:MMm:SSs`.
pub fn uptime_string(uptime_ms: u64) -> String {
    let hours = uptime_ms / 3_600_000;
    let remainder = uptime_ms % 3_600_000;
    let minutes = remainder / 60_000;
    let seconds = (remainder % 60_000) / 1000;
    format!("{hours:02}h:{minutes:02}m:{seconds:02}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_string_splits_units() {
        assert_eq!(uptime_string(7_263_023), "02h:01m:03s");
        assert_eq!(uptime_string(0), "00h:00m:00s");
    }

    #[test]
    fn chrono_conversion_saturates() {
        assert_eq!(to_chrono(Duration::from_millis(22_100)).num_milliseconds(), 22_100);
        assert_eq!(to_chrono(Duration::MAX), chrono::Duration::MAX);
    }
}
