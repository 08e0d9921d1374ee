//! Kerberos time values.
//!
//! Kerberos carries timestamps as ASN.1 GeneralizedTime with whole-second
//! precision and a mandatory `Z` suffix (`YYYYMMDDHHMMSSZ`). Microseconds
//! travel separately (`cusec`/`susec`) and are not modelled here.

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

const GENERALIZED_TIME_FORMAT: &str = "%Y%m%d%H%M%SZ";

/// A whole-second UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KerberosTime {
    /// Seconds since the Unix epoch.
    secs: i64,
}

impl KerberosTime {
    /// The epoch; clients send it as `till` to ask for the maximum lifetime.
    pub const EPOCH: Self = Self { secs: 0 };

    /// Create a time from seconds since the Unix epoch.
    pub const fn from_unix(secs: i64) -> Self {
        Self { secs }
    }

    /// Current wall-clock time, truncated to whole seconds.
    pub fn now() -> Self {
        Self {
            secs: Utc::now().timestamp(),
        }
    }

    /// Seconds since the Unix epoch.
    pub const fn unix_secs(self) -> i64 {
        self.secs
    }

    /// Add a duration, saturating at the maximum representable time.
    pub fn add(self, d: Duration) -> Self {
        let secs = i64::try_from(d.as_secs()).unwrap_or(i64::MAX);
        Self {
            secs: self.secs.saturating_add(secs),
        }
    }

    /// Absolute difference between two times.
    pub fn abs_diff(self, other: Self) -> Duration {
        Duration::from_secs(self.secs.abs_diff(other.secs))
    }

    /// Render as GeneralizedTime.
    pub fn to_generalized(self) -> String {
        match Utc.timestamp_opt(self.secs, 0).single() {
            Some(dt) => dt.format(GENERALIZED_TIME_FORMAT).to_string(),
            None => "99991231235959Z".to_string(),
        }
    }

    /// Convert to a chrono timestamp.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.secs, 0).single()
    }
}

impl std::fmt::Display for KerberosTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_generalized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_generalized_time() {
        let t = KerberosTime::from_unix(1_700_000_000);
        assert_eq!(t.to_generalized(), "20231114221320Z");
        assert_eq!(t.to_string(), "20231114221320Z");
    }

    #[test]
    fn epoch_renders_as_kerberos_infinity_marker() {
        assert_eq!(KerberosTime::EPOCH.to_generalized(), "19700101000000Z");
    }

    #[test]
    fn add_and_diff() {
        let t = KerberosTime::from_unix(100);
        let later = t.add(Duration::from_secs(60));
        assert_eq!(later.unix_secs(), 160);
        assert_eq!(t.abs_diff(later), Duration::from_secs(60));
        assert!(later > t);
    }
}
