//! Version stamps for optimistic concurrency.
//!
//! A page's version stamp is its last-modified instant. Clients echo it back
//! as `base_updated_at` on writes; the store only applies the write while the
//! row still carries that exact stamp.
//!
//! Stamps are held at microsecond precision, which is also the precision of
//! the wire format (`2026-01-02T03:04:05.123456Z`), so a stamp survives a
//! round trip through a client unchanged.

use std::fmt;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A page version stamp (UTC, microsecond precision).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(DateTime<Utc>);

/// A version string that is not valid RFC3339.
#[derive(Error, Debug)]
#[error("invalid version stamp {input:?}: {source}")]
pub struct VersionParseError {
    input: String,
    #[source]
    source: chrono::ParseError,
}

impl Version {
    /// The current instant, truncated to microseconds.
    pub fn now() -> Self {
        Self::truncate(Utc::now())
    }

    /// The stamp to write after `prev`: now, or one microsecond past `prev`
    /// when the clock has not moved (or moved backwards).
    pub fn successor(prev: Version) -> Self {
        let now = Self::now();
        if now > prev {
            now
        } else {
            Self(prev.0 + TimeDelta::microseconds(1))
        }
    }

    /// Parse an RFC3339 string. Sub-microsecond digits are dropped.
    pub fn parse(s: &str) -> Result<Self, VersionParseError> {
        DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| Self::truncate(dt.with_timezone(&Utc)))
            .map_err(|source| VersionParseError {
                input: s.to_string(),
                source,
            })
    }

    /// Reconstruct from microseconds since the Unix epoch (storage form).
    pub fn from_micros(micros: i64) -> Option<Self> {
        DateTime::from_timestamp_micros(micros).map(Self)
    }

    /// Microseconds since the Unix epoch (storage form).
    pub fn as_micros(&self) -> i64 {
        self.0.timestamp_micros()
    }

    /// The instant this stamp denotes.
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Canonical wire form: RFC3339, six fractional digits, `Z` suffix.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn truncate(dt: DateTime<Utc>) -> Self {
        // timestamp_micros round-trips for any instant chrono can represent
        Self(DateTime::from_timestamp_micros(dt.timestamp_micros()).unwrap_or(dt))
    }
}

impl From<DateTime<Utc>> for Version {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::truncate(dt)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self.to_rfc3339())
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}
