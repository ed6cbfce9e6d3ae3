//! Canonical timestamp text.
//!
//! Source timestamps usually carry no zone. They are read as wall-clock
//! time in the source's [`SourceTimeZone`], and watermarks are converted
//! into that zone before they are compared against rows.

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, Utc};
use std::fmt;
use std::str::FromStr;

use indexsync_common::Error;

/// Format used for temporal values in extracted rows.
pub const CANONICAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

const ACCEPTED_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse a temporal value in any of the accepted text forms.
///
/// Text with an explicit offset is converted to UTC.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }

    for format in ACCEPTED_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Render a timestamp in canonical form.
pub fn canonical(ts: &NaiveDateTime) -> String {
    ts.format(CANONICAL_FORMAT).to_string()
}

/// Zone in which a source stores zone-less timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceTimeZone {
    /// The host's local zone.
    #[default]
    Local,
    Utc,
    /// A fixed offset from UTC.
    Fixed(FixedOffset),
}

impl SourceTimeZone {
    /// Wall-clock time of `ts` in this zone.
    pub fn wall_clock(&self, ts: &DateTime<Utc>) -> NaiveDateTime {
        match self {
            SourceTimeZone::Local => ts.with_timezone(&Local).naive_local(),
            SourceTimeZone::Utc => ts.naive_utc(),
            SourceTimeZone::Fixed(offset) => ts.with_timezone(offset).naive_local(),
        }
    }

    /// Wall-clock lower bound for rows modified after `since`.
    ///
    /// A table that was never synced gets [`earliest`].
    pub fn bound(&self, since: &Option<DateTime<Utc>>) -> NaiveDateTime {
        since
            .map(|ts| self.wall_clock(&ts))
            .unwrap_or_else(earliest)
    }

    /// Parse temporal text as wall-clock time in this zone.
    ///
    /// Text with an explicit offset names an instant and is converted.
    pub fn parse(&self, text: &str) -> Option<NaiveDateTime> {
        match DateTime::parse_from_rfc3339(text.trim()) {
            Ok(dt) => Some(self.wall_clock(&dt.with_timezone(&Utc))),
            Err(_) => parse_timestamp(text),
        }
    }

    /// Normalize temporal text to canonical wall-clock form; unparseable
    /// text is kept.
    pub fn normalize(&self, text: &str) -> String {
        self.parse(text)
            .map(|ts| canonical(&ts))
            .unwrap_or_else(|| text.to_string())
    }

    /// Render a unix timestamp (seconds) as canonical wall-clock text.
    pub fn from_unix_seconds(&self, secs: i64) -> Option<String> {
        DateTime::<Utc>::from_timestamp(secs, 0).map(|dt| canonical(&self.wall_clock(&dt)))
    }

    /// SQLite modifier shifting a UTC `datetime(.., 'unixepoch')` into this zone.
    pub fn sqlite_modifier(&self) -> String {
        match self {
            SourceTimeZone::Local => "localtime".to_string(),
            SourceTimeZone::Utc => "+0 minutes".to_string(),
            SourceTimeZone::Fixed(offset) => {
                format!("{:+} minutes", offset.local_minus_utc() / 60)
            }
        }
    }
}

impl FromStr for SourceTimeZone {
    type Err = Error;

    /// Accepts `local`, `utc`, or an offset such as `+09:00`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(SourceTimeZone::Local),
            "utc" | "z" => Ok(SourceTimeZone::Utc),
            other => other
                .parse::<FixedOffset>()
                .map(SourceTimeZone::Fixed)
                .map_err(|e| Error::InvalidInput(format!("Invalid time zone '{}': {}", s, e))),
        }
    }
}

impl fmt::Display for SourceTimeZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceTimeZone::Local => write!(f, "local"),
            SourceTimeZone::Utc => write!(f, "utc"),
            SourceTimeZone::Fixed(offset) => write!(f, "{}", offset),
        }
    }
}

/// Lower bound used when a table has never been synced.
pub fn earliest() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MIN)
}
