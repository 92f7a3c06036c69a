// SPDX-License-Identifier: GPL-3.0-only

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

/// `strftime` layout of generated snapshot names (minute resolution).
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M";

/// Literal markers that select the default (root) subvolume instead of a named snapshot.
pub const DEFAULT_MARKERS: &[&str] = &["default", "0"];

/// What an activation or merge operates on.
///
/// The root subvolume is never looked up by name; it is always addressed
/// through [`SnapshotTarget::Default`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotTarget {
    Default,
    Named(String),
}

impl SnapshotTarget {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Interpret user input, mapping the default markers onto [`SnapshotTarget::Default`].
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if DEFAULT_MARKERS.contains(&trimmed) {
            Self::Default
        } else {
            Self::Named(trimmed.to_string())
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Default => None,
            Self::Named(name) => Some(name),
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }
}

impl FromStr for SnapshotTarget {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for SnapshotTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// A registered snapshot as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub name: String,
    /// Parsed from a timestamp name, otherwise the snapshot directory's mtime
    pub created_at: Option<DateTime<Local>>,
    /// File names in the kernel directory tagged with this snapshot
    pub kernel_artifacts: Vec<String>,
}

/// True when `name` has the exact shape of a generated timestamp name.
pub fn is_timestamp_name(name: &str) -> bool {
    name.len() == 12 && name.bytes().all(|b| b.is_ascii_digit())
}

/// Recover the creation time encoded in a generated snapshot name.
pub fn parse_timestamp_name(name: &str) -> Option<DateTime<Local>> {
    if !is_timestamp_name(name) {
        return None;
    }

    let field = |range: std::ops::Range<usize>| name[range].parse::<u32>().ok();
    let year = name[0..4].parse::<i32>().ok()?;
    let naive = NaiveDate::from_ymd_opt(year, field(4..6)?, field(6..8)?)?
        .and_hms_opt(field(8..10)?, field(10..12)?, 0)?;

    Local.from_local_datetime(&naive).earliest()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn default_markers_parse_to_default_target() {
        assert_eq!(SnapshotTarget::parse("default"), SnapshotTarget::Default);
        assert_eq!(SnapshotTarget::parse(" 0 "), SnapshotTarget::Default);
        assert_eq!(
            SnapshotTarget::parse("pre-upgrade"),
            SnapshotTarget::named("pre-upgrade")
        );
        assert_eq!("202401011200".parse::<SnapshotTarget>().unwrap().name(), Some("202401011200"));
    }

    #[test]
    fn timestamp_names_round_trip_to_local_time() {
        let created = parse_timestamp_name("202403150945").expect("valid timestamp");
        assert_eq!(created.year(), 2024);
        assert_eq!(created.month(), 3);
        assert_eq!(created.day(), 15);
        assert_eq!(created.hour(), 9);
        assert_eq!(created.minute(), 45);
        assert_eq!(created.format(TIMESTAMP_FORMAT).to_string(), "202403150945");
    }

    #[test]
    fn rejects_names_that_only_look_numeric() {
        assert!(parse_timestamp_name("2024").is_none());
        assert!(parse_timestamp_name("202413150945").is_none());
        assert!(parse_timestamp_name("20240315094a").is_none());
        assert!(!is_timestamp_name("pre-upgrade"));
    }

    #[test]
    fn target_serializes_as_tagged_variant() {
        let json = serde_json::to_string(&SnapshotTarget::named("T1")).unwrap();
        assert_eq!(json, r#"{"named":"T1"}"#);
        assert_eq!(serde_json::to_string(&SnapshotTarget::Default).unwrap(), r#""default""#);
    }
}
