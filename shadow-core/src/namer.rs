// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeSet;

use chrono::{DateTime, Local};
use shadow_types::{DEFAULT_MARKERS, TIMESTAMP_FORMAT};

use crate::error::{Result, ShadowError};

/// Produces default snapshot names from the current minute.
///
/// Two names generated within the same minute are identical.
#[derive(Debug, Clone, Default)]
pub enum SnapshotNamer {
    #[default]
    SystemClock,
    Fixed(DateTime<Local>),
}

impl SnapshotNamer {
    pub fn now(&self) -> DateTime<Local> {
        match self {
            Self::SystemClock => Local::now(),
            Self::Fixed(at) => *at,
        }
    }

    pub fn timestamp_name(&self) -> String {
        timestamp_name_at(&self.now())
    }
}

pub fn timestamp_name_at(at: &DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Reject names that cannot be a directory entry or read as the default marker.
pub fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name == "." || name == ".." {
        Some("name is a relative path component")
    } else if name.contains('/') || name.contains('\0') {
        Some("name contains a path separator or NUL")
    } else if name.trim() != name {
        Some("name has leading or trailing whitespace")
    } else if DEFAULT_MARKERS.contains(&name) {
        Some("name is reserved for the default subvolume")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ShadowError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Subvolume ids are resolved by substring, so no registered name may contain
/// or be contained in another.
pub fn check_conflicts(name: &str, registered: &BTreeSet<String>) -> Result<()> {
    if registered.contains(name) {
        return Err(ShadowError::SnapshotExists(name.to_string()));
    }

    match registered
        .iter()
        .find(|existing| existing.contains(name) || name.contains(existing.as_str()))
    {
        Some(existing) => Err(ShadowError::NameConflict {
            name: name.to_string(),
            existing: existing.clone(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn registered(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn timestamp_names_have_minute_resolution() {
        let at = Local.with_ymd_and_hms(2024, 1, 5, 7, 3, 59).unwrap();
        let namer = SnapshotNamer::Fixed(at);
        assert_eq!(namer.timestamp_name(), "202401050703");
        assert_eq!(namer.timestamp_name(), namer.timestamp_name());
    }

    #[test]
    fn system_clock_names_are_twelve_digits() {
        let name = SnapshotNamer::SystemClock.timestamp_name();
        assert!(shadow_types::is_timestamp_name(&name));
    }

    #[test]
    fn rejects_unusable_names() {
        for name in ["", ".", "..", "a/b", "default", "0", " padded"] {
            assert!(
                matches!(validate_name(name), Err(ShadowError::InvalidName { .. })),
                "{name:?} should be rejected"
            );
        }
        assert!(validate_name("pre-upgrade").is_ok());
    }

    #[test]
    fn overlapping_names_conflict_both_ways() {
        let existing = registered(&["202401011200", "pre-upgrade"]);

        assert!(matches!(
            check_conflicts("2024", &existing),
            Err(ShadowError::NameConflict { .. })
        ));
        assert!(matches!(
            check_conflicts("pre-upgrade-2", &existing),
            Err(ShadowError::NameConflict { .. })
        ));
        assert!(matches!(
            check_conflicts("pre-upgrade", &existing),
            Err(ShadowError::SnapshotExists(_))
        ));
        assert!(check_conflicts("202401011201", &existing).is_ok());
    }
}
