// SPDX-License-Identifier: GPL-3.0-only

use std::fmt::Write;

use shadow_core::RemovalReport;
use shadow_types::SnapshotInfo;

const NAME_WIDTH: usize = 24;

pub fn snapshot_table(snapshots: &[SnapshotInfo]) -> String {
    if snapshots.is_empty() {
        return "No snapshots\n".to_string();
    }

    let width = snapshots
        .iter()
        .map(|info| info.name.len())
        .max()
        .unwrap_or(0)
        .max(NAME_WIDTH);

    let mut table = format!("{:<width$}  {:<16}  KERNEL IMAGES\n", "NAME", "CREATED");
    for info in snapshots {
        let created = info
            .created_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            table,
            "{:<width$}  {:<16}  {}",
            info.name,
            created,
            info.kernel_artifacts.len()
        );
    }
    table
}

pub fn removal_summary(report: &RemovalReport) -> String {
    match (report.subvolume_removed, report.kernel_artifacts.len()) {
        (true, 0) => format!("Removed snapshot {}", report.name),
        (true, count) => format!(
            "Removed snapshot {} and {} kernel image(s)",
            report.name, count
        ),
        (false, count) => format!(
            "Removed {} kernel image(s) for {} (no snapshot subvolume)",
            count, report.name
        ),
    }
}

pub fn name_list<'a>(names: impl IntoIterator<Item = &'a String>) -> String {
    names
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadow_types::parse_timestamp_name;
    use std::path::PathBuf;

    #[test]
    fn table_lists_each_snapshot() {
        let snapshots = vec![
            SnapshotInfo {
                name: "202401011200".to_string(),
                created_at: parse_timestamp_name("202401011200"),
                kernel_artifacts: vec!["vmlinuz.202401011200".to_string()],
            },
            SnapshotInfo {
                name: "pre-upgrade".to_string(),
                created_at: None,
                kernel_artifacts: Vec::new(),
            },
        ];

        let table = snapshot_table(&snapshots);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("NAME"));
        assert!(lines[1].contains("2024-01-01 12:00"));
        assert!(lines[1].ends_with('1'));
        assert!(lines[2].contains(" - "));
    }

    #[test]
    fn empty_registry_says_so() {
        assert_eq!(snapshot_table(&[]), "No snapshots\n");
    }

    #[test]
    fn name_list_joins_in_order() {
        let names: std::collections::BTreeSet<String> =
            ["bravo", "alpha"].iter().map(|name| name.to_string()).collect();
        assert_eq!(name_list(&names), "alpha, bravo");
    }

    #[test]
    fn summary_mentions_kernel_images() {
        let report = RemovalReport {
            name: "T1".to_string(),
            subvolume_removed: true,
            kernel_artifacts: vec![PathBuf::from("/boot/vmlinuz.T1")],
        };
        assert_eq!(
            removal_summary(&report),
            "Removed snapshot T1 and 1 kernel image(s)"
        );
    }
}
