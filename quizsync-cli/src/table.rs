//! Table formatting for documents and sync status using comfy-table

use chrono::{DateTime, Local, Utc};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use quizsync_core::{SnapshotSummary, UserData};
use quizsync_sync::{ConflictSummary, Resolution, SyncStatus};

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Render a millisecond timestamp in local time, or "-" when unknown.
pub fn format_timestamp(millis: Option<i64>) -> String {
    millis
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|ts| ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn summary_rows(summary: &SnapshotSummary) -> [(&'static str, usize); 6] {
    [
        ("Subjects", summary.subjects),
        ("Tests", summary.tests),
        ("Questions", summary.questions),
        ("Results", summary.results),
        ("Failed questions", summary.failed_questions),
        ("Bookmarked questions", summary.bookmarked_questions),
    ]
}

/// Per-subject breakdown followed by document totals
pub fn format_summary_table(data: &UserData) -> String {
    if data.subjects.is_empty() && data.tests.is_empty() {
        return "No subjects yet".to_string();
    }

    let mut table = new_table();
    table.set_header(vec!["Subject", "Tests", "Questions", "Results"]);
    for subject in &data.subjects {
        let tests: Vec<_> = data.tests_for_subject(&subject.id).collect();
        let questions: usize = tests.iter().map(|t| t.questions.len()).sum();
        let results = data
            .results
            .iter()
            .filter(|r| r.subject_id == subject.id)
            .count();
        table.add_row(vec![
            Cell::new(&subject.name),
            Cell::new(tests.len()),
            Cell::new(questions),
            Cell::new(results),
        ]);
    }

    let mut totals = new_table();
    totals.set_header(vec!["Total", "Count"]);
    for (label, count) in summary_rows(&data.summary()) {
        totals.add_row(vec![Cell::new(label), Cell::new(count)]);
    }

    format!("{}\n{}", table, totals)
}

/// Side-by-side counts for the conflict prompt
pub fn format_conflict_table(summary: &ConflictSummary) -> String {
    let mut table = new_table();
    table.set_header(vec!["", "This device", "Cloud"]);
    for ((label, local), (_, remote)) in summary_rows(&summary.local)
        .into_iter()
        .zip(summary_rows(&summary.remote))
    {
        table.add_row(vec![Cell::new(label), Cell::new(local), Cell::new(remote)]);
    }

    let newer = match summary.newer_side() {
        Some(Resolution::KeepLocal) => ("newer", ""),
        Some(Resolution::KeepRemote) => ("", "newer"),
        None => ("", ""),
    };
    table.add_row(vec![
        Cell::new("Last modified"),
        Cell::new(format!(
            "{} {}",
            format_timestamp(summary.local_last_modified),
            newer.0
        )),
        Cell::new(format!(
            "{} {}",
            format_timestamp(Some(summary.remote_last_modified)),
            newer.1
        )),
    ]);
    table.to_string()
}

pub fn format_status_table(status: &SyncStatus) -> String {
    let mut table = new_table();
    table.set_header(vec!["Field", "Value"]);

    let user = status
        .user
        .as_ref()
        .map(|u| match &u.display_name {
            Some(name) => format!("{} <{}>", name, u.email),
            None => u.email.clone(),
        })
        .unwrap_or_else(|| "-".to_string());

    let rows = [
        ("State", format!("{:?}", status.state)),
        ("Signed in", status.is_signed_in.to_string()),
        ("User", user),
        ("Initial sync done", status.initial_sync_done.to_string()),
        ("Last sync", format_timestamp(status.last_sync)),
        ("Sync failed", status.sync_failed.to_string()),
        ("Conflict pending", status.has_conflict.to_string()),
    ];
    for (field, value) in rows {
        table.add_row(vec![Cell::new(field), Cell::new(value)]);
    }
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document() {
        assert_eq!(format_summary_table(&UserData::new()), "No subjects yet");
    }

    #[test]
    fn test_summary_lists_subjects() {
        let mut data = UserData::new();
        data.add_subject("Geography", None, None);
        let rendered = format_summary_table(&data);
        assert!(rendered.contains("Geography"));
        assert!(rendered.contains("Bookmarked questions"));
    }

    #[test]
    fn test_unknown_timestamp() {
        assert_eq!(format_timestamp(None), "-");
    }
}
