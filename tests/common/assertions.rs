//! Assertion helpers for run reports and downloaded files

use answersheet_dl::{RunReport, Student, StudentId};
use std::collections::HashSet;
use std::path::Path;

/// Assert the three outcome sets are disjoint and cover exactly `roster`
pub fn assert_partition(report: &RunReport, roster: &[Student]) {
    let failed: Vec<StudentId> = report.failed.iter().map(|f| f.id.clone()).collect();
    let all: Vec<&StudentId> = report
        .succeeded
        .iter()
        .chain(&report.no_data)
        .chain(&failed)
        .collect();

    let unique: HashSet<&StudentId> = all.iter().copied().collect();
    assert_eq!(unique.len(), all.len(), "a student appears in two outcome sets");

    let expected: HashSet<&StudentId> = roster.iter().map(|s| &s.id).collect();
    assert_eq!(unique, expected, "outcome sets do not cover the roster");
}

/// Assert that `dir/name` exists with exactly `bytes` as content
pub fn assert_file_bytes(dir: &Path, name: &str, bytes: &[u8]) {
    let path = dir.join(name);
    let content = std::fs::read(&path)
        .unwrap_or_else(|e| panic!("expected {} to exist: {e}", path.display()));
    assert_eq!(content, bytes, "content of {} differs", path.display());
}
