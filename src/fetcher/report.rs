//! Run report: URLs plus the three outcome sets

use crate::types::{FailedStudent, FetchOutcome, OutcomeKind, StudentId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Result of resolving a roster
///
/// `succeeded`, `no_data` and `failed` are disjoint and together cover every
/// distinct student of the roster. `urls` is ordered by batch, and by worker
/// completion within a batch.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    /// Image URLs of all successful students
    pub urls: Vec<String>,
    /// Students whose sheet was resolved to URLs
    pub succeeded: Vec<StudentId>,
    /// Students without a scanned sheet
    pub no_data: Vec<StudentId>,
    /// Students that exhausted their retries, with the last error
    pub failed: Vec<FailedStudent>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the last batch finished
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub(crate) fn start() -> Self {
        Self {
            urls: Vec::new(),
            succeeded: Vec::new(),
            no_data: Vec::new(),
            failed: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Record a terminal outcome; returns the number of URLs it contributed
    pub(crate) fn record(&mut self, student: StudentId, outcome: FetchOutcome) -> usize {
        match outcome {
            FetchOutcome::Success(urls) => {
                let added = urls.len();
                self.urls.extend(urls);
                self.succeeded.push(student);
                added
            }
            FetchOutcome::NoData => {
                self.no_data.push(student);
                0
            }
            FetchOutcome::Failed(error) => {
                self.failed.push(FailedStudent { id: student, error });
                0
            }
        }
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Number of students classified
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.no_data.len() + self.failed.len()
    }

    /// Which set a student ended in, if any
    pub fn outcome_of(&self, student: &StudentId) -> Option<OutcomeKind> {
        if self.succeeded.contains(student) {
            Some(OutcomeKind::Success)
        } else if self.no_data.contains(student) {
            Some(OutcomeKind::NoData)
        } else if self.failed.iter().any(|f| &f.id == student) {
            Some(OutcomeKind::Failed)
        } else {
            None
        }
    }

    /// Wall-clock duration of the run, once finished
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }

    /// Log the summary: counts and no-data ids at `info`, each failed student at `warn`
    pub fn log_summary(&self) {
        tracing::info!(
            succeeded = self.succeeded.len(),
            no_data = self.no_data.len(),
            failed = self.failed.len(),
            urls = self.urls.len(),
            elapsed_ms = self.elapsed().map(|d| d.num_milliseconds()),
            "Answer sheet run finished"
        );
        if !self.no_data.is_empty() {
            tracing::info!(students = ?self.no_data, "Students without answer sheet");
        }
        for failed in &self.failed {
            tracing::warn!(student_id = %failed.id, error = %failed.error, "Student failed");
        }
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Answer sheet summary")?;
        writeln!(f, "  succeeded: {}", self.succeeded.len())?;
        writeln!(f, "  no data:   {}", self.no_data.len())?;
        writeln!(f, "  failed:    {}", self.failed.len())?;
        write!(f, "  image URLs: {}", self.urls.len())?;
        if !self.no_data.is_empty() {
            let ids: Vec<&str> = self.no_data.iter().map(StudentId::as_str).collect();
            write!(f, "\nStudents without answer sheet: {}", ids.join(", "))?;
        }
        if !self.failed.is_empty() {
            write!(f, "\nFailed students:")?;
            for failed in &self.failed {
                write!(f, "\n  {}: {}", failed.id, failed.error)?;
            }
        }
        Ok(())
    }
}
