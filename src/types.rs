//! Core types for answersheet-dl

use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// Defines a string-backed identifier that accepts both JSON strings and numbers.
///
/// The platform is inconsistent about id encoding, so every id is normalised to its
/// decimal/text form and serialized back as a string.
macro_rules! flexible_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Borrow the id as text
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserialize_flexible_id(deserializer).map(Self)
            }
        }
    };
}

fn deserialize_flexible_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Signed(n) => n.to_string(),
        RawId::Unsigned(n) => n.to_string(),
    })
}

flexible_id!(
    /// Identifier of a student account
    StudentId
);

flexible_id!(
    /// Identifier of a school
    SchoolId
);

flexible_id!(
    /// Identifier of an exam paper (one subject of an examination)
    PaperId
);

flexible_id!(
    /// Identifier of an examination (may span several papers and schools)
    ExaminationId
);

/// One roster entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    /// Student account id
    pub id: StudentId,
    /// Whether a scanned answer sheet was uploaded for this student
    #[serde(default)]
    pub uploaded: bool,
}

/// A class and its students, as returned by the roster endpoint
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClassGroup {
    /// Students of the class
    #[serde(rename = "stuList", default)]
    pub students: Vec<Student>,
}

/// Roster filtering by upload state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RosterFilter {
    /// Keep every student
    #[default]
    All,
    /// Keep only students with an uploaded sheet
    Uploaded,
    /// Keep only students without an uploaded sheet
    NotUploaded,
}

impl RosterFilter {
    /// Flatten class groups into one roster, keeping class order, and apply the filter
    pub fn apply(self, groups: Vec<ClassGroup>) -> Vec<Student> {
        groups
            .into_iter()
            .flat_map(|group| group.students)
            .filter(|student| match self {
                RosterFilter::All => true,
                RosterFilter::Uploaded => student.uploaded,
                RosterFilter::NotUploaded => !student.uploaded,
            })
            .collect()
    }
}

/// An exam paper (a single subject sitting)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamPaper {
    /// Paper id
    pub id: PaperId,
    /// Human-readable title, used as the download sub-directory
    #[serde(default)]
    pub title: String,
}

/// Answer-card status entry: the paper belonging to one course of an examination
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoursePaper {
    /// Course code (e.g. "ENGLISH")
    #[serde(rename = "courseCode")]
    pub course_code: String,
    /// The paper sat for this course
    #[serde(rename = "exampaper")]
    pub paper: ExamPaper,
}

/// Terminal result of fetching one student's answer sheet
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Ordered list of image URLs
    Success(Vec<String>),
    /// The student has no scanned sheet; a valid end state, not a failure
    NoData,
    /// Retry budget exhausted or the worker failed; carries the last error description
    Failed(String),
}

impl FetchOutcome {
    /// Tag without payload
    pub fn kind(&self) -> OutcomeKind {
        match self {
            FetchOutcome::Success(_) => OutcomeKind::Success,
            FetchOutcome::NoData => OutcomeKind::NoData,
            FetchOutcome::Failed(_) => OutcomeKind::Failed,
        }
    }
}

/// Outcome tag, used in events and summaries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Image URLs were obtained
    Success,
    /// No sheet for this student
    NoData,
    /// Gave up on this student
    Failed,
}

/// A student that ended in the failed set, with its last error
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedStudent {
    /// Student id
    pub id: StudentId,
    /// Last recorded error description
    pub error: String,
}

/// Event emitted while fetching and downloading
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A login (initial or re-login) completed and the new session is in place
    Authenticated {
        /// Session generation after the login
        generation: u64,
    },

    /// A login attempt failed
    AuthenticationFailed {
        /// Error message
        error: String,
    },

    /// A batch of students is about to be fetched
    BatchStarted {
        /// Zero-based batch index
        index: usize,
        /// Total number of batches in this run
        total_batches: usize,
        /// Students in this batch, in roster order
        students: Vec<StudentId>,
    },

    /// A student reached its terminal outcome
    StudentResolved {
        /// Student id
        student_id: StudentId,
        /// Outcome tag
        outcome: OutcomeKind,
        /// Number of image URLs (0 unless successful)
        images: usize,
    },

    /// Every student of a batch reached a terminal outcome
    BatchCompleted {
        /// Zero-based batch index
        index: usize,
        /// URLs gathered by this batch
        urls: usize,
    },

    /// An image was written to disk
    ImageDownloaded {
        /// Source URL
        url: String,
        /// Destination path
        path: PathBuf,
    },

    /// An image could not be downloaded
    ImageFailed {
        /// Source URL
        url: String,
        /// Error message
        error: String,
    },
}
