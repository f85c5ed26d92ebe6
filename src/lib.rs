//! # answersheet-dl
//!
//! Concurrent downloader for scanned student answer sheets on a rate-limited
//! exam platform.
//!
//! ## Design
//!
//! - **Bounded fan-out** - a roster is fetched in fixed-size batches, with a
//!   global cap on in-flight requests and a pause between batches
//! - **One login per rate limit** - workers that are throttled at the same time
//!   share a single re-authentication, and nobody uses the old token meanwhile
//! - **Per-student outcomes** - every student ends up succeeded, without data, or
//!   failed with its last error; one student never aborts the run
//! - **Event-driven** - consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use answersheet_dl::{Config, Credentials, ExamImageDownloader, ExamRequest, SchoolId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         credentials: Credentials {
//!             environment: "school-demo".to_string(),
//!             school_id: SchoolId::from(1042),
//!             username: "teacher01".to_string(),
//!             password: "<encrypted password>".to_string(),
//!         },
//!         ..Default::default()
//!     };
//!
//!     let downloader = ExamImageDownloader::new(config)?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = downloader
//!         .download_exam(ExamRequest::new("1874512312").course("ENGLISH"))
//!         .await?;
//!     println!("{}", report.run);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Exam platform API contract and HTTP client
pub mod api;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// End-to-end exam workflow
pub mod exam;
/// Bounded, batched answer-sheet fetching
pub mod fetcher;
/// Concurrent image downloads
pub mod image_downloader;
/// Rate-limit classification
pub mod rate_limit;
/// Coordinated re-authentication
pub mod reauth;
/// Retry logic with configurable backoff
pub mod retry;
/// Shared session state and token gate
pub mod session;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use api::{ExamApi, HttpExamApi, LoginGrant, RawReply};
pub use config::{
    Backoff, Config, Credentials, DownloadConfig, FetchConfig, FileCollisionAction,
    RateLimitConfig, RetryConfig,
};
pub use error::{AuthError, Error, Result};
pub use exam::{ExamDownloadReport, ExamImageDownloader, ExamRequest};
pub use fetcher::{RunReport, SheetFetcher};
pub use image_downloader::{DownloadSummary, FailedDownload, ImageDownloader};
pub use rate_limit::RateLimitDetector;
pub use reauth::{ReauthCoordinator, ReauthOutcome};
pub use session::{SessionHandle, SessionState, TokenGate};
pub use types::{
    ClassGroup, CoursePaper, Event, ExamPaper, ExaminationId, FailedStudent, FetchOutcome,
    OutcomeKind, PaperId, RosterFilter, SchoolId, Student, StudentId,
};
