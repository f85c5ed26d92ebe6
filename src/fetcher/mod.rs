//! Bounded, batched answer-sheet fetching
//!
//! [`SheetFetcher`] turns a roster into image URLs:
//!
//! - the roster is cut into fixed-size batches that run strictly one after another
//!   ([`scheduler`]), with a pause between batches;
//! - every student of a batch gets its own worker task ([`worker`]), and a global
//!   semaphore caps how many answer-sheet requests are in flight;
//! - a worker that sees a rate limit goes through the shared
//!   [`ReauthCoordinator`], so concurrent limits cause a single re-login.
//!
//! Per-student problems never surface as errors: they end up in the
//! [`RunReport`] as no-data or failed students.

use crate::api::ExamApi;
use crate::config::{Config, FetchConfig, RetryConfig};
use crate::error::Result;
use crate::rate_limit::RateLimitDetector;
use crate::reauth::ReauthCoordinator;
use crate::session::SessionHandle;
use crate::types::{Event, FetchOutcome, PaperId, Student, StudentId};
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};

mod report;
pub(crate) mod scheduler;
pub(crate) mod worker;

pub use report::RunReport;
pub use scheduler::partition;

/// Everything a worker needs, shared by all workers of a run
pub(crate) struct FetchContext {
    pub(crate) api: Arc<dyn ExamApi>,
    pub(crate) session: SessionHandle,
    pub(crate) coordinator: Arc<ReauthCoordinator>,
    pub(crate) detector: RateLimitDetector,
    /// Admission gate, one permit per in-flight answer-sheet request
    pub(crate) admission: Arc<Semaphore>,
    pub(crate) fetch: FetchConfig,
    pub(crate) retry: RetryConfig,
    pub(crate) event_tx: broadcast::Sender<Event>,
}

/// Fetches answer-sheet image URLs for rosters of students
#[derive(Clone)]
pub struct SheetFetcher {
    ctx: Arc<FetchContext>,
}

impl SheetFetcher {
    /// Create a fetcher that shares `coordinator`'s session and event channel
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::error::Error::Config) when `config` does not
    /// validate (zero concurrency, zero batch size, empty URL delimiter, ...).
    pub fn new(
        api: Arc<dyn ExamApi>,
        coordinator: Arc<ReauthCoordinator>,
        config: &Config,
    ) -> Result<Self> {
        config.validate()?;
        let session = coordinator.session().clone();
        let event_tx = coordinator.events().clone();
        Ok(Self {
            ctx: Arc::new(FetchContext {
                api,
                session,
                coordinator,
                detector: RateLimitDetector::from_config(&config.rate_limit),
                admission: Arc::new(Semaphore::new(config.fetch.max_concurrent_requests)),
                fetch: config.fetch.clone(),
                retry: config.retry.clone(),
                event_tx,
            }),
        })
    }

    /// Subscribe to fetch events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.ctx.event_tx.subscribe()
    }

    /// Number of answer-sheet requests that may start right now
    pub fn available_permits(&self) -> usize {
        self.ctx.admission.available_permits()
    }

    /// Resolve one student (admission, retries, rate-limit handling included)
    pub async fn fetch_student(&self, paper: &PaperId, student: &StudentId) -> FetchOutcome {
        worker::fetch_student(Arc::clone(&self.ctx), paper.clone(), student.clone()).await
    }

    /// Resolve a whole roster with the configured batch size
    pub async fn gather_urls(&self, paper: &PaperId, roster: &[Student]) -> Result<RunReport> {
        self.gather_urls_in_batches(paper, roster, self.ctx.fetch.batch_size)
            .await
    }

    /// Resolve a whole roster in batches of `batch_size`
    ///
    /// # Errors
    ///
    /// Only a zero `batch_size` is an error; per-student failures are recorded
    /// in the report.
    pub async fn gather_urls_in_batches(
        &self,
        paper: &PaperId,
        roster: &[Student],
        batch_size: usize,
    ) -> Result<RunReport> {
        scheduler::gather_urls(&self.ctx, paper, roster, batch_size).await
    }
}

impl std::fmt::Debug for SheetFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SheetFetcher")
            .field("session", &self.ctx.session)
            .field("fetch", &self.ctx.fetch)
            .field("retry", &self.ctx.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests;
