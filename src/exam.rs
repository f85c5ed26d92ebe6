//! End-to-end exam workflow
//!
//! [`ExamImageDownloader`] wires the pieces together the way an operator uses
//! them: log in and switch school, look up the paper of a course and the school
//! taking the exam, load the roster, gather every answer-sheet URL, and download
//! the images into a directory named after the paper.
//!
//! # Example
//!
//! ```no_run
//! use answersheet_dl::{Config, ExamImageDownloader, ExamRequest};
//!
//! # async fn run() -> answersheet_dl::Result<()> {
//! let config = Config::from_json_file("answersheet-dl.json")?;
//! let downloader = ExamImageDownloader::new(config)?;
//!
//! let report = downloader
//!     .download_exam(ExamRequest::new("1874512312"))
//!     .await?;
//! println!("{}", report.run);
//! # Ok(())
//! # }
//! ```

use crate::api::{ExamApi, HttpExamApi};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetcher::{RunReport, SheetFetcher};
use crate::image_downloader::{DownloadSummary, ImageDownloader};
use crate::reauth::ReauthCoordinator;
use crate::retry::with_retry;
use crate::session::SessionHandle;
use crate::types::{Event, ExamPaper, ExaminationId, RosterFilter, SchoolId, Student};
use crate::utils::directory_name;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Course looked up when a request does not name one
pub const DEFAULT_COURSE: &str = "ENGLISH";

/// What to download
#[derive(Clone, Debug)]
pub struct ExamRequest {
    /// Examination to download
    pub examination_id: ExaminationId,
    /// Course whose paper is downloaded (default: [`DEFAULT_COURSE`])
    pub course_code: String,
    /// School to take the roster from (default: first school of the exam)
    pub school_id: Option<SchoolId>,
    /// Which roster entries to fetch (default: uploaded only)
    pub roster_filter: RosterFilter,
    /// Only fetch the first N students of the filtered roster
    pub max_students: Option<usize>,
    /// Override the configured batch size
    pub batch_size: Option<usize>,
}

impl ExamRequest {
    /// Request with defaults for everything but the examination
    pub fn new(examination_id: impl Into<ExaminationId>) -> Self {
        Self {
            examination_id: examination_id.into(),
            course_code: DEFAULT_COURSE.to_string(),
            school_id: None,
            roster_filter: RosterFilter::Uploaded,
            max_students: None,
            batch_size: None,
        }
    }

    /// Select the course
    pub fn course(mut self, course_code: impl Into<String>) -> Self {
        self.course_code = course_code.into();
        self
    }

    /// Select the school
    pub fn school(mut self, school_id: impl Into<SchoolId>) -> Self {
        self.school_id = Some(school_id.into());
        self
    }

    /// Cap the number of students
    pub fn max_students(mut self, max_students: usize) -> Self {
        self.max_students = Some(max_students);
        self
    }
}

/// Everything a [`ExamImageDownloader::download_exam`] run produced
#[derive(Clone, Debug, Serialize)]
pub struct ExamDownloadReport {
    /// Paper that was downloaded
    pub paper: ExamPaper,
    /// School the roster came from
    pub school_id: SchoolId,
    /// Directory the images were written to
    pub directory: PathBuf,
    /// URL gathering outcome per student
    pub run: RunReport,
    /// Image downloads (None when no URL was gathered)
    pub downloads: Option<DownloadSummary>,
}

/// Answer-sheet image downloader for whole exams
pub struct ExamImageDownloader {
    config: Config,
    api: Arc<dyn ExamApi>,
    coordinator: Arc<ReauthCoordinator>,
    fetcher: SheetFetcher,
    images: ImageDownloader,
    event_tx: broadcast::Sender<Event>,
}

impl ExamImageDownloader {
    /// Create a downloader talking to the platform over HTTP
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let api = Arc::new(HttpExamApi::new(&config)?);
        Self::with_api(config, api)
    }

    /// Create a downloader on top of any [`ExamApi`] implementation
    pub fn with_api(config: Config, api: Arc<dyn ExamApi>) -> Result<Self> {
        config.validate()?;

        // Sized so slow subscribers only lag on very large rosters
        let (event_tx, _rx) = broadcast::channel(1000);

        let session = SessionHandle::new(config.credentials.clone());
        let coordinator = Arc::new(ReauthCoordinator::new(
            Arc::clone(&api),
            session,
            config.rate_limit.cooldown,
            event_tx.clone(),
        ));
        let fetcher = SheetFetcher::new(Arc::clone(&api), Arc::clone(&coordinator), &config)?;
        let images = ImageDownloader::new(config.download.clone())?.with_events(event_tx.clone());

        Ok(Self {
            config,
            api,
            coordinator,
            fetcher,
            images,
            event_tx,
        })
    }

    /// Subscribe to authentication, fetch, and download events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The shared session
    pub fn session(&self) -> &SessionHandle {
        self.coordinator.session()
    }

    /// The answer-sheet fetcher
    pub fn fetcher(&self) -> &SheetFetcher {
        &self.fetcher
    }

    /// The active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Log in and switch to the configured school; returns the session generation
    pub async fn login(&self) -> Result<u64> {
        self.coordinator.authenticate().await
    }

    /// Paper of `course_code` in an examination
    pub async fn find_course_paper(
        &self,
        examination: &ExaminationId,
        course_code: &str,
    ) -> Result<ExamPaper> {
        let api = self.api.as_ref();
        let session = self.session();
        let papers = with_retry(&self.config.retry, move || async move {
            let snapshot = session.ready_snapshot().await;
            api.exam_papers(&snapshot, examination).await
        })
        .await?;

        papers
            .into_iter()
            .find(|entry| entry.course_code == course_code)
            .map(|entry| entry.paper)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "course {course_code} in examination {examination}"
                ))
            })
    }

    /// First school taking part in an examination
    pub async fn first_exam_school(&self, examination: &ExaminationId) -> Result<SchoolId> {
        let api = self.api.as_ref();
        let session = self.session();
        let schools = with_retry(&self.config.retry, move || async move {
            let snapshot = session.ready_snapshot().await;
            api.exam_schools(&snapshot, examination).await
        })
        .await?;

        schools
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("schools of examination {examination}")))
    }

    /// Roster of a paper at a school, flattened and filtered
    pub async fn roster(
        &self,
        paper: &ExamPaper,
        school: &SchoolId,
        filter: RosterFilter,
    ) -> Result<Vec<Student>> {
        let api = self.api.as_ref();
        let session = self.session();
        let paper_id = &paper.id;
        let groups = with_retry(&self.config.retry, move || async move {
            let snapshot = session.ready_snapshot().await;
            api.roster(&snapshot, paper_id, school).await
        })
        .await?;

        let students = filter.apply(groups);
        tracing::info!(
            paper_id = %paper.id,
            school_id = %school,
            ?filter,
            students = students.len(),
            "Roster loaded"
        );
        Ok(students)
    }

    /// Download gathered image URLs into `dir`
    pub async fn download_images(&self, urls: &[String], dir: &Path) -> Result<DownloadSummary> {
        self.images.download_all(urls, dir).await
    }

    /// Run the whole workflow for one examination
    ///
    /// # Errors
    ///
    /// Fails when the login fails, the course or school cannot be found, a
    /// metadata call keeps failing, or the download directory cannot be created.
    /// Students that cannot be fetched are reported in
    /// [`ExamDownloadReport::run`], not as an error.
    pub async fn download_exam(&self, request: ExamRequest) -> Result<ExamDownloadReport> {
        if !self.session().snapshot().is_authenticated() {
            self.login().await?;
        }

        let paper = self
            .find_course_paper(&request.examination_id, &request.course_code)
            .await?;
        tracing::info!(paper_id = %paper.id, title = %paper.title, "Found paper");

        let school_id = match request.school_id {
            Some(school_id) => school_id,
            None => self.first_exam_school(&request.examination_id).await?,
        };

        let mut students = self.roster(&paper, &school_id, request.roster_filter).await?;
        if let Some(max) = request.max_students
            && students.len() > max
        {
            tracing::info!(max, available = students.len(), "Limiting roster");
            students.truncate(max);
        }

        let batch_size = request.batch_size.unwrap_or(self.config.fetch.batch_size);
        let run = self
            .fetcher
            .gather_urls_in_batches(&paper.id, &students, batch_size)
            .await?;

        let directory = self
            .config
            .download
            .download_dir
            .join(directory_name(&paper.title));

        let downloads = if run.urls.is_empty() {
            tracing::warn!(paper_id = %paper.id, "No image URLs gathered, nothing to download");
            None
        } else {
            Some(self.download_images(&run.urls, &directory).await?)
        };

        Ok(ExamDownloadReport {
            paper,
            school_id,
            directory,
            run,
            downloads,
        })
    }
}

impl std::fmt::Debug for ExamImageDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExamImageDownloader")
            .field("session", self.session())
            .field("download_dir", &self.config.download.download_dir)
            .finish()
    }
}
