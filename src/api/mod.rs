//! Exam platform API contract
//!
//! [`ExamApi`] is the seam between the download machinery and the platform. The
//! production implementation is [`HttpExamApi`]; tests plug in in-memory fakes.
//! Every call that needs authorization receives the [`SessionState`] snapshot the
//! caller observed, so headers are always derived from the current token.

use crate::config::Credentials;
use crate::error::Result;
use crate::session::SessionState;
use crate::types::{ClassGroup, CoursePaper, ExaminationId, PaperId, SchoolId, StudentId};

mod http;

pub use http::HttpExamApi;

/// Endpoint paths, relative to the platform base URL
pub mod endpoints {
    /// Login (GET)
    pub const LOGIN: &str = "/api/usercenter/nnauth/user/login";
    /// School switch (POST form)
    pub const SWITCH_SCHOOL: &str = "/api/usercenter/common/loginuserinfo/switchschool";
    /// Answer-card status, lists the papers of an examination
    pub const ANSWER_CARD_STATUS: &str = "/api/examcenter/teacher/answercard/getanswercardstatus";
    /// Examination info, lists the participating schools
    pub const EXAM_INFO: &str = "/api/examcenter/teacher/exam/examinfo";
    /// Class rosters of a paper at a school
    pub const ROSTER: &str = "/api/examcenter/teacher/recognitionclient/class/namelist";
    /// One student's scanned answer sheet
    pub const ANSWER_SHEET: &str = "/api/examcenter/teacher/recognitionclient/exampaper/stu";
}

/// Result of a successful login
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginGrant {
    /// Opaque authentication token
    pub token: String,
    /// School the account is logged into (may differ from the target school)
    pub school_id: SchoolId,
}

/// Unclassified reply of the answer-sheet endpoint
///
/// Classification (rate limit, malformed, no data) is left to the fetch worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawReply {
    /// HTTP status code
    pub status: u16,
    /// Response body as text
    pub body: String,
}

/// Operations the downloader needs from the exam platform
#[async_trait::async_trait]
pub trait ExamApi: Send + Sync {
    /// Log in; any failure is an [`AuthError`](crate::error::AuthError)
    async fn login(&self, credentials: &Credentials) -> Result<LoginGrant>;

    /// Switch the session to `target`. Callers skip this when already on `target`.
    async fn switch_school(&self, session: &SessionState, target: &SchoolId) -> Result<()>;

    /// Papers of an examination, one per course
    async fn exam_papers(
        &self,
        session: &SessionState,
        examination: &ExaminationId,
    ) -> Result<Vec<CoursePaper>>;

    /// Schools taking part in an examination
    async fn exam_schools(
        &self,
        session: &SessionState,
        examination: &ExaminationId,
    ) -> Result<Vec<SchoolId>>;

    /// Class rosters of a paper at a school
    async fn roster(
        &self,
        session: &SessionState,
        paper: &PaperId,
        school: &SchoolId,
    ) -> Result<Vec<ClassGroup>>;

    /// One student's answer sheet; transport failures are `Err`, any HTTP reply is `Ok`
    async fn fetch_answer_sheet(
        &self,
        session: &SessionState,
        paper: &PaperId,
        student: &StudentId,
    ) -> Result<RawReply>;
}
