//! Per-student fetch worker
//!
//! One worker resolves one student to a terminal [`FetchOutcome`]. It holds an
//! admission permit for its whole retry loop and classifies every reply:
//!
//! | Reply | Result |
//! |---|---|
//! | transport error, timeout | retry |
//! | HTTP 429, or rate-limit payload | re-authenticate, retry |
//! | other non-200 status | retry |
//! | body not JSON, `data` or `stuAnswerImgurls` missing or mistyped | retry (malformed) |
//! | `data` null, URL field null or blank | `NoData` |
//! | non-empty URL field | `Success` |

use super::FetchContext;
use crate::rate_limit::TOO_MANY_REQUESTS;
use crate::retry::{with_retry, IsRetryable};
use crate::types::{FetchOutcome, PaperId, StudentId};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Field of the answer-sheet payload carrying the delimited image URLs
const IMAGE_URLS_FIELD: &str = "stuAnswerImgurls";

/// Terminal result of a single attempt
#[derive(Debug, PartialEq, Eq)]
enum Resolution {
    Sheet(Vec<String>),
    NoData,
}

/// Why an attempt did not resolve the student; every variant is retried
#[derive(Debug)]
enum AttemptError {
    Transport(String),
    Timeout(Duration),
    RateLimited { status: u16 },
    Reauth(String),
    Status(u16),
    Malformed(String),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Transport(e) => write!(f, "request failed: {e}"),
            AttemptError::Timeout(after) => write!(f, "request timed out after {after:?}"),
            AttemptError::RateLimited { status } => write!(f, "rate limited (HTTP {status})"),
            AttemptError::Reauth(e) => write!(f, "re-authentication failed: {e}"),
            AttemptError::Status(status) => write!(f, "unexpected HTTP status {status}"),
            AttemptError::Malformed(reason) => write!(f, "malformed response: {reason}"),
        }
    }
}

impl IsRetryable for AttemptError {
    fn is_retryable(&self) -> bool {
        true
    }
}

/// Resolve one student. Never fails: exhausted retries become [`FetchOutcome::Failed`].
pub(crate) async fn fetch_student(
    ctx: Arc<FetchContext>,
    paper: PaperId,
    student: StudentId,
) -> FetchOutcome {
    let _permit = match Arc::clone(&ctx.admission).acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return FetchOutcome::Failed("admission gate closed".to_string()),
    };

    let (context, paper_ref, student_ref) = (ctx.as_ref(), &paper, &student);
    let result = with_retry(&ctx.retry, move || attempt(context, paper_ref, student_ref)).await;

    match result {
        Ok(Resolution::Sheet(urls)) => {
            tracing::debug!(student_id = %student, images = urls.len(), "Answer sheet resolved");
            FetchOutcome::Success(urls)
        }
        Ok(Resolution::NoData) => {
            tracing::debug!(student_id = %student, "No answer sheet for student");
            FetchOutcome::NoData
        }
        Err(e) => {
            tracing::error!(student_id = %student, error = %e, "Giving up on student");
            FetchOutcome::Failed(e.to_string())
        }
    }
}

async fn attempt(
    ctx: &FetchContext,
    paper: &PaperId,
    student: &StudentId,
) -> Result<Resolution, AttemptError> {
    let session = ctx.session.ready_snapshot().await;

    let timeout = ctx.fetch.request_timeout;
    let reply = match tokio::time::timeout(
        timeout,
        ctx.api.fetch_answer_sheet(&session, paper, student),
    )
    .await
    {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => return Err(AttemptError::Transport(e.to_string())),
        Err(_) => return Err(AttemptError::Timeout(timeout)),
    };

    if reply.status == TOO_MANY_REQUESTS {
        return Err(rate_limited(ctx, session.generation, student, reply.status).await);
    }
    if reply.status != 200 {
        return Err(AttemptError::Status(reply.status));
    }

    let body: Value = serde_json::from_str(&reply.body)
        .map_err(|e| AttemptError::Malformed(format!("invalid JSON: {e}")))?;

    if ctx.detector.is_rate_limited(Some(reply.status), Some(&body)) {
        return Err(rate_limited(ctx, session.generation, student, reply.status).await);
    }

    parse_answer_sheet(&body, &ctx.fetch.url_delimiter)
}

/// Hand the rate limit to the coordinator; the attempt is retried either way
async fn rate_limited(
    ctx: &FetchContext,
    observed_generation: u64,
    student: &StudentId,
    status: u16,
) -> AttemptError {
    tracing::warn!(student_id = %student, status, "Rate limit detected");
    match ctx.coordinator.reauthenticate(observed_generation).await {
        Ok(outcome) => {
            tracing::debug!(student_id = %student, ?outcome, "Re-authentication settled");
            AttemptError::RateLimited { status }
        }
        Err(e) => AttemptError::Reauth(e.to_string()),
    }
}

fn parse_answer_sheet(body: &Value, delimiter: &str) -> Result<Resolution, AttemptError> {
    let Some(data) = body.as_object().and_then(|fields| fields.get("data")) else {
        return Err(AttemptError::Malformed("missing `data`".to_string()));
    };

    let fields = match data {
        Value::Null => return Ok(Resolution::NoData),
        Value::Object(fields) => fields,
        _ => return Err(AttemptError::Malformed("`data` is not an object".to_string())),
    };

    match fields.get(IMAGE_URLS_FIELD) {
        None => Err(AttemptError::Malformed(format!("missing `{IMAGE_URLS_FIELD}`"))),
        Some(Value::Null) => Ok(Resolution::NoData),
        Some(Value::String(joined)) => {
            let urls = split_image_urls(joined, delimiter);
            if urls.is_empty() {
                Ok(Resolution::NoData)
            } else {
                Ok(Resolution::Sheet(urls))
            }
        }
        Some(_) => Err(AttemptError::Malformed(format!(
            "`{IMAGE_URLS_FIELD}` is not a string"
        ))),
    }
}

/// Split a delimited URL list, keeping order and dropping blank segments
pub(crate) fn split_image_urls(joined: &str, delimiter: &str) -> Vec<String> {
    joined
        .split(delimiter)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}
