//! Batch scheduling over a roster

use super::{worker, FetchContext, RunReport};
use crate::error::{Error, Result};
use crate::types::{Event, FetchOutcome, PaperId, Student, StudentId};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;

/// Cut `items` into consecutive batches of `size` (the last may be short)
pub fn partition<T>(items: &[T], size: usize) -> Vec<&[T]> {
    if size == 0 {
        return Vec::new();
    }
    items.chunks(size).collect()
}

/// Run every batch to completion, one after another
pub(crate) async fn gather_urls(
    ctx: &Arc<FetchContext>,
    paper: &PaperId,
    roster: &[Student],
    batch_size: usize,
) -> Result<RunReport> {
    if batch_size == 0 {
        return Err(Error::config(
            "batch size must be greater than zero",
            "fetch.batch_size",
        ));
    }

    let roster = distinct(roster);
    let batches = partition(&roster, batch_size);
    let total_batches = batches.len();
    let mut report = RunReport::start();

    tracing::info!(
        paper_id = %paper,
        students = roster.len(),
        batch_size,
        total_batches,
        "Fetching answer sheets"
    );

    for (index, batch) in batches.into_iter().enumerate() {
        let students: Vec<StudentId> = batch.iter().map(|s| s.id.clone()).collect();
        tracing::info!(batch = index + 1, total_batches, size = students.len(), "Starting batch");
        ctx.event_tx
            .send(Event::BatchStarted {
                index,
                total_batches,
                students: students.clone(),
            })
            .ok();

        let batch_urls = run_batch(ctx, paper, students, &mut report).await;

        tracing::info!(batch = index + 1, total_batches, urls = batch_urls, "Batch complete");
        ctx.event_tx
            .send(Event::BatchCompleted {
                index,
                urls: batch_urls,
            })
            .ok();

        if index + 1 < total_batches && !ctx.fetch.batch_delay.is_zero() {
            tokio::time::sleep(ctx.fetch.batch_delay).await;
        }
    }

    report.finish();
    report.log_summary();
    Ok(report)
}

/// Spawn one worker per student and record outcomes in completion order
async fn run_batch(
    ctx: &Arc<FetchContext>,
    paper: &PaperId,
    students: Vec<StudentId>,
    report: &mut RunReport,
) -> usize {
    let mut pending: FuturesUnordered<_> = students
        .into_iter()
        .map(|student| {
            let handle = tokio::spawn(worker::fetch_student(
                Arc::clone(ctx),
                paper.clone(),
                student.clone(),
            ));
            async move { (student, handle.await) }
        })
        .collect();

    let mut batch_urls = 0;
    while let Some((student, joined)) = pending.next().await {
        let outcome = joined.unwrap_or_else(|e| {
            tracing::error!(student_id = %student, error = %e, "Worker task failed");
            FetchOutcome::Failed(format!("worker task failed: {e}"))
        });

        let kind = outcome.kind();
        let images = match &outcome {
            FetchOutcome::Success(urls) => urls.len(),
            _ => 0,
        };
        ctx.event_tx
            .send(Event::StudentResolved {
                student_id: student.clone(),
                outcome: kind,
                images,
            })
            .ok();

        batch_urls += report.record(student, outcome);
    }
    batch_urls
}

/// Roster without repeated ids, first occurrence wins
fn distinct(roster: &[Student]) -> Vec<Student> {
    let mut seen = HashSet::with_capacity(roster.len());
    let unique: Vec<Student> = roster
        .iter()
        .filter(|student| seen.insert(student.id.clone()))
        .cloned()
        .collect();
    if unique.len() != roster.len() {
        tracing::warn!(
            duplicates = roster.len() - unique.len(),
            "Roster contains repeated students, fetching each once"
        );
    }
    unique
}
