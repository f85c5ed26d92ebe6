//! Concurrent image downloads
//!
//! Every URL is fetched with a plain GET and streamed to
//! `<dir>/<last path segment>`. A failing URL is logged and reported in the
//! [`DownloadSummary`]; it never stops the other downloads.

use crate::config::{DownloadConfig, FileCollisionAction};
use crate::error::{Error, Result};
use crate::types::Event;
use crate::utils::{filename_from_url, unique_path_with};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;

/// An image that could not be written
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedDownload {
    /// Source URL
    pub url: String,
    /// Error description
    pub error: String,
}

/// Result of [`ImageDownloader::download_all`]
#[derive(Clone, Debug, Default, Serialize)]
pub struct DownloadSummary {
    /// Files written, in completion order
    pub written: Vec<PathBuf>,
    /// URLs that failed
    pub failed: Vec<FailedDownload>,
}

/// Downloads image URLs into a directory
#[derive(Clone, Debug)]
pub struct ImageDownloader {
    client: reqwest::Client,
    config: DownloadConfig,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl ImageDownloader {
    /// Create a downloader with its own HTTP client
    pub fn new(config: DownloadConfig) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self::with_client(client, config))
    }

    /// Create a downloader on top of an existing HTTP client
    pub fn with_client(client: reqwest::Client, config: DownloadConfig) -> Self {
        Self {
            client,
            config,
            event_tx: None,
        }
    }

    /// Emit [`Event::ImageDownloaded`] / [`Event::ImageFailed`] on `event_tx`
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Download every URL into `dir` (created if missing)
    ///
    /// All URLs start at once unless `max_concurrent_downloads` is set. Target
    /// paths are chosen up front, so two URLs ending in the same file name never
    /// write the same file: with `Rename` the later one gets a numbered name,
    /// otherwise it fails with [`Error::FileCollision`].
    ///
    /// # Errors
    ///
    /// Only failing to create `dir` is an error; per-URL failures are in the summary.
    pub async fn download_all(&self, urls: &[String], dir: &Path) -> Result<DownloadSummary> {
        tokio::fs::create_dir_all(dir).await?;

        let limit = self
            .config
            .max_concurrent_downloads
            .unwrap_or(urls.len())
            .max(1);

        tracing::info!(
            images = urls.len(),
            dir = %dir.display(),
            concurrency = limit,
            "Downloading images"
        );

        let planned = self.plan_targets(urls, dir);
        let results: Vec<(&str, Result<PathBuf>)> = stream::iter(planned)
            .map(|(url, target)| async move {
                let result = match target {
                    Ok(target) => self.download_one(url, &target).await.map(|()| target),
                    Err(e) => Err(e),
                };
                self.announce(url, &result);
                (url, result)
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut summary = DownloadSummary::default();
        for (url, result) in results {
            match result {
                Ok(path) => summary.written.push(path),
                Err(e) => summary.failed.push(FailedDownload {
                    url: url.to_string(),
                    error: e.to_string(),
                }),
            }
        }

        tracing::info!(
            written = summary.written.len(),
            failed = summary.failed.len(),
            "Image downloads finished"
        );
        Ok(summary)
    }

    /// Pick a target path per URL, in URL order, treating earlier picks as taken
    fn plan_targets<'u>(&self, urls: &'u [String], dir: &Path) -> Vec<(&'u str, Result<PathBuf>)> {
        let mut reserved: HashSet<PathBuf> = HashSet::with_capacity(urls.len());
        urls.iter()
            .map(|url| {
                let target = filename_from_url(url).and_then(|name| {
                    let path = dir.join(name);
                    if self.config.file_collision != FileCollisionAction::Rename
                        && reserved.contains(&path)
                    {
                        return Err(Error::FileCollision {
                            path,
                            reason: "another image of this run has the same name".to_string(),
                        });
                    }
                    unique_path_with(&path, self.config.file_collision, |candidate| {
                        reserved.contains(candidate) || candidate.exists()
                    })
                });
                if let Ok(path) = &target {
                    reserved.insert(path.clone());
                }
                (url.as_str(), target)
            })
            .collect()
    }

    async fn download_one(&self, url: &str, target: &Path) -> Result<()> {
        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::UnexpectedStatus {
                endpoint: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(target).await?;
        let written = async {
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok::<_, Error>(())
        }
        .await;

        if let Err(e) = written {
            drop(file);
            // Partial files are removed
            tokio::fs::remove_file(target).await.ok();
            return Err(e);
        }
        Ok(())
    }

    /// Log and emit the result of one URL as soon as it is known
    fn announce(&self, url: &str, result: &Result<PathBuf>) {
        match result {
            Ok(path) => {
                tracing::debug!(url = %url, path = %path.display(), "Image saved");
                self.emit(Event::ImageDownloaded {
                    url: url.to_string(),
                    path: path.clone(),
                });
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Image download failed");
                self.emit(Event::ImageFailed {
                    url: url.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            tx.send(event).ok();
        }
    }
}
