//! Test configuration pointing at a mock platform

use answersheet_dl::config::{
    ApiConfig, Backoff, DownloadConfig, FetchConfig, RateLimitConfig, RetryConfig,
};
use answersheet_dl::{Config, Credentials, SchoolId};
use std::path::Path;
use std::time::Duration;

/// School the test account is switched to
pub const TARGET_SCHOOL: i64 = 7;

/// Configuration for a mock platform at `base_url`, writing into `download_dir`
///
/// Pauses (batch delay, cooldown, backoff) are zero so tests run at network speed.
pub fn test_config(base_url: &str, download_dir: &Path) -> Config {
    Config {
        credentials: Credentials {
            environment: "test".to_string(),
            school_id: SchoolId::from(TARGET_SCHOOL),
            username: "teacher01".to_string(),
            password: "c50d98c7".to_string(),
        },
        api: ApiConfig {
            base_url: Some(base_url.to_string()),
            ..Default::default()
        },
        fetch: FetchConfig {
            max_concurrent_requests: 5,
            batch_size: 5,
            batch_delay: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        },
        retry: RetryConfig {
            max_retries: 3,
            backoff: Backoff::Linear {
                step: Duration::ZERO,
                max: Duration::ZERO,
            },
            jitter: false,
        },
        rate_limit: RateLimitConfig {
            cooldown: Duration::ZERO,
            ..Default::default()
        },
        download: DownloadConfig {
            download_dir: download_dir.to_path_buf(),
            ..Default::default()
        },
    }
}
