//! Configuration types for answersheet-dl

use crate::error::{Error, Result};
use crate::types::SchoolId;
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Login credentials for the exam platform
///
/// The password is expected in the form the platform's login endpoint accepts
/// (already encrypted by the caller) and is sent verbatim.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Environment identifier; selects the platform host (`https://{environment}.{host_suffix}`)
    pub environment: String,

    /// School the session must be switched to after login
    pub school_id: SchoolId,

    /// Account name
    pub username: String,

    /// Encrypted password
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("environment", &self.environment)
            .field("school_id", &self.school_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Platform endpoint settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host suffix appended to the environment identifier (default: "xuece.cn")
    #[serde(default = "default_host_suffix")]
    pub host_suffix: String,

    /// Full base URL override (tests, proxies). Takes precedence over environment + suffix.
    #[serde(default)]
    pub base_url: Option<String>,

    /// `clienttype` sent with login and switch requests (default: "BROWSER")
    #[serde(default = "default_client_type")]
    pub client_type: String,

    /// `clientversion` sent with login and switch requests
    #[serde(default = "default_client_version")]
    pub client_version: String,

    /// `systemversion` sent with login requests
    #[serde(default = "default_system_version")]
    pub system_version: String,

    /// Connect timeout for the HTTP client (default: 60 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host_suffix: default_host_suffix(),
            base_url: None,
            client_type: default_client_type(),
            client_version: default_client_version(),
            system_version: default_system_version(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Per-student answer sheet fetching (concurrency, batching, timeouts)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum number of answer-sheet requests in flight at once (default: 5)
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Number of students per batch (default: 5)
    ///
    /// May exceed `max_concurrent_requests`; the admission gate still caps in-flight requests.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between two batches (default: 1 second)
    #[serde(default = "default_batch_delay", with = "duration_serde")]
    pub batch_delay: Duration,

    /// Timeout for a single answer-sheet request (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Literal delimiter separating image URLs in the answer-sheet payload (default: "@##@")
    #[serde(default = "default_url_delimiter")]
    pub url_delimiter: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
            batch_size: default_batch_size(),
            batch_delay: default_batch_delay(),
            request_timeout: default_request_timeout(),
            url_delimiter: default_url_delimiter(),
        }
    }
}

/// Backoff schedule between retries
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// `min(step * retry, max)`
    Linear {
        /// Delay added per retry
        #[serde(with = "duration_serde")]
        step: Duration,
        /// Upper bound for a single delay
        #[serde(with = "duration_serde")]
        max: Duration,
    },
    /// `min(initial * multiplier^(retry - 1), max)`
    Exponential {
        /// Delay before the first retry
        #[serde(with = "duration_serde")]
        initial: Duration,
        /// Growth factor per retry
        multiplier: f64,
        /// Upper bound for a single delay
        #[serde(with = "duration_serde")]
        max: Duration,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Linear {
            step: Duration::from_secs(2),
            max: Duration::from_secs(10),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (default: 3)
    ///
    /// An operation runs at most `max_retries + 1` times: with the default a
    /// student gets four requests, so one throttled three times in a row still
    /// succeeds on the fourth.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff schedule (default: linear, 2s step, 10s cap)
    #[serde(default)]
    pub backoff: Backoff,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff: Backoff::default(),
            jitter: false,
        }
    }
}

/// Rate-limit detection and re-authentication settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Lower-case substrings that mark a payload `code`/`message` as rate-limited
    ///
    /// This is a heuristic: a coincidental substring match (e.g. "450" inside an
    /// unrelated message) is classified as rate-limited.
    #[serde(default = "default_rate_limit_indicators")]
    pub indicators: Vec<String>,

    /// Pause after a successful re-authentication before waiting workers resume (default: 3 seconds)
    #[serde(default = "default_reauth_cooldown", with = "duration_serde")]
    pub cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            indicators: default_rate_limit_indicators(),
            cooldown: default_reauth_cooldown(),
        }
    }
}

/// File collision handling strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCollisionAction {
    /// Append (1), (2), etc. to filename
    Rename,
    /// Overwrite existing file (default)
    #[default]
    Overwrite,
    /// Skip the file, keep existing
    Skip,
}

/// Image download settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root directory; each exam is written to a sub-directory named after the paper (default: ".")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Cap on concurrent image downloads (None = all at once)
    #[serde(default)]
    pub max_concurrent_downloads: Option<usize>,

    /// File collision handling
    #[serde(default)]
    pub file_collision: FileCollisionAction,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_concurrent_downloads: None,
            file_collision: FileCollisionAction::default(),
        }
    }
}

/// Main configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Account used for login and re-login
    pub credentials: Credentials,

    /// Endpoint settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Answer-sheet fetching
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Retry policy for answer-sheet fetching
    #[serde(default)]
    pub retry: RetryConfig,

    /// Rate-limit detection and re-authentication
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Image downloads
    #[serde(default)]
    pub download: DownloadConfig,
}

impl Config {
    /// Load and validate a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde defaults cannot express
    pub fn validate(&self) -> Result<()> {
        if self.fetch.batch_size == 0 {
            return Err(Error::config(
                "batch size must be greater than zero",
                "fetch.batch_size",
            ));
        }
        if self.fetch.max_concurrent_requests == 0 {
            return Err(Error::config(
                "concurrency must be greater than zero",
                "fetch.max_concurrent_requests",
            ));
        }
        if self.fetch.url_delimiter.is_empty() {
            return Err(Error::config(
                "URL delimiter must not be empty",
                "fetch.url_delimiter",
            ));
        }
        if self.download.max_concurrent_downloads == Some(0) {
            return Err(Error::config(
                "download concurrency must be greater than zero when set",
                "download.max_concurrent_downloads",
            ));
        }
        if self.credentials.username.is_empty() {
            return Err(Error::config(
                "username must not be empty",
                "credentials.username",
            ));
        }
        if self.api.base_url.is_none() && self.credentials.environment.is_empty() {
            return Err(Error::config(
                "environment must be set when no base_url override is given",
                "credentials.environment",
            ));
        }
        self.base_url().map(|_| ())
    }

    /// Base endpoint derived from the environment identifier, or the explicit override
    pub fn base_url(&self) -> Result<url::Url> {
        let raw = match &self.api.base_url {
            Some(base) => base.clone(),
            None => format!(
                "https://{}.{}",
                self.credentials.environment, self.api.host_suffix
            ),
        };
        url::Url::parse(&raw)
            .map_err(|e| Error::config(format!("invalid base URL {raw}: {e}"), "api.base_url"))
    }
}

fn default_host_suffix() -> String {
    "xuece.cn".to_string()
}

fn default_client_type() -> String {
    "BROWSER".to_string()
}

fn default_client_version() -> String {
    "1.25.7".to_string()
}

fn default_system_version() -> String {
    "chrome117.0.0.0".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_concurrent_requests() -> usize {
    5
}

fn default_batch_size() -> usize {
    5
}

fn default_batch_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_url_delimiter() -> String {
    "@##@".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_rate_limit_indicators() -> Vec<String> {
    [
        "rate limit",
        "too many requests",
        "请求过于频繁",
        "接口限制",
        "limit exceeded",
        "450",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_reauth_cooldown() -> Duration {
    Duration::from_secs(3)
}

fn default_download_dir() -> PathBuf {
    PathBuf::from(".")
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
