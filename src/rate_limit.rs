//! Rate-limit classification of platform responses
//!
//! The platform signals throttling either with HTTP 429 or with an HTTP 200 whose
//! JSON `code`/`message` carries one of a set of indicator phrases. The phrase set
//! is configurable because it is a heuristic: a coincidental substring match
//! (for example "450" inside an unrelated message) is classified as rate-limited.

use crate::config::RateLimitConfig;
use serde_json::Value;

/// HTTP status that always means "rate limited"
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Classifies responses as rate-limited or not. Pure, no side effects.
#[derive(Clone, Debug)]
pub struct RateLimitDetector {
    indicators: Vec<String>,
}

impl RateLimitDetector {
    /// Create a detector from a set of indicator substrings (matched lower-cased)
    pub fn new<I, S>(indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            indicators: indicators
                .into_iter()
                .map(|i| i.as_ref().to_lowercase())
                .filter(|i| !i.is_empty())
                .collect(),
        }
    }

    /// Create a detector from the rate-limit configuration
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(&config.indicators)
    }

    /// Returns true if the status or the payload signals rate limiting
    pub fn is_rate_limited(&self, status: Option<u16>, body: Option<&Value>) -> bool {
        if status == Some(TOO_MANY_REQUESTS) {
            return true;
        }

        let Some(Value::Object(fields)) = body else {
            return false;
        };

        ["code", "message"]
            .iter()
            .filter_map(|key| fields.get(*key))
            .map(normalize)
            .any(|text| self.matches(&text))
    }

    fn matches(&self, text: &str) -> bool {
        self.indicators.iter().any(|i| text.contains(i.as_str()))
    }
}

impl Default for RateLimitDetector {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

fn normalize(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_lowercase(),
        Value::Null => String::new(),
        other => other.to_string().to_lowercase(),
    }
}
