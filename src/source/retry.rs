use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::StatusCode;

use crate::error::{Error, Result};

const BACKOFF_SECONDS: &[u64] = &[60, 120, 240];

/// Backoff schedule applied to rate-limited responses. Once the schedule is
/// exhausted the rate limit is surfaced as [`Error::SourceUnavailable`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: BACKOFF_SECONDS.iter().map(|s| Duration::from_secs(*s)).collect(),
        }
    }
}

impl RetryPolicy {
    /// Fail on the first rate-limited response.
    pub fn none() -> Self {
        Self { backoff: Vec::new() }
    }

    pub fn max_retries(&self) -> usize {
        self.backoff.len()
    }
}

/// GitHub signals rate limiting with 429, or with 403 plus an exhausted
/// `x-ratelimit-remaining` counter.
pub fn is_rate_limited(status: StatusCode, headers: &HeaderMap) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    status == StatusCode::FORBIDDEN
        && headers
            .get("x-ratelimit-remaining")
            .is_some_and(|v| v.as_bytes() == b"0")
}

/// Send the request produced by `build`, rebuilding and resending it after
/// each backoff step while the response is rate-limited.
pub async fn send_with_retry<F>(policy: &RetryPolicy, mut build: F) -> Result<reqwest::Response>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let mut attempt = 0usize;
    loop {
        let response = build().send().await?;
        if !is_rate_limited(response.status(), response.headers()) {
            return Ok(response);
        }
        match policy.backoff.get(attempt) {
            Some(wait) => {
                log::warn!(
                    "Rate limited ({}). Waiting {}s before retry {}/{}",
                    response.status(),
                    wait.as_secs(),
                    attempt + 1,
                    policy.max_retries()
                );
                tokio::time::sleep(*wait).await;
                attempt += 1;
            }
            None => {
                return Err(Error::SourceUnavailable(format!(
                    "rate limited on {} after {attempt} retries",
                    response.url().path()
                )));
            }
        }
    }
}
