//! Retry orchestrator: wraps one async unit of work with exponential backoff.
//!
//! The unit of work is opaque: it may be a bare service call or a
//! call + recover + validate compound, so a content-shape failure re-rolls a
//! fresh sample instead of re-parsing the same bad text.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::resilience::errors::{is_retryable, GenerationError};

/// Upper bound on the exponential component of the delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Upper bound on the random jitter added to each computed delay.
pub const MAX_JITTER: Duration = Duration::from_secs(2);

/// Observer invoked as `(attempt_index, error)` before each backoff sleep.
pub type RetryObserver = Arc<dyn Fn(u32, &GenerationError) + Send + Sync>;

#[derive(Clone)]
pub struct RetryOptions {
    /// Retries after the first attempt; total invocations are `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Label used in log lines.
    pub context: String,
    /// Replaces the default warn-level log line when set.
    pub on_retry: Option<RetryObserver>,
}

impl RetryOptions {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            ..Self::default()
        }
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn on_retry(mut self, observer: RetryObserver) -> Self {
        self.on_retry = Some(observer);
        self
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            context: "llm call".to_string(),
            on_retry: None,
        }
    }
}

impl std::fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("context", &self.context)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Delay before the retry that follows failed attempt `attempt` (0-based).
///
/// A server-provided retry-after hint is used verbatim. Otherwise
/// `min(base * 2^attempt, 60s)` plus uniform jitter in `[0, 2s)`.
pub fn backoff_delay(attempt: u32, base_delay: Duration, error: &GenerationError) -> Duration {
    if let Some(hint) = error.retry_after() {
        return hint;
    }

    let factor = 2u32.saturating_pow(attempt);
    let exponential = base_delay.saturating_mul(factor).min(MAX_BACKOFF);
    let jitter_ms = rand::thread_rng().gen_range(0..MAX_JITTER.as_millis() as u64);
    exponential + Duration::from_millis(jitter_ms)
}

/// Runs `unit_of_work` until it succeeds, fails fatally, or the retry budget
/// is spent. Attempts are strictly sequential; the last error is returned.
pub async fn retry_with_backoff<T, F, Fut>(
    mut unit_of_work: F,
    options: &RetryOptions,
) -> Result<T, GenerationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GenerationError>>,
{
    let mut attempt: u32 = 0;

    loop {
        let err = match unit_of_work().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !is_retryable(&err) {
            error!(
                context = %options.context,
                attempt,
                status = ?err.status(),
                "Non-retryable failure: {err}"
            );
            return Err(err);
        }

        if attempt >= options.max_retries {
            error!(
                context = %options.context,
                attempts = attempt + 1,
                status = ?err.status(),
                "Retries exhausted: {err}"
            );
            return Err(err);
        }

        let delay = backoff_delay(attempt, options.base_delay, &err);

        match &options.on_retry {
            Some(observer) => observer(attempt, &err),
            None => warn!(
                context = %options.context,
                attempt = attempt + 1,
                max_retries = options.max_retries,
                delay_ms = delay.as_millis() as u64,
                status = ?err.status(),
                "Retrying after failure: {err}"
            ),
        }

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
