use std::time::Duration;

/// Backoff policy for transient store failures. Defaults follow the store-layer
/// contract: five retries, 10ms doubling to a 500ms ceiling.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self { Self { max_retries: 5, base_delay: Duration::from_millis(10), max_delay: Duration::from_millis(500) } }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based): base * 2^attempt, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        exp.min(self.max_delay)
    }
}

/// Retry loop for transactional operations. The closure runs one attempt per
/// call; retryable errors back off and re-run, everything else surfaces.
macro_rules! with_retry {
    ($config:expr, $body:expr) => {{
        let config: &$crate::retry::RetryConfig = $config;
        let mut attempt: u32 = 0;
        loop {
            match $body {
                Err(e) if e.is_retryable() && attempt < config.max_retries => {
                    ::tracing::debug!(attempt, error = %e, "retrying transaction");
                    ::tokio::time::sleep(config.delay(attempt)).await;
                    attempt += 1;
                }
                other => break other,
            }
        }
    }};
}

pub(crate) use with_retry;
