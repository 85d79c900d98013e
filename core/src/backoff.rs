use std::time::Duration;

use rand::Rng;

/// Shared retry/backoff policy (spec §5 "Backoff policy (shared)"):
/// attempt N delay = min(initial * multiplier^N, max), with ±25% jitter.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry attempt `attempt` (1-indexed: the delay before
    /// the *first* retry is `delay_for_attempt(1)`).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        let capped = base.min(self.max.as_secs_f64());
        let jitter = rand::rng().random_range(-0.25..=0.25);
        let jittered = (capped * (1.0 + jitter)).max(0.0);
        Duration::from_secs_f64(jittered)
    }

    /// Runs `op` with retry up to `max_attempts`, sleeping `delay_for_attempt`
    /// between tries. `is_retryable` decides whether a given error should be
    /// retried at all (spec §7: auth failures and other fatal conditions
    /// skip retry entirely).
    pub async fn retry<T, E, F, Fut>(&self, mut is_retryable: impl FnMut(&E) -> bool, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !is_retryable(&e) {
                        return Err(e);
                    }
                    tokio::time::sleep(self.delay_for_attempt(attempt)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_geometrically_and_caps() {
        let policy = BackoffPolicy {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 5,
        };
        for attempt in 1..=10 {
            let d = policy.delay_for_attempt(attempt);
            let uncapped = 1.0 * 2f64.powi(attempt as i32 - 1);
            let expected_center = uncapped.min(30.0);
            let lo = (expected_center * 0.75).max(0.0);
            let hi = expected_center * 1.25 + 0.001;
            assert!(
                d.as_secs_f64() >= lo && d.as_secs_f64() <= hi,
                "attempt {attempt}: {d:?} not in [{lo}, {hi}]"
            );
        }
    }

    #[tokio::test]
    async fn retry_stops_at_max_attempts() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(5),
            multiplier: 1.0,
            max_attempts: 3,
        };
        let mut calls = 0;
        let result: Result<(), &str> = policy
            .retry(
                |_| true,
                || {
                    calls += 1;
                    async { Err("boom") }
                },
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn retry_skips_non_retryable_errors() {
        let policy = BackoffPolicy::default();
        let mut calls = 0;
        let result: Result<(), &str> = policy
            .retry(
                |_| false,
                || {
                    calls += 1;
                    async { Err("fatal") }
                },
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
