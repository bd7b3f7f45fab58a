//! Generic retry driver
//!
//! Every outbound operation reports each attempt as an [`Attempt`]; the driver
//! decides whether to wait and try again. Rate-limit and transient failures are
//! counted separately, each against its own [`BackoffPolicy`].

use crate::client::backoff::BackoffPolicy;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

/// Result of a single attempt
#[derive(Debug)]
pub enum Attempt<T, E> {
    Done(T),
    /// HTTP 429
    RateLimited,
    /// Timeout, connection failure, 5xx
    Transient(String),
    /// Not worth retrying here
    Fail(E),
}

/// Why the driver gave up
#[derive(Debug)]
pub enum GiveUp<E> {
    RateLimited { attempts: u32 },
    Transient { attempts: u32, last_error: String },
    Failed(E),
}

/// Something that can wait
///
/// Production code sleeps on the tokio timer; tests record the delays.
#[async_trait]
pub trait Pause: Send + Sync {
    async fn pause(&self, delay: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioPause;

#[async_trait]
impl Pause for TokioPause {
    async fn pause(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Records requested delays without waiting
#[derive(Debug, Default)]
pub struct RecordingPause {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingPause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|delays| delays.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Pause for RecordingPause {
    async fn pause(&self, delay: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(delay);
        }
    }
}

/// Runs an operation until it succeeds, fails hard, or exhausts a budget
pub struct RetryDriver<'a> {
    rate_limit: &'a BackoffPolicy,
    transient: &'a BackoffPolicy,
    pause: &'a dyn Pause,
}

impl<'a> RetryDriver<'a> {
    pub fn new(
        rate_limit: &'a BackoffPolicy,
        transient: &'a BackoffPolicy,
        pause: &'a dyn Pause,
    ) -> Self {
        Self {
            rate_limit,
            transient,
            pause,
        }
    }

    /// Drives `op` to completion
    ///
    /// A wait follows every rate-limited attempt, including the last one, so a
    /// budget of three produces three waits before giving up. Transient failures
    /// wait only when another attempt remains.
    pub async fn drive<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, GiveUp<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Attempt<T, E>>,
    {
        let mut rate_limited = 0u32;
        let mut transient = 0u32;

        loop {
            match op().await {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fail(err) => return Err(GiveUp::Failed(err)),
                Attempt::RateLimited => {
                    let delay = self.rate_limit.delay(rate_limited);
                    rate_limited += 1;
                    tracing::warn!(
                        "Rate limited (429) on {} attempt {}/{}, waiting {:?}",
                        label,
                        rate_limited,
                        self.rate_limit.max_attempts(),
                        delay
                    );
                    self.pause.pause(delay).await;
                    if rate_limited >= self.rate_limit.max_attempts() {
                        return Err(GiveUp::RateLimited {
                            attempts: rate_limited,
                        });
                    }
                }
                Attempt::Transient(message) => {
                    transient += 1;
                    if transient >= self.transient.max_attempts() {
                        return Err(GiveUp::Transient {
                            attempts: transient,
                            last_error: message,
                        });
                    }
                    let delay = self.transient.delay(transient - 1);
                    tracing::warn!(
                        "Transient failure on {} ({}), retry {}/{} in {:?}",
                        label,
                        message,
                        transient,
                        self.transient.max_attempts(),
                        delay
                    );
                    self.pause.pause(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    fn scripted(
        steps: Vec<Attempt<u32, &'static str>>,
    ) -> RefCell<VecDeque<Attempt<u32, &'static str>>> {
        RefCell::new(steps.into_iter().collect())
    }

    #[tokio::test]
    async fn test_three_rate_limits_wait_five_ten_twenty() {
        let rate = BackoffPolicy::exponential(Duration::from_secs(5), 3);
        let transient = BackoffPolicy::linear(Duration::from_secs(1), 3);
        let pause = RecordingPause::new();
        let driver = RetryDriver::new(&rate, &transient, &pause);
        let steps = scripted(vec![
            Attempt::RateLimited,
            Attempt::RateLimited,
            Attempt::RateLimited,
            Attempt::Done(1),
        ]);

        let result = driver
            .drive("test", || {
                let step = steps.borrow_mut().pop_front();
                async move { step.unwrap_or(Attempt::Fail("script ran out")) }
            })
            .await;

        assert!(matches!(result, Err(GiveUp::RateLimited { attempts: 3 })));
        assert_eq!(
            pause.delays(),
            vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(20)
            ]
        );
    }

    #[tokio::test]
    async fn test_counters_are_independent() {
        let rate = BackoffPolicy::exponential(Duration::from_millis(10), 2);
        let transient = BackoffPolicy::linear(Duration::from_millis(3), 2);
        let pause = RecordingPause::new();
        let driver = RetryDriver::new(&rate, &transient, &pause);
        let steps = scripted(vec![
            Attempt::Transient("reset".to_string()),
            Attempt::RateLimited,
            Attempt::Done(7),
        ]);

        let result = driver
            .drive("test", || {
                let step = steps.borrow_mut().pop_front();
                async move { step.unwrap_or(Attempt::Fail("script ran out")) }
            })
            .await;

        assert_eq!(result.ok(), Some(7));
        assert_eq!(
            pause.delays(),
            vec![Duration::from_millis(3), Duration::from_millis(10)]
        );
    }

    #[tokio::test]
    async fn test_transient_exhaustion_skips_final_wait() {
        let rate = BackoffPolicy::exponential(Duration::from_millis(10), 3);
        let transient = BackoffPolicy::linear(Duration::from_millis(3), 2);
        let pause = RecordingPause::new();
        let driver = RetryDriver::new(&rate, &transient, &pause);
        let steps = scripted(vec![
            Attempt::Transient("timeout".to_string()),
            Attempt::Transient("timeout again".to_string()),
        ]);

        let result = driver
            .drive("test", || {
                let step = steps.borrow_mut().pop_front();
                async move { step.unwrap_or(Attempt::Fail("script ran out")) }
            })
            .await;

        match result {
            Err(GiveUp::Transient {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 2);
                assert_eq!(last_error, "timeout again");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(pause.delays(), vec![Duration::from_millis(3)]);
    }

    #[tokio::test]
    async fn test_failure_is_not_retried() {
        let rate = BackoffPolicy::exponential(Duration::from_millis(10), 3);
        let transient = BackoffPolicy::linear(Duration::from_millis(3), 3);
        let pause = RecordingPause::new();
        let driver = RetryDriver::new(&rate, &transient, &pause);
        let calls = RefCell::new(0u32);

        let result: Result<u32, GiveUp<&str>> = driver
            .drive("test", || {
                *calls.borrow_mut() += 1;
                async { Attempt::Fail("bad request") }
            })
            .await;

        assert!(matches!(result, Err(GiveUp::Failed("bad request"))));
        assert_eq!(*calls.borrow(), 1);
        assert!(pause.delays().is_empty());
    }
}
