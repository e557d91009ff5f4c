//! Bounded retries with exponential backoff and jitter
//!
//! `RetryPolicy::run` turns one fallible async call into at most
//! `max_attempts` calls. Between attempts it sleeps for the current delay
//! (perturbed by up to `±jitter × delay`), then multiplies the delay by
//! `factor`, capped at `max_delay`. A `CancelToken` interrupts both the call
//! in flight and the sleep; cancellation is never retried.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tracing::debug;

/// Errors that can report and represent cancellation
pub trait Retryable: Sized {
    /// The error to surface when the caller cancels
    fn cancelled() -> Self;

    fn is_cancellation(&self) -> bool;
}

/// Retry tuning
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Fraction of the delay used as the random spread
    pub jitter: f64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
            factor: 2.0,
            jitter: 0.05,
            max_attempts: 6,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Attempt budget; never less than one
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay sequence before jitter
    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.min_delay,
            max: self.max_delay,
            factor: self.factor,
        }
    }

    /// Apply a random perturbation of up to `±jitter × delay`, never below zero
    pub fn jittered(&self, delay: Duration) -> Duration {
        let base = delay.as_secs_f64();
        let spread = base * self.jitter;
        let offset = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::try_from_secs_f64((base + offset).max(0.0)).unwrap_or(delay)
    }

    /// Run `operation` until it succeeds, the budget is spent, or `cancel` fires
    pub async fn run<T, E, F, Fut>(&self, cancel: &CancelToken, mut operation: F) -> Result<T, E>
    where
        E: Retryable + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.attempts();
        let mut backoff = self.backoff();
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(E::cancelled());
            }
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(E::cancelled()),
                result = operation() => result,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => e,
            };

            if attempt >= attempts {
                debug!(attempt, error = %error, "Retry budget exhausted");
                return Err(error);
            }

            let delay = self.jittered(backoff.next_delay());
            debug!(
                attempt,
                max_attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Attempt failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(E::cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Exponential delay sequence: `delay[i+1] = min(delay[i] * factor, max)`
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    factor: f64,
}

impl Backoff {
    pub fn next_delay(&mut self) -> Duration {
        let current = self.next;
        self.next = Duration::try_from_secs_f64(current.as_secs_f64() * self.factor)
            .unwrap_or(self.max)
            .min(self.max);
        current
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}

/// Cooperative cancellation shared between a caller and the work it started
#[derive(Debug, Clone)]
pub struct CancelToken {
    state: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            state: Arc::new(tx),
        }
    }

    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
