//! Error backoff for renewal retries
//!
//! By default a failed renewal is fatal. A configuration with retries lets
//! the refresher ride out a short identity provider outage before giving up.

use std::time::Duration;

/// Configuration for how to manage backoff when a renewal fails
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorBackoffConfig {
    initial_error_delay: Duration,
    max_error_delay: Duration,
    multiplier: u32,
    max_retries: u32,
}

impl Default for ErrorBackoffConfig {
    /// No retries: the first renewal failure is final
    fn default() -> Self {
        Self::no_retries()
    }
}

impl ErrorBackoffConfig {
    /// Constructs a new backoff configuration
    ///
    /// After the first failure the renewal is retried after
    /// `initial_error_delay`. Each subsequent delay is multiplied by
    /// `multiplier`, capped at `max_error_delay`. Once `max_retries` retries
    /// have failed, the error is final.
    pub fn new(
        initial_error_delay: Duration,
        max_error_delay: Duration,
        multiplier: u32,
        max_retries: u32,
    ) -> Self {
        Self {
            initial_error_delay,
            max_error_delay,
            multiplier,
            max_retries,
        }
    }

    /// A configuration that never retries
    pub const fn no_retries() -> Self {
        Self {
            initial_error_delay: Duration::from_secs(1),
            max_error_delay: Duration::from_secs(60),
            multiplier: 2,
            max_retries: 0,
        }
    }

    /// Retries up to `max_retries` times, starting at one second and doubling
    /// up to a minute
    pub const fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::no_retries()
        }
    }

    /// Gets the number of retries allowed after a failure
    #[inline]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Utility trait for extending types with a backoff handler
pub trait WithBackoff {
    /// The output of providing backoff
    type Output;

    /// Applies backoff to the current value
    fn with_backoff(self, handler: &mut ErrorBackoffHandler) -> Self::Output;
}

impl<T, E> WithBackoff for Result<T, E> {
    type Output = Result<T, (E, Option<Duration>)>;

    /// On error, pairs the error with the delay before the next retry, or
    /// `None` if no retries remain
    fn with_backoff(self, handler: &mut ErrorBackoffHandler) -> Self::Output {
        match self {
            Ok(ok) => {
                handler.success();
                Ok(ok)
            }
            Err(err) => Err((err, handler.error())),
        }
    }
}

/// A stateful handler that manages error backoff state
#[derive(Debug)]
pub struct ErrorBackoffHandler {
    config: ErrorBackoffConfig,
    last_delay: Option<Duration>,
    retries: u32,
}

impl ErrorBackoffHandler {
    /// Constructs a new handler from an [`ErrorBackoffConfig`].
    pub fn new(config: ErrorBackoffConfig) -> Self {
        Self {
            config,
            last_delay: None,
            retries: 0,
        }
    }

    /// Reports a success
    ///
    /// This resets the internal delay state and the retry budget.
    pub fn success(&mut self) {
        self.last_delay = None;
        self.retries = 0;
    }

    /// Reports a failure and returns the delay before the next retry
    ///
    /// Returns `None` once the retry budget is spent.
    pub fn error(&mut self) -> Option<Duration> {
        if self.retries >= self.config.max_retries {
            return None;
        }

        self.retries += 1;
        let new_delay = self
            .last_delay
            .map(|s| {
                s.saturating_mul(self.config.multiplier)
                    .min(self.config.max_error_delay)
            })
            .unwrap_or(self.config.initial_error_delay);
        self.last_delay = Some(new_delay);
        Some(new_delay)
    }
}

impl From<ErrorBackoffConfig> for ErrorBackoffHandler {
    fn from(config: ErrorBackoffConfig) -> Self {
        Self::new(config)
    }
}
