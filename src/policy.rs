use std::time::Duration;

use crate::child::ExitOutcome;

/// What the supervisor does after a worker is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// The worker shut down cleanly; the supervisor terminates too.
    Stop,
    /// The worker crashed; spawn a new one after `delay`.
    Restart { delay: Duration },
    /// The worker could not be started; try again after `delay`.
    RetrySpawn { delay: Duration },
    /// The configured restart cap is exhausted.
    GiveUp,
}

/// Restart behaviour of the supervisor.
///
/// The default restarts crashed workers immediately and forever. A cap and an
/// exponential backoff can be configured:
/// `delay = base_delay * 2^min(attempts, max_backoff_exponent)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_restarts: Option<u32>,
    pub base_delay: Duration,
    pub max_backoff_exponent: u32,
    /// A worker that ran at least this long resets the attempt counter.
    pub stable_after: Option<Duration>,
    /// Fixed wait after the OS refused to start a worker.
    pub spawn_retry_delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: None,
            base_delay: Duration::ZERO,
            max_backoff_exponent: 5,
            stable_after: None,
            spawn_retry_delay: Duration::from_secs(1),
        }
    }
}

impl RestartPolicy {
    /// Restart immediately and without limit.
    pub fn unlimited() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = Some(max_restarts);
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    #[must_use]
    pub fn with_max_backoff_exponent(mut self, exponent: u32) -> Self {
        self.max_backoff_exponent = exponent;
        self
    }

    #[must_use]
    pub fn with_stable_after(mut self, duration: Duration) -> Self {
        self.stable_after = Some(duration);
        self
    }

    #[must_use]
    pub fn with_spawn_retry_delay(mut self, delay: Duration) -> Self {
        self.spawn_retry_delay = delay;
        self
    }

    /// Decides on a terminated worker, given how many restarts already happened.
    pub fn decide(&self, outcome: &ExitOutcome, attempts: u32) -> RestartDecision {
        if outcome.is_clean() {
            return RestartDecision::Stop;
        }
        if self.has_exceeded_max_restarts(attempts) {
            return RestartDecision::GiveUp;
        }
        RestartDecision::Restart {
            delay: self.restart_delay(attempts),
        }
    }

    pub fn on_spawn_failure(&self) -> RestartDecision {
        RestartDecision::RetrySpawn {
            delay: self.spawn_retry_delay,
        }
    }

    pub fn restart_delay(&self, attempts: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempts.min(self.max_backoff_exponent));
        self.base_delay.saturating_mul(factor)
    }

    pub const fn has_exceeded_max_restarts(&self, attempts: u32) -> bool {
        match self.max_restarts {
            Some(max_restarts) => attempts >= max_restarts,
            None => false,
        }
    }

    pub fn is_stable(&self, ran_for: Duration) -> bool {
        self.stable_after.is_some_and(|stable_after| ran_for >= stable_after)
    }
}
