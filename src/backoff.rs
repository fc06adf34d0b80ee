use std::time::Duration;

/// What the retry loop should do after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffOutcome {
    /// Sleep for the given duration, then retry.
    RetryAfter(Duration),
    /// Stop retrying; the failure becomes permanent.
    GiveUp,
}

/// Retry policy consulted by [`crate::watcher::Watcher::watch`] after every
/// transient failure (enumeration error or non-cancellation event-stream
/// error).
///
/// `attempt` is 1 on the first failure since the last successful
/// enumeration and increments with each consecutive failure; it resets to
/// 1 after any successful re-sync.
pub trait Backoff: Send + Sync {
    fn next(&self, attempt: u32) -> BackoffOutcome;
}

/// Gives up immediately. The default policy: a caller that wants retries
/// must supply a policy explicitly.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverRetry;

impl Backoff for NeverRetry {
    fn next(&self, _attempt: u32) -> BackoffOutcome {
        BackoffOutcome::GiveUp
    }
}

/// Doubles the delay on each consecutive failure, up to `max_delay`, and
/// gives up once `max_attempts` consecutive failures have occurred.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn next(&self, attempt: u32) -> BackoffOutcome {
        if attempt > self.max_attempts {
            return BackoffOutcome::GiveUp;
        }
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        BackoffOutcome::RetryAfter(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_retry_always_gives_up() {
        assert_eq!(NeverRetry.next(1), BackoffOutcome::GiveUp);
        assert_eq!(NeverRetry.next(50), BackoffOutcome::GiveUp);
    }

    #[test]
    fn exponential_doubles_until_capped() {
        let b = ExponentialBackoff {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            max_attempts: 10,
        };
        assert_eq!(b.next(1), BackoffOutcome::RetryAfter(Duration::from_millis(100)));
        assert_eq!(b.next(2), BackoffOutcome::RetryAfter(Duration::from_millis(200)));
        assert_eq!(b.next(3), BackoffOutcome::RetryAfter(Duration::from_millis(400)));
        assert_eq!(b.next(5), BackoffOutcome::RetryAfter(Duration::from_secs(1)));
    }

    #[test]
    fn exponential_gives_up_past_max_attempts() {
        let b = ExponentialBackoff {
            max_attempts: 2,
            ..Default::default()
        };
        assert_eq!(b.next(3), BackoffOutcome::GiveUp);
    }
}
