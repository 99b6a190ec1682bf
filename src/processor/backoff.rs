use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy)]
pub(crate) struct RetryBackoff<'a> {
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub max_attempts: usize,
    pub cancellation: Option<&'a CancellationToken>,
}

impl<'a> RetryBackoff<'a> {
    pub(crate) fn new(min_wait: Duration, max_wait: Duration) -> Self {
        Self {
            min_wait,
            max_wait: max_wait.max(min_wait),
            max_attempts: 1,
            cancellation: None,
        }
    }

    pub(crate) fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub(crate) fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation.is_some_and(CancellationToken::is_cancelled)
    }
}

/// How a bounded retry loop ended.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RetryOutcome<T> {
    Completed(T),
    Exhausted { attempts: usize },
    Cancelled,
}

/// Runs `operation` until it yields `Some`, the attempt budget is spent, or
/// the token fires. `None` means "retry". Attempts are strictly sequential and
/// the token is honoured while an attempt or a delay is pending.
pub(crate) async fn retry_with_backoff<'a, T, F, Fut, L>(
    config: RetryBackoff<'a>,
    mut operation: F,
    mut on_retry: L,
) -> RetryOutcome<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Option<T>>,
    L: FnMut(usize, Duration),
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        if config.is_cancelled() {
            return RetryOutcome::Cancelled;
        }

        let result = match config.cancellation {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return RetryOutcome::Cancelled,
                    result = operation(attempt) => result,
                }
            }
            None => operation(attempt).await,
        };

        if let Some(value) = result {
            return RetryOutcome::Completed(value);
        }

        if attempt >= config.max_attempts {
            return RetryOutcome::Exhausted { attempts: attempt };
        }

        let delay = jittered_delay(attempt, config.min_wait, config.max_wait);
        on_retry(attempt, delay);

        if !sleep_with_cancellation(delay, config.cancellation).await {
            return RetryOutcome::Cancelled;
        }
    }
}

/// Returns `false` when the token fired before the delay elapsed.
async fn sleep_with_cancellation(delay: Duration, cancellation: Option<&CancellationToken>) -> bool {
    if cancellation.is_some_and(CancellationToken::is_cancelled) {
        return false;
    }

    if delay.is_zero() {
        yield_now().await;
        return !cancellation.is_some_and(CancellationToken::is_cancelled);
    }

    if let Some(token) = cancellation {
        tokio::select! {
            biased;
            _ = token.cancelled() => false,
            _ = sleep(delay) => true,
        }
    } else {
        sleep(delay).await;
        true
    }
}

/// Delay before the attempt following `attempt`, drawn uniformly between
/// `min_wait` and a ceiling that doubles per attempt and is capped at
/// `max_wait`.
pub(crate) fn jittered_delay(attempt: usize, min_wait: Duration, max_wait: Duration) -> Duration {
    let ceiling = backoff_ceiling(attempt, min_wait, max_wait);
    if ceiling <= min_wait {
        return min_wait;
    }

    let low = duration_to_millis(min_wait);
    let high = duration_to_millis(ceiling);
    Duration::from_millis(rand::thread_rng().gen_range(low..=high))
}

fn backoff_ceiling(attempt: usize, min_wait: Duration, max_wait: Duration) -> Duration {
    if min_wait.is_zero() {
        return max_wait;
    }

    let exponent = attempt.saturating_sub(1).min(31) as u32;
    let mut ceiling = min_wait.saturating_mul(1u32 << exponent);
    if ceiling > max_wait {
        ceiling = max_wait;
    }
    ceiling
}

fn duration_to_millis(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}
