//! Bounded polling.
//!
//! [`poll_until`] repeatedly runs a probe until it reports a value, separated by a fixed interval.
//! The wait ends early with an explicit outcome when the probe fails, the run is cancelled, or the
//! optional maximum wait elapses.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How often and for how long to poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// The pause between two probes.
    pub interval: Duration,
    /// The longest time to keep polling. `None` polls forever.
    pub max_wait: Option<Duration>,
}

/// The ways a bounded wait can end without a value.
#[derive(Debug, Error)]
pub enum WaitError<E> {
    /// The probe itself failed.
    #[error(transparent)]
    Probe(E),
    /// The cancellation token fired.
    #[error("wait cancelled")]
    Cancelled,
    /// The maximum wait elapsed without the probe reporting a value.
    #[error("gave up after {attempts} attempts in {elapsed:?}")]
    Stalled {
        /// The number of probes run.
        attempts: u32,
        /// The time spent waiting.
        elapsed: Duration,
    },
}

/// A value reported by the probe together with the effort it took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Polled<T> {
    /// The probe's value.
    pub value: T,
    /// The number of probes run, including the successful one.
    pub attempts: u32,
    /// The time from the first probe until the value was reported.
    pub elapsed: Duration,
}

/// Runs `probe` until it returns `Some`, sleeping `policy.interval` between attempts.
///
/// The first probe runs immediately. A probe that is still running when the maximum wait elapses
/// is allowed to finish, so the wait may overrun by the duration of one probe.
pub async fn poll_until<T, E, F, Fut>(
    policy: PollPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<Polled<T>, WaitError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let start = Instant::now();
    let deadline = policy.max_wait.map(|max_wait| start + max_wait);
    let mut attempts = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled);
        }

        attempts += 1;
        if let Some(value) = probe(attempts).await.map_err(WaitError::Probe)? {
            return Ok(Polled {
                value,
                attempts,
                elapsed: start.elapsed(),
            });
        }

        let mut wake = Instant::now() + policy.interval;
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(WaitError::Stalled {
                    attempts,
                    elapsed: start.elapsed(),
                });
            }
            // Probe one last time right at the deadline.
            wake = wake.min(deadline);
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(WaitError::Cancelled),
            _ = tokio::time::sleep_until(wake) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    fn policy(max_wait: Option<Duration>) -> PollPolicy {
        PollPolicy {
            interval: 5 * SECOND,
            max_wait,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_first_value() {
        let cancel = CancellationToken::new();
        let polled = poll_until(policy(None), &cancel, |attempt| async move {
            Ok::<_, Infallible>((attempt == 3).then_some("ready"))
        })
        .await
        .unwrap();

        assert_eq!(polled.value, "ready");
        assert_eq!(polled.attempts, 3);
        // Two full intervals passed before the third probe.
        assert!(polled.elapsed >= 10 * SECOND && polled.elapsed < 11 * SECOND);
    }

    #[tokio::test(start_paused = true)]
    async fn stalls_after_max_wait() {
        let cancel = CancellationToken::new();
        let result = poll_until(policy(Some(12 * SECOND)), &cancel, |_| async {
            Ok::<Option<()>, Infallible>(None)
        })
        .await;

        let Err(WaitError::Stalled { attempts, elapsed }) = result else {
            panic!("expected a stalled wait");
        };
        // Probes at 0s, 5s, 10s and a final one at the 12s deadline.
        assert_eq!(attempts, 4);
        assert!(elapsed >= 12 * SECOND && elapsed < 13 * SECOND);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_errors_end_the_wait() {
        let cancel = CancellationToken::new();
        let result: Result<Polled<()>, _> = poll_until(policy(None), &cancel, |attempt| async move {
            if attempt == 2 { Err("listing failed") } else { Ok(None) }
        })
        .await;

        assert!(matches!(result, Err(WaitError::Probe("listing failed"))));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(7 * SECOND).await;
            trigger.cancel();
        });

        let result = poll_until(policy(None), &cancel, |_| async {
            Ok::<Option<()>, Infallible>(None)
        })
        .await;

        assert!(matches!(result, Err(WaitError::Cancelled)));
    }
}
