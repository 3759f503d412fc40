//! Bounded polling shared by the answer and transcription backends.
//!
//! Both backends hand out an id and compute asynchronously; the client then
//! asks "done yet?" at a fixed interval until it gets an answer, a hard
//! failure, or runs out of attempts. The attempt bookkeeping lives in
//! [`PollState`] so the limits can be tested without any network or sleeping.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// How often and how many times to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self { interval, max_attempts }
    }

    /// Worst-case time spent sleeping between attempts.
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// Attempt budget of a poll loop. A ready or failed probe ends the loop
/// directly, so the only states are "still polling" and "out of attempts".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// About to issue attempt number `attempt` (1-based) out of `max`.
    Polling { attempt: u32, max: u32 },
    TimedOut { attempts: u32 },
}

impl PollState {
    pub fn start(max: u32) -> Self {
        if max == 0 {
            Self::TimedOut { attempts: 0 }
        } else {
            Self::Polling { attempt: 1, max }
        }
    }

    /// The current attempt came back "not yet".
    pub fn on_pending(self) -> Self {
        match self {
            Self::Polling { attempt, max } if attempt < max => Self::Polling {
                attempt: attempt + 1,
                max,
            },
            Self::Polling { attempt, .. } => Self::TimedOut { attempts: attempt },
            timed_out => timed_out,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Result of a single poll request.
#[derive(Debug)]
pub enum Probe<T, E> {
    Ready(T),
    Pending,
    Fail(E),
}

/// How a whole poll loop ended.
#[derive(Debug)]
pub enum PollOutcome<T, E> {
    Done(T),
    TimedOut { attempts: u32 },
    Failed(E),
}

/// Drive `probe` until it yields a value, a failure, or the policy runs out.
///
/// `probe` receives the 1-based attempt number. The loop sleeps between
/// attempts only, never before the first nor after the last.
pub async fn poll_until<T, E, F, Fut>(policy: PollPolicy, mut probe: F) -> PollOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Probe<T, E>>,
{
    let mut state = PollState::start(policy.max_attempts);

    loop {
        let attempt = match state {
            PollState::Polling { attempt, .. } => attempt,
            PollState::TimedOut { attempts } => return PollOutcome::TimedOut { attempts },
        };
        match probe(attempt).await {
            Probe::Ready(value) => return PollOutcome::Done(value),
            Probe::Fail(err) => return PollOutcome::Failed(err),
            Probe::Pending => {
                state = state.on_pending();
                if !state.is_terminal() {
                    sleep(policy.interval).await;
                }
            }
        }
    }
}
