use crate::api::StegClient;
use crate::api::models::{RequestState, StatusResult};
use crate::error::{Result, StegError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How often, and for how long, the status endpoint is asked about a request.
#[derive(Clone, Debug, PartialEq)]
pub struct PollPolicy {
    /// Delay after the first unfinished answer
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Factor applied to the delay after every unfinished answer
    pub multiplier: f64,
    /// `None` = no ceiling
    pub max_attempts: Option<u32>,
    /// `None` = no deadline
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            max_attempts: Some(120),
            deadline: Some(Duration::from_secs(600)),
        }
    }
}

impl PollPolicy {
    /// Status checks back to back with no delay, ceiling or deadline. Only a
    /// terminal status or cancellation ends the loop.
    pub fn busy() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            max_attempts: None,
            deadline: None,
        }
    }

    /// Delay to wait after the `attempt`-th (1-based) unfinished answer.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let nanos = self.initial_delay.as_nanos() as f64 * self.multiplier.max(1.0).powi(exponent);
        // float to int casts saturate
        Duration::from_nanos(nanos.round() as u64).min(self.max_delay)
    }
}

/// A completed status along with how many checks it took.
#[derive(Clone, Debug)]
pub struct Completion {
    pub request_id: String,
    pub status: StatusResult,
    pub attempts: u32,
}

/// Polls `GET /media_status` for `request_id` until it reports the
/// completion literal.
///
/// Stops early with [`StegError::RequestFailed`] on a failure-like status,
/// [`StegError::AttemptsExhausted`] / [`StegError::DeadlineExceeded`] when the
/// policy runs out, and [`StegError::Cancelled`] once `cancel` fires.
pub async fn poll_until_complete(
    client: &StegClient,
    request_id: &str,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<Completion> {
    let started = Instant::now();
    let mut attempts = 0u32;
    let mut last_state = RequestState::Submitted;

    loop {
        if cancel.is_cancelled() {
            return Err(cancelled(request_id, attempts));
        }

        attempts += 1;
        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(request_id, attempts)),
            status = client.media_status(request_id) => status?,
        };

        let state = status.state();
        if state != last_state {
            info!(
                request_id,
                attempt = attempts,
                status = %status.status,
                %state,
                "Request state changed"
            );
            last_state = state;
        } else {
            debug!(
                request_id,
                attempt = attempts,
                status = %status.status,
                "Request still running"
            );
        }

        match state {
            RequestState::Completed => {
                return Ok(Completion {
                    request_id: request_id.to_string(),
                    status,
                    attempts,
                });
            }
            RequestState::Failed => {
                warn!(request_id, status = %status.status, "Request failed remotely");
                return Err(StegError::RequestFailed {
                    request_id: request_id.to_string(),
                    status: status.status,
                });
            }
            RequestState::Submitted | RequestState::Polling => {}
        }

        if policy
            .max_attempts
            .is_some_and(|max_attempts| attempts >= max_attempts)
        {
            return Err(StegError::AttemptsExhausted {
                request_id: request_id.to_string(),
                attempts,
            });
        }

        let mut delay = policy.delay_after(attempts);
        if let Some(deadline) = policy.deadline {
            let elapsed = started.elapsed();
            let Some(remaining) = deadline.checked_sub(elapsed).filter(|left| !left.is_zero())
            else {
                return Err(StegError::DeadlineExceeded {
                    request_id: request_id.to_string(),
                    attempts,
                    elapsed,
                });
            };
            delay = delay.min(remaining);
        }

        if !delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(request_id, attempts)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn cancelled(request_id: &str, attempts: u32) -> StegError {
    StegError::Cancelled {
        request_id: request_id.to_string(),
        attempts,
    }
}
