//! Frame transmission with retry-on-busy.

use std::time::Duration;

use rand::Rng;

use crate::core::config::CanDefaults;
use crate::core::error::{HwError, Result, TxError};
use crate::core::shutdown::Shutdown;

use super::frame::{CanFrame, FrameFlags};
use super::handle::CanHandle;
use super::transport::{CanTransport, TransportError};

/// Default number of transmit attempts per frame.
pub const TX_RETRIES: u32 = 10;

/// Default sleep between attempts.
pub const TX_RETRY_BACKOFF: Duration = Duration::from_millis(1);

/// How often a busy transmit is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of transport calls per frame.
    pub max_retries: u32,
    /// Sleep between two attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: TX_RETRIES,
            backoff: TX_RETRY_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }
}

impl From<&CanDefaults> for RetryPolicy {
    fn from(defaults: &CanDefaults) -> Self {
        Self::new(
            defaults.tx_retries,
            Duration::from_millis(defaults.retry_backoff_ms),
        )
    }
}

/// Result of a successful transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReport {
    /// Transport calls needed, including the successful one.
    pub attempts: u32,
}

/// Send `frame`, retrying while the transport reports busy.
///
/// The transport is called at most `policy.max_retries` times. A non-busy
/// error ends the call immediately with [`TxError::Fatal`]; running out of
/// attempts while busy yields [`TxError::Exhausted`].
pub async fn transmit_with_retry<T>(
    transport: &mut T,
    frame: &CanFrame,
    policy: &RetryPolicy,
) -> std::result::Result<TxReport, TxError>
where
    T: CanTransport + ?Sized,
{
    for attempt in 1..=policy.max_retries {
        match transport.transmit(frame) {
            Ok(()) => return Ok(TxReport { attempts: attempt }),
            Err(TransportError::Busy) => {
                tracing::trace!("Transmit busy (attempt {}/{})", attempt, policy.max_retries);
                if attempt < policy.max_retries && !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
            Err(TransportError::Io(source)) => {
                return Err(TxError::Fatal { attempt, source });
            }
        }
    }

    Err(TxError::Exhausted {
        attempts: policy.max_retries,
    })
}

/// Parameters of a send run.
#[derive(Debug, Clone)]
pub struct SendJob {
    /// Identifier used unless [`FrameFlags::RANDOM_ID`] is set.
    pub id: u32,
    /// Payload length used unless [`FrameFlags::RANDOM_DLC`] is set.
    pub dlc: u8,
    /// Frame generation options.
    pub flags: FrameFlags,
    /// Frames to send; `None` sends until shutdown.
    pub count: Option<u64>,
    /// Delay between frames.
    pub delay: Duration,
    /// Send CAN-FD frames.
    pub fd: bool,
    /// Retry policy per frame.
    pub retry: RetryPolicy,
}

impl Default for SendJob {
    fn default() -> Self {
        Self {
            id: 0x123,
            dlc: 8,
            flags: FrameFlags::empty(),
            count: Some(1),
            delay: Duration::from_millis(1),
            fd: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl SendJob {
    /// Check the job against the frame limits.
    pub fn validate(&self) -> Result<()> {
        let max = if self.fd {
            super::frame::CANFD_MAX_DLEN
        } else {
            super::frame::CAN_MAX_DLEN
        };
        if usize::from(self.dlc) > max {
            return Err(HwError::invalid(format!(
                "data length {} exceeds {} bytes",
                self.dlc, max
            )));
        }
        if self.fd && self.flags.contains(FrameFlags::RTR) {
            return Err(HwError::invalid("CAN FD frames cannot be remote requests"));
        }
        if self.retry.max_retries == 0 {
            return Err(HwError::invalid("retry count must be at least 1"));
        }
        Ok(())
    }
}

/// Summary of a send run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendSummary {
    /// Frames sent successfully.
    pub sent: u64,
    /// Whether shutdown stopped the run early.
    pub interrupted: bool,
}

/// Send the frames described by `job` on `handle`.
///
/// The first failed frame aborts the whole run; there is no
/// skip-and-continue. Shutdown is checked before every frame and cuts the
/// inter-frame delay short.
pub async fn run_send_job<T, R>(
    handle: &CanHandle<T>,
    job: &SendJob,
    shutdown: &Shutdown,
    rng: &mut R,
) -> Result<SendSummary>
where
    T: CanTransport,
    R: Rng + ?Sized,
{
    job.validate()?;

    let mut frame = if job.fd {
        CanFrame::new_fd()
    } else {
        CanFrame::new()
    };
    let mut sent = 0u64;

    loop {
        if shutdown.is_triggered() {
            return Ok(SendSummary {
                sent,
                interrupted: true,
            });
        }
        if job.count.is_some_and(|count| sent >= count) {
            break;
        }

        frame.update(job.id, job.dlc, job.flags, rng);

        let report = handle
            .transmit_with_retry(&frame, &job.retry)
            .await
            .map_err(|e| {
                tracing::error!("{} (frame #{}, {:?})", e, sent + 1, frame);
                e
            })?;
        sent += 1;

        tracing::debug!(
            "Sent frame #{} id=0x{:X} len={} after {} attempt(s)",
            sent,
            frame.id(),
            frame.dlc(),
            report.attempts
        );

        if !job.delay.is_zero() && !shutdown.sleep(job.delay).await {
            return Ok(SendSummary {
                sent,
                interrupted: true,
            });
        }
    }

    Ok(SendSummary {
        sent,
        interrupted: false,
    })
}
