//! Scripted CAN driver for tests.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::error::{HwError, Result};

use super::config::CanInterfaceConfig;
use super::filter::CanFilter;
use super::frame::CanFrame;
use super::transport::{CanDriver, CanTransport, ReceivedFrame, TransportError};

/// Outcome of one scripted transmit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxStep {
    Ok,
    Busy,
    /// Fail with the given errno.
    Fatal(i32),
}

/// Scripted outcome of one receive call.
#[derive(Debug, Clone)]
enum RxStep {
    Frame(CanFrame),
    /// Fail with the given errno.
    Error(i32),
}

#[derive(Debug)]
struct MockState {
    steps: VecDeque<TxStep>,
    fallback: TxStep,
    calls: u32,
    sent: Vec<CanFrame>,
    filters: Vec<CanFilter>,
    filter_errno: Option<i32>,
    rx: VecDeque<RxStep>,
}

/// Transport whose transmit results follow a script. Clones share state,
/// so a test can keep one clone to inspect what the engine did.
#[derive(Debug, Clone)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::always(TxStep::Ok)
    }
}

impl MockTransport {
    /// Every transmit call returns `step`.
    pub(crate) fn always(step: TxStep) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                steps: VecDeque::new(),
                fallback: step,
                calls: 0,
                sent: Vec::new(),
                filters: Vec::new(),
                filter_errno: None,
                rx: VecDeque::new(),
            })),
        }
    }

    /// Transmit calls follow `steps`, then succeed.
    pub(crate) fn scripted(steps: impl IntoIterator<Item = TxStep>) -> Self {
        let transport = Self::default();
        transport.push_steps(steps);
        transport
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn push_steps(&self, steps: impl IntoIterator<Item = TxStep>) {
        self.lock().steps.extend(steps);
    }

    /// Queue a frame for reception.
    pub(crate) fn push_rx(&self, frame: CanFrame) {
        self.lock().rx.push_back(RxStep::Frame(frame));
    }

    /// Queue a receive failure with `errno`.
    pub(crate) fn push_rx_error(&self, errno: i32) {
        self.lock().rx.push_back(RxStep::Error(errno));
    }

    /// Make the next filter installs fail with `errno`.
    pub(crate) fn fail_filters(&self, errno: i32) {
        self.lock().filter_errno = Some(errno);
    }

    pub(crate) fn calls(&self) -> u32 {
        self.lock().calls
    }

    pub(crate) fn sent_frames(&self) -> Vec<CanFrame> {
        self.lock().sent.clone()
    }

    pub(crate) fn installed_filters(&self) -> Vec<CanFilter> {
        self.lock().filters.clone()
    }
}

impl CanTransport for MockTransport {
    fn transmit(&mut self, frame: &CanFrame) -> std::result::Result<(), TransportError> {
        let mut state = self.lock();
        state.calls += 1;

        let step = state.steps.pop_front().unwrap_or(state.fallback);
        match step {
            TxStep::Ok => {
                state.sent.push(frame.clone());
                Ok(())
            }
            TxStep::Busy => Err(TransportError::Busy),
            TxStep::Fatal(errno) => Err(TransportError::Io(io::Error::from_raw_os_error(errno))),
        }
    }

    fn set_filters(&mut self, filters: &[CanFilter]) -> io::Result<()> {
        let mut state = self.lock();
        if let Some(errno) = state.filter_errno {
            return Err(io::Error::from_raw_os_error(errno));
        }
        state.filters = filters.to_vec();
        Ok(())
    }

    fn try_receive(&mut self) -> io::Result<Option<ReceivedFrame>> {
        let mut state = self.lock();
        while let Some(step) = state.rx.pop_front() {
            match step {
                // Same rule as the kernel: empty filter list drops everything.
                RxStep::Frame(frame) if state.filters.iter().any(|f| f.matches(frame.raw_id())) => {
                    return Ok(Some(ReceivedFrame::now(frame)));
                }
                RxStep::Frame(_) => {}
                RxStep::Error(errno) => return Err(io::Error::from_raw_os_error(errno)),
            }
        }
        Ok(None)
    }
}

/// Driver knowing a fixed set of interfaces, all backed by one shared
/// [`MockTransport`].
#[derive(Debug)]
pub(crate) struct MockDriver {
    interfaces: Vec<String>,
    transport: MockTransport,
    reject_config: bool,
}

impl MockDriver {
    pub(crate) fn new<I, S>(interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            interfaces: interfaces.into_iter().map(Into::into).collect(),
            transport: MockTransport::default(),
            reject_config: false,
        }
    }

    /// Every `open` fails as if the controller rejected the bit timing.
    pub(crate) fn rejecting_config(mut self) -> Self {
        self.reject_config = true;
        self
    }

    pub(crate) fn transport(&self) -> MockTransport {
        self.transport.clone()
    }
}

impl CanDriver for MockDriver {
    type Transport = MockTransport;

    fn probe(&self, iface: &str) -> Result<()> {
        if self.interfaces.iter().any(|i| i == iface) {
            Ok(())
        } else {
            Err(HwError::acquire(
                format!("CAN interface {}", iface),
                "No such device",
            ))
        }
    }

    fn open(&self, iface: &str, config: &CanInterfaceConfig) -> Result<MockTransport> {
        if self.reject_config {
            return Err(HwError::Config(format!(
                "{}: failed to set bitrate {}",
                iface, config.bitrate
            )));
        }
        Ok(self.transport.clone())
    }
}
