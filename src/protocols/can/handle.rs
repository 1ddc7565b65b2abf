//! Configured CAN interface.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::core::error::{HwError, Result};
use crate::core::lifecycle::Peripheral;

use super::config::CanInterfaceConfig;
use super::filter::{effective_filters, CanFilter};
use super::frame::CanFrame;
use super::receive::CanReceiver;
use super::transmit::{self, RetryPolicy, TxReport};
use super::transport::{CanDriver, CanTransport, ReceivedFrame};

/// Resolve `iface`, apply `config` and open a socket on it.
///
/// Checks run in order: configuration validity, interface existence, then
/// the link setup itself. Any failure leaves nothing open.
pub fn configure<D: CanDriver>(
    driver: &D,
    iface: &str,
    config: CanInterfaceConfig,
) -> Result<CanHandle<D::Transport>> {
    config.validate()?;
    driver.probe(iface)?;
    let transport = driver.open(iface, &config)?;

    Ok(CanHandle {
        iface: iface.to_string(),
        config,
        transport: Some(Arc::new(Mutex::new(transport))),
        filters: Vec::new(),
        receiver: None,
    })
}

/// An open CAN interface.
pub struct CanHandle<T: CanTransport> {
    iface: String,
    config: CanInterfaceConfig,
    transport: Option<Arc<Mutex<T>>>,
    filters: Vec<CanFilter>,
    receiver: Option<CanReceiver>,
}

impl<T: CanTransport> fmt::Debug for CanHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanHandle")
            .field("iface", &self.iface)
            .field("config", &self.config)
            .field("filters", &self.filters)
            .field("receiving", &self.receiver.is_some())
            .field("released", &self.is_released())
            .finish()
    }
}

impl<T: CanTransport> CanHandle<T> {
    /// Interface name.
    pub fn interface(&self) -> &str {
        &self.iface
    }

    /// Configuration applied at open time.
    pub fn config(&self) -> &CanInterfaceConfig {
        &self.config
    }

    /// Filters currently installed.
    pub fn filters(&self) -> &[CanFilter] {
        &self.filters
    }

    /// Whether the handle has been released.
    pub fn is_released(&self) -> bool {
        self.transport.is_none()
    }

    fn transport(&self) -> Result<&Arc<Mutex<T>>> {
        self.transport.as_ref().ok_or(HwError::NotAcquired)
    }

    /// Install receive filters. An empty list installs the accept-all
    /// filter.
    pub async fn register_filters(&mut self, filters: &[CanFilter]) -> Result<()> {
        let filters = effective_filters(filters);

        self.transport()?
            .lock()
            .await
            .set_filters(&filters)
            .map_err(|e| {
                HwError::Filter(format!("{}: failed to install filters: {}", self.iface, e))
            })?;

        for filter in &filters {
            tracing::debug!("{}: filter {}", self.iface, filter);
        }
        tracing::info!("{}: {} receive filter(s) installed", self.iface, filters.len());

        self.filters = filters;
        Ok(())
    }

    /// Send one frame, retrying while the transmit queue is busy.
    pub async fn transmit_with_retry(
        &self,
        frame: &CanFrame,
        policy: &RetryPolicy,
    ) -> Result<TxReport> {
        let mut transport = self.transport()?.lock().await;
        Ok(transmit::transmit_with_retry(&mut *transport, frame, policy).await?)
    }

    /// Start polling for frames. Received frames arrive on the returned
    /// channel, which holds up to `capacity` frames.
    pub fn start_receiver(
        &mut self,
        poll_interval: Duration,
        capacity: usize,
    ) -> Result<mpsc::Receiver<ReceivedFrame>> {
        if self.receiver.as_ref().is_some_and(CanReceiver::is_running) {
            return Err(HwError::invalid(format!(
                "{}: receiver already running",
                self.iface
            )));
        }

        let transport = Arc::clone(self.transport()?);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.receiver = Some(CanReceiver::start(transport, poll_interval, tx));
        Ok(rx)
    }

    /// Frames received since [`start_receiver`](Self::start_receiver).
    pub fn frames_received(&self) -> u64 {
        self.receiver.as_ref().map_or(0, CanReceiver::frame_count)
    }
}

impl<T: CanTransport> Peripheral for CanHandle<T> {
    fn describe(&self) -> String {
        format!("CAN interface {}", self.iface)
    }

    fn stop(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.stop();
        }
    }

    fn release(&mut self) -> Result<()> {
        self.stop();
        if self.transport.take().is_some() {
            tracing::debug!("{}: socket closed", self.iface);
        }
        Ok(())
    }
}
