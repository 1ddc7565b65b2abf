//! Background frame reception.
//!
//! The socket is non-blocking; a task polls it on a fixed interval, drains
//! every pending frame and forwards it over a bounded channel. A read error
//! ends the task, which closes the channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::transport::{CanTransport, ReceivedFrame};

/// Handle to a running receive task.
#[derive(Debug)]
pub struct CanReceiver {
    running: Arc<AtomicBool>,
    frame_count: Arc<AtomicU64>,
    error_count: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl CanReceiver {
    /// Spawn the receive task on `transport`.
    ///
    /// The task ends when [`stop`](Self::stop) is called, the channel's
    /// receiving side is dropped, or the transport reports a read error.
    pub fn start<T: CanTransport>(
        transport: Arc<Mutex<T>>,
        poll_interval: Duration,
        frames: mpsc::Sender<ReceivedFrame>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let frame_count = Arc::new(AtomicU64::new(0));
        let error_count = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn({
            let running = Arc::clone(&running);
            let frame_count = Arc::clone(&frame_count);
            let error_count = Arc::clone(&error_count);
            let period = poll_interval.max(Duration::from_millis(1));

            async move {
                tracing::debug!("CAN receive task started (poll interval {:?})", period);
                let mut interval = tokio::time::interval(period);

                'poll: loop {
                    interval.tick().await;

                    if !running.load(Ordering::SeqCst) {
                        break;
                    }

                    loop {
                        let next = transport.lock().await.try_receive();
                        match next {
                            Ok(Some(frame)) => {
                                frame_count.fetch_add(1, Ordering::Relaxed);
                                if frames.send(frame).await.is_err() {
                                    break 'poll;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                tracing::error!("CAN read error: {}", e);
                                error_count.fetch_add(1, Ordering::Relaxed);
                                break 'poll;
                            }
                        }
                    }
                }

                running.store(false, Ordering::SeqCst);
                tracing::debug!("CAN receive task stopped");
            }
        });

        Self {
            running,
            frame_count,
            error_count,
            task: Some(task),
        }
    }

    /// Frames taken off the socket so far.
    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Read errors seen so far.
    #[inline]
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Whether the task is still polling.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the task. Safe to call more than once.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for CanReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::can::filter::CanFilter;
    use crate::protocols::can::frame::CanFrame;
    use crate::protocols::can::mock::MockTransport;

    fn frame(id: u32) -> CanFrame {
        CanFrame::from_parts(id, false, false, &[0xAB], false).unwrap()
    }

    fn accepting_transport() -> MockTransport {
        let mut transport = MockTransport::default();
        transport.set_filters(&[CanFilter::ACCEPT_ALL]).unwrap();
        transport
    }

    #[tokio::test]
    async fn test_receiver_forwards_frames() {
        let transport = accepting_transport();
        transport.push_rx(frame(0x023));
        transport.push_rx(frame(0x006));

        let (tx, mut rx) = mpsc::channel(8);
        let mut receiver = CanReceiver::start(
            Arc::new(Mutex::new(transport.clone())),
            Duration::from_millis(1),
            tx,
        );

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.frame.id(), 0x023);
        assert_eq!(second.frame.id(), 0x006);
        assert_eq!(receiver.frame_count(), 2);

        receiver.stop();
        assert!(!receiver.is_running());
        receiver.stop();
    }

    #[tokio::test]
    async fn test_receiver_stops_on_read_error() {
        let transport = accepting_transport();
        transport.push_rx(frame(0x023));
        transport.push_rx_error(libc::ENETDOWN);
        transport.push_rx(frame(0x024));

        let (tx, mut rx) = mpsc::channel(8);
        let receiver = CanReceiver::start(
            Arc::new(Mutex::new(transport.clone())),
            Duration::from_millis(1),
            tx,
        );

        assert_eq!(rx.recv().await.unwrap().frame.id(), 0x023);
        assert!(rx.recv().await.is_none());

        assert!(!receiver.is_running());
        assert_eq!(receiver.error_count(), 1);
        assert_eq!(receiver.frame_count(), 1);
    }

    #[tokio::test]
    async fn test_receiver_stops_when_channel_closed() {
        let transport = accepting_transport();
        transport.push_rx(frame(0x100));

        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let receiver = CanReceiver::start(
            Arc::new(Mutex::new(transport)),
            Duration::from_millis(1),
            tx,
        );

        for _ in 0..100 {
            if !receiver.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(!receiver.is_running());
    }
}
