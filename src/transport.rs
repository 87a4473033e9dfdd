//! Transport boundary.
//!
//! The connection manager owns exactly one live link at a time and talks to
//! it through these traits; the platform BLE stack (bluez, WinRT, Core
//! Bluetooth, ...) lives behind them, supplied by the embedding
//! application together with the device reference it discovered.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Reference to a discovered device, opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRef {
    /// Platform address string (MAC on bluez, u64 hex on WinRT).
    pub address: String,
    /// Advertised name, if the scanner saw one.
    pub name: Option<String>,
}

impl DeviceRef {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }
}

/// One GATT characteristic as reported by the link.
#[derive(Debug, Clone)]
pub struct Characteristic {
    pub uuid: String,
    pub can_notify: bool,
    pub can_write: bool,
}

/// Inbound events delivered by a subscribed link.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// One notification frame from the device.
    Notification(Vec<u8>),
    /// The link dropped. No further events follow.
    Disconnected,
}

/// Factory for links to a physical device.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a link to the device, failing after `timeout`.
    async fn open(
        &self,
        device: &DeviceRef,
        timeout: Duration,
    ) -> Result<Box<dyn TransportLink>, TransportError>;
}

/// One live link to a device.
#[async_trait]
pub trait TransportLink: Send + Sync {
    /// Enumerate the characteristics the device exposes.
    async fn characteristics(&self) -> Result<Vec<Characteristic>, TransportError>;

    /// Write a command payload to the given characteristic.
    async fn write(&self, characteristic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Subscribe to notifications on the given characteristic.
    ///
    /// The receiver carries notification frames and, eventually, the
    /// asynchronous drop signal.
    async fn subscribe(
        &self,
        characteristic: &str,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError>;

    /// Tear the link down. Must be safe to call more than once.
    async fn close(&self);
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory transport for connection tests: records opens and writes,
    //! injects frames and drop events, and can be programmed to fail.

    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    use crate::protocol::{NOTIFY_CHAR_UUID, WRITE_CHAR_UUID};

    #[derive(Debug, Clone)]
    pub(crate) struct RecordedWrite {
        pub characteristic: String,
        pub payload: Vec<u8>,
        pub at: Instant,
    }

    #[derive(Default)]
    struct Shared {
        opens: AtomicU32,
        fail_opens: AtomicU32,
        writes: Mutex<Vec<RecordedWrite>>,
        characteristics: Mutex<Option<Vec<Characteristic>>>,
        event_tx: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    }

    #[derive(Clone, Default)]
    pub(crate) struct MockTransport {
        shared: Arc<Shared>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail the next `n` open calls with an i/o error.
        pub fn fail_next_opens(&self, n: u32) {
            self.shared.fail_opens.store(n, Ordering::SeqCst);
        }

        /// Replace the advertised characteristic list.
        pub fn set_characteristics(&self, chars: Vec<Characteristic>) {
            *self.shared.characteristics.lock().unwrap() = Some(chars);
        }

        pub fn open_count(&self) -> u32 {
            self.shared.opens.load(Ordering::SeqCst)
        }

        pub fn writes(&self) -> Vec<RecordedWrite> {
            self.shared.writes.lock().unwrap().clone()
        }

        /// Writes of a single command payload, with timestamps.
        pub fn writes_of(&self, payload: &[u8]) -> Vec<RecordedWrite> {
            self.writes()
                .into_iter()
                .filter(|w| w.payload == payload)
                .collect()
        }

        /// Deliver a notification frame on the live subscription.
        pub fn notify(&self, frame: &[u8]) {
            if let Some(tx) = self.shared.event_tx.lock().unwrap().as_ref() {
                let _ = tx.send(TransportEvent::Notification(frame.to_vec()));
            }
        }

        /// Simulate an unexpected link drop.
        pub fn drop_link(&self) {
            if let Some(tx) = self.shared.event_tx.lock().unwrap().take() {
                let _ = tx.send(TransportEvent::Disconnected);
            }
        }

        fn default_characteristics() -> Vec<Characteristic> {
            vec![
                Characteristic {
                    uuid: NOTIFY_CHAR_UUID.to_string(),
                    can_notify: true,
                    can_write: false,
                },
                Characteristic {
                    uuid: WRITE_CHAR_UUID.to_string(),
                    can_notify: false,
                    can_write: true,
                },
            ]
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn open(
            &self,
            _device: &DeviceRef,
            _timeout: Duration,
        ) -> Result<Box<dyn TransportLink>, TransportError> {
            self.shared.opens.fetch_add(1, Ordering::SeqCst);

            let failures = self.shared.fail_opens.load(Ordering::SeqCst);
            if failures > 0 {
                self.shared.fail_opens.store(failures - 1, Ordering::SeqCst);
                return Err(TransportError::Io("simulated open failure".into()));
            }

            Ok(Box::new(MockLink {
                shared: Arc::clone(&self.shared),
            }))
        }
    }

    struct MockLink {
        shared: Arc<Shared>,
    }

    #[async_trait]
    impl TransportLink for MockLink {
        async fn characteristics(&self) -> Result<Vec<Characteristic>, TransportError> {
            Ok(self
                .shared
                .characteristics
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(MockTransport::default_characteristics))
        }

        async fn write(
            &self,
            characteristic: &str,
            payload: &[u8],
        ) -> Result<(), TransportError> {
            self.shared.writes.lock().unwrap().push(RecordedWrite {
                characteristic: characteristic.to_string(),
                payload: payload.to_vec(),
                at: Instant::now(),
            });
            Ok(())
        }

        async fn subscribe(
            &self,
            _characteristic: &str,
        ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError> {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.shared.event_tx.lock().unwrap() = Some(tx);
            Ok(rx)
        }

        async fn close(&self) {
            self.shared.event_tx.lock().unwrap().take();
        }
    }
}
