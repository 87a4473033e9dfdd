//! Connection lifecycle management.
//!
//! [`CubeConnection`] owns the single live transport link to one physical
//! cube: it serializes connect attempts, retries with a fixed budget,
//! demultiplexes inbound notification frames into the codec, debounces
//! state polling, fans decoded changes out to subscribers, and reconnects
//! in the background after an unexpected drop.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::config::ConnectionConfig;
use crate::error::CubeError;
use crate::parser;
use crate::protocol::{CubeCommand, CubeMove, MessageType};
use crate::state::CubeState;
use crate::transport::{DeviceRef, Transport, TransportEvent, TransportLink};

type StateCallback = Arc<dyn Fn() + Send + Sync>;
type MoveCallback = Arc<dyn Fn(&CubeMove) + Send + Sync>;

/// Locks a mutex, recovering the data if a callback panicked while a test
/// held it. No lock is ever held across an await or a callback invocation.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared listener registries, separate from the manager so subscription
/// handles stay independent of the transport type.
#[derive(Default)]
struct Callbacks {
    state: Mutex<HashMap<u64, StateCallback>>,
    movement: Mutex<HashMap<u64, MoveCallback>>,
    next_id: AtomicU64,
}

/// Capability returned by [`CubeConnection::register_callback`].
///
/// Dropping it does nothing; call [`unsubscribe`](Self::unsubscribe) to
/// remove the listener. Repeated calls are harmless.
pub struct StateSubscription {
    callbacks: Arc<Callbacks>,
    id: u64,
}

impl StateSubscription {
    pub fn unsubscribe(&self) {
        lock(&self.callbacks.state).remove(&self.id);
    }
}

/// Token identifying a registered movement listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveCallbackId(u64);

struct Inner<T> {
    transport: T,
    config: ConnectionConfig,
    /// Serializes connect sequences; never wraps other operations.
    connect_lock: tokio::sync::Mutex<()>,
    link: Mutex<Option<Arc<dyn TransportLink>>>,
    write_char: Mutex<Option<String>>,
    device: Mutex<Option<DeviceRef>>,
    state: Mutex<CubeState>,
    connected: AtomicBool,
    auto_reconnect: AtomicBool,
    callbacks: Arc<Callbacks>,
    /// Bumped on every cleanup so stale notification pumps stop delivering.
    generation: AtomicU64,
    last_state_poll: Mutex<Instant>,
    state_poll_pending: AtomicBool,
}

/// Manager for the link to one physical cube.
///
/// Cheap to clone; all clones share the same connection.
pub struct CubeConnection<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for CubeConnection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport + 'static> CubeConnection<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ConnectionConfig::default())
    }

    pub fn with_config(transport: T, config: ConnectionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                connect_lock: tokio::sync::Mutex::new(()),
                link: Mutex::new(None),
                write_char: Mutex::new(None),
                device: Mutex::new(None),
                state: Mutex::new(CubeState::default()),
                connected: AtomicBool::new(false),
                auto_reconnect: AtomicBool::new(true),
                callbacks: Arc::new(Callbacks::default()),
                generation: AtomicU64::new(0),
                last_state_poll: Mutex::new(Instant::now()),
                state_poll_pending: AtomicBool::new(false),
            }),
        }
    }

    /// Connect to the cube with retry logic.
    ///
    /// Concurrent callers are serialized; each call runs up to the
    /// configured attempt budget with a fixed delay between attempts and
    /// surfaces [`CubeError::ConnectFailed`] once the budget is exhausted.
    pub async fn connect(&self, device: &DeviceRef) -> Result<(), CubeError> {
        let _guard = self.inner.connect_lock.lock().await;

        let max_attempts = self.inner.config.max_connect_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            // Tear down anything left from a previous link first.
            self.cleanup().await;
            *lock(&self.inner.device) = Some(device.clone());

            info!(
                attempt,
                max_attempts,
                address = %device.address,
                "attempting to connect to GoCube"
            );

            match self.try_connect(device).await {
                Ok(()) => {
                    info!(address = %device.address, "connected to GoCube");
                    return Ok(());
                }
                Err(err) => {
                    warn!(attempt, max_attempts, error = %err, "connect attempt failed");
                    last_error = err.to_string();
                    self.cleanup().await;
                    if attempt < max_attempts {
                        sleep(self.inner.config.retry_delay()).await;
                    }
                }
            }
        }

        Err(CubeError::ConnectFailed {
            attempts: max_attempts,
            last_error,
        })
    }

    /// One connect attempt: open the link, locate the notify and write
    /// characteristics, subscribe, and kick the cube into the quiet mode
    /// this library expects.
    async fn try_connect(&self, device: &DeviceRef) -> Result<(), CubeError> {
        let config = &self.inner.config;
        let link: Arc<dyn TransportLink> = Arc::from(
            self.inner
                .transport
                .open(device, config.connect_timeout())
                .await?,
        );

        let characteristics = match link.characteristics().await {
            Ok(chars) => chars,
            Err(err) => {
                link.close().await;
                return Err(err.into());
            }
        };

        let notify_found = characteristics
            .iter()
            .any(|c| c.can_notify && c.uuid.eq_ignore_ascii_case(&config.notify_char_uuid));
        let write_char = characteristics
            .iter()
            .find(|c| c.can_write && c.uuid.eq_ignore_ascii_case(&config.write_char_uuid));

        let write_uuid = match (notify_found, write_char) {
            (true, Some(c)) => c.uuid.clone(),
            _ => {
                link.close().await;
                return Err(CubeError::CharacteristicsMissing);
            }
        };

        // From here the link is owned; a failure is cleaned up by the caller.
        *lock(&self.inner.link) = Some(Arc::clone(&link));
        *lock(&self.inner.write_char) = Some(write_uuid);
        *lock(&self.inner.state) = CubeState::default();

        let events = link.subscribe(&config.notify_char_uuid).await?;

        self.inner.connected.store(true, Ordering::SeqCst);
        // Arm the debounce window so a poll burst right after connect
        // coalesces into one write.
        *lock(&self.inner.last_state_poll) = Instant::now();
        self.inner.state_poll_pending.store(false, Ordering::SeqCst);

        let generation = self.inner.generation.load(Ordering::SeqCst);
        self.spawn_event_pump(events, generation);

        self.send(CubeCommand::DisableOrientation).await;
        debug!("disabled orientation streaming");

        self.fire_state_callbacks();
        Ok(())
    }

    /// Single teardown path for every transition into Disconnected.
    ///
    /// Idempotent: a manager with no live link passes through untouched
    /// (apart from the generation bump).
    async fn cleanup(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        let link = lock(&self.inner.link).take();
        lock(&self.inner.write_char).take();
        self.inner.connected.store(false, Ordering::SeqCst);

        if let Some(link) = link {
            link.close().await;
            *lock(&self.inner.state) = CubeState::default();
            debug!("cleaned up existing link");
            self.fire_state_callbacks();
            sleep(self.inner.config.cleanup_delay()).await;
        }
    }

    /// Disconnect from the cube.
    ///
    /// Disables auto-reconnect first so a racing drop event cannot start a
    /// reconnect after the caller asked to go offline. Safe to call when
    /// already disconnected.
    pub async fn disconnect(&self) {
        self.inner.auto_reconnect.store(false, Ordering::SeqCst);
        self.cleanup().await;
    }

    fn spawn_event_pump(
        &self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        generation: u64,
    ) {
        let conn = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if conn.inner.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                match event {
                    TransportEvent::Notification(frame) => conn.handle_notification(&frame),
                    TransportEvent::Disconnected => {
                        conn.handle_disconnect();
                        return;
                    }
                }
            }
        });
    }

    /// Demultiplex one inbound frame by its message-type tag.
    ///
    /// Everything on this path is fully local: decode failures and listener
    /// panics are logged and swallowed so a bad packet can never unsubscribe
    /// us from the transport.
    fn handle_notification(&self, frame: &[u8]) {
        if frame.len() < 3 {
            return;
        }

        let Some(message_type) = MessageType::from_tag(frame[2]) else {
            debug!(tag = frame[2], "unknown message type");
            return;
        };

        match message_type {
            MessageType::Rotation => {
                let Some(mv) = parser::parse_rotation(frame) else {
                    return;
                };
                debug!(%mv, "rotation");
                lock(&self.inner.state).apply_move(mv);
                self.fire_movement_callbacks(&mv);

                // Refresh solved-state after a move, without blocking the pump.
                let conn = self.clone();
                tokio::spawn(async move {
                    conn.send(CubeCommand::GetState).await;
                });
            }
            MessageType::State => {
                if let Some(update) = parser::parse_state(frame) {
                    lock(&self.inner.state).apply_state(&update);
                    debug!(solved = update.is_solved, "state updated");
                }
                self.fire_state_callbacks();
            }
            MessageType::Battery => {
                if let Some(level) = parser::parse_battery(frame) {
                    lock(&self.inner.state).apply_battery(level);
                    debug!(level, "battery level updated");
                }
                self.fire_state_callbacks();
            }
            MessageType::CubeType => {
                if let Some(label) = parser::parse_cube_type(frame) {
                    debug!(%label, "cube type reported");
                    lock(&self.inner.state).apply_cube_type(label);
                }
                self.fire_state_callbacks();
            }
            MessageType::Orientation => {
                debug!("orientation update received");
            }
            MessageType::Stats => {
                debug!("stats frame received");
            }
        }
    }

    fn handle_disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.fire_state_callbacks();

        let device_known = lock(&self.inner.device).is_some();
        if self.inner.auto_reconnect.load(Ordering::SeqCst) && device_known {
            debug!("link dropped, scheduling reconnection");
            let conn = self.clone();
            tokio::spawn(async move {
                conn.auto_reconnect().await;
            });
        } else {
            debug!("link dropped, auto-reconnect disabled");
        }
    }

    /// Reconnect sequence run after a drop: linear backoff, flag checked
    /// before and after every wait so disabling it halts further attempts.
    /// Exhaustion is logged, not raised; nobody is waiting on this.
    async fn auto_reconnect(&self) {
        if !self.inner.auto_reconnect.load(Ordering::SeqCst) {
            return;
        }

        let max_attempts = self.inner.config.max_connect_retries.max(1);
        for attempt in 1..=max_attempts {
            sleep(self.inner.config.retry_delay() * attempt).await;
            if !self.inner.auto_reconnect.load(Ordering::SeqCst) {
                debug!("auto-reconnect cancelled");
                return;
            }
            let Some(device) = lock(&self.inner.device).clone() else {
                return;
            };
            debug!(attempt, max_attempts, "attempting to reconnect");
            match self.connect(&device).await {
                Ok(()) => return,
                Err(err) => debug!(error = %err, "reconnection attempt failed"),
            }
        }

        warn!(attempts = max_attempts, "failed to reconnect");
    }

    /// Send a command by its registered name.
    ///
    /// An unregistered name is a caller error. A valid command while
    /// disconnected is logged and dropped, never queued.
    pub async fn send_command(&self, name: &str) -> Result<(), CubeError> {
        let command = CubeCommand::from_name(name)?;
        self.send(command).await;
        Ok(())
    }

    /// Send a command to the cube.
    ///
    /// No-op while disconnected. `GetState` goes through the debounce
    /// window; write failures are logged and swallowed (the drop event, if
    /// any, arrives through the notification path).
    pub async fn send(&self, command: CubeCommand) {
        if !self.inner.connected.load(Ordering::SeqCst) {
            debug!(command = command.name(), "not connected, dropping command");
            return;
        }

        if command == CubeCommand::GetState && self.debounce_state_poll() {
            return;
        }

        let link = lock(&self.inner.link).clone();
        let write_char = lock(&self.inner.write_char).clone();
        let (Some(link), Some(write_char)) = (link, write_char) else {
            debug!(command = command.name(), "no write characteristic, dropping command");
            return;
        };

        match link.write(&write_char, command.as_bytes()).await {
            Ok(()) => debug!(command = command.name(), "sent command"),
            Err(err) => debug!(command = command.name(), error = %err, "failed to send command"),
        }
    }

    /// Returns true when the poll was coalesced into a pending deferred
    /// send. Concurrent coalesced requests collapse onto one task.
    fn debounce_state_poll(&self) -> bool {
        let now = Instant::now();
        let mut last = lock(&self.inner.last_state_poll);
        if now.duration_since(*last) < self.inner.config.state_debounce() {
            if !self.inner.state_poll_pending.swap(true, Ordering::SeqCst) {
                let conn = self.clone();
                tokio::spawn(async move {
                    sleep(conn.inner.config.state_debounce()).await;
                    if conn.inner.state_poll_pending.load(Ordering::SeqCst) {
                        conn.send(CubeCommand::GetState).await;
                        conn.inner.state_poll_pending.store(false, Ordering::SeqCst);
                    }
                });
            }
            return true;
        }
        *last = now;
        false
    }

    /// Request the battery level and wait briefly for the reply frame.
    ///
    /// Bounded convenience wrapper: polls the decoded value at the
    /// configured cadence and gives up after the configured wait.
    pub async fn get_battery_level(&self) -> Option<u8> {
        self.send(CubeCommand::GetBattery).await;

        let deadline = Instant::now() + self.inner.config.battery_wait();
        while Instant::now() < deadline {
            if let Some(level) = lock(&self.inner.state).battery_level {
                return Some(level);
            }
            sleep(self.inner.config.battery_poll()).await;
        }

        debug!("timed out waiting for battery level");
        None
    }

    /// Flash the backlight three times.
    pub async fn led_flash(&self) {
        self.send(CubeCommand::LedFlash).await;
    }

    /// Enable or disable animated backlight.
    pub async fn led_toggle_animation(&self) {
        self.send(CubeCommand::LedToggleAnimation).await;
    }

    /// Slowly flash the backlight three times.
    pub async fn led_flash_slow(&self) {
        self.send(CubeCommand::LedFlashSlow).await;
    }

    /// Toggle backlight.
    pub async fn led_toggle(&self) {
        self.send(CubeCommand::LedToggle).await;
    }

    /// Register a state-change listener. Fired on connect, disconnect, and
    /// every decoded state, battery, or cube-type frame.
    pub fn register_callback(
        &self,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> StateSubscription {
        let id = self.inner.callbacks.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.callbacks.state).insert(id, Arc::new(callback));
        StateSubscription {
            callbacks: Arc::clone(&self.inner.callbacks),
            id,
        }
    }

    /// Register a move-event listener, independent of state listeners.
    pub fn add_movement_callback(
        &self,
        callback: impl Fn(&CubeMove) + Send + Sync + 'static,
    ) -> MoveCallbackId {
        let id = self.inner.callbacks.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.callbacks.movement).insert(id, Arc::new(callback));
        MoveCallbackId(id)
    }

    pub fn remove_movement_callback(&self, id: MoveCallbackId) {
        lock(&self.inner.callbacks.movement).remove(&id.0);
    }

    fn fire_state_callbacks(&self) {
        let listeners: Vec<StateCallback> =
            lock(&self.inner.callbacks.state).values().cloned().collect();
        debug!(count = listeners.len(), "notifying state callbacks");
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                error!("state callback panicked");
            }
        }
    }

    fn fire_movement_callbacks(&self, mv: &CubeMove) {
        let listeners: Vec<MoveCallback> = lock(&self.inner.callbacks.movement)
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(mv))).is_err() {
                error!("movement callback panicked");
            }
        }
    }

    /// Snapshot of the current derived device state.
    pub fn state(&self) -> CubeState {
        lock(&self.inner.state).clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn should_auto_reconnect(&self) -> bool {
        self.inner.auto_reconnect.load(Ordering::SeqCst)
    }

    pub fn set_auto_reconnect(&self, value: bool) {
        self.inner.auto_reconnect.store(value, Ordering::SeqCst);
    }

    /// Enable auto-reconnect; if it was off and the cube is currently
    /// disconnected with a known device, reconnect right away instead of
    /// waiting for a future drop event.
    pub async fn enable_auto_reconnect(&self) {
        let was_disabled = !self.inner.auto_reconnect.swap(true, Ordering::SeqCst);
        let device_known = lock(&self.inner.device).is_some();

        if was_disabled && !self.is_connected() && device_known {
            debug!("auto-reconnect enabled, attempting immediate reconnection");
            self.auto_reconnect().await;
        } else {
            debug!("auto-reconnect enabled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::tests::solved_state_frame;
    use crate::protocol::{Face, FRAME_PREFIX, WRITE_CHAR_UUID};
    use crate::transport::mock::MockTransport;
    use crate::transport::Characteristic;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn connection() -> (CubeConnection<MockTransport>, MockTransport) {
        let transport = MockTransport::new();
        (CubeConnection::new(transport.clone()), transport)
    }

    fn cube() -> DeviceRef {
        DeviceRef::new("AA:BB:CC:DD:EE:FF")
    }

    fn battery_frame(level: u8) -> Vec<u8> {
        let mut frame = vec![FRAME_PREFIX, 0x00, 0x05, level];
        let checksum = frame.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        frame.push(checksum);
        frame
    }

    /// Let spawned tasks (notification pump, deferred sends) run.
    async fn drain_tasks() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn connect_opens_link_and_quiets_orientation() {
        let (conn, transport) = connection();
        conn.connect(&cube()).await.unwrap();

        assert!(conn.is_connected());
        assert_eq!(transport.open_count(), 1);

        let writes = transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(
            writes[0].payload,
            CubeCommand::DisableOrientation.as_bytes()
        );
        assert_eq!(writes[0].characteristic, WRITE_CHAR_UUID);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_fires_state_callback_once() {
        let (conn, _transport) = connection();
        let (calls, cb) = counter();
        conn.register_callback(cb);

        conn.connect(&cube()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_exhausts_attempt_budget_with_fixed_spacing() {
        let (conn, transport) = connection();
        transport.fail_next_opens(3);

        let started = Instant::now();
        let err = conn.connect(&cube()).await.unwrap_err();

        assert_eq!(transport.open_count(), 3);
        assert!(matches!(err, CubeError::ConnectFailed { attempts: 3, .. }));
        assert!(!conn.is_connected());
        // Two inter-attempt delays of 2 s each.
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_fails_when_write_characteristic_is_missing() {
        let (conn, transport) = connection();
        transport.set_characteristics(vec![Characteristic {
            uuid: crate::protocol::NOTIFY_CHAR_UUID.to_string(),
            can_notify: true,
            can_write: false,
        }]);

        let err = conn.connect(&cube()).await.unwrap_err();
        match err {
            CubeError::ConnectFailed {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("characteristics"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_frame_fans_out_and_refreshes_state() {
        let (conn, transport) = connection();
        let moves: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&moves);
        conn.add_movement_callback(move |mv| sink.lock().unwrap().push(mv.to_string()));

        conn.connect(&cube()).await.unwrap();
        transport.notify(&[FRAME_PREFIX, 0x00, 0x01, 0x00]);
        drain_tasks().await;

        assert_eq!(moves.lock().unwrap().as_slice(), ["Blue Clockwise"]);
        assert_eq!(
            conn.state().last_move.unwrap().to_string(),
            "Blue Clockwise"
        );

        // The follow-up GetState is debounced, so the write lands one
        // window later, not immediately.
        assert!(transport
            .writes_of(CubeCommand::GetState.as_bytes())
            .is_empty());
        sleep(Duration::from_millis(600)).await;
        assert_eq!(
            transport.writes_of(CubeCommand::GetState.as_bytes()).len(),
            1
        );
        // Fan-out happened exactly once.
        assert_eq!(moves.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_movement_callback_stays_silent() {
        let (conn, transport) = connection();
        let (calls, _) = counter();
        let inner = Arc::clone(&calls);
        let id = conn.add_movement_callback(move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
        });

        conn.connect(&cube()).await.unwrap();
        transport.notify(&[FRAME_PREFIX, 0x00, 0x01, 0x02]);
        drain_tasks().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        conn.remove_movement_callback(id);
        transport.notify(&[FRAME_PREFIX, 0x00, 0x01, 0x03]);
        drain_tasks().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn state_frames_update_the_snapshot() {
        let (conn, transport) = connection();
        conn.connect(&cube()).await.unwrap();
        let (calls, cb) = counter();
        conn.register_callback(cb);

        transport.notify(&solved_state_frame());
        drain_tasks().await;

        let state = conn.state();
        assert!(state.is_solved);
        assert_eq!(state.face_states.len(), 6);
        assert!(state.face_states.values().all(|&s| s));

        // Flip one sticker on the White face.
        let mut frame = solved_state_frame();
        frame[3 + 18 + 8] = 0x00;
        transport.notify(&frame);
        drain_tasks().await;

        let state = conn.state();
        assert!(!state.is_solved);
        assert_eq!(state.face_states[&Face::White], false);
        assert!(state.face_states[&Face::Blue]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn battery_frame_round_trip() {
        let (conn, transport) = connection();
        conn.connect(&cube()).await.unwrap();

        let poller = conn.clone();
        let handle = tokio::spawn(async move { poller.get_battery_level().await });
        drain_tasks().await;
        assert_eq!(
            transport.writes_of(CubeCommand::GetBattery.as_bytes()).len(),
            1
        );

        transport.notify(&battery_frame(88));
        assert_eq!(handle.await.unwrap(), Some(88));
        assert_eq!(conn.state().battery_level, Some(88));
    }

    #[tokio::test(start_paused = true)]
    async fn battery_poll_times_out_without_a_reply() {
        let (conn, _transport) = connection();
        conn.connect(&cube()).await.unwrap();
        assert_eq!(conn.get_battery_level().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_battery_frame_keeps_prior_value() {
        let (conn, transport) = connection();
        conn.connect(&cube()).await.unwrap();

        transport.notify(&battery_frame(90));
        drain_tasks().await;
        assert_eq!(conn.state().battery_level, Some(90));

        let mut torn = battery_frame(10);
        torn[4] = torn[4].wrapping_add(1);
        transport.notify(&torn);
        drain_tasks().await;
        assert_eq!(conn.state().battery_level, Some(90));
    }

    #[tokio::test(start_paused = true)]
    async fn short_and_unknown_frames_are_ignored() {
        let (conn, transport) = connection();
        conn.connect(&cube()).await.unwrap();
        let before = conn.state();

        transport.notify(&[FRAME_PREFIX]);
        transport.notify(&[FRAME_PREFIX, 0x00]);
        transport.notify(&[FRAME_PREFIX, 0x00, 0x02, 0x01, 0x02]); // short state
        transport.notify(&[FRAME_PREFIX, 0x00, 0x05, 50]); // short battery
        transport.notify(&[FRAME_PREFIX, 0x00, 0x7E, 0x00]); // unknown tag
        drain_tasks().await;

        assert!(conn.is_connected());
        assert_eq!(conn.state(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn get_state_debounce_coalesces_to_one_write() {
        let (conn, transport) = connection();
        conn.connect(&cube()).await.unwrap();

        let first_call = Instant::now();
        conn.send_command("GetState").await.unwrap();
        sleep(Duration::from_millis(100)).await;
        conn.send_command("GetState").await.unwrap();
        sleep(Duration::from_secs(1)).await;

        let polls = transport.writes_of(CubeCommand::GetState.as_bytes());
        assert_eq!(polls.len(), 1);
        assert!(polls[0].at.duration_since(first_call) >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_command_name_is_a_caller_error() {
        let (conn, _transport) = connection();
        conn.connect(&cube()).await.unwrap();
        assert!(matches!(
            conn.send_command("Explode").await,
            Err(CubeError::UnknownCommand(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn offline_commands_are_dropped_not_queued() {
        let (conn, transport) = connection();
        conn.send_command("LedFlash").await.unwrap();
        conn.led_toggle().await;
        assert!(transport.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_disables_auto_reconnect() {
        let (conn, transport) = connection();
        conn.connect(&cube()).await.unwrap();
        conn.disconnect().await;

        assert!(!conn.should_auto_reconnect());
        assert!(!conn.is_connected());

        transport.drop_link();
        sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_with_auto_reconnect_disabled_stays_down() {
        let (conn, transport) = connection();
        conn.connect(&cube()).await.unwrap();
        conn.set_auto_reconnect(false);

        transport.drop_link();
        drain_tasks().await;
        assert!(!conn.is_connected());

        sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_triggers_background_reconnect() {
        let (conn, transport) = connection();
        conn.connect(&cube()).await.unwrap();
        transport.notify(&battery_frame(70));
        drain_tasks().await;
        assert_eq!(conn.state().battery_level, Some(70));

        transport.drop_link();
        drain_tasks().await;
        assert!(!conn.is_connected());

        // First reconnect attempt waits 2 s, then cleanup settles for 1 s.
        sleep(Duration::from_secs(4)).await;
        assert!(conn.is_connected());
        assert_eq!(transport.open_count(), 2);
        // Fresh state after reconnect, nothing stale.
        assert_eq!(conn.state().battery_level, None);
    }

    #[tokio::test(start_paused = true)]
    async fn enable_auto_reconnect_reconnects_immediately() {
        let (conn, transport) = connection();
        conn.connect(&cube()).await.unwrap();
        conn.set_auto_reconnect(false);

        transport.drop_link();
        drain_tasks().await;
        sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.open_count(), 1);

        conn.enable_auto_reconnect().await;
        assert!(conn.is_connected());
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribed_callback_never_fires_again() {
        let (conn, transport) = connection();
        conn.connect(&cube()).await.unwrap();

        let (calls, cb) = counter();
        let subscription = conn.register_callback(cb);

        transport.notify(&solved_state_frame());
        drain_tasks().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        subscription.unsubscribe();
        subscription.unsubscribe(); // idempotent

        transport.notify(&solved_state_frame());
        drain_tasks().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_listener_does_not_block_the_rest() {
        let (conn, transport) = connection();
        conn.register_callback(|| panic!("listener bug"));
        let (calls, cb) = counter();
        conn.register_callback(cb);

        conn.connect(&cube()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        transport.notify(&battery_frame(55));
        drain_tasks().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(conn.state().battery_level, Some(55));
    }
}
