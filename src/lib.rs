//! BLE link management for GoCube smart cubes.
//!
//! Owns the connection lifecycle (connect, retry, auto-reconnect,
//! disconnect) and the binary notification protocol: command payloads out,
//! rotation/state/battery frames in, decoded into a per-face solved-state
//! snapshot.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │                 CubeConnection                 │
//! │   (lifecycle, retries, debounce, callbacks)    │
//! └──────────┬──────────────┬──────────────┬───────┘
//!            │              │              │
//!            ▼              ▼              ▼
//!      ┌──────────┐   ┌──────────┐   ┌──────────┐
//!      │ Transport│   │  parser  │   │ CubeState│
//!      │  (trait) │   │          │   │          │
//!      │ - open   │   │ - state  │   │ - faces  │
//!      │ - write  │   │ - battery│   │ - battery│
//!      │ - notify │   │ - moves  │   │ - solved │
//!      └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! The platform BLE stack and device discovery live behind the
//! [`transport::Transport`] trait, supplied by the embedding application.
//!
//! ## Example
//!
//! ```no_run
//! # async fn run(transport: impl gocube_ble::Transport + 'static) {
//! use gocube_ble::{CubeConnection, DeviceRef};
//!
//! let cube = CubeConnection::new(transport);
//! let sub = cube.register_callback(|| println!("state changed"));
//! cube.connect(&DeviceRef::new("D4:AD:20:01:02:03")).await.unwrap();
//!
//! if let Some(level) = cube.get_battery_level().await {
//!     println!("battery: {level}%");
//! }
//!
//! sub.unsubscribe();
//! cube.disconnect().await;
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod parser;
pub mod protocol;
pub mod state;
pub mod transport;

pub use config::ConnectionConfig;
pub use connection::{CubeConnection, MoveCallbackId, StateSubscription};
pub use error::{CubeError, TransportError};
pub use protocol::{CubeCommand, CubeMove, Face, TurnDirection};
pub use state::CubeState;
pub use transport::{Characteristic, DeviceRef, Transport, TransportEvent, TransportLink};
