//! Derived device state.
//!
//! A small mutable record owned by the connection manager and updated only
//! from decoded notification frames. Consumers read it through a cloned
//! snapshot, never by reference.

use std::collections::BTreeMap;

use crate::parser::StateUpdate;
use crate::protocol::{CubeMove, Face};

/// Snapshot of everything the library has derived about the cube.
///
/// A fresh value is created on every successful connect attempt and again
/// on cleanup after a disconnect, so stale readings never survive a
/// reconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CubeState {
    /// Battery charge in percent, once a valid battery frame has arrived.
    pub battery_level: Option<u8>,
    /// True iff every entry in `face_states` is true.
    pub is_solved: bool,
    /// Solved flag per face. Empty until the first full state frame.
    pub face_states: BTreeMap<Face, bool>,
    /// Most recent move event, if any rotation frame has arrived.
    pub last_move: Option<CubeMove>,
    /// Model label reported by the cube, if queried.
    pub cube_type: Option<String>,
}

impl CubeState {
    /// Apply a decoded state frame, recomputing the aggregate solved flag.
    ///
    /// `is_solved` is always derived from the face flags here; nothing else
    /// ever writes it.
    pub fn apply_state(&mut self, update: &StateUpdate) {
        for &(face, solved) in &update.faces {
            self.face_states.insert(face, solved);
        }
        self.is_solved = !self.face_states.is_empty() && self.face_states.values().all(|&s| s);
    }

    pub fn apply_battery(&mut self, level: u8) {
        self.battery_level = Some(level);
    }

    pub fn apply_move(&mut self, mv: CubeMove) {
        self.last_move = Some(mv);
    }

    pub fn apply_cube_type(&mut self, label: String) {
        self.cube_type = Some(label);
    }
}
