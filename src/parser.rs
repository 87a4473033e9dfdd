//! Notification frame codec.
//!
//! Pure decode functions for the variable-length frames the cube pushes
//! over the notify characteristic. Decoding is defensive by default: a
//! short or corrupted frame decodes to `None` ("no update") instead of
//! panicking or propagating, because a single torn BLE packet must never
//! take down the notification listener.

use tracing::debug;

use crate::protocol::{CubeMove, Face};

/// Minimum length of a full cube-state frame (header + 6 faces * 9 bytes).
pub const STATE_FRAME_MIN_LEN: usize = 60;

/// Minimum length of a battery frame (header + level + checksum).
pub const BATTERY_FRAME_MIN_LEN: usize = 5;

/// Minimum length of a rotation frame (header + move code).
pub const ROTATION_FRAME_MIN_LEN: usize = 4;

/// Decoded result of a state frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    /// Solved flag per face, in wire order.
    pub faces: [(Face, bool); 6],
    /// True iff every face is solved.
    pub is_solved: bool,
}

/// Decode a full cube-state frame.
///
/// Bytes `[3..57)` hold six 9-byte groups, one per face in the fixed face
/// order. The first byte of each group is the face identifier and takes no
/// part in the comparison; the remaining 8 are sticker color bytes. A face
/// is solved iff all 8 stickers decode to the same color as the first one.
pub fn parse_state(frame: &[u8]) -> Option<StateUpdate> {
    if frame.len() < STATE_FRAME_MIN_LEN {
        debug!(len = frame.len(), "state frame too short, dropping");
        return None;
    }

    let mut faces = [(Face::Blue, false); 6];
    let mut is_solved = true;

    for (i, group) in frame[3..57].chunks_exact(9).enumerate() {
        let face = Face::ALL[i];
        // group[0] is the face identifier; stickers start at group[1].
        let stickers = &group[1..9];
        let first = Face::from_color_byte(stickers[0]);
        let solved = stickers
            .iter()
            .all(|&b| Face::from_color_byte(b) == first);

        debug!(face = %face, solved, "face state decoded");
        faces[i] = (face, solved);
        is_solved &= solved;
    }

    Some(StateUpdate { faces, is_solved })
}

/// Decode a battery frame, returning the charge level in percent.
///
/// The trailing byte is a checksum over the first four bytes (mod 256); a
/// mismatch means the notification was torn or corrupted, so the frame is
/// discarded and the previous battery level stays in effect.
pub fn parse_battery(frame: &[u8]) -> Option<u8> {
    if frame.len() < BATTERY_FRAME_MIN_LEN {
        debug!(len = frame.len(), "battery frame too short, dropping");
        return None;
    }

    let checksum = frame[..4]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b));
    if checksum != frame[4] {
        debug!(
            expected = frame[4],
            actual = checksum,
            "invalid battery checksum, dropping frame"
        );
        return None;
    }

    Some(frame[3])
}

/// Decode a rotation frame into a move event.
///
/// Unknown move codes decode to [`CubeMove::Unknown`], never an error.
pub fn parse_rotation(frame: &[u8]) -> Option<CubeMove> {
    if frame.len() < ROTATION_FRAME_MIN_LEN {
        debug!(len = frame.len(), "rotation frame too short, dropping");
        return None;
    }

    Some(CubeMove::from_code(frame[3]))
}

/// Decode a cube-type frame into a model label.
pub fn parse_cube_type(frame: &[u8]) -> Option<String> {
    if frame.len() < 4 {
        debug!(len = frame.len(), "cube type frame too short, dropping");
        return None;
    }

    let label = match frame[3] {
        0x00 => "GoCube",
        0x01 => "GoCube Edge",
        _ => "Unknown",
    };
    Some(label.to_string())
}
