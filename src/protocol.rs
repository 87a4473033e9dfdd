//! GoCube Protocol
//!
//! This module contains the protocol definitions for communicating with
//! a GoCube: service/characteristic UUIDs, the fixed command table, message
//! type tags, and the face/move vocabulary shared by the parser.

use std::fmt;

use crate::error::CubeError;

/// GoCube primary BLE service UUID (Nordic UART service).
pub const PRIMARY_SERVICE_UUID: &str = "6e400001-b5a3-f393-e0a9-e50e24dcca9e";

/// Write characteristic UUID - where commands are sent.
pub const WRITE_CHAR_UUID: &str = "6e400002-b5a3-f393-e0a9-e50e24dcca9e";

/// Notify characteristic UUID - where notification frames arrive.
pub const NOTIFY_CHAR_UUID: &str = "6e400003-b5a3-f393-e0a9-e50e24dcca9e";

/// Fixed first byte of every notification frame.
pub const FRAME_PREFIX: u8 = 0x2A;

/// Historical frame terminator (CR, LF). Short frames may omit it, so the
/// parser never requires it.
pub const FRAME_SUFFIX: [u8; 2] = [0x0D, 0x0A];

/// Message-type tag carried in byte 2 of a notification frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Rotation,
    State,
    Orientation,
    Battery,
    Stats,
    CubeType,
}

impl MessageType {
    /// Decode the tag byte. Unknown tags return `None` and are ignored by
    /// the notification handler.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Self::Rotation),
            0x02 => Some(Self::State),
            0x03 => Some(Self::Orientation),
            0x05 => Some(Self::Battery),
            0x07 => Some(Self::Stats),
            0x08 => Some(Self::CubeType),
            _ => None,
        }
    }
}

/// Fixed configuration and query commands accepted by the cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CubeCommand {
    /// Reboot the cube firmware
    Reboot,
    /// Tell the cube to treat its current arrangement as solved
    SetSolvedState,
    /// Stop orientation (quaternion) streaming
    DisableOrientation,
    /// Resume orientation streaming
    EnableOrientation,
    /// Request a battery frame
    GetBattery,
    /// Request a full state frame
    GetState,
    /// Request usage statistics
    GetStats,
    /// Request the cube model identifier
    GetCubeType,
    /// Flash the backlight three times
    LedFlash,
    /// Enable or disable animated backlight
    LedToggleAnimation,
    /// Slowly flash the backlight three times
    LedFlashSlow,
    /// Toggle backlight
    LedToggle,
}

impl CubeCommand {
    /// Get the raw payload for this command.
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Reboot => &[0x34],
            Self::SetSolvedState => &[0x35],
            Self::DisableOrientation => &[0x37],
            Self::EnableOrientation => &[0x38],
            Self::GetBattery => &[0x32],
            Self::GetState => &[0x33],
            Self::GetStats => &[0x39],
            Self::GetCubeType => &[0x56],
            Self::LedFlash => &[0x41],
            Self::LedToggleAnimation => &[0x42],
            Self::LedFlashSlow => &[0x43],
            Self::LedToggle => &[0x44],
        }
    }

    /// Command name as used by the name-based send API.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Reboot => "Reboot",
            Self::SetSolvedState => "SetSolvedState",
            Self::DisableOrientation => "DisableOrientation",
            Self::EnableOrientation => "EnableOrientation",
            Self::GetBattery => "GetBattery",
            Self::GetState => "GetState",
            Self::GetStats => "GetStats",
            Self::GetCubeType => "GetCubeType",
            Self::LedFlash => "LedFlash",
            Self::LedToggleAnimation => "LedToggleAnimation",
            Self::LedFlashSlow => "LedFlashSlow",
            Self::LedToggle => "LedToggle",
        }
    }

    /// Look up a command by its registered name.
    ///
    /// An unregistered name is a caller error, not a transport fault.
    pub fn from_name(name: &str) -> Result<Self, CubeError> {
        ALL_COMMANDS
            .iter()
            .copied()
            .find(|c| c.name() == name)
            .ok_or_else(|| CubeError::UnknownCommand(name.to_string()))
    }
}

/// Every registered command, used for name lookup.
pub const ALL_COMMANDS: &[CubeCommand] = &[
    CubeCommand::Reboot,
    CubeCommand::SetSolvedState,
    CubeCommand::DisableOrientation,
    CubeCommand::EnableOrientation,
    CubeCommand::GetBattery,
    CubeCommand::GetState,
    CubeCommand::GetStats,
    CubeCommand::GetCubeType,
    CubeCommand::LedFlash,
    CubeCommand::LedToggleAnimation,
    CubeCommand::LedFlashSlow,
    CubeCommand::LedToggle,
];

/// One of the six cube faces, identified by its center color.
///
/// The enumeration order is the wire order: state frames report faces in
/// this sequence, and rotation codes pair up as `face * 2 + direction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Face {
    Blue,
    Green,
    White,
    Yellow,
    Red,
    Orange,
}

impl Face {
    /// All faces in wire order.
    pub const ALL: [Face; 6] = [
        Face::Blue,
        Face::Green,
        Face::White,
        Face::Yellow,
        Face::Red,
        Face::Orange,
    ];

    /// Decode a sticker color byte. Bytes outside the table return `None`.
    pub fn from_color_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Face::Blue),
            0x01 => Some(Face::Green),
            0x02 => Some(Face::White),
            0x03 => Some(Face::Yellow),
            0x04 => Some(Face::Red),
            0x05 => Some(Face::Orange),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Face::Blue => "Blue",
            Face::Green => "Green",
            Face::White => "White",
            Face::Yellow => "Yellow",
            Face::Red => "Red",
            Face::Orange => "Orange",
        }
    }
}

impl fmt::Display for Face {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rotation direction of a face turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnDirection {
    Clockwise,
    Counterclockwise,
}

impl fmt::Display for TurnDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TurnDirection::Clockwise => "Clockwise",
            TurnDirection::Counterclockwise => "Counterclockwise",
        })
    }
}

/// A decoded move event from a rotation frame.
///
/// Rotation codes outside the 12-entry table decode to [`CubeMove::Unknown`]
/// rather than an error; the cube occasionally emits codes newer firmware
/// understands and older hosts should just pass them through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeMove {
    Turn {
        face: Face,
        direction: TurnDirection,
    },
    Unknown,
}

impl CubeMove {
    /// Decode byte 3 of a rotation frame.
    pub fn from_code(code: u8) -> Self {
        if code >= 12 {
            return CubeMove::Unknown;
        }
        let face = Face::ALL[(code / 2) as usize];
        let direction = if code % 2 == 0 {
            TurnDirection::Clockwise
        } else {
            TurnDirection::Counterclockwise
        };
        CubeMove::Turn { face, direction }
    }
}

impl fmt::Display for CubeMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CubeMove::Turn { face, direction } => write!(f, "{} {}", face, direction),
            CubeMove::Unknown => f.write_str("Unknown"),
        }
    }
}
