//! Core protocol definitions and constants

/// Fixed header size in bytes
pub const HEADER_LEN: usize = 16;

/// Default magic constant, written big-endian at offset 0
pub const DEFAULT_MAGIC: u32 = 0xFF01_0000;

/// Default upper bound on a payload we are willing to buffer
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// JSON field carrying the numeric status of a reply
pub const STATUS_FIELD: &str = "Ret";

/// JSON field carrying the session token
pub const SESSION_FIELD: &str = "SessionID";

/// Command catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Authenticate and obtain a session token
    Login,
    /// End the session
    Logout,
    /// Keep the session token alive
    KeepAlive,
    /// Device information query
    SystemInfo,
    /// Pan-tilt-zoom control
    PtzControl,
    /// Start playback of a recording
    StartPlayback,
    /// List recordings in a time window
    ListRecordings,
    /// Device-specific extension by raw id
    Extension(u32),
}

impl Command {
    /// Wire command id
    pub fn id(&self) -> u32 {
        match self {
            Command::Login => 1000,
            Command::Logout => 1001,
            Command::KeepAlive => 1006,
            Command::SystemInfo => 1020,
            Command::PtzControl => 1400,
            Command::StartPlayback => 1420,
            Command::ListRecordings => 1440,
            Command::Extension(id) => *id,
        }
    }

    /// Name used in the payload's `Name` field
    pub fn name(&self) -> &'static str {
        match self {
            Command::Login => "Login",
            Command::Logout => "Logout",
            Command::KeepAlive => "KeepAlive",
            Command::SystemInfo => "SystemInfo",
            Command::PtzControl => "OPPTZControl",
            Command::StartPlayback => "OPPlayBack",
            Command::ListRecordings => "OPFileQuery",
            Command::Extension(_) => "Extension",
        }
    }

    /// Map a wire id back to a known command
    pub fn from_id(id: u32) -> Option<Command> {
        match id {
            1000 => Some(Command::Login),
            1001 => Some(Command::Logout),
            1006 => Some(Command::KeepAlive),
            1020 => Some(Command::SystemInfo),
            1400 => Some(Command::PtzControl),
            1420 => Some(Command::StartPlayback),
            1440 => Some(Command::ListRecordings),
            _ => None,
        }
    }
}

/// PTZ motions understood by `OPPTZControl`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtzDirection {
    Up,
    Down,
    Left,
    Right,
    ZoomIn,
    ZoomOut,
    Stop,
}

impl PtzDirection {
    /// Command string sent to the device
    pub fn command(&self) -> &'static str {
        match self {
            PtzDirection::Up => "DirectionUp",
            PtzDirection::Down => "DirectionDown",
            PtzDirection::Left => "DirectionLeft",
            PtzDirection::Right => "DirectionRight",
            PtzDirection::ZoomIn => "ZoomTile",
            PtzDirection::ZoomOut => "ZoomWide",
            PtzDirection::Stop => "Stop",
        }
    }
}
