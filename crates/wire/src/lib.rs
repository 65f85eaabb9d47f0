//! Vendor binary camera protocol
//!
//! Many low-cost IP cameras and NVRs speak a TCP protocol made of a fixed
//! 16-byte header followed by a JSON body:
//!
//! ```text
//! offset 0  : magic constant, 4 bytes, big-endian
//! offset 4  : command id, 4 bytes, little-endian
//! offset 8  : payload length N, 4 bytes, little-endian
//! offset 12 : reserved, 4 bytes, zero
//! offset 16 : JSON payload, N bytes, UTF-8
//! ```
//!
//! This crate provides the frame codec, the command catalog, the MD5 login
//! handshake and an async client that keeps the session token attached to
//! every command.

pub mod auth;
pub mod client;
pub mod errors;
pub mod frame;
pub mod protocol;

pub use auth::{login_digest, LoginRequest, LoginResponse};
pub use client::BinaryClient;
pub use errors::WireError;
pub use frame::{Frame, FrameCodec, FrameHeader};
pub use protocol::{Command, PtzDirection, DEFAULT_MAGIC, HEADER_LEN};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_imports() {
        let _ = HEADER_LEN;
        let _ = Command::Login;
        let codec = FrameCodec::default();
        assert_eq!(codec.magic(), DEFAULT_MAGIC);
    }

    #[test]
    fn test_command_catalog() {
        let cmd = Command::ListRecordings;
        assert_eq!(cmd.id(), 1440);
        assert_eq!(cmd.name(), "OPFileQuery");
        assert_eq!(Command::from_id(1000), Some(Command::Login));
    }
}
