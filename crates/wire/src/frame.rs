//! Frame codec

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_json::Value;

use crate::errors::WireError;
use crate::protocol::{DEFAULT_MAGIC, DEFAULT_MAX_PAYLOAD, HEADER_LEN};

/// Parsed 16-byte header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub command_id: u32,
    pub payload_len: usize,
    pub reserved: u32,
}

/// A decoded frame. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    command_id: u32,
    payload: Value,
}

impl Frame {
    pub(crate) fn new(command_id: u32, payload: Value) -> Self {
        Self { command_id, payload }
    }

    pub fn command_id(&self) -> u32 {
        self.command_id
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }
}

/// Encoder/decoder bound to one magic constant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    magic: u32,
    max_payload: usize,
}

impl FrameCodec {
    pub fn new(magic: u32, max_payload: usize) -> Self {
        Self { magic, max_payload }
    }

    pub fn magic(&self) -> u32 {
        self.magic
    }

    /// Serialize `payload` to JSON and prepend the header
    pub fn encode<T: Serialize + ?Sized>(&self, command_id: u32, payload: &T) -> Result<Bytes, WireError> {
        let body = serde_json::to_vec(payload)?;
        if body.len() > self.max_payload || body.len() > u32::MAX as usize {
            return Err(WireError::FrameMalformed(format!(
                "payload of {} bytes exceeds limit {}",
                body.len(),
                self.max_payload
            )));
        }

        let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
        buf.put_u32(self.magic);
        buf.put_u32_le(command_id);
        buf.put_u32_le(body.len() as u32);
        buf.put_u32_le(0);
        buf.put_slice(&body);
        Ok(buf.freeze())
    }

    /// Validate and parse the fixed header
    pub fn parse_header(&self, buf: &[u8]) -> Result<FrameHeader, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::FrameMalformed(format!(
                "need {} header bytes, got {}",
                HEADER_LEN,
                buf.len()
            )));
        }

        let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != self.magic {
            return Err(WireError::FrameMalformed(format!(
                "bad magic {:#010x}, expected {:#010x}",
                magic, self.magic
            )));
        }

        let command_id = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let payload_len = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;
        let reserved = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);

        if payload_len > self.max_payload {
            return Err(WireError::FrameMalformed(format!(
                "declared length {} exceeds limit {}",
                payload_len, self.max_payload
            )));
        }

        Ok(FrameHeader {
            command_id,
            payload_len,
            reserved,
        })
    }

    /// Decode a complete frame. Trailing bytes past the declared length are ignored.
    pub fn decode_frame(&self, buf: &[u8]) -> Result<Frame, WireError> {
        let header = self.parse_header(buf)?;
        let available = buf.len() - HEADER_LEN;
        if header.payload_len > available {
            return Err(WireError::FrameMalformed(format!(
                "declared length {} but only {} bytes available",
                header.payload_len, available
            )));
        }

        let body = &buf[HEADER_LEN..HEADER_LEN + header.payload_len];
        let payload = parse_payload(body)?;
        Ok(Frame::new(header.command_id, payload))
    }

    /// Decode a frame and return only its payload
    pub fn decode(&self, buf: &[u8]) -> Result<Value, WireError> {
        self.decode_frame(buf).map(Frame::into_payload)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAGIC, DEFAULT_MAX_PAYLOAD)
    }
}

/// Parse a payload body. Devices pad bodies with NULs, which are stripped.
pub fn parse_payload(body: &[u8]) -> Result<Value, WireError> {
    let end = body
        .iter()
        .rposition(|b| *b != 0 && !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(0);
    let trimmed = &body[..end];

    let text = std::str::from_utf8(trimmed)
        .map_err(|e| WireError::PayloadInvalid(format!("not UTF-8: {}", e)))?;
    serde_json::from_str(text).map_err(|e| WireError::PayloadInvalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip() {
        let codec = FrameCodec::default();
        let payloads = [
            json!({}),
            json!({"Name": "KeepAlive", "SessionID": "0x0000000B"}),
            json!({"Name": "OPFileQuery", "OPFileQuery": {"Channel": 0, "BeginTime": "2024-01-01 00:00:00", "Event": "*"}}),
            json!({"unicode": "カメラ", "nested": [1, 2.5, null, true]}),
        ];

        for (i, payload) in payloads.iter().enumerate() {
            let bytes = codec.encode(1000 + i as u32, payload).unwrap();
            assert_eq!(&codec.decode(&bytes).unwrap(), payload);

            let frame = codec.decode_frame(&bytes).unwrap();
            assert_eq!(frame.command_id(), 1000 + i as u32);
        }
    }

    #[test]
    fn test_header_layout() {
        let codec = FrameCodec::new(0xAABB_CCDD, 1024);
        let bytes = codec.encode(0x0102_0304, &json!({"a": 1})).unwrap();

        assert_eq!(&bytes[0..4], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(&bytes[4..8], &[0x04, 0x03, 0x02, 0x01]);
        let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        assert_eq!(len, bytes.len() - HEADER_LEN);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 0]);
        assert_eq!(&bytes[16..], br#"{"a":1}"#);
    }

    #[test]
    fn test_short_buffers_are_malformed() {
        let codec = FrameCodec::default();
        let full = codec.encode(1000, &json!({"x": 1})).unwrap();
        for len in 0..HEADER_LEN {
            match codec.decode(&full[..len]) {
                Err(WireError::FrameMalformed(_)) => {}
                other => panic!("len {}: expected FrameMalformed, got {:?}", len, other),
            }
        }
    }

    #[test]
    fn test_magic_mismatch() {
        let bytes = FrameCodec::new(0x1111_1111, 1024).encode(1, &json!({})).unwrap();
        let err = FrameCodec::new(0x2222_2222, 1024).decode(&bytes).unwrap_err();
        assert!(matches!(err, WireError::FrameMalformed(_)));
    }

    #[test]
    fn test_truncated_payload() {
        let codec = FrameCodec::default();
        let bytes = codec.encode(1000, &json!({"UserName": "admin"})).unwrap();
        let err = codec.decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, WireError::FrameMalformed(_)));
    }

    #[test]
    fn test_oversized_declared_length() {
        let codec = FrameCodec::new(DEFAULT_MAGIC, 8);
        let mut buf = Vec::new();
        buf.extend_from_slice(&DEFAULT_MAGIC.to_be_bytes());
        buf.extend_from_slice(&1000u32.to_le_bytes());
        buf.extend_from_slice(&64u32.to_le_bytes());
        buf.extend_from_slice(&[0; 4]);
        buf.extend_from_slice(&[b' '; 64]);
        assert!(matches!(codec.parse_header(&buf), Err(WireError::FrameMalformed(_))));
    }

    #[test]
    fn test_invalid_json_payload() {
        let codec = FrameCodec::default();
        let mut buf = Vec::new();
        buf.extend_from_slice(&DEFAULT_MAGIC.to_be_bytes());
        buf.extend_from_slice(&1000u32.to_le_bytes());
        buf.extend_from_slice(&5u32.to_le_bytes());
        buf.extend_from_slice(&[0; 4]);
        buf.extend_from_slice(b"{oops");
        assert!(matches!(codec.decode(&buf), Err(WireError::PayloadInvalid(_))));
    }

    #[test]
    fn test_nul_padding_is_stripped() {
        let value = parse_payload(b"{\"Ret\":100}\n\0\0").unwrap();
        assert_eq!(value, json!({"Ret": 100}));
    }
}
