//! Async TCP client for the vendor binary protocol

use std::net::SocketAddr;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use camscout_core::{CameraHandle, MediaEndpoint, ProtocolType, WireConfig};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::auth::{reply_status, LoginRequest, LoginResponse};
use crate::errors::WireError;
use crate::frame::{parse_payload, Frame, FrameCodec};
use crate::protocol::{Command, PtzDirection, HEADER_LEN, SESSION_FIELD};

/// One TCP connection to a camera. Requests are serialized; each request
/// reads exactly one reply frame.
pub struct BinaryClient {
    peer: SocketAddr,
    codec: FrameCodec,
    io_timeout: Duration,
    login_type: String,
    success_code: i64,
    stream: Mutex<Option<TcpStream>>,
    session: StdMutex<Option<String>>,
}

impl BinaryClient {
    /// Open the TCP connection. No bytes are exchanged until `login`.
    pub async fn connect(
        peer: SocketAddr,
        config: &WireConfig,
        connect_timeout: Duration,
    ) -> Result<Self, WireError> {
        debug!(%peer, "Connecting vendor binary client");

        let stream = match timeout(connect_timeout, TcpStream::connect(peer)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(WireError::Io(e)),
            Err(_) => return Err(WireError::Timeout),
        };
        stream.set_nodelay(true).ok();

        Ok(Self {
            peer,
            codec: FrameCodec::new(config.magic, config.max_payload_bytes),
            io_timeout: Duration::from_millis(config.io_timeout_ms),
            login_type: config.login_type.clone(),
            success_code: config.success_code,
            stream: Mutex::new(Some(stream)),
            session: StdMutex::new(None),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    /// Current session token, if logged in
    pub fn session_token(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_session(&self, token: Option<String>) {
        *self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
    }

    /// Whether the socket is still held
    pub async fn is_open(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    /// Authenticate. A rejected login is returned as `AuthenticationFailed`
    /// and is never retried here.
    pub async fn login(&self, username: &str, secret: &str) -> Result<LoginResponse, WireError> {
        let request = LoginRequest::new(username, secret, &self.login_type);
        let body = serde_json::to_value(&request)?;

        let frame = self.exchange(Command::Login.id(), &body).await?;
        let login = LoginResponse::from_payload(frame.payload(), self.success_code)?;

        info!(peer = %self.peer, user = %username, "Vendor binary login succeeded");
        self.set_session(Some(login.session_token.clone()));
        Ok(login)
    }

    /// Send one command with the session token attached and return the reply
    /// payload. Non-success statuses become `CommandFailed`.
    pub async fn request(&self, command: Command, body: Value) -> Result<Value, WireError> {
        let token = self.session_token().ok_or(WireError::NotLoggedIn)?;

        let mut payload = Map::new();
        payload.insert("Name".to_string(), Value::String(command.name().to_string()));
        payload.insert(SESSION_FIELD.to_string(), Value::String(token));
        if !body.is_null() {
            payload.insert(command.name().to_string(), body);
        }

        let frame = self.exchange(command.id(), &Value::Object(payload)).await?;
        let reply = frame.into_payload();

        match reply_status(&reply) {
            Some(code) if code != self.success_code => Err(WireError::CommandFailed {
                command: command.name(),
                code,
            }),
            _ => Ok(reply),
        }
    }

    pub async fn keep_alive(&self) -> Result<(), WireError> {
        self.request(Command::KeepAlive, Value::Null).await.map(|_| ())
    }

    pub async fn system_info(&self) -> Result<Value, WireError> {
        self.request(Command::SystemInfo, Value::Null).await
    }

    /// Recordings on `channel` between two `YYYY-MM-DD hh:mm:ss` timestamps
    pub async fn list_recordings(&self, channel: u32, begin: &str, end: &str) -> Result<Vec<Value>, WireError> {
        let reply = self
            .request(
                Command::ListRecordings,
                json!({
                    "BeginTime": begin,
                    "EndTime": end,
                    "Channel": channel,
                    "DriverTypeMask": "0x0000FFFF",
                    "Event": "*",
                    "Type": "h264",
                }),
            )
            .await?;

        Ok(reply
            .get(Command::ListRecordings.name())
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn start_playback(&self, channel: u32, file_name: &str) -> Result<Value, WireError> {
        self.request(
            Command::StartPlayback,
            json!({
                "Action": "Claim",
                "Channel": channel,
                "Parameter": {
                    "FileName": file_name,
                    "PlayMode": "ByName",
                    "TransMode": "TCP",
                    "Value": 0,
                },
            }),
        )
        .await
    }

    pub async fn ptz(&self, channel: u32, direction: PtzDirection, speed: u8) -> Result<(), WireError> {
        self.request(
            Command::PtzControl,
            json!({
                "Command": direction.command(),
                "Parameter": {
                    "Channel": channel,
                    "Step": speed.clamp(1, 8),
                    "Preset": -1,
                },
            }),
        )
        .await
        .map(|_| ())
    }

    /// Best-effort logout followed by close
    pub async fn logout(&self) -> Result<(), WireError> {
        let result = self.request(Command::Logout, Value::Null).await.map(|_| ());
        self.close().await;
        result
    }

    /// Drop the socket and forget the session. Idempotent.
    pub async fn close(&self) {
        let mut stream = self.stream.lock().await;
        if let Some(mut s) = stream.take() {
            s.shutdown().await.ok();
            debug!(peer = %self.peer, "Vendor binary client closed");
        }
        self.set_session(None);
    }

    /// Write one frame and read one reply frame
    async fn exchange(&self, command_id: u32, payload: &Value) -> Result<Frame, WireError> {
        let bytes = self.codec.encode(command_id, payload)?;

        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(WireError::Closed)?;

        let result = self.exchange_on(stream, &bytes).await;
        if let Err(e) = &result {
            match e {
                // Stream framing is intact; keep the socket
                WireError::PayloadInvalid(_) => {
                    warn!(peer = %self.peer, error = %e, "Dropping reply with invalid payload");
                }
                _ => {
                    warn!(peer = %self.peer, error = %e, "Vendor binary exchange failed, closing socket");
                    guard.take();
                    self.set_session(None);
                }
            }
        }
        result
    }

    async fn exchange_on(&self, stream: &mut TcpStream, bytes: &[u8]) -> Result<Frame, WireError> {
        match timeout(self.io_timeout, stream.write_all(bytes)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(io_error(e)),
            Err(_) => return Err(WireError::Timeout),
        }

        let mut header = [0u8; HEADER_LEN];
        match timeout(self.io_timeout, stream.read_exact(&mut header)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(io_error(e)),
            Err(_) => return Err(WireError::Timeout),
        }
        let parsed = self.codec.parse_header(&header)?;

        let mut body = vec![0u8; parsed.payload_len];
        match timeout(self.io_timeout, stream.read_exact(&mut body)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(io_error(e)),
            Err(_) => return Err(WireError::Timeout),
        }

        let payload = parse_payload(&body)?;
        debug!(peer = %self.peer, command = parsed.command_id, len = parsed.payload_len, "Received frame");
        Ok(Frame::new(parsed.command_id, payload))
    }
}

#[async_trait]
impl CameraHandle for BinaryClient {
    fn protocol(&self) -> ProtocolType {
        ProtocolType::Proprietary
    }

    fn endpoint(&self) -> SocketAddr {
        self.peer
    }

    /// Media rides the binary session itself; channel 0 is the main stream
    async fn media_endpoint(&self) -> Option<MediaEndpoint> {
        if self.session_token().is_none() {
            return None;
        }
        Some(MediaEndpoint::Binary {
            host: self.peer.ip(),
            port: self.peer.port(),
            channel: 0,
        })
    }

    async fn is_alive(&self) -> bool {
        self.keep_alive().await.is_ok()
    }

    async fn close(&self) {
        BinaryClient::close(self).await
    }
}

fn io_error(e: std::io::Error) -> WireError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        WireError::Closed
    } else {
        WireError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn read_frame(sock: &mut TcpStream, codec: &FrameCodec) -> Frame {
        let mut header = [0u8; HEADER_LEN];
        sock.read_exact(&mut header).await.unwrap();
        let h = codec.parse_header(&header).unwrap();
        let mut body = vec![0u8; h.payload_len];
        sock.read_exact(&mut body).await.unwrap();
        let mut all = header.to_vec();
        all.extend_from_slice(&body);
        codec.decode_frame(&all).unwrap()
    }

    /// Accepts one connection, answers login then echoes a success for
    /// everything else, recording the requests it saw.
    async fn spawn_fake(success: bool) -> (SocketAddr, tokio::task::JoinHandle<Vec<Frame>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let codec = FrameCodec::default();
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            loop {
                let mut header = [0u8; HEADER_LEN];
                if sock.read_exact(&mut header).await.is_err() {
                    break;
                }
                let h = codec.parse_header(&header).unwrap();
                let mut body = vec![0u8; h.payload_len];
                sock.read_exact(&mut body).await.unwrap();
                let mut all = header.to_vec();
                all.extend_from_slice(&body);
                let frame = codec.decode_frame(&all).unwrap();

                let reply = if frame.command_id() == Command::Login.id() {
                    if success {
                        json!({"Ret": 100, "SessionID": "0x00000042", "AliveInterval": 20})
                    } else {
                        json!({"Ret": 203, "SessionID": "0x0"})
                    }
                } else if frame.command_id() == Command::ListRecordings.id() {
                    json!({"Ret": 100, "OPFileQuery": [{"FileName": "/idea0/2024-01-01/001.h264"}]})
                } else {
                    json!({"Ret": 100})
                };
                seen.push(frame);
                let out = codec.encode(1001, &reply).unwrap();
                sock.write_all(&out).await.unwrap();
            }
            seen
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_login_then_commands_carry_token() {
        let (addr, server) = spawn_fake(true).await;
        let client = BinaryClient::connect(addr, &WireConfig::default(), Duration::from_secs(1))
            .await
            .unwrap();

        let login = client.login("admin", "admin").await.unwrap();
        assert_eq!(login.session_token, "0x00000042");
        assert_eq!(client.session_token().as_deref(), Some("0x00000042"));

        client.keep_alive().await.unwrap();
        let files = client
            .list_recordings(0, "2024-01-01 00:00:00", "2024-01-01 23:59:59")
            .await
            .unwrap();
        assert_eq!(files.len(), 1);

        client.close().await;
        client.close().await;
        assert!(!client.is_open().await);
        assert!(client.session_token().is_none());

        let seen = server.await.unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].payload()["PassWord"], "21232f297a57a5a743894a0e4a801fc3");
        for frame in &seen[1..] {
            assert_eq!(frame.payload()[SESSION_FIELD], "0x00000042");
        }
    }

    #[tokio::test]
    async fn test_rejected_login() {
        let (addr, _server) = spawn_fake(false).await;
        let client = BinaryClient::connect(addr, &WireConfig::default(), Duration::from_secs(1))
            .await
            .unwrap();

        let err = client.login("admin", "wrong").await.unwrap_err();
        assert!(matches!(err, WireError::AuthenticationFailed { code: 203 }));
        assert!(client.session_token().is_none());
    }

    #[tokio::test]
    async fn test_request_before_login() {
        let (addr, _server) = spawn_fake(true).await;
        let client = BinaryClient::connect(addr, &WireConfig::default(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(matches!(client.keep_alive().await, Err(WireError::NotLoggedIn)));
    }

    #[tokio::test]
    async fn test_peer_hangup_closes_client() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let codec = FrameCodec::default();
            let _ = read_frame(&mut sock, &codec).await;
            // hang up without replying
        });

        let client = BinaryClient::connect(addr, &WireConfig::default(), Duration::from_secs(1))
            .await
            .unwrap();
        let err = client.login("admin", "admin").await.unwrap_err();
        assert!(matches!(err, WireError::Closed | WireError::Io(_)));
        assert!(!client.is_open().await);
    }

    #[tokio::test]
    async fn test_garbage_reply_is_malformed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let codec = FrameCodec::default();
            let _ = read_frame(&mut sock, &codec).await;
            sock.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await.unwrap();
        });

        let client = BinaryClient::connect(addr, &WireConfig::default(), Duration::from_secs(1))
            .await
            .unwrap();
        let err = client.login("admin", "admin").await.unwrap_err();
        assert!(matches!(err, WireError::FrameMalformed(_)));
        assert!(!client.is_open().await);
    }
}
