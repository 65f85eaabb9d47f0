#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use camscout_wire::{login_digest, Command, Frame, FrameCodec, HEADER_LEN};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const SESSION_TOKEN: &str = "0x00000042";
pub const STREAM_URI: &str = "rtsp://127.0.0.1:554/live/prof0";

pub struct BinaryFake {
    pub addr: SocketAddr,
    pub accepted: Arc<AtomicUsize>,
}

impl BinaryFake {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

async fn read_frame(sock: &mut TcpStream, codec: &FrameCodec) -> Option<Frame> {
    let mut header = [0u8; HEADER_LEN];
    sock.read_exact(&mut header).await.ok()?;
    let h = codec.parse_header(&header).ok()?;
    let mut body = vec![0u8; h.payload_len];
    sock.read_exact(&mut body).await.ok()?;
    let mut all = header.to_vec();
    all.extend_from_slice(&body);
    codec.decode_frame(&all).ok()
}

/// Vendor binary device accepting `admin` with `password`. With
/// `drop_first_session` the first connection is closed right after a
/// successful login.
pub async fn spawn_binary_fake(password: &'static str, drop_first_session: bool) -> BinaryFake {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let count = accepted.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            let index = count.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let codec = FrameCodec::default();
                while let Some(frame) = read_frame(&mut sock, &codec).await {
                    let is_login = frame.command_id() == Command::Login.id();
                    let accepted_login = is_login
                        && frame.payload()["UserName"] == "admin"
                        && frame.payload()["PassWord"] == login_digest(password).as_str();

                    let reply = if is_login && accepted_login {
                        json!({"Ret": 100, "SessionID": SESSION_TOKEN, "AliveInterval": 20})
                    } else if is_login {
                        json!({"Ret": 203, "SessionID": "0x0"})
                    } else {
                        json!({"Ret": 100, "SessionID": SESSION_TOKEN})
                    };
                    let out = codec.encode(frame.command_id() + 1, &reply).unwrap();
                    if sock.write_all(&out).await.is_err() {
                        break;
                    }
                    if accepted_login && drop_first_session && index == 0 {
                        break;
                    }
                }
            });
        }
    });

    BinaryFake { addr, accepted }
}

fn wrap(body: &str) -> String {
    format!(
        r#"<?xml version="1.0"?><env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope"><env:Body>{}</env:Body></env:Envelope>"#,
        body
    )
}

async fn onvif(State(base): State<String>, body: String) -> (StatusCode, String) {
    if body.contains("GetSystemDateAndTime") {
        return (
            StatusCode::OK,
            wrap("<tds:GetSystemDateAndTimeResponse><tds:SystemDateAndTime/></tds:GetSystemDateAndTimeResponse>"),
        );
    }

    let authorized =
        body.contains("<wsse:Username>admin</wsse:Username>") && body.contains(">secret</wsse:Password>");
    if !authorized {
        return (StatusCode::UNAUTHORIZED, String::new());
    }

    let reply = if body.contains("GetCapabilities") {
        format!(
            "<tds:GetCapabilitiesResponse><tds:Capabilities>\
             <tt:Device><tt:XAddr>{0}/onvif/device_service</tt:XAddr></tt:Device>\
             <tt:Media><tt:XAddr>{0}/onvif/media_service</tt:XAddr></tt:Media>\
             </tds:Capabilities></tds:GetCapabilitiesResponse>",
            base
        )
    } else if body.contains("GetProfiles") {
        r#"<trt:GetProfilesResponse><trt:Profiles token="prof0"><tt:Name>main</tt:Name></trt:Profiles></trt:GetProfilesResponse>"#
            .to_string()
    } else if body.contains("GetStreamUri") {
        format!(
            "<trt:GetStreamUriResponse><trt:MediaUri><tt:Uri>{}</tt:Uri></trt:MediaUri></trt:GetStreamUriResponse>",
            STREAM_URI
        )
    } else {
        return (StatusCode::BAD_REQUEST, String::new());
    };

    (StatusCode::OK, wrap(&reply))
}

/// Standards-based device accepting `admin`/`secret`
pub async fn spawn_onvif_fake() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/onvif/device_service", post(onvif))
        .route("/onvif/media_service", post(onvif))
        .with_state(format!("http://{}", addr));

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// A port with nothing listening
pub fn closed_port() -> u16 {
    let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    l.local_addr().unwrap().port()
}
