use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use camscout_core::{CameraHandle, Credential, MediaEndpoint, ProtocolType};
use camscout_device_onvif::{OnvifController, OnvifError};

fn wrap(body: &str) -> String {
    format!(
        r#"<?xml version="1.0"?><env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope"><env:Body>{}</env:Body></env:Envelope>"#,
        body
    )
}

const NOT_AUTHORIZED: &str = r#"<env:Fault><env:Code><env:Value>env:Sender</env:Value><env:Subcode><env:Value>ter:NotAuthorized</env:Value></env:Subcode></env:Code><env:Reason><env:Text>Sender not Authorized</env:Text></env:Reason></env:Fault>"#;

/// Minimal ONVIF device answering by operation name. Only `admin`/`secret`
/// is accepted on authenticated calls.
async fn onvif(State(base): State<String>, body: String) -> (StatusCode, String) {
    let authorized = body.contains("<wsse:Username>admin</wsse:Username>") && body.contains(">secret</wsse:Password>");

    if body.contains("GetSystemDateAndTime") {
        return (
            StatusCode::OK,
            wrap("<tds:GetSystemDateAndTimeResponse><tds:SystemDateAndTime/></tds:GetSystemDateAndTimeResponse>"),
        );
    }
    if !authorized {
        return (StatusCode::BAD_REQUEST, wrap(NOT_AUTHORIZED));
    }

    let reply = if body.contains("GetCapabilities") {
        format!(
            "<tds:GetCapabilitiesResponse><tds:Capabilities>\
             <tt:Device><tt:XAddr>{0}/onvif/device_service</tt:XAddr></tt:Device>\
             <tt:Media><tt:XAddr>{0}/onvif/media_service</tt:XAddr></tt:Media>\
             <tt:PTZ><tt:XAddr>{0}/onvif/ptz_service</tt:XAddr></tt:PTZ>\
             </tds:Capabilities></tds:GetCapabilitiesResponse>",
            base
        )
    } else if body.contains("GetProfiles") {
        r#"<trt:GetProfilesResponse><trt:Profiles token="prof0"><tt:Name>main</tt:Name></trt:Profiles></trt:GetProfilesResponse>"#
            .to_string()
    } else if body.contains("GetStreamUri") {
        "<trt:GetStreamUriResponse><trt:MediaUri><tt:Uri>rtsp://127.0.0.1:554/live/prof0</tt:Uri></trt:MediaUri></trt:GetStreamUriResponse>"
            .to_string()
    } else if body.contains("ContinuousMove") {
        "<tptz:ContinuousMoveResponse/>".to_string()
    } else if body.contains("Stop") {
        "<tptz:StopResponse/>".to_string()
    } else {
        return (StatusCode::BAD_REQUEST, wrap("<env:Fault><env:Reason><env:Text>unknown action</env:Text></env:Reason></env:Fault>"));
    };

    (StatusCode::OK, wrap(&reply))
}

async fn spawn_fake() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/onvif/device_service", post(onvif))
        .route("/onvif/media_service", post(onvif))
        .route("/onvif/ptz_service", post(onvif))
        .with_state(format!("http://{}", addr));

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_connect_and_resolve_stream() {
    let addr = spawn_fake().await;
    let controller = OnvifController::connect(addr, Credential::new("admin", "secret"), Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(controller.protocol(), ProtocolType::Standards);
    let caps = controller.capabilities().unwrap();
    assert!(caps.media.unwrap().ends_with("/onvif/media_service"));

    assert_eq!(
        controller.media_endpoint().await,
        Some(MediaEndpoint::Rtsp {
            url: "rtsp://127.0.0.1:554/live/prof0".to_string()
        })
    );

    controller.ptz_continuous_move("prof0", 0.5, 0.0, 0.0).await.unwrap();
    controller.ptz_stop("prof0").await.unwrap();
    assert!(controller.is_alive().await);
}

#[tokio::test]
async fn test_wrong_password_is_unauthorized() {
    let addr = spawn_fake().await;
    let err = OnvifController::connect(addr, Credential::new("admin", "nope"), Duration::from_secs(2))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, OnvifError::Unauthorized));
    assert_eq!(err.category(), camscout_core::ErrorCategory::Authentication);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let addr = spawn_fake().await;
    let controller = OnvifController::connect(addr, Credential::new("admin", "secret"), Duration::from_secs(2))
        .await
        .unwrap();

    controller.close().await;
    controller.close().await;
    assert!(!controller.is_alive().await);
    assert!(matches!(controller.get_profiles().await, Err(OnvifError::Closed)));
}

#[tokio::test]
async fn test_nothing_listening_is_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = OnvifController::connect(addr, Credential::new("admin", "secret"), Duration::from_millis(500))
        .await
        .err()
        .unwrap();
    assert_eq!(err.category(), camscout_core::ErrorCategory::Network);
}
