//! SOAP 1.2 envelopes for the ONVIF calls we make

use camscout_core::Credential;
use chrono::{SecondsFormat, Utc};
use quick_xml::escape::escape;

pub const DEVICE_WSDL: &str = "http://www.onvif.org/ver10/device/wsdl";
pub const MEDIA_WSDL: &str = "http://www.onvif.org/ver10/media/wsdl";
pub const PTZ_WSDL: &str = "http://www.onvif.org/ver20/ptz/wsdl";

const PASSWORD_TEXT: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordText";

/// `SOAPAction` for an operation in a service namespace
pub fn action(service: &str, operation: &str) -> String {
    format!("{}/{}", service, operation)
}

/// WS-Security `UsernameToken` header
pub fn security_header(credential: &Credential) -> String {
    format!(
        concat!(
            r#"<wsse:Security s:mustUnderstand="1" "#,
            r#"xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd" "#,
            r#"xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">"#,
            "<wsse:UsernameToken>",
            "<wsse:Username>{}</wsse:Username>",
            r#"<wsse:Password Type="{}">{}</wsse:Password>"#,
            "<wsu:Created>{}</wsu:Created>",
            "</wsse:UsernameToken></wsse:Security>"
        ),
        escape(credential.username.as_str()),
        PASSWORD_TEXT,
        escape(credential.secret.as_str()),
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

pub fn envelope(credential: Option<&Credential>, body: &str) -> String {
    let header = credential.map(security_header).unwrap_or_default();
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" "#,
            r#"xmlns:tds="{}" xmlns:trt="{}" xmlns:tptz="{}" xmlns:tt="http://www.onvif.org/ver10/schema">"#,
            "<s:Header>{}</s:Header><s:Body>{}</s:Body></s:Envelope>"
        ),
        DEVICE_WSDL, MEDIA_WSDL, PTZ_WSDL, header, body
    )
}

pub fn get_system_date_and_time() -> &'static str {
    "<tds:GetSystemDateAndTime/>"
}

pub fn get_capabilities() -> &'static str {
    "<tds:GetCapabilities><tds:Category>All</tds:Category></tds:GetCapabilities>"
}

pub fn get_profiles() -> &'static str {
    "<trt:GetProfiles/>"
}

pub fn get_stream_uri(profile_token: &str) -> String {
    format!(
        concat!(
            "<trt:GetStreamUri><trt:StreamSetup>",
            "<tt:Stream>RTP-Unicast</tt:Stream>",
            "<tt:Transport><tt:Protocol>RTSP</tt:Protocol></tt:Transport>",
            "</trt:StreamSetup><trt:ProfileToken>{}</trt:ProfileToken></trt:GetStreamUri>"
        ),
        escape(profile_token)
    )
}

/// Velocities are clamped to the normalized [-1, 1] space
pub fn continuous_move(profile_token: &str, pan: f32, tilt: f32, zoom: f32) -> String {
    format!(
        concat!(
            "<tptz:ContinuousMove><tptz:ProfileToken>{}</tptz:ProfileToken><tptz:Velocity>",
            r#"<tt:PanTilt x="{:.2}" y="{:.2}"/><tt:Zoom x="{:.2}"/>"#,
            "</tptz:Velocity></tptz:ContinuousMove>"
        ),
        escape(profile_token),
        pan.clamp(-1.0, 1.0),
        tilt.clamp(-1.0, 1.0),
        zoom.clamp(-1.0, 1.0),
    )
}

pub fn stop(profile_token: &str) -> String {
    format!(
        concat!(
            "<tptz:Stop><tptz:ProfileToken>{}</tptz:ProfileToken>",
            "<tptz:PanTilt>true</tptz:PanTilt><tptz:Zoom>true</tptz:Zoom></tptz:Stop>"
        ),
        escape(profile_token)
    )
}
