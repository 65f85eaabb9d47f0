//! Login handshake
//!
//! The device never sees the plaintext secret: the client sends the
//! lower-case hex MD5 digest of it in the `PassWord` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::WireError;
use crate::protocol::{SESSION_FIELD, STATUS_FIELD};

/// 32-character lower-case hex MD5 digest of `secret`
pub fn login_digest(secret: &str) -> String {
    format!("{:x}", md5::compute(secret.as_bytes()))
}

/// Login request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(rename = "EncryptType")]
    pub encrypt_type: String,
    #[serde(rename = "LoginType")]
    pub login_type: String,
    #[serde(rename = "PassWord")]
    pub password: String,
    #[serde(rename = "UserName")]
    pub username: String,
}

impl LoginRequest {
    pub fn new(username: &str, secret: &str, login_type: &str) -> Self {
        Self {
            encrypt_type: "MD5".to_string(),
            login_type: login_type.to_string(),
            password: login_digest(secret),
            username: username.to_string(),
        }
    }
}

/// Interesting parts of a login reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResponse {
    pub status: i64,
    pub session_token: String,
    /// Keep-alive period the device asked for, if any
    pub alive_interval_secs: Option<u64>,
    pub device_type: Option<String>,
}

/// Numeric status of a reply, accepting numbers or numeric strings
pub fn reply_status(payload: &Value) -> Option<i64> {
    match payload.get(STATUS_FIELD)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Session token of a reply. Some firmwares send it as a number.
pub fn reply_session(payload: &Value) -> Option<String> {
    match payload.get(SESSION_FIELD)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl LoginResponse {
    /// Interpret a login reply against the configured success sentinel
    pub fn from_payload(payload: &Value, success_code: i64) -> Result<Self, WireError> {
        let status = reply_status(payload)
            .ok_or_else(|| WireError::PayloadInvalid(format!("login reply has no {} field", STATUS_FIELD)))?;

        if status != success_code {
            return Err(WireError::AuthenticationFailed { code: status });
        }

        let session_token = reply_session(payload)
            .ok_or_else(|| WireError::PayloadInvalid(format!("login reply has no {} field", SESSION_FIELD)))?;

        Ok(Self {
            status,
            session_token,
            alive_interval_secs: payload.get("AliveInterval").and_then(Value::as_u64),
            // Some firmwares send this key with a trailing space
            device_type: payload
                .get("DeviceType ")
                .or_else(|| payload.get("DeviceType"))
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_digest_known_vectors() {
        assert_eq!(login_digest("admin"), "21232f297a57a5a743894a0e4a801fc3");
        assert_eq!(login_digest(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(login_digest("admin"), login_digest("admin"));
    }

    #[test]
    fn test_login_request_shape() {
        let req = LoginRequest::new("admin", "admin", "DVRIP-Web");
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "EncryptType": "MD5",
                "LoginType": "DVRIP-Web",
                "PassWord": "21232f297a57a5a743894a0e4a801fc3",
                "UserName": "admin"
            })
        );
        assert_eq!(req.password.len(), 32);
    }

    #[test]
    fn test_login_success() {
        let reply = json!({"Ret": 100, "SessionID": "0x0000000B", "AliveInterval": 21});
        let login = LoginResponse::from_payload(&reply, 100).unwrap();
        assert_eq!(login.session_token, "0x0000000B");
        assert_eq!(login.alive_interval_secs, Some(21));
    }

    #[test]
    fn test_login_rejected() {
        let reply = json!({"Ret": 203, "SessionID": "0x0"});
        match LoginResponse::from_payload(&reply, 100) {
            Err(WireError::AuthenticationFailed { code }) => assert_eq!(code, 203),
            other => panic!("expected AuthenticationFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_string_status_and_numeric_token() {
        let reply = json!({"Ret": "100", "SessionID": 17});
        let login = LoginResponse::from_payload(&reply, 100).unwrap();
        assert_eq!(login.session_token, "17");
    }
}
