use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use camscout_core::{CameraHandle, Credential, MediaEndpoint, ProtocolType};
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use crate::errors::OnvifError;
use crate::models::{parse_profiles, parse_stream_uri, Capabilities, MediaProfile};
use crate::soap;
use crate::xml::{parse_fault, Document};

/// Standards-based (ONVIF) device controller
///
/// Talks SOAP 1.2 over HTTP to the device service at
/// `http://{endpoint}/onvif/device_service`. Media and PTZ calls go to the
/// service addresses the device reports in `GetCapabilities`.
pub struct OnvifController {
    endpoint: SocketAddr,
    device_url: String,
    client: Client,
    credential: Option<Credential>,
    capabilities: Mutex<Option<Capabilities>>,
    closed: AtomicBool,
}

impl OnvifController {
    pub fn new(endpoint: SocketAddr, credential: Option<Credential>, timeout: Duration) -> Result<Self, OnvifError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            endpoint,
            device_url: format!("http://{}/onvif/device_service", endpoint),
            client,
            credential,
            capabilities: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Build a controller and prove the credentials with an authenticated
    /// `GetCapabilities` call
    pub async fn connect(endpoint: SocketAddr, credential: Credential, timeout: Duration) -> Result<Self, OnvifError> {
        let controller = Self::new(endpoint, Some(credential), timeout)?;
        let caps = controller.get_capabilities().await?;
        info!(
            endpoint = %endpoint,
            media = caps.media.is_some(),
            ptz = caps.ptz.is_some(),
            "ONVIF session established"
        );
        Ok(controller)
    }

    pub fn device_url(&self) -> &str {
        &self.device_url
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn capabilities(&self) -> Option<Capabilities> {
        self.capabilities
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// POST one SOAP request and return the parsed response document
    async fn call(&self, url: &str, service: &str, operation: &str, body: &str) -> Result<Document, OnvifError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(OnvifError::Closed);
        }

        let envelope = soap::envelope(self.credential.as_ref(), body);
        let content_type = format!(
            "application/soap+xml; charset=utf-8; action=\"{}\"",
            soap::action(service, operation)
        );
        debug!(url, operation, "ONVIF call");

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(envelope)
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(OnvifError::Unauthorized);
        }

        let text = response.text().await.map_err(map_transport)?;
        let doc = match Document::parse(&text) {
            Ok(doc) => doc,
            Err(_) if !status.is_success() => return Err(OnvifError::Status(status.as_u16())),
            Err(e) => return Err(e),
        };

        if let Some((reason, codes)) = parse_fault(&doc) {
            if codes.iter().any(|c| c.ends_with("NotAuthorized")) {
                return Err(OnvifError::Unauthorized);
            }
            warn!(url, operation, %reason, "ONVIF fault");
            return Err(OnvifError::Fault(reason));
        }

        if !status.is_success() {
            return Err(OnvifError::Status(status.as_u16()));
        }
        Ok(doc)
    }

    fn media_url(&self) -> String {
        self.capabilities()
            .and_then(|c| c.media)
            .unwrap_or_else(|| self.device_url.clone())
    }

    fn ptz_url(&self) -> String {
        self.capabilities()
            .and_then(|c| c.ptz)
            .unwrap_or_else(|| self.device_url.clone())
    }

    /// Unauthenticated on most firmwares; used as the cheap liveness probe
    pub async fn get_system_date_and_time(&self) -> Result<(), OnvifError> {
        let doc = self
            .call(
                &self.device_url,
                soap::DEVICE_WSDL,
                "GetSystemDateAndTime",
                soap::get_system_date_and_time(),
            )
            .await?;
        if doc.contains("GetSystemDateAndTimeResponse") {
            Ok(())
        } else {
            Err(OnvifError::MissingField("GetSystemDateAndTimeResponse"))
        }
    }

    pub async fn get_capabilities(&self) -> Result<Capabilities, OnvifError> {
        let doc = self
            .call(&self.device_url, soap::DEVICE_WSDL, "GetCapabilities", soap::get_capabilities())
            .await?;
        let caps = Capabilities::from_document(&doc)?;
        *self
            .capabilities
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(caps.clone());
        Ok(caps)
    }

    pub async fn get_profiles(&self) -> Result<Vec<MediaProfile>, OnvifError> {
        let doc = self
            .call(&self.media_url(), soap::MEDIA_WSDL, "GetProfiles", soap::get_profiles())
            .await?;
        parse_profiles(&doc)
    }

    pub async fn get_stream_uri(&self, profile_token: &str) -> Result<String, OnvifError> {
        let doc = self
            .call(
                &self.media_url(),
                soap::MEDIA_WSDL,
                "GetStreamUri",
                &soap::get_stream_uri(profile_token),
            )
            .await?;
        parse_stream_uri(&doc)
    }

    /// Normalized velocities in [-1, 1]
    pub async fn ptz_continuous_move(&self, profile_token: &str, pan: f32, tilt: f32, zoom: f32) -> Result<(), OnvifError> {
        self.call(
            &self.ptz_url(),
            soap::PTZ_WSDL,
            "ContinuousMove",
            &soap::continuous_move(profile_token, pan, tilt, zoom),
        )
        .await
        .map(|_| ())
    }

    pub async fn ptz_stop(&self, profile_token: &str) -> Result<(), OnvifError> {
        self.call(&self.ptz_url(), soap::PTZ_WSDL, "Stop", &soap::stop(profile_token))
            .await
            .map(|_| ())
    }
}

fn map_transport(e: reqwest::Error) -> OnvifError {
    if e.is_timeout() {
        OnvifError::Timeout
    } else {
        OnvifError::Http(e)
    }
}

#[async_trait]
impl CameraHandle for OnvifController {
    fn protocol(&self) -> ProtocolType {
        ProtocolType::Standards
    }

    fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// First profile's RTSP URI
    async fn media_endpoint(&self) -> Option<MediaEndpoint> {
        let profiles = match self.get_profiles().await {
            Ok(p) => p,
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "GetProfiles failed");
                return None;
            }
        };
        let profile = profiles.first()?;
        match self.get_stream_uri(&profile.token).await {
            Ok(url) => Some(MediaEndpoint::Rtsp { url }),
            Err(e) => {
                warn!(endpoint = %self.endpoint, profile = %profile.token, error = %e, "GetStreamUri failed");
                None
            }
        }
    }

    async fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.get_system_date_and_time().await.is_ok()
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(endpoint = %self.endpoint, "ONVIF controller closed");
        }
    }
}
