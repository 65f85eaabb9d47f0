use crate::errors::OnvifError;
use crate::xml::Document;

/// Service addresses reported by `GetCapabilities`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub device: Option<String>,
    pub media: Option<String>,
    pub ptz: Option<String>,
    pub events: Option<String>,
    pub imaging: Option<String>,
}

impl Capabilities {
    /// Parse a `GetCapabilitiesResponse`. A document with no `Capabilities`
    /// element is not a capability answer.
    pub fn from_document(doc: &Document) -> Result<Self, OnvifError> {
        if !doc.contains("Capabilities") {
            return Err(OnvifError::MissingField("Capabilities"));
        }

        let mut caps = Capabilities::default();
        for idx in doc.named("XAddr") {
            let addr = doc.text(idx);
            if addr.is_empty() {
                continue;
            }
            let slot = match doc.parent_name(idx) {
                Some("Device") => &mut caps.device,
                Some("Media") => &mut caps.media,
                Some("PTZ") => &mut caps.ptz,
                Some("Events") => &mut caps.events,
                Some("Imaging") => &mut caps.imaging,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(addr.to_string());
            }
        }
        Ok(caps)
    }
}

/// A media profile (`GetProfiles`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaProfile {
    pub token: String,
    pub name: String,
    pub has_ptz: bool,
}

pub fn parse_profiles(doc: &Document) -> Result<Vec<MediaProfile>, OnvifError> {
    if !doc.contains("GetProfilesResponse") {
        return Err(OnvifError::MissingField("GetProfilesResponse"));
    }

    Ok(doc
        .named("Profiles")
        .filter_map(|idx| {
            let token = doc.attr(idx, "token")?.to_string();
            let name = doc
                .child(idx, "Name")
                .map(|n| doc.text(n).to_string())
                .unwrap_or_else(|| token.clone());
            Some(MediaProfile {
                token,
                name,
                has_ptz: doc.child(idx, "PTZConfiguration").is_some(),
            })
        })
        .collect())
}

pub fn parse_stream_uri(doc: &Document) -> Result<String, OnvifError> {
    doc.named("Uri")
        .find(|&i| doc.parent_name(i) == Some("MediaUri"))
        .map(|i| doc.text(i).to_string())
        .filter(|uri| !uri.is_empty())
        .ok_or(OnvifError::MissingField("MediaUri/Uri"))
}
