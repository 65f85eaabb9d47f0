//! WS-Discovery probe envelope and `ProbeMatches` parsing
//!
//! The UDP transport lives with the other discovery adapters; this module
//! only knows the message formats.

use reqwest::Url;
use uuid::Uuid;

use crate::errors::OnvifError;
use crate::xml::Document;

/// Multicast group and port for WS-Discovery
pub const WS_DISCOVERY_GROUP: &str = "239.255.255.250:3702";

/// Probe for network video transmitters
pub fn probe_message(message_id: Uuid) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<e:Envelope xmlns:e="http://www.w3.org/2003/05/soap-envelope" "#,
            r#"xmlns:w="http://schemas.xmlsoap.org/ws/2004/08/addressing" "#,
            r#"xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery" "#,
            r#"xmlns:dn="http://www.onvif.org/ver10/network/wsdl">"#,
            "<e:Header>",
            "<w:MessageID>uuid:{}</w:MessageID>",
            "<w:To e:mustUnderstand=\"true\">urn:schemas-xmlsoap-org:ws:2005:04:discovery</w:To>",
            "<w:Action e:mustUnderstand=\"true\">http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe</w:Action>",
            "</e:Header>",
            "<e:Body><d:Probe><d:Types>dn:NetworkVideoTransmitter</d:Types></d:Probe></e:Body>",
            "</e:Envelope>"
        ),
        message_id
    )
}

/// One `ProbeMatch` from a responder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeMatch {
    pub xaddrs: Vec<String>,
    pub types: Vec<String>,
    pub scopes: Vec<String>,
}

impl ProbeMatch {
    /// `(host, port)` of every parseable XAddr. Missing ports use the
    /// scheme default (80 for http).
    pub fn endpoints(&self) -> Vec<(String, u16)> {
        self.xaddrs.iter().filter_map(|x| xaddr_endpoint(x)).collect()
    }

    /// Value of an `onvif://www.onvif.org/<key>/<value>` scope
    pub fn scope(&self, key: &str) -> Option<String> {
        let prefix = format!("onvif://www.onvif.org/{}/", key);
        self.scopes
            .iter()
            .find_map(|s| s.strip_prefix(&prefix))
            .map(|v| v.replace("%20", " "))
    }
}

pub fn parse_probe_matches(xml: &str) -> Result<Vec<ProbeMatch>, OnvifError> {
    let doc = Document::parse(xml)?;
    if !doc.contains("ProbeMatches") {
        return Err(OnvifError::MissingField("ProbeMatches"));
    }

    let split = |idx: Option<usize>| -> Vec<String> {
        idx.map(|i| doc.text(i).split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    };

    Ok(doc
        .named("ProbeMatch")
        .map(|idx| ProbeMatch {
            xaddrs: split(doc.child(idx, "XAddrs")),
            types: split(doc.child(idx, "Types")),
            scopes: split(doc.child(idx, "Scopes")),
        })
        .collect())
}

pub fn xaddr_endpoint(xaddr: &str) -> Option<(String, u16)> {
    let url = Url::parse(xaddr).ok()?;
    let host = url.host_str()?.to_string();
    let port = url.port_or_known_default()?;
    Some((host, port))
}
