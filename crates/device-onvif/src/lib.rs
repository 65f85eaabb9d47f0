pub mod controller;
pub mod errors;
pub mod models;
pub mod soap;
pub mod ws_discovery;
pub mod xml;

pub use controller::OnvifController;
pub use errors::OnvifError;
pub use models::{Capabilities, MediaProfile};
pub use ws_discovery::{parse_probe_matches, probe_message, xaddr_endpoint, ProbeMatch, WS_DISCOVERY_GROUP};
pub use xml::Document;
