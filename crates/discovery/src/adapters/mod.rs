//! Discovery probes
//!
//! Every adapter is one-shot: `probe` consumes it and returns a receiver
//! that yields results until the adapter's timeout elapses, then closes.
//! Adapters never fail outright. Socket or platform errors become a
//! `Diagnostic` event and an early close.

mod mdns;
mod multicast;
mod port_scan;
mod ssdp;
mod ws_discovery;

use std::time::Duration;

use camscout_core::{DiscoveryMethod, DiscoveryResult};
use ipnetwork::Ipv4Network;
use tokio::sync::mpsc;

pub use mdns::MdnsAdapter;
pub use port_scan::{PortScanner, ProbeCounter};
pub use ssdp::{parse_ssdp_response, SsdpAdapter};
pub use ws_discovery::WsDiscoveryAdapter;

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeEvent {
    Found(DiscoveryResult),
    Diagnostic(String),
}

pub type ProbeStream = mpsc::Receiver<ProbeEvent>;

pub trait DiscoveryAdapter: Send {
    fn method(&self) -> DiscoveryMethod;

    /// Start probing `subnet`. Results stop arriving once `timeout` elapses.
    fn probe(self: Box<Self>, subnet: Ipv4Network, timeout: Duration) -> ProbeStream;
}

pub(crate) const EVENT_BUFFER: usize = 256;
