//! Camera discovery on the local subnet
//!
//! `NetworkAnalyzer` finds the subnet, the adapters find responders,
//! `ProtocolDetector` decides what each responder is, and
//! `DiscoveryCoordinator` runs the three phases against a shared
//! `DiscoveryCache` and `CameraRegistry`.

pub mod adapters;
pub mod cache;
pub mod coordinator;
pub mod detector;
pub mod errors;
pub mod network;
pub mod registry;

pub use adapters::{DiscoveryAdapter, ProbeEvent, ProbeStream};
pub use cache::{CacheLookup, DiscoveryCache, SharedDiscoveryCache};
pub use coordinator::{AdapterFactory, ClassifiedHit, DiscoveryCoordinator, DiscoveryReport};
pub use detector::{screen_page, Classification, ProtocolDetector};
pub use errors::{DetectError, NetworkError};
pub use network::NetworkAnalyzer;
pub use registry::{CameraRegistry, RosterEvent, SharedRegistry};
