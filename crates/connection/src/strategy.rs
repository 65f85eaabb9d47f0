use camscout_core::{CameraDescriptor, ProtocolType};

/// Which path `connect` takes, decided once per descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStrategy {
    Standards,
    Proprietary,
    /// Both paths, both handles kept
    Hybrid,
    /// Detect both in parallel, then fall back to the descriptor's ports
    AutoFallback,
}

impl ProtocolStrategy {
    pub fn for_descriptor(descriptor: &CameraDescriptor) -> Self {
        match descriptor.protocol_type {
            ProtocolType::Standards => ProtocolStrategy::Standards,
            ProtocolType::Proprietary => ProtocolStrategy::Proprietary,
            ProtocolType::Hybrid => ProtocolStrategy::Hybrid,
            ProtocolType::Undetermined => ProtocolStrategy::AutoFallback,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProtocolStrategy::Standards => "standards",
            ProtocolStrategy::Proprietary => "proprietary",
            ProtocolStrategy::Hybrid => "hybrid",
            ProtocolStrategy::AutoFallback => "auto-fallback",
        }
    }
}
