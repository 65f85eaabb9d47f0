//! Well-known camera ports and the per-vendor port table.
//!
//! The numbers here come from vendor documentation of varying quality. They are
//! defaults only; `Config` can extend or replace every list.

/// Plain web UI
pub const HTTP_PORT: u16 = 80;
/// RTSP media
pub const RTSP_PORT: u16 = 554;
/// Vendor binary control protocol (XMEye-style NVRs and cameras)
pub const VENDOR_BINARY_PORT: u16 = 34567;

/// WS-Discovery multicast port
pub const WS_DISCOVERY_PORT: u16 = 3702;
/// SSDP multicast port
pub const SSDP_PORT: u16 = 1900;
/// mDNS multicast port
pub const MDNS_PORT: u16 = 5353;

/// Ports always present in a descriptor's fallback list, tried in order when
/// neither protocol could be detected.
pub const DEFAULT_FALLBACK_PORTS: &[u16] = &[80, 8080, 8000, 2020, 8899];

/// Small Phase 2 set: the ports most likely to identify a camera quickly.
pub const PRIORITY_PORTS: &[u16] = &[554, 80, 34567, 2020, 8000, 8899];

/// Port weights for ordering the full catalog. Heavier ports are scanned first.
pub const PORT_WEIGHTS: &[(u16, u32)] = &[
    (554, 30),   // RTSP
    (34567, 30), // vendor binary
    (2020, 30),  // ONVIF (Tapo)
    (8899, 25),  // ONVIF (XMEye)
    (8000, 20),  // ONVIF / SDK
    (80, 10),    // HTTP
    (37777, 10), // Dahua SDK
    (9000, 10),  // Reolink media
    (8554, 5),   // Alt RTSP
    (8080, 5),   // Alt HTTP
    (443, 5),    // HTTPS
    (8443, 5),   // Alt HTTPS
    (88, 5),     // Foscam web
];

/// Ports a vendor family is known to expose
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VendorPorts {
    pub vendor: &'static str,
    pub http: u16,
    pub media: u16,
    pub control: u16,
    pub event: Option<u16>,
    pub proprietary: Option<u16>,
}

/// Per-vendor default table
pub const VENDOR_PORTS: &[VendorPorts] = &[
    VendorPorts { vendor: "generic", http: 80, media: 554, control: 80, event: None, proprietary: None },
    VendorPorts { vendor: "xmeye", http: 80, media: 554, control: 8899, event: None, proprietary: Some(34567) },
    VendorPorts { vendor: "hikvision", http: 80, media: 554, control: 80, event: None, proprietary: Some(8000) },
    VendorPorts { vendor: "dahua", http: 80, media: 554, control: 80, event: None, proprietary: Some(37777) },
    VendorPorts { vendor: "amcrest", http: 80, media: 554, control: 80, event: None, proprietary: Some(37777) },
    VendorPorts { vendor: "reolink", http: 80, media: 554, control: 8000, event: None, proprietary: Some(9000) },
    VendorPorts { vendor: "foscam", http: 88, media: 554, control: 888, event: None, proprietary: None },
    VendorPorts { vendor: "tapo", http: 443, media: 554, control: 2020, event: None, proprietary: None },
];

/// Look up a vendor family by case-insensitive name
pub fn vendor_ports(vendor: &str) -> Option<&'static VendorPorts> {
    let wanted = vendor.trim().to_lowercase();
    VENDOR_PORTS.iter().find(|v| v.vendor == wanted)
}

fn weight_of(port: u16) -> u32 {
    PORT_WEIGHTS
        .iter()
        .find(|(p, _)| *p == port)
        .map(|(_, w)| *w)
        .unwrap_or(0)
}

/// Build the full Phase 3 catalog: every port in the vendor table, the weight
/// table and `extra`, deduplicated and ordered by descending weight.
pub fn full_catalog(extra: &[u16]) -> Vec<u16> {
    let mut ports: Vec<u16> = Vec::new();
    let mut push = |p: u16| {
        if p != 0 && !ports.contains(&p) {
            ports.push(p);
        }
    };

    for &(p, _) in PORT_WEIGHTS {
        push(p);
    }
    for v in VENDOR_PORTS {
        push(v.http);
        push(v.media);
        push(v.control);
        if let Some(p) = v.event {
            push(p);
        }
        if let Some(p) = v.proprietary {
            push(p);
        }
    }
    for &p in extra {
        push(p);
    }

    // Stable sort keeps table order among equal weights
    ports.sort_by(|a, b| weight_of(*b).cmp(&weight_of(*a)));
    ports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_catalog_is_deduplicated_and_weighted() {
        let catalog = full_catalog(&[554, 10554]);

        let mut sorted = catalog.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), catalog.len());

        assert!(catalog.contains(&10554));
        assert!(catalog.contains(&37777));
        assert_eq!(weight_of(catalog[0]), 30);
        // Unweighted extras go last
        assert_eq!(*catalog.last().unwrap(), 10554);
    }

    #[test]
    fn test_vendor_lookup() {
        let xm = vendor_ports("XMEye").unwrap();
        assert_eq!(xm.proprietary, Some(VENDOR_BINARY_PORT));
        assert!(vendor_ports("unknown-brand").is_none());
    }

    #[test]
    fn test_priority_ports_are_in_catalog() {
        let catalog = full_catalog(&[]);
        for p in PRIORITY_PORTS {
            assert!(catalog.contains(p), "priority port {} missing", p);
        }
    }
}
