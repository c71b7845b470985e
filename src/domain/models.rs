use uuid::Uuid;

use crate::infrastructure::bluetooth::protocol;

/// Connection lifecycle of the single wallet session.
///
/// This is the one source of truth for whether RPC calls may be attempted;
/// transitions happen only inside the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Signal strength bucket derived from RSSI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalStrength {
    Excellent,
    Good,
    Fair,
    Weak,
    VeryWeak,
}

impl SignalStrength {
    pub fn from_rssi(rssi: i16) -> Self {
        match rssi {
            r if r >= protocol::RSSI_EXCELLENT => Self::Excellent,
            r if r >= protocol::RSSI_GOOD => Self::Good,
            r if r >= protocol::RSSI_FAIR => Self::Fair,
            r if r >= protocol::RSSI_WEAK => Self::Weak,
            _ => Self::VeryWeak,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::Fair => "Fair",
            Self::Weak => "Weak",
            Self::VeryWeak => "Very Weak",
        }
    }
}

impl std::fmt::Display for SignalStrength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of a discovered or bonded peer.
///
/// A rescan produces a new record that replaces any prior one for the same
/// address; nothing here is mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    /// Link-layer address, formatted `AA:BB:CC:DD:EE:FF`.
    pub address: String,
    /// Advertised name, if any source provided one.
    pub name: Option<String>,
    /// Received signal strength in dBm.
    pub rssi: i16,
    /// Service UUIDs carried in the advertisement.
    pub service_uuids: Vec<Uuid>,
    /// Whether the advertisement marked the device connectable.
    pub connectable: bool,
}

impl DeviceRecord {
    /// Name for display, falling back to a placeholder when absent or blank.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(n) if !n.trim().is_empty() => n,
            _ => protocol::UNKNOWN_DEVICE_NAME,
        }
    }

    /// Last 8 characters of the address, enough to tell devices apart.
    pub fn short_address(&self) -> &str {
        let split = self.address.len().saturating_sub(8);
        &self.address[split..]
    }

    pub fn signal_strength(&self) -> SignalStrength {
        SignalStrength::from_rssi(self.rssi)
    }

    /// Names of advertised services that appear in the known-service table.
    pub fn known_service_names(&self) -> Vec<&'static str> {
        self.service_uuids
            .iter()
            .filter_map(protocol::known_service_name)
            .collect()
    }

    pub fn has_known_services(&self) -> bool {
        self.service_uuids
            .iter()
            .any(|u| protocol::known_service_name(u).is_some())
    }

    /// Whether the advertisement carried the wallet service.
    pub fn advertises_wallet_service(&self) -> bool {
        self.service_uuids
            .contains(&protocol::COLIBRI_SERVICE_UUID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::uuid;

    fn record(name: Option<&str>, rssi: i16) -> DeviceRecord {
        DeviceRecord {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            name: name.map(str::to_string),
            rssi,
            service_uuids: Vec::new(),
            connectable: true,
        }
    }

    #[test]
    fn display_name_falls_back_on_missing_or_blank() {
        assert_eq!(record(Some("Colibri"), -40).display_name(), "Colibri");
        assert_eq!(record(None, -40).display_name(), "Unknown Device");
        assert_eq!(record(Some("   "), -40).display_name(), "Unknown Device");
    }

    #[test]
    fn short_address_keeps_last_eight_chars() {
        assert_eq!(record(None, -40).short_address(), "DD:EE:FF");
    }

    #[test]
    fn signal_strength_buckets() {
        assert_eq!(record(None, -45).signal_strength(), SignalStrength::Excellent);
        assert_eq!(record(None, -50).signal_strength(), SignalStrength::Excellent);
        assert_eq!(record(None, -55).signal_strength(), SignalStrength::Good);
        assert_eq!(record(None, -65).signal_strength(), SignalStrength::Fair);
        assert_eq!(record(None, -75).signal_strength(), SignalStrength::Weak);
        assert_eq!(record(None, -90).signal_strength(), SignalStrength::VeryWeak);
    }

    #[test]
    fn known_services_resolve_to_names() {
        let mut rec = record(Some("watch"), -40);
        rec.service_uuids = vec![
            uuid!("0000180f-0000-1000-8000-00805f9b34fb"),
            uuid!("12345678-1234-1234-1234-123456789abc"),
        ];
        assert!(rec.has_known_services());
        assert_eq!(rec.known_service_names(), vec!["Battery Service"]);
    }

    #[test]
    fn wallet_service_detection() {
        let mut rec = record(None, -40);
        assert!(!rec.advertises_wallet_service());
        rec.service_uuids = vec![crate::infrastructure::bluetooth::protocol::COLIBRI_SERVICE_UUID];
        assert!(rec.advertises_wallet_service());
    }
}
