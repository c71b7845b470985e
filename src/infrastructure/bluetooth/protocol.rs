//! Colibri Wallet Protocol
//!
//! This module contains the protocol definitions for communicating with
//! the Colibri wallet: fixed UUIDs, interop naming tables, transport
//! tunables, and the response-framing detector.

use std::time::Duration;

use uuid::{uuid, Uuid};

/// Colibri Wallet BLE Service UUID (the digits of pi, as a nod from the
/// firmware authors).
pub const COLIBRI_SERVICE_UUID: Uuid = uuid!("31415926-5358-9793-2384-626433832795");

/// Short id of the write characteristic, merged into the service base.
pub const WRITE_CHAR_SHORT: u32 = 0xC001;

/// Short id of the notify characteristic, merged into the service base.
pub const NOTIFY_CHAR_SHORT: u32 = 0xC000;

/// Standard Client Characteristic Configuration descriptor.
pub const CCCD_UUID: Uuid = uuid!("00002902-0000-1000-8000-00805f9b34fb");

/// Merge a 16-bit or 32-bit short id into the wallet service's 128-bit base.
///
/// The short id lands in bits 32..64 of the most significant half, so
/// `0xC001` yields `31421927-5358-9793-2384-626433832795`.
pub fn short_uuid_to_128(short: u32) -> Uuid {
    let (msb, lsb) = COLIBRI_SERVICE_UUID.as_u64_pair();
    Uuid::from_u64_pair(msb.wrapping_add((short as u64) << 32), lsb)
}

/// UUID of the request (write) characteristic.
pub fn write_char_uuid() -> Uuid {
    short_uuid_to_128(WRITE_CHAR_SHORT)
}

/// UUID of the response (notify) characteristic.
pub fn notify_char_uuid() -> Uuid {
    short_uuid_to_128(NOTIFY_CHAR_SHORT)
}

/// Services worth naming in scan output.
pub const KNOWN_SERVICES: &[(Uuid, &str)] = &[
    (uuid!("0000180f-0000-1000-8000-00805f9b34fb"), "Battery Service"),
    (uuid!("0000180a-0000-1000-8000-00805f9b34fb"), "Device Information"),
    (uuid!("00001800-0000-1000-8000-00805f9b34fb"), "Generic Access"),
    (uuid!("00001801-0000-1000-8000-00805f9b34fb"), "Generic Attribute"),
    (uuid!("0000180d-0000-1000-8000-00805f9b34fb"), "Heart Rate"),
    (uuid!("00001812-0000-1000-8000-00805f9b34fb"), "Human Interface Device"),
    (COLIBRI_SERVICE_UUID, "Colibri Wallet"),
    (uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e"), "Nordic UART Service"),
];

pub fn known_service_name(uuid: &Uuid) -> Option<&'static str> {
    KNOWN_SERVICES
        .iter()
        .find(|(u, _)| u == uuid)
        .map(|(_, name)| *name)
}

/// Bluetooth SIG company identifiers seen often enough to be worth naming.
pub const MANUFACTURER_NAMES: &[(u16, &str)] = &[
    (0x004C, "Apple"),
    (0x0006, "Microsoft"),
    (0x00E0, "Google"),
    (0x0075, "Samsung"),
    (0x000F, "Broadcom"),
    (0x0087, "Garmin"),
    (0x01D7, "Qualcomm"),
    (0x02E5, "Espressif"),
    (0x0059, "Nordic Semiconductor"),
    (0x000D, "Texas Instruments"),
    (0x0002, "Intel"),
];

pub fn manufacturer_name(company_id: u16) -> Option<&'static str> {
    MANUFACTURER_NAMES
        .iter()
        .find(|(id, _)| *id == company_id)
        .map(|(_, name)| *name)
}

/// Diagnostic label for a company id: the known name or the raw id.
pub fn manufacturer_label(company_id: u16) -> String {
    manufacturer_name(company_id)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Manufacturer ID: 0x{company_id:04X}"))
}

// Transport tunables.
pub const SCAN_DURATION: Duration = Duration::from_secs(10);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const RPC_TIMEOUT: Duration = Duration::from_secs(30);
pub const REQUESTED_MTU: u16 = 512;
pub const MAX_RESPONSE_SIZE: usize = 8192;

/// RSSI bucket thresholds in dBm.
pub const RSSI_EXCELLENT: i16 = -50;
pub const RSSI_GOOD: i16 = -60;
pub const RSSI_FAIR: i16 = -70;
pub const RSSI_WEAK: i16 = -80;

/// RSSI reported for bonded devices, which carry none.
pub const BONDED_DEFAULT_RSSI: i16 = -50;

pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

/// Per-call accumulator for notification fragments.
///
/// Responses carry no length prefix; completion is inferred from
/// brace/bracket balance, tracked incrementally as fragments arrive so the
/// buffer is never rescanned. Braces inside string literals are ignored,
/// with one-character escape lookahead after a backslash. The escape and
/// in-string flags persist across fragment boundaries.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    text: String,
    braces: i32,
    brackets: i32,
    in_string: bool,
    escaped: bool,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a decoded fragment, updating the balance counters.
    pub fn push_fragment(&mut self, fragment: &str) {
        for ch in fragment.chars() {
            if self.escaped {
                self.escaped = false;
            } else if ch == '\\' && self.in_string {
                self.escaped = true;
            } else if ch == '"' {
                self.in_string = !self.in_string;
            } else if !self.in_string {
                match ch {
                    '{' => self.braces += 1,
                    '}' => self.braces -= 1,
                    '[' => self.brackets += 1,
                    ']' => self.brackets -= 1,
                    _ => {}
                }
            }
        }
        self.text.push_str(fragment);
    }

    /// Whether the accumulated text forms a complete JSON value: balanced
    /// braces and brackets, non-empty after trimming, and ending in `}`
    /// or `]`.
    pub fn is_complete(&self) -> bool {
        let trimmed = self.text.trim();
        self.braces == 0
            && self.brackets == 0
            && !trimmed.is_empty()
            && matches!(trimmed.chars().last(), Some('}') | Some(']'))
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Take the accumulated text, leaving the buffer reset for the next call.
    pub fn take(&mut self) -> String {
        let text = std::mem::take(&mut self.text);
        self.reset_counters();
        text
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.reset_counters();
    }

    fn reset_counters(&mut self) {
        self.braces = 0;
        self.brackets = 0;
        self.in_string = false;
        self.escaped = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_after(fragments: &[&str]) -> Vec<bool> {
        let mut buf = ResponseBuffer::new();
        fragments
            .iter()
            .map(|f| {
                buf.push_fragment(f);
                buf.is_complete()
            })
            .collect()
    }

    #[test]
    fn short_uuid_merges_into_service_base() {
        assert_eq!(
            short_uuid_to_128(0xC001).to_string(),
            "31421927-5358-9793-2384-626433832795"
        );
        assert_eq!(
            short_uuid_to_128(0xC000).to_string(),
            "31421926-5358-9793-2384-626433832795"
        );
        assert_eq!(write_char_uuid(), short_uuid_to_128(WRITE_CHAR_SHORT));
        assert_eq!(notify_char_uuid(), short_uuid_to_128(NOTIFY_CHAR_SHORT));
        // The configuration descriptor stays on the standard Bluetooth base.
        assert_eq!(
            CCCD_UUID.to_string(),
            "00002902-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn incomplete_until_final_fragment() {
        // Example exchange for {"method":"getStatus"}.
        let verdicts = complete_after(&["{\"stat", "us\":\"ok\"}"]);
        assert_eq!(verdicts, vec![false, true]);
    }

    #[test]
    fn every_proper_prefix_is_incomplete() {
        let full = r#"{"methods":["getStatus","signTx"],"count":2}"#;
        let mut buf = ResponseBuffer::new();
        for (i, ch) in full.char_indices() {
            buf.push_fragment(&ch.to_string());
            let expect_complete = i == full.len() - 1;
            assert_eq!(buf.is_complete(), expect_complete, "at index {i}");
        }
        assert_eq!(buf.take(), full);
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let mut buf = ResponseBuffer::new();
        buf.push_fragment(r#"{"junk":"}}}]]]{{{"}"#);
        assert!(buf.is_complete());
        assert_eq!(buf.as_str(), r#"{"junk":"}}}]]]{{{"}"#);
    }

    #[test]
    fn escaped_quotes_do_not_end_strings() {
        // The value is a\"}{\" so the braces sit inside the string literal.
        let mut buf = ResponseBuffer::new();
        buf.push_fragment(r#"{"v":"a\"}{\""}"#);
        assert!(buf.is_complete());

        // Still inside the string: the closing brace must not count.
        let mut open = ResponseBuffer::new();
        open.push_fragment(r#"{"v":"a\"}"#);
        assert!(!open.is_complete());
    }

    #[test]
    fn escape_state_survives_fragment_boundary() {
        let verdicts = complete_after(&[r#"{"v":"a\"#, r#""}""#, "}"]);
        assert_eq!(verdicts, vec![false, false, true]);
    }

    #[test]
    fn array_responses_complete_on_bracket() {
        let verdicts = complete_after(&["[1,2", ",3]"]);
        assert_eq!(verdicts, vec![false, true]);
    }

    #[test]
    fn trailing_whitespace_is_trimmed_for_the_check() {
        let mut buf = ResponseBuffer::new();
        buf.push_fragment("{\"ok\":true}\r\n");
        assert!(buf.is_complete());
    }

    #[test]
    fn empty_or_scalar_text_is_never_complete() {
        let mut buf = ResponseBuffer::new();
        assert!(!buf.is_complete());
        buf.push_fragment("   ");
        assert!(!buf.is_complete());
        buf.clear();
        buf.push_fragment("42");
        assert!(!buf.is_complete());
    }

    #[test]
    fn take_resets_state_for_the_next_call() {
        let mut buf = ResponseBuffer::new();
        buf.push_fragment(r#"{"a":"#);
        assert!(!buf.is_complete());
        let partial = buf.take();
        assert_eq!(partial, r#"{"a":"#);
        assert!(buf.is_empty());

        buf.push_fragment("[]");
        assert!(buf.is_complete(), "stale counters would block completion");
    }

    #[test]
    fn interop_tables_resolve() {
        assert_eq!(
            known_service_name(&COLIBRI_SERVICE_UUID),
            Some("Colibri Wallet")
        );
        assert_eq!(
            known_service_name(&uuid!("0000180d-0000-1000-8000-00805f9b34fb")),
            Some("Heart Rate")
        );
        assert_eq!(known_service_name(&uuid!("00000000-0000-0000-0000-000000000000")), None);

        assert_eq!(manufacturer_name(0x02E5), Some("Espressif"));
        assert_eq!(manufacturer_label(0x0059), "Nordic Semiconductor");
        assert_eq!(manufacturer_label(0x1234), "Manufacturer ID: 0x1234");
    }
}
