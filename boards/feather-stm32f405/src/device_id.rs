#![deny(unsafe_code)]
//! Device identifier for the collector session
//!
//! The STM32F405 carries a factory-programmed 96-bit unique ID. It is stable
//! across reboots, so it doubles as the MQTT client ID.

use core::fmt::Write;

use heapless::String;

/// "relay-" (6 chars) + 24 hex chars
pub const CLIENT_ID_MAX_LEN: usize = 30;

/// The 96-bit UID as 24 hex characters
pub fn uid_hex() -> &'static str {
    embassy_stm32::uid::uid_hex()
}

/// Client ID in the form `relay-{24 hex chars}`
pub fn client_id() -> String<CLIENT_ID_MAX_LEN> {
    let mut id = String::new();
    // 6 + 24 bytes always fit
    let _ = write!(id, "relay-{}", uid_hex());
    id
}

/// Name shown to the collector: the configured label, else the client ID
pub fn display_name(label: &str) -> String<32> {
    let mut name = String::new();
    if label.is_empty() || name.push_str(label).is_err() {
        name.clear();
        let _ = name.push_str(client_id().as_str());
    }
    name
}
