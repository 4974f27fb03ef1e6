//! Persisted device settings and tunables

use heapless::String;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigIssue, PersistenceError};
use crate::tls::Fingerprint;

/// Version tag written into every settings record
pub const CONFIG_VERSION: &str = "1001";

/// Largest encoded settings record
pub const CONFIG_RECORD_MAX: usize = 512;

/// Shortest collector token accepted as configured
pub const MIN_TOKEN_LEN: usize = 5;

/// Settings owned by the device, persisted as one JSON record.
///
/// The core interprets `provisioning` and `fingerprint`; the other fields
/// belong to the link and collector layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub version: String<8>,
    /// Boot into provisioning mode
    #[serde(default)]
    pub provisioning: bool,
    #[serde(default)]
    pub ssid: String<32>,
    #[serde(default)]
    pub password: String<64>,
    /// Free-form device label
    #[serde(default)]
    pub id: String<32>,
    /// Collector host; empty or `*` selects the default cloud collector
    #[serde(default)]
    pub collector: String<64>,
    #[serde(default)]
    pub token: String<64>,
    /// Pinned collector leaf fingerprint, empty string when unset
    #[serde(default, with = "pin_text")]
    pub fingerprint: Option<Fingerprint>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let mut version = String::new();
        // "1001" always fits in 8 bytes
        let _ = version.push_str(CONFIG_VERSION);
        Self {
            version,
            provisioning: false,
            ssid: String::new(),
            password: String::new(),
            id: String::new(),
            collector: String::new(),
            token: String::new(),
            fingerprint: None,
        }
    }
}

impl DeviceConfig {
    /// Whether these settings are enough to bring up the collector connection
    pub fn validate(&self) -> Result<(), ConfigIssue> {
        if self.version.as_str() != CONFIG_VERSION {
            return Err(ConfigIssue::VersionMismatch);
        }
        if self.ssid.is_empty() {
            return Err(ConfigIssue::MissingSsid);
        }
        if self.token.len() < MIN_TOKEN_LEN {
            return Err(ConfigIssue::TokenTooShort);
        }
        Ok(())
    }

    /// A self-hosted collector that needs a pinned fingerprint
    pub fn has_custom_collector(&self) -> bool {
        !self.collector.is_empty() && self.collector.as_str() != "*"
    }

    /// Serialize into `buf`, returning the record length
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, PersistenceError> {
        serde_json_core::to_slice(self, buf).map_err(|_| PersistenceError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ConfigIssue> {
        let (config, _) =
            serde_json_core::from_slice::<Self>(bytes).map_err(|_| ConfigIssue::Corrupt)?;
        if config.version.as_str() != CONFIG_VERSION {
            return Err(ConfigIssue::VersionMismatch);
        }
        Ok(config)
    }
}

mod pin_text {
    use core::fmt;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serialize, Serializer};

    use crate::tls::Fingerprint;

    pub fn serialize<S: Serializer>(pin: &Option<Fingerprint>, s: S) -> Result<S::Ok, S::Error> {
        match pin {
            Some(fp) => fp.serialize(s),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Fingerprint>, D::Error> {
        d.deserialize_str(PinVisitor)
    }

    struct PinVisitor;

    impl Visitor<'_> for PinVisitor {
        type Value = Option<Fingerprint>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an empty string or a fingerprint")
        }

        // A malformed pin is corruption, not "no pin": treating it as unset
        // would silently re-run trust on first use.
        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            if v.is_empty() {
                return Ok(None);
            }
            Fingerprint::parse(v)
                .map(Some)
                .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
        }
    }
}

/// Per-operation bounds on a transport stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoTimeouts {
    /// Longest wait for any bytes on a read
    pub read_ms: u32,
    /// Longest wait for a write or flush to make progress
    pub write_ms: u32,
    /// Retries of a read or write that failed with a transient error
    pub transient_retries: u8,
}

impl Default for IoTimeouts {
    fn default() -> Self {
        Self {
            read_ms: 5000,
            write_ms: 5000,
            transient_retries: 20,
        }
    }
}

/// Trust probe retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Attempts before giving up (1 or more)
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub retry_delay_ms: u32,
    pub connect_timeout_ms: u32,
    /// Bound on one whole handshake
    pub handshake_timeout_ms: u32,
    pub io: IoTimeouts,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            retry_delay_ms: 2000,
            connect_timeout_ms: 10_000,
            handshake_timeout_ms: 20_000,
            io: IoTimeouts::default(),
        }
    }
}

/// Mode controller timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeTimings {
    /// Requests arriving before this uptime are discarded
    pub grace_ms: u64,
    /// Provisioning ends this long after entry or the last trigger
    pub provisioning_timeout_ms: u64,
}

impl Default for ModeTimings {
    fn default() -> Self {
        Self {
            grace_ms: 5_000,
            provisioning_timeout_ms: 60_000,
        }
    }
}

/// Bring-up sequencing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Collector TLS port
    pub collector_port: u16,
    /// Collector used when no custom collector is configured
    pub cloud_host: &'static str,
    /// Pause between link join attempts
    pub link_retry_delay_ms: u32,
    /// Pause between probe rounds while no pin is stored
    pub probe_round_delay_ms: u32,
    pub connect_timeout_ms: u32,
    pub handshake_timeout_ms: u32,
    pub io: IoTimeouts,
    pub probe: ProbeConfig,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            collector_port: 9443,
            cloud_host: "blynk.cloud",
            link_retry_delay_ms: 1000,
            probe_round_delay_ms: 500,
            connect_timeout_ms: 10_000,
            handshake_timeout_ms: 20_000,
            io: IoTimeouts::default(),
            probe: ProbeConfig::default(),
        }
    }
}
