#![deny(unsafe_code)]
//! Board network and collector configuration

/// Network stack configuration
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// MAC address for Ethernet
    pub mac_addr: [u8; 6],
    /// Random seed for network stack
    pub seed: u64,
    /// Longest wait for a DHCP lease per join attempt
    pub dhcp_timeout_ms: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mac_addr: [0x02, 0x00, 0x00, 0x12, 0x34, 0x56],
            seed: 0x1234_5678_u64,
            dhcp_timeout_ms: 15_000,
        }
    }
}

/// Collector MQTT session configuration
#[derive(Debug, Clone, Copy)]
pub struct CollectorConfig {
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u16,
    /// Clean start flag (true = new session)
    pub clean_start: bool,
    /// Status publish period
    pub publish_interval_ms: u32,
    /// How often the mode controller is polled during a session
    pub poll_interval_ms: u32,
    /// Pause before bring-up is retried after a failure
    pub reconnect_delay_ms: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            keep_alive_secs: 60,
            clean_start: true,
            publish_interval_ms: 10_000,
            poll_interval_ms: 250,
            reconnect_delay_ms: 5_000,
        }
    }
}
