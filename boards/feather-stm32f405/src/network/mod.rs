#![deny(unsafe_code)]
//! Network layer for the relay firmware
//!
//! Implements the relay-hal seams on top of embassy-net and the W5500:
//! - [`TcpConnector`]: DNS + TCP connections for the trust probe and the collector
//! - [`EthernetLink`]: link bring-up (DHCP lease)
//! - [`EmbeddedTlsEngine`]: TLS 1.3 with chain trust delegated to relay-core
//! - [`collector`]: MQTT session over the pinned TLS stream

pub mod collector;
pub mod config;
pub mod error;
pub mod manager;
pub mod socket;
pub mod tls;

pub use config::{CollectorConfig, NetworkConfig};
pub use error::NetworkError;
pub use manager::EthernetLink;
pub use socket::TcpConnector;
pub use tls::EmbeddedTlsEngine;
