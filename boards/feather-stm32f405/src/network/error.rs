#![deny(unsafe_code)]
//! Network error types

use defmt::Format;
use embedded_io_async::ErrorKind;

/// Board network failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum NetworkError {
    /// W5500 did not come out of reset
    EthernetInit,
    /// No DHCP lease within the join timeout
    LinkDown,
    /// DNS resolution failed
    DnsError,
    /// Peer refused or no route to host
    ConnectFailed,
    /// Connect did not complete
    ConnectTimeout,
    /// Connection reset by the peer
    ConnectionReset,
    /// Socket in the wrong state for the operation
    SocketError,
    /// MQTT connection failed
    MqttConnectionFailed,
    /// MQTT publish failed
    MqttPublishFailed,
    /// MQTT protocol error
    MqttProtocolError,
    /// MQTT buffer allocation failed
    MqttBufferError,
}

impl core::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::EthernetInit => write!(f, "Ethernet controller init failed"),
            Self::LinkDown => write!(f, "Network link down"),
            Self::DnsError => write!(f, "DNS resolution failed"),
            Self::ConnectFailed => write!(f, "Connect failed"),
            Self::ConnectTimeout => write!(f, "Connect timeout"),
            Self::ConnectionReset => write!(f, "Connection reset"),
            Self::SocketError => write!(f, "Socket error"),
            Self::MqttConnectionFailed => write!(f, "MQTT connection failed"),
            Self::MqttPublishFailed => write!(f, "MQTT publish failed"),
            Self::MqttProtocolError => write!(f, "MQTT protocol error"),
            Self::MqttBufferError => write!(f, "MQTT buffer error"),
        }
    }
}

impl core::error::Error for NetworkError {}

impl embedded_io_async::Error for NetworkError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::DnsError => ErrorKind::AddrNotAvailable,
            Self::ConnectFailed => ErrorKind::ConnectionRefused,
            Self::ConnectTimeout => ErrorKind::TimedOut,
            Self::ConnectionReset => ErrorKind::ConnectionReset,
            Self::SocketError | Self::LinkDown => ErrorKind::NotConnected,
            _ => ErrorKind::Other,
        }
    }
}
