//! Error types for the trust bootstrap and mode control

use core::fmt;

use embedded_io::ErrorKind;

use crate::tls::Fingerprint;

/// Connect, read or write failure on the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// No answer within the configured bound
    Timeout,
    /// Peer refused the connection
    Refused,
    /// Connection reset or aborted by the peer
    Reset,
    /// Connection closed or not connected
    Closed,
    /// Host could not be resolved or reached
    Unreachable,
    /// Any other I/O failure
    Other,
}

impl TransportError {
    /// Classify an `embedded-io` error kind
    pub fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::TimedOut => Self::Timeout,
            ErrorKind::ConnectionRefused => Self::Refused,
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => Self::Reset,
            ErrorKind::NotConnected | ErrorKind::BrokenPipe => Self::Closed,
            ErrorKind::NotFound | ErrorKind::AddrNotAvailable => Self::Unreachable,
            _ => Self::Other,
        }
    }

    /// Classify any `embedded-io` error
    pub fn from_io<E: embedded_io::Error>(e: &E) -> Self {
        Self::from_kind(e.kind())
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "transport timeout"),
            Self::Refused => write!(f, "connection refused"),
            Self::Reset => write!(f, "connection reset"),
            Self::Closed => write!(f, "connection closed"),
            Self::Unreachable => write!(f, "host unreachable"),
            Self::Other => write!(f, "transport error"),
        }
    }
}

impl core::error::Error for TransportError {}

impl embedded_io::Error for TransportError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout => ErrorKind::TimedOut,
            Self::Refused => ErrorKind::ConnectionRefused,
            Self::Reset => ErrorKind::ConnectionReset,
            Self::Closed => ErrorKind::BrokenPipe,
            Self::Unreachable => ErrorKind::AddrNotAvailable,
            Self::Other => ErrorKind::Other,
        }
    }
}

/// TLS handshake failure as reported by an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HandshakeError {
    /// The certificate observer did not accept the chain
    CertificateRejected,
    /// Transport failed during the handshake
    Transport(TransportError),
    /// Peer violated the protocol or sent an alert
    Protocol,
    /// No common version or cipher suite, or an unsupported signature scheme
    Unsupported,
    /// CertificateVerify signature did not check out against the leaf key
    BadSignature,
    /// The leaf was trusted but its public key type cannot be verified
    UnsupportedLeafKey,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CertificateRejected => write!(f, "certificate rejected"),
            Self::Transport(e) => write!(f, "handshake transport failure: {}", e),
            Self::Protocol => write!(f, "handshake protocol error"),
            Self::Unsupported => write!(f, "no supported parameters"),
            Self::BadSignature => write!(f, "bad server signature"),
            Self::UnsupportedLeafKey => write!(f, "pinned leaf key type unsupported"),
        }
    }
}

impl core::error::Error for HandshakeError {}

impl From<TransportError> for HandshakeError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

/// Why a single probe attempt did not capture a fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttemptFailure {
    /// Connect failed or timed out
    Transport(TransportError),
    /// Handshake failed before the leaf certificate was observed
    Handshake(HandshakeError),
    /// Chain ended without a complete leaf certificate
    Incomplete,
    /// The engine completed a handshake the probe must never complete
    UnexpectedTrust,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{}", e),
            Self::Handshake(e) => write!(f, "{}", e),
            Self::Incomplete => write!(f, "leaf certificate incomplete"),
            Self::UnexpectedTrust => write!(f, "handshake unexpectedly trusted"),
        }
    }
}

/// Trust probe failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProbeError {
    /// Every attempt failed
    GaveUp { attempts: u32, last: AttemptFailure },
    /// A provisioning request arrived between attempts
    Cancelled,
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GaveUp { attempts, last } => {
                write!(f, "gave up after {} attempts, last: {}", attempts, last)
            }
            Self::Cancelled => write!(f, "probe cancelled"),
        }
    }
}

impl core::error::Error for ProbeError {}

/// Pinned client connection failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClientError {
    /// Leaf fingerprint differs from the pin. Never repaired automatically.
    FingerprintMismatch {
        expected: Fingerprint,
        observed: Option<Fingerprint>,
    },
    /// Nothing vouched for the chain (no pin and no trust store, or leaf incomplete)
    Untrusted,
    /// Engine failure unrelated to the certificate decision
    Handshake(HandshakeError),
    /// Connect failed or timed out
    Transport(TransportError),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FingerprintMismatch { expected, .. } => {
                write!(f, "fingerprint mismatch, pinned {}", expected)
            }
            Self::Untrusted => write!(f, "server certificate not trusted"),
            Self::Handshake(e) => write!(f, "{}", e),
            Self::Transport(e) => write!(f, "{}", e),
        }
    }
}

impl core::error::Error for ClientError {}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

/// Settings could not be persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PersistenceError {
    /// Storage backend reported a failure
    Storage,
    /// Settings did not fit the record buffer
    Encode,
    /// A pin is already stored; it must be cleared explicitly first
    PinAlreadySet,
    /// Submitted field does not fit or does not parse
    InvalidField,
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage => write!(f, "storage write failed"),
            Self::Encode => write!(f, "settings encoding failed"),
            Self::PinAlreadySet => write!(f, "fingerprint already pinned"),
            Self::InvalidField => write!(f, "invalid settings field"),
        }
    }
}

impl core::error::Error for PersistenceError {}

/// Why stored settings cannot be used for normal operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigIssue {
    /// Nothing stored yet
    Missing,
    /// Stored record does not decode
    Corrupt,
    /// Stored record has another version tag
    VersionMismatch,
    /// No network name
    MissingSsid,
    /// Collector token absent or shorter than 5 characters
    TokenTooShort,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "no stored settings"),
            Self::Corrupt => write!(f, "stored settings corrupt"),
            Self::VersionMismatch => write!(f, "stored settings version mismatch"),
            Self::MissingSsid => write!(f, "network name missing"),
            Self::TokenTooShort => write!(f, "collector token missing or too short"),
        }
    }
}

impl core::error::Error for ConfigIssue {}

/// Bring-up did not reach a pinned collector session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootstrapError {
    /// A provisioning request is pending; the caller should poll the controller
    Interrupted,
    /// Settings are not usable
    NotConfigured(ConfigIssue),
    /// Captured fingerprint could not be saved
    Persistence(PersistenceError),
    /// Collector connection failed
    Client(ClientError),
}

impl fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupted => write!(f, "interrupted by provisioning request"),
            Self::NotConfigured(issue) => write!(f, "not configured: {}", issue),
            Self::Persistence(e) => write!(f, "{}", e),
            Self::Client(e) => write!(f, "{}", e),
        }
    }
}

impl core::error::Error for BootstrapError {}

impl From<PersistenceError> for BootstrapError {
    fn from(e: PersistenceError) -> Self {
        Self::Persistence(e)
    }
}

impl From<ClientError> for BootstrapError {
    fn from(e: ClientError) -> Self {
        Self::Client(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::Error as _;

    #[test]
    fn test_transport_kind_round_trip() {
        for e in [
            TransportError::Timeout,
            TransportError::Refused,
            TransportError::Reset,
            TransportError::Closed,
            TransportError::Unreachable,
            TransportError::Other,
        ] {
            assert_eq!(TransportError::from_kind(e.kind()), e);
        }
    }

    #[test]
    fn test_display() {
        let e = ProbeError::GaveUp {
            attempts: 15,
            last: AttemptFailure::Transport(TransportError::Refused),
        };
        assert_eq!(
            format!("{}", e),
            "gave up after 15 attempts, last: connection refused"
        );
        assert_eq!(
            format!("{}", BootstrapError::NotConfigured(ConfigIssue::MissingSsid)),
            "not configured: network name missing"
        );
    }
}
