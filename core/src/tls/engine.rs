//! TLS engine seam
//!
//! The core does not implement TLS. A board supplies a [`TlsEngine`] that runs
//! the client handshake over a stream and reports the server certificate chain
//! through a [`ChainObserver`].
//!
//! ## Contract
//!
//! - Every certificate of the server chain is reported, leaf first, before
//!   the handshake is allowed to complete.
//! - The handshake completes only if `on_chain_end` returned a decision that
//!   [`accepts`](super::TrustDecision::accepts).
//! - A chain the observer refused fails with
//!   [`HandshakeError::CertificateRejected`].
//! - Only versions and cipher suites listed in the [`TlsProfile`] are offered.

use core::future::Future;

use embedded_io_async::{Read, Write};

use super::interceptor::ChainObserver;
use crate::error::HandshakeError;

/// Protocol versions a profile may allow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

/// Cipher suites a profile may allow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CipherSuite {
    /// TLS 1.3 `TLS_AES_128_GCM_SHA256`
    Aes128GcmSha256,
}

/// Fixed negotiation parameters for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsProfile {
    pub versions: &'static [TlsVersion],
    pub cipher_suites: &'static [CipherSuite],
}

impl TlsProfile {
    /// TLS 1.3 with AES-128-GCM only; fits the 18 KB record buffer and the
    /// crypto the target runs in software.
    pub const CONSERVATIVE: Self = Self {
        versions: &[TlsVersion::Tls13],
        cipher_suites: &[CipherSuite::Aes128GcmSha256],
    };

    pub fn allows_version(&self, version: TlsVersion) -> bool {
        self.versions.contains(&version)
    }

    pub fn allows_suite(&self, suite: CipherSuite) -> bool {
        self.cipher_suites.contains(&suite)
    }
}

impl Default for TlsProfile {
    fn default() -> Self {
        Self::CONSERVATIVE
    }
}

/// Per-handshake inputs
#[derive(Debug, Clone, Copy)]
pub struct HandshakeParams<'p> {
    /// SNI host name, also reported to the observer
    pub server_name: &'p str,
    pub profile: &'p TlsProfile,
}

/// A TLS client implementation the core can drive
pub trait TlsEngine {
    /// Established session over the stream `S`
    type Session<'a, S>: Read + Write
    where
        Self: 'a,
        S: Read + Write + 'a;

    /// Run the client handshake over `stream`.
    ///
    /// The observer is only borrowed for the handshake; the session does not
    /// keep it.
    fn open<'a, S, O>(
        &'a mut self,
        stream: S,
        params: HandshakeParams<'_>,
        observer: &mut O,
    ) -> impl Future<Output = Result<Self::Session<'a, S>, HandshakeError>>
    where
        S: Read + Write + 'a,
        O: ChainObserver;
}
