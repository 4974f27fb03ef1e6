//! Pinned TLS client
//!
//! [`PinnedClientFactory`] produces one-shot clients whose certificate check
//! is a verify-mode [`CertificateInterceptor`]. With a pin, only a leaf with
//! that exact fingerprint is trusted. Without one, the decision falls back to
//! the chain observer the client was built with.

use embedded_io_async::{Read, Write};

use super::engine::{HandshakeParams, TlsEngine, TlsProfile};
use super::fingerprint::Fingerprint;
use super::interceptor::{
    CertificateInterceptor, ChainObserver, InterceptMode, NoTrustStore, TrustDecision,
};
use crate::error::ClientError;

/// Builds TLS clients that enforce an optional leaf pin
#[derive(Debug, Clone, Copy, Default)]
pub struct PinnedClientFactory {
    profile: TlsProfile,
}

impl PinnedClientFactory {
    pub const fn new(profile: TlsProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &TlsProfile {
        &self.profile
    }

    /// Client over `transport`; without a pin nothing is trusted
    pub fn build_client<S>(
        &self,
        pin: Option<Fingerprint>,
        transport: S,
    ) -> PinnedClient<'_, S, NoTrustStore> {
        self.build_client_with_fallback(pin, transport, NoTrustStore)
    }

    /// Client over `transport` that defers to `fallback` when `pin` is `None`
    pub fn build_client_with_fallback<S, F: ChainObserver>(
        &self,
        pin: Option<Fingerprint>,
        transport: S,
        fallback: F,
    ) -> PinnedClient<'_, S, F> {
        PinnedClient {
            profile: &self.profile,
            transport,
            interceptor: CertificateInterceptor::with_fallback(InterceptMode::Verify(pin), fallback),
            pin,
        }
    }
}

/// A TLS client that has not connected yet
pub struct PinnedClient<'f, S, F = NoTrustStore> {
    profile: &'f TlsProfile,
    transport: S,
    interceptor: CertificateInterceptor<F>,
    pin: Option<Fingerprint>,
}

impl<S, F> PinnedClient<'_, S, F>
where
    S: Read + Write,
    F: ChainObserver,
{
    pub fn pin(&self) -> Option<Fingerprint> {
        self.pin
    }

    /// Run the handshake on `engine`, consuming the client.
    ///
    /// A session is only returned when the interceptor matched the chain; an
    /// engine that completes anyway has its session dropped.
    pub async fn handshake<'e, E: TlsEngine>(
        self,
        engine: &'e mut E,
        server_name: &str,
    ) -> Result<E::Session<'e, S>, ClientError>
    where
        S: 'e,
    {
        let Self {
            profile,
            transport,
            mut interceptor,
            pin,
        } = self;

        let params = HandshakeParams {
            server_name,
            profile,
        };
        let result = engine.open(transport, params, &mut interceptor).await;
        let decision = interceptor.decision();

        match result {
            Ok(session) if decision == Some(TrustDecision::Matched) => {
                info!("TLS session established with {}", server_name);
                Ok(session)
            }
            Ok(session) => {
                error!("TLS engine completed an untrusted handshake, dropping session");
                drop(session);
                Err(ClientError::Untrusted)
            }
            Err(e) => {
                let err = match (decision, pin) {
                    (Some(TrustDecision::Mismatched), Some(expected)) => {
                        ClientError::FingerprintMismatch {
                            expected,
                            observed: interceptor.observed(),
                        }
                    }
                    (Some(TrustDecision::Mismatched), None)
                    | (Some(TrustDecision::Inconclusive), _)
                    | (Some(TrustDecision::Captured(_)), _) => ClientError::Untrusted,
                    (Some(TrustDecision::Matched), _) | (None, _) => ClientError::Handshake(e),
                };
                warn!("TLS handshake with {} failed: {}", server_name, err);
                Err(err)
            }
        }
    }
}
