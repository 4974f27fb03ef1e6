//! Certificate-chain interception
//!
//! A TLS engine reports the server's certificate chain through the
//! [`ChainObserver`] hooks. [`CertificateInterceptor`] sits on those hooks,
//! digests the leaf certificate, and decides whether the engine may trust the
//! chain.
//!
//! ## Hook order
//!
//! Per handshake the engine calls:
//!
//! 1. `on_chain_start(server_name)` once
//! 2. `on_certificate_bytes(chunk)` zero or more times per certificate
//! 3. `on_certificate_boundary()` after each certificate
//! 4. `on_chain_end()` once, returning the [`TrustDecision`]
//!
//! Only bytes before the first boundary (the leaf) are digested. Chunking is
//! irrelevant to the result.
//!
//! ## Example
//!
//! ```
//! use relay_core::tls::{CertificateInterceptor, ChainObserver, TrustDecision};
//!
//! let mut interceptor = CertificateInterceptor::capture();
//! interceptor.on_chain_start(Some("collector.local"));
//! interceptor.on_certificate_bytes(b"leaf ");
//! interceptor.on_certificate_bytes(b"der");
//! interceptor.on_certificate_boundary();
//! interceptor.on_certificate_bytes(b"issuer der");
//! interceptor.on_certificate_boundary();
//!
//! match interceptor.on_chain_end() {
//!     TrustDecision::Captured(fp) => assert_eq!(fp.as_bytes().len(), 20),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

use core::fmt;

use super::digest::LeafDigest;
use super::fingerprint::Fingerprint;

/// Outcome of one chain verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TrustDecision {
    /// Leaf digested in capture mode; the chain is not trusted
    Captured(Fingerprint),
    /// Chain accepted (pin matched, or the fallback trusted it)
    Matched,
    /// Leaf digest differs from the pin, or the fallback refused the chain
    Mismatched,
    /// The leaf was never completely observed
    Inconclusive,
}

impl TrustDecision {
    /// Whether an engine may complete the handshake
    pub fn accepts(&self) -> bool {
        matches!(self, Self::Matched)
    }
}

impl fmt::Display for TrustDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Captured(fp) => write!(f, "captured {}", fp),
            Self::Matched => write!(f, "matched"),
            Self::Mismatched => write!(f, "mismatched"),
            Self::Inconclusive => write!(f, "inconclusive"),
        }
    }
}

/// Lifecycle hooks a TLS engine drives while verifying the server chain
pub trait ChainObserver {
    fn on_chain_start(&mut self, server_name: Option<&str>);
    fn on_certificate_bytes(&mut self, chunk: &[u8]);
    fn on_certificate_boundary(&mut self);
    fn on_chain_end(&mut self) -> TrustDecision;
}

impl<T: ChainObserver + ?Sized> ChainObserver for &mut T {
    fn on_chain_start(&mut self, server_name: Option<&str>) {
        (**self).on_chain_start(server_name)
    }

    fn on_certificate_bytes(&mut self, chunk: &[u8]) {
        (**self).on_certificate_bytes(chunk)
    }

    fn on_certificate_boundary(&mut self) {
        (**self).on_certificate_boundary()
    }

    fn on_chain_end(&mut self) -> TrustDecision {
        (**self).on_chain_end()
    }
}

/// Fallback for unpinned verification when the device has no trust store.
///
/// Never trusts anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTrustStore;

impl ChainObserver for NoTrustStore {
    fn on_chain_start(&mut self, _server_name: Option<&str>) {}

    fn on_certificate_bytes(&mut self, _chunk: &[u8]) {}

    fn on_certificate_boundary(&mut self) {}

    fn on_chain_end(&mut self) -> TrustDecision {
        TrustDecision::Inconclusive
    }
}

/// What the interceptor does with the leaf digest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InterceptMode {
    /// Report the fingerprint, never trust
    Capture,
    /// Trust only a leaf matching the pin; without a pin, defer to the fallback
    Verify(Option<Fingerprint>),
}

/// Per-handshake observation of the leaf certificate
#[derive(Clone, Default)]
enum Observation {
    /// No chain started
    #[default]
    Idle,
    /// Digesting leaf bytes
    Leaf(LeafDigest),
    /// Leaf complete; later certificates are ignored
    Complete(Option<Fingerprint>),
}

/// Leaf-certificate interceptor composed over a fallback observer.
///
/// All hooks are forwarded to the fallback so it can run its own validation;
/// its decision is only used in verify mode without a pin.
pub struct CertificateInterceptor<F = NoTrustStore> {
    mode: InterceptMode,
    observation: Observation,
    decision: Option<TrustDecision>,
    observed: Option<Fingerprint>,
    fallback: F,
}

impl CertificateInterceptor<NoTrustStore> {
    /// Interceptor for the trust-on-first-use probe
    pub fn capture() -> Self {
        Self::with_fallback(InterceptMode::Capture, NoTrustStore)
    }

    /// Interceptor for pinned connections
    pub fn verify(pin: Option<Fingerprint>) -> Self {
        Self::with_fallback(InterceptMode::Verify(pin), NoTrustStore)
    }
}

impl<F: ChainObserver> CertificateInterceptor<F> {
    pub fn with_fallback(mode: InterceptMode, fallback: F) -> Self {
        Self {
            mode,
            observation: Observation::Idle,
            decision: None,
            observed: None,
            fallback,
        }
    }

    pub fn mode(&self) -> InterceptMode {
        self.mode
    }

    /// Decision of the last completed chain, if the engine got that far
    pub fn decision(&self) -> Option<TrustDecision> {
        self.decision
    }

    /// Leaf fingerprint seen in the last completed chain
    pub fn observed(&self) -> Option<Fingerprint> {
        self.observed
    }

    fn decide(&mut self, leaf: Option<Fingerprint>) -> TrustDecision {
        match (self.mode, leaf) {
            (InterceptMode::Capture, Some(fp)) => TrustDecision::Captured(fp),
            (InterceptMode::Capture, None) => TrustDecision::Inconclusive,
            (InterceptMode::Verify(None), _) => self.fallback.on_chain_end(),
            (InterceptMode::Verify(Some(pin)), Some(fp)) if fp.matches(&pin) => {
                TrustDecision::Matched
            }
            (InterceptMode::Verify(Some(_)), Some(_)) => TrustDecision::Mismatched,
            (InterceptMode::Verify(Some(_)), None) => TrustDecision::Inconclusive,
        }
    }
}

impl<F: ChainObserver> ChainObserver for CertificateInterceptor<F> {
    fn on_chain_start(&mut self, server_name: Option<&str>) {
        trace!("certificate chain start");
        self.observation = Observation::Leaf(LeafDigest::new());
        self.decision = None;
        self.observed = None;
        self.fallback.on_chain_start(server_name);
    }

    fn on_certificate_bytes(&mut self, chunk: &[u8]) {
        if let Observation::Leaf(digest) = &mut self.observation {
            digest.update(chunk);
        }
        self.fallback.on_certificate_bytes(chunk);
    }

    fn on_certificate_boundary(&mut self) {
        self.observation = match core::mem::take(&mut self.observation) {
            Observation::Leaf(digest) if digest.is_empty() => Observation::Complete(None),
            Observation::Leaf(digest) => Observation::Complete(Some(digest.finalize())),
            other => other,
        };
        self.fallback.on_certificate_boundary();
    }

    fn on_chain_end(&mut self) -> TrustDecision {
        let leaf = match core::mem::take(&mut self.observation) {
            Observation::Complete(leaf) => leaf,
            Observation::Leaf(_) => {
                debug!("chain ended before the leaf certificate completed");
                None
            }
            Observation::Idle => {
                debug!("chain end without chain start");
                None
            }
        };

        // The fallback sees the end of every chain it saw the start of
        let decision = match self.mode {
            InterceptMode::Verify(None) => self.decide(leaf),
            _ => {
                let _ = self.fallback.on_chain_end();
                self.decide(leaf)
            }
        };

        self.observed = leaf;
        self.decision = Some(decision);
        debug!("certificate chain decision: {}", decision);
        decision
    }
}
