//! Certificate pinning on top of a pluggable TLS engine

mod digest;
mod engine;
mod fingerprint;
mod interceptor;
mod pinned;
mod probe;
mod stream;

pub use digest::LeafDigest;
pub use engine::{CipherSuite, HandshakeParams, TlsEngine, TlsProfile, TlsVersion};
pub use fingerprint::{Fingerprint, FingerprintParseError, FINGERPRINT_LEN, FINGERPRINT_TEXT_LEN};
pub use interceptor::{
    CertificateInterceptor, ChainObserver, InterceptMode, NoTrustStore, TrustDecision,
};
pub use pinned::{PinnedClient, PinnedClientFactory};
pub use probe::{Cancellation, NeverCancel, TrustProbe};
pub use stream::{with_timeout, Elapsed, TimedStream};
