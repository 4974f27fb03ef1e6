//! Platform-agnostic core logic for the relay appliance firmware
//!
//! This crate contains the certificate trust bootstrap and the operating-mode
//! controller. It has NO hardware dependencies: boards plug in through the
//! traits in `relay-hal` and a [`tls::TlsEngine`] implementation.
//!
//! ## Modules
//!
//! - **`tls`**: leaf digest, fingerprints, the certificate interceptor, the
//!   trust-on-first-use probe and the pinned client factory
//! - **`mode`**: trigger slot and the provisioning/operating state machine
//! - **`storage`**: persisted device settings and a power-safe flash record store
//! - **`bootstrap`**: bring-up sequencing from link join to pinned session
//! - **`config`**: tunables with `Default` implementations
//! - **`error`**: error enums shared across modules
//!
//! Logging goes to `defmt` or `log` depending on the enabled feature, and
//! compiles away when neither is enabled.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod mode;
pub mod storage;
pub mod tls;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{BootstrapConfig, DeviceConfig, IoTimeouts, ModeTimings, ProbeConfig};
pub use error::{
    AttemptFailure, BootstrapError, ClientError, ConfigIssue, HandshakeError, PersistenceError,
    ProbeError, TransportError,
};
pub use mode::{DeviceMode, ModeChange, ModeController, PendingRequest, TriggerSlot};
pub use storage::{Settings, SlotLayout, SlotStore};
pub use tls::{
    Cancellation, CertificateInterceptor, ChainObserver, Fingerprint, LeafDigest, NeverCancel,
    NoTrustStore, PinnedClient, PinnedClientFactory, TlsEngine, TlsProfile, TrustDecision,
    TrustProbe,
};
