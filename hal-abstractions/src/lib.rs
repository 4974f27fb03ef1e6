//! Hardware abstraction traits for the relay appliance firmware
//!
//! This crate defines the seams between the platform-agnostic core and a
//! board support package. BSPs implement these traits; `relay-core` is
//! generic over them so it can be exercised on the host with mocks.
//!
//! - [`transport`]: outbound stream connections (TCP on real hardware)
//! - [`link`]: joining the site network with stored credentials
//! - [`storage`]: a single persisted configuration record
//! - [`clock`]: monotonic uptime
//! - [`form`]: key/value fields submitted by the provisioning portal
//!
//! Delays are expressed with [`embedded_hal_async::delay::DelayNs`].

#![no_std]
#![deny(unsafe_code)]

pub mod clock;
pub mod form;
pub mod link;
pub mod storage;
pub mod transport;

pub use clock::Uptime;
pub use embedded_hal_async::delay::DelayNs;
pub use form::FormFields;
pub use link::NetworkLink;
pub use storage::RecordStorage;
pub use transport::Connector;
