//! Settings persistence
//!
//! [`Settings`] caches the decoded [`DeviceConfig`](crate::DeviceConfig) and
//! writes every change through a [`RecordStorage`](relay_hal::RecordStorage).
//! [`SlotStore`] is the flash-backed record store used on hardware.

mod settings;
mod slots;

pub use settings::Settings;
pub use slots::{SlotLayout, SlotStore, StoreError};
