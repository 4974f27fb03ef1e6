//! Operating-mode control
//!
//! The device runs in one of two modes. A hardware trigger (or the portal's
//! save action) posts a request into a [`TriggerSlot`] from interrupt context;
//! the control loop polls a [`ModeController`], which decides whether the
//! request causes a transition and persists the new mode before announcing it.

mod controller;
mod trigger;

pub use controller::{DeviceMode, ModeChange, ModeController};
pub use trigger::{PendingRequest, TriggerSlot};
