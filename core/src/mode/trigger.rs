//! Interrupt-safe request slot

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// A mode request waiting to be handled by the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PendingRequest {
    None = 0,
    EnterProvisioning = 1,
    LeaveProvisioning = 2,
}

impl PendingRequest {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::EnterProvisioning,
            2 => Self::LeaveProvisioning,
            _ => Self::None,
        }
    }
}

/// Single-slot mailbox between the trigger interrupt and the control loop.
///
/// Writers only store; the loop consumes with [`take`](Self::take). A newer
/// request overwrites an unconsumed one. Safe to share as a `static`.
///
/// Trigger assertions are dropped while the slot is closed, which the mode
/// controller does for the boot grace period.
pub struct TriggerSlot {
    slot: AtomicU8,
    accepting: AtomicBool,
}

impl TriggerSlot {
    pub const fn new() -> Self {
        Self {
            slot: AtomicU8::new(PendingRequest::None as u8),
            accepting: AtomicBool::new(true),
        }
    }

    /// Called from the trigger's interrupt handler
    pub fn on_trigger_asserted(&self) {
        if self.accepting.load(Ordering::Acquire) {
            self.slot
                .store(PendingRequest::EnterProvisioning as u8, Ordering::Release);
        }
    }

    /// Open or close the slot for trigger assertions. Leave requests always
    /// go through.
    pub(crate) fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::Release);
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Called after the portal saved new settings
    pub fn request_leave(&self) {
        self.slot
            .store(PendingRequest::LeaveProvisioning as u8, Ordering::Release);
    }

    pub fn peek(&self) -> PendingRequest {
        PendingRequest::from_raw(self.slot.load(Ordering::Acquire))
    }

    /// Consume the pending request
    pub fn take(&self) -> PendingRequest {
        PendingRequest::from_raw(
            self.slot
                .swap(PendingRequest::None as u8, Ordering::AcqRel),
        )
    }

    /// Put back a request that could not be handled, unless a newer one
    /// arrived in the meantime. Returns whether it was restored.
    pub fn restore(&self, request: PendingRequest) -> bool {
        self.slot
            .compare_exchange(
                PendingRequest::None as u8,
                request as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Default for TriggerSlot {
    fn default() -> Self {
        Self::new()
    }
}
