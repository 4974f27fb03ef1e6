//! Provisioning/operating state machine

use relay_hal::{RecordStorage, Uptime};

use super::trigger::{PendingRequest, TriggerSlot};
use crate::config::ModeTimings;
use crate::error::PersistenceError;
use crate::storage::Settings;
use crate::tls::Cancellation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceMode {
    /// Connected to the collector and relaying
    Operating,
    /// Portal up, waiting for settings
    Provisioning,
}

/// A transition that has been persisted and must now be acted on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModeChange {
    pub from: DeviceMode,
    pub to: DeviceMode,
}

/// Decides the device mode from stored settings, trigger requests and uptime.
///
/// The controller never performs side effects itself. A [`ModeChange`] is
/// returned only after the new provisioning flag is stored, so the caller may
/// reset or tear down connections right away.
pub struct ModeController<'t, C> {
    trigger: &'t TriggerSlot,
    clock: C,
    timings: ModeTimings,
    mode: DeviceMode,
    /// Entry into the current mode, or the last trigger while provisioning
    window_start_ms: u64,
}

impl<'t, C: Uptime> ModeController<'t, C> {
    /// Pick the boot mode. Reads settings but never writes them.
    pub fn boot<S: RecordStorage>(
        trigger: &'t TriggerSlot,
        clock: C,
        timings: ModeTimings,
        settings: &Settings<S>,
    ) -> Self {
        let mode = match settings.issue() {
            Some(issue) => {
                warn!("Settings not usable ({}), starting in provisioning", issue);
                DeviceMode::Provisioning
            }
            None if settings.config().provisioning => {
                info!("Provisioning requested before reset");
                DeviceMode::Provisioning
            }
            None => DeviceMode::Operating,
        };

        let window_start_ms = clock.uptime_ms();
        let controller = Self {
            trigger,
            clock,
            timings,
            mode,
            window_start_ms,
        };

        // Presses during the grace period are never acted on, however late
        // the first poll runs
        let in_grace = controller.in_grace(window_start_ms);
        trigger.set_accepting(!in_grace);
        if in_grace {
            trigger.take();
        }
        controller
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    /// Time left before provisioning ends on its own
    pub fn provisioning_remaining_ms(&self) -> Option<u64> {
        match self.mode {
            DeviceMode::Provisioning => {
                let elapsed = self.clock.uptime_ms().saturating_sub(self.window_start_ms);
                Some(self.timings.provisioning_timeout_ms.saturating_sub(elapsed))
            }
            DeviceMode::Operating => None,
        }
    }

    /// Time left before trigger presses are accepted
    pub fn grace_remaining_ms(&self) -> u64 {
        self.timings.grace_ms.saturating_sub(self.clock.uptime_ms())
    }

    fn in_grace(&self, now: u64) -> bool {
        now < self.timings.grace_ms
    }

    /// Open the trigger slot once the grace period is over
    fn settle(&self, now: u64) {
        if !self.in_grace(now) && !self.trigger.is_accepting() {
            debug!("Boot grace period over, trigger armed");
            self.trigger.set_accepting(true);
        }
    }

    /// Handle the pending request and the provisioning timeout.
    ///
    /// On a persistence failure the mode is unchanged and the request is put
    /// back, so the next poll tries again.
    pub async fn poll<S: RecordStorage>(
        &mut self,
        settings: &mut Settings<S>,
    ) -> Result<Option<ModeChange>, PersistenceError> {
        let now = self.clock.uptime_ms();
        self.settle(now);
        let request = self.trigger.take();

        if self.in_grace(now) {
            if request != PendingRequest::None {
                debug!("Discarding {:?} during boot grace period", request);
            }
            return Ok(None);
        }

        let target = match (self.mode, request) {
            (DeviceMode::Operating, PendingRequest::EnterProvisioning) => {
                Some(DeviceMode::Provisioning)
            }
            (DeviceMode::Provisioning, PendingRequest::EnterProvisioning) => {
                debug!("Provisioning window extended");
                self.window_start_ms = now;
                None
            }
            (DeviceMode::Provisioning, PendingRequest::LeaveProvisioning) => {
                Some(DeviceMode::Operating)
            }
            (DeviceMode::Provisioning, PendingRequest::None)
                if now.saturating_sub(self.window_start_ms)
                    > self.timings.provisioning_timeout_ms =>
            {
                Some(DeviceMode::Operating)
            }
            _ => None,
        };

        let Some(target) = target else {
            return Ok(None);
        };

        if target == DeviceMode::Operating {
            if let Some(issue) = settings.issue() {
                info!("Staying in provisioning: {}", issue);
                self.window_start_ms = now;
                return Ok(None);
            }
        }

        if let Err(e) = settings
            .set_provisioning(target == DeviceMode::Provisioning)
            .await
        {
            error!("Could not persist mode {:?}: {}", target, e);
            if request != PendingRequest::None {
                self.trigger.restore(request);
            }
            return Err(e);
        }

        let change = ModeChange {
            from: self.mode,
            to: target,
        };
        info!("Mode change {:?} -> {:?}", change.from, change.to);
        self.mode = target;
        self.window_start_ms = now;
        Ok(Some(change))
    }
}

/// Long operations stop once a provisioning request is waiting
impl<C: Uptime> Cancellation for ModeController<'_, C> {
    fn is_cancelled(&self) -> bool {
        let now = self.clock.uptime_ms();
        self.settle(now);
        self.mode == DeviceMode::Operating
            && !self.in_grace(now)
            && self.trigger.peek() == PendingRequest::EnterProvisioning
    }
}
