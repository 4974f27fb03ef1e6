#![deny(unsafe_code)]
//! Uptime and delays on the TIM2 monotonic

use embedded_hal_async::delay::DelayNs;
use relay_hal::Uptime;
use rtic_monotonics::stm32::prelude::*;

use crate::Mono;

/// Uptime since `Mono::start`, in milliseconds
#[derive(Debug, Clone, Copy, Default)]
pub struct MonoClock;

impl Uptime for MonoClock {
    fn uptime_ms(&self) -> u64 {
        Mono::now().duration_since_epoch().to_millis()
    }
}

/// `DelayNs` backed by the monotonic timer queue.
///
/// Zero-sized and `Copy`, so every bounded operation can own one.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonoDelay;

impl DelayNs for MonoDelay {
    async fn delay_ns(&mut self, ns: u32) {
        // 1 MHz tick; round up so a delay never ends early
        Mono::delay(u64::from(ns.div_ceil(1_000)).micros()).await;
    }

    async fn delay_us(&mut self, us: u32) {
        Mono::delay(u64::from(us).micros()).await;
    }

    async fn delay_ms(&mut self, ms: u32) {
        Mono::delay(u64::from(ms).millis()).await;
    }
}
