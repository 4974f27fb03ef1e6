//! Monotonic uptime

/// Milliseconds since boot. Must never go backwards.
pub trait Uptime {
    fn uptime_ms(&self) -> u64;
}

impl<T: Uptime + ?Sized> Uptime for &T {
    fn uptime_ms(&self) -> u64 {
        (**self).uptime_ms()
    }
}
