//! Network link bring-up

use core::future::Future;

/// The device's uplink to the site network.
///
/// `join` makes one attempt; callers own the retry policy so they can check
/// for a pending mode change between attempts.
pub trait NetworkLink {
    /// Why a join attempt did not bring the link up
    type Error;

    /// Try to bring the link up with the stored credentials
    fn join(
        &mut self,
        ssid: &str,
        password: &str,
    ) -> impl Future<Output = Result<(), Self::Error>>;

    /// Whether the link currently has a usable address
    fn is_up(&self) -> bool;
}
