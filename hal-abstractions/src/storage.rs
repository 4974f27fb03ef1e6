//! Persisted configuration record

use core::future::Future;

/// Durable storage for a single opaque configuration record.
///
/// Implementations must make `write` atomic with respect to power loss: after
/// a reset, `read` returns either the previous record or the new one, never a
/// mix of the two.
pub trait RecordStorage {
    /// Storage failure
    type Error: core::fmt::Debug;

    /// Copy the current record into `buf`.
    ///
    /// Returns `Ok(None)` when no record has been written yet.
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<Option<usize>, Self::Error>>;

    /// Replace the current record with `record`
    fn write(&mut self, record: &[u8]) -> impl Future<Output = Result<(), Self::Error>>;
}
