//! Bounded waits on transport operations
//!
//! Every connect, read, write and handshake on this device must finish within
//! a known bound, otherwise a silent peer would wedge the single control loop.

use core::future::Future;

use embassy_futures::select::{select, Either};
use embedded_hal_async::delay::DelayNs;
use embedded_io::{Error as _, ErrorKind};
use embedded_io_async::{ErrorType, Read, Write};

use crate::config::IoTimeouts;
use crate::error::TransportError;

/// Deadline passed before the operation completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Elapsed;

/// Race `fut` against a delay of `ms` milliseconds.
///
/// `fut` is polled first, so an operation that is already complete wins over
/// a zero-length delay.
pub async fn with_timeout<D, F>(delay: &mut D, ms: u32, fut: F) -> Result<F::Output, Elapsed>
where
    D: DelayNs,
    F: Future,
{
    match select(fut, delay.delay_ms(ms)).await {
        Either::First(output) => Ok(output),
        Either::Second(()) => Err(Elapsed),
    }
}

/// Transport stream with a bounded wait on every read, write and flush.
///
/// Reads and writes failing with [`ErrorKind::Interrupted`] are retried up
/// to `transient_retries` times before the error is surfaced.
pub struct TimedStream<S, D> {
    inner: S,
    delay: D,
    timeouts: IoTimeouts,
}

impl<S, D> TimedStream<S, D> {
    pub fn new(inner: S, delay: D, timeouts: IoTimeouts) -> Self {
        Self {
            inner,
            delay,
            timeouts,
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, D> ErrorType for TimedStream<S, D> {
    type Error = TransportError;
}

impl<S: Read, D: DelayNs> Read for TimedStream<S, D> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut transient = 0;
        loop {
            match select(self.inner.read(buf), self.delay.delay_ms(self.timeouts.read_ms)).await {
                Either::First(Ok(n)) => return Ok(n),
                Either::First(Err(e))
                    if e.kind() == ErrorKind::Interrupted
                        && transient < self.timeouts.transient_retries =>
                {
                    transient += 1;
                    trace!("transient read error, retry {}", transient);
                }
                Either::First(Err(e)) => return Err(TransportError::from_io(&e)),
                Either::Second(()) => {
                    debug!("read timed out after {} ms", self.timeouts.read_ms);
                    return Err(TransportError::Timeout);
                }
            }
        }
    }
}

impl<S: Write, D: DelayNs> Write for TimedStream<S, D> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut transient = 0;
        loop {
            match select(self.inner.write(buf), self.delay.delay_ms(self.timeouts.write_ms)).await
            {
                Either::First(Ok(n)) => return Ok(n),
                Either::First(Err(e))
                    if e.kind() == ErrorKind::Interrupted
                        && transient < self.timeouts.transient_retries =>
                {
                    transient += 1;
                    trace!("transient write error, retry {}", transient);
                }
                Either::First(Err(e)) => return Err(TransportError::from_io(&e)),
                Either::Second(()) => {
                    debug!("write timed out after {} ms", self.timeouts.write_ms);
                    return Err(TransportError::Timeout);
                }
            }
        }
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        match select(self.inner.flush(), self.delay.delay_ms(self.timeouts.write_ms)).await {
            Either::First(result) => result.map_err(|e| TransportError::from_io(&e)),
            Either::Second(()) => Err(TransportError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDelay, PeerStream};
    use embassy_futures::block_on;

    #[test]
    fn test_with_timeout_prefers_ready_future() {
        let mut delay = MockDelay::new();
        let result = block_on(with_timeout(&mut delay, 0, async { 7 }));
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn test_with_timeout_elapses_on_pending_future() {
        let mut delay = MockDelay::new();
        let result = block_on(with_timeout(&mut delay, 250, core::future::pending::<()>()));
        assert_eq!(result, Err(Elapsed));
        assert_eq!(delay.total_ms(), 250);
    }

    #[test]
    fn test_read_passes_data_through() {
        let peer = PeerStream::with_bytes(b"hello");
        let mut stream = TimedStream::new(peer, MockDelay::new(), IoTimeouts::default());
        let mut buf = [0u8; 8];
        let n = block_on(stream.read(&mut buf)).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn test_read_times_out_on_silent_peer() {
        let peer = PeerStream::silent();
        let mut stream = TimedStream::new(peer, MockDelay::new(), IoTimeouts::default());
        let mut buf = [0u8; 8];
        assert_eq!(block_on(stream.read(&mut buf)), Err(TransportError::Timeout));
    }

    #[test]
    fn test_transient_errors_are_retried_then_surfaced() {
        let timeouts = IoTimeouts {
            transient_retries: 3,
            ..IoTimeouts::default()
        };

        let peer = PeerStream::with_bytes(b"x").interrupted(3);
        let mut stream = TimedStream::new(peer, MockDelay::new(), timeouts);
        let mut buf = [0u8; 1];
        assert_eq!(block_on(stream.read(&mut buf)), Ok(1));

        let peer = PeerStream::with_bytes(b"x").interrupted(4);
        let mut stream = TimedStream::new(peer, MockDelay::new(), timeouts);
        assert_eq!(block_on(stream.read(&mut buf)), Err(TransportError::Other));
    }

    #[test]
    fn test_write_records_bytes() {
        let peer = PeerStream::with_bytes(b"");
        let mut stream = TimedStream::new(peer, MockDelay::new(), IoTimeouts::default());
        block_on(stream.write_all(b"client hello")).unwrap();
        block_on(stream.flush()).unwrap();
        assert_eq!(stream.into_inner().written(), b"client hello");
    }
}
