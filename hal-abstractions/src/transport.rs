//! Outbound stream transport

use core::future::Future;

use embedded_io_async::{Read, Write};

/// Opens byte-stream connections to a remote host.
///
/// The returned connection borrows the connector (socket buffers usually live
/// there), so at most one connection is open at a time. Dropping the
/// connection closes it.
///
/// # Example Implementation
/// ```ignore
/// impl Connector for TcpConnector<'_> {
///     type Error = NetworkError;
///     type Connection<'a> = AsyncTcpSocket<'a> where Self: 'a;
///
///     async fn connect<'a>(&'a mut self, host: &str, port: u16)
///         -> Result<Self::Connection<'a>, Self::Error> {
///         // resolve, create socket over self.rx/self.tx, connect
///     }
/// }
/// ```
pub trait Connector {
    /// Connect failure, classified through [`embedded_io::Error::kind`]
    type Error: embedded_io::Error;

    /// An established connection
    type Connection<'a>: Read + Write
    where
        Self: 'a;

    /// Resolve `host` and open a connection to `host:port`
    fn connect<'a>(
        &'a mut self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = Result<Self::Connection<'a>, Self::Error>>;
}
