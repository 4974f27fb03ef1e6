#![deny(unsafe_code)]
//! TCP transport for the TLS engine
//!
//! [`AsyncTcpSocket`] wraps `embassy_net::tcp::TcpSocket` in the
//! `embedded-io-async` traits embedded-tls reads and writes through.
//! [`TcpConnector`] owns the socket buffers and opens one connection at a
//! time for the bring-up sequence.

use defmt::{debug, warn, Debug2Format};
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::{ConnectError, Error as TcpError, TcpSocket};
use embassy_net::{IpEndpoint, Stack};
use embedded_io_async::{ErrorType, Read, Write};
use relay_hal::Connector;
use static_cell::ConstStaticCell;

use super::error::NetworkError;

/// TCP buffer size in each direction
pub const TCP_BUF_SIZE: usize = 4096;

static TCP_RX_BUF: ConstStaticCell<[u8; TCP_BUF_SIZE]> = ConstStaticCell::new([0; TCP_BUF_SIZE]);
static TCP_TX_BUF: ConstStaticCell<[u8; TCP_BUF_SIZE]> = ConstStaticCell::new([0; TCP_BUF_SIZE]);

/// Async TCP socket wrapper implementing embedded-io-async traits
pub struct AsyncTcpSocket<'a> {
    socket: TcpSocket<'a>,
}

impl<'a> AsyncTcpSocket<'a> {
    pub fn new(stack: Stack<'a>, rx_buffer: &'a mut [u8], tx_buffer: &'a mut [u8]) -> Self {
        Self {
            socket: TcpSocket::new(stack, rx_buffer, tx_buffer),
        }
    }

    /// Connect to a remote endpoint
    pub async fn connect(&mut self, endpoint: IpEndpoint) -> Result<(), NetworkError> {
        self.socket.connect(endpoint).await.map_err(|e| match e {
            ConnectError::TimedOut => NetworkError::ConnectTimeout,
            ConnectError::ConnectionReset => NetworkError::ConnectionReset,
            ConnectError::NoRoute => NetworkError::ConnectFailed,
            ConnectError::InvalidState => NetworkError::SocketError,
        })
    }
}

impl Drop for AsyncTcpSocket<'_> {
    fn drop(&mut self) {
        self.socket.abort();
    }
}

fn io_error(e: TcpError) -> NetworkError {
    match e {
        TcpError::ConnectionReset => NetworkError::ConnectionReset,
    }
}

impl ErrorType for AsyncTcpSocket<'_> {
    type Error = NetworkError;
}

impl Read for AsyncTcpSocket<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.socket.read(buf).await.map_err(io_error)
    }
}

impl Write for AsyncTcpSocket<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.socket.write(buf).await.map_err(io_error)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.socket.flush().await.map_err(io_error)
    }
}

/// Opens TCP connections over the embassy-net stack.
///
/// Host names are resolved with DNS; dotted IPv4 literals skip the query.
pub struct TcpConnector {
    stack: Stack<'static>,
    rx_buffer: &'static mut [u8; TCP_BUF_SIZE],
    tx_buffer: &'static mut [u8; TCP_BUF_SIZE],
}

impl TcpConnector {
    /// Connector over the static socket buffers. Returns `None` once they
    /// have been claimed.
    pub fn take(stack: Stack<'static>) -> Option<Self> {
        Some(Self {
            stack,
            rx_buffer: TCP_RX_BUF.try_take()?,
            tx_buffer: TCP_TX_BUF.try_take()?,
        })
    }

    async fn resolve(&self, host: &str, port: u16) -> Result<IpEndpoint, NetworkError> {
        let addrs = self
            .stack
            .dns_query(host, DnsQueryType::A)
            .await
            .map_err(|e| {
                warn!("DNS query for {} failed: {:?}", host, Debug2Format(&e));
                NetworkError::DnsError
            })?;
        let ip = addrs.first().copied().ok_or_else(|| {
            warn!("DNS returned no results for {}", host);
            NetworkError::DnsError
        })?;
        Ok(IpEndpoint::new(ip, port))
    }
}

impl Connector for TcpConnector {
    type Error = NetworkError;
    type Connection<'a> = AsyncTcpSocket<'a>;

    async fn connect<'a>(
        &'a mut self,
        host: &str,
        port: u16,
    ) -> Result<Self::Connection<'a>, Self::Error> {
        let endpoint = self.resolve(host, port).await?;
        let mut socket = AsyncTcpSocket::new(
            self.stack,
            self.rx_buffer.as_mut_slice(),
            self.tx_buffer.as_mut_slice(),
        );
        socket.connect(endpoint).await?;
        debug!("TCP connection established to {}", Debug2Format(&endpoint));
        Ok(socket)
    }
}
