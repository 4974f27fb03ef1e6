//! Host-side doubles for the hardware seams

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::string::String;
use std::vec::Vec;

use embedded_hal_async::delay::DelayNs;
use embedded_io::ErrorKind;
use embedded_io_async::{ErrorType, Read, ReadExactError, Write};
use relay_hal::{Connector, FormFields, NetworkLink, RecordStorage, Uptime};

use crate::config::{DeviceConfig, CONFIG_RECORD_MAX};
use crate::error::{HandshakeError, TransportError};
use crate::tls::{ChainObserver, CipherSuite, HandshakeParams, TlsEngine, TlsVersion};

/// DER-looking leaf served by the collector under test
pub const SELF_SIGNED_LEAF: &[u8] = b"0\x82\x01\x22\x30\x81\xc9\xa0\x03\x02\x01\x02\x02\x14\
    collector-leaf-certificate subject=CN=collector.local issuer=CN=relay-lab-ca \
    spki=04:6b:17:d1:f2:e1:2c:42:47:f8:bc:e6:e5:63:a4:40";

pub const SIGNING_CA: &[u8] = b"0\x82\x01\x10\x30\x81\xb7\xa0\x03\x02\x01\x02\x02\x14\
    relay-lab-ca subject=CN=relay-lab-ca issuer=CN=relay-lab-ca";

/// A different leaf for the same host name
pub const ROGUE_LEAF: &[u8] = b"0\x82\x01\x22\x30\x81\xc9\xa0\x03\x02\x01\x02\x02\x14\
    collector-leaf-certificate subject=CN=collector.local issuer=CN=someone-else \
    spki=04:1f:3c:88:02:9a:57:0e:61:b4:dd:90:2a:c5:7e:11";

/// Settings that pass validation and point at a self-hosted collector
pub fn operable_config() -> DeviceConfig {
    let mut config = DeviceConfig::default();
    config.ssid.push_str("workshop").unwrap();
    config.password.push_str("hunter22").unwrap();
    config.collector.push_str("10.0.0.5").unwrap();
    config.token.push_str("Zr8qTmuA").unwrap();
    config
}

/// Delay that completes immediately and records what was asked of it
#[derive(Clone, Default)]
pub struct MockDelay {
    calls: Rc<RefCell<Vec<u32>>>,
    total_ns: Rc<Cell<u64>>,
}

impl MockDelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Millisecond delays that actually ran, in order
    pub fn calls(&self) -> Vec<u32> {
        self.calls.borrow().clone()
    }

    pub fn total_ms(&self) -> u64 {
        self.total_ns.get() / 1_000_000
    }
}

impl DelayNs for MockDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.total_ns.set(self.total_ns.get() + u64::from(ns));
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.calls.borrow_mut().push(ms);
        self.total_ns.set(self.total_ns.get() + u64::from(ms) * 1_000_000);
    }
}

/// Settable uptime shared between clones
#[derive(Clone, Default)]
pub struct MockClock(Rc<Cell<u64>>);

impl MockClock {
    pub fn at(ms: u64) -> Self {
        Self(Rc::new(Cell::new(ms)))
    }

    pub fn set(&self, ms: u64) {
        self.0.set(ms);
    }

    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }
}

impl Uptime for MockClock {
    fn uptime_ms(&self) -> u64 {
        self.0.get()
    }
}

/// Scripted remote end of a connection
#[derive(Clone, Default)]
pub struct PeerStream {
    rx: Vec<u8>,
    pos: usize,
    max_read: Option<usize>,
    interrupts: u32,
    eof_at: Option<usize>,
    hang_at: Option<usize>,
    written: Vec<u8>,
}

impl PeerStream {
    pub fn with_bytes(bytes: &[u8]) -> Self {
        Self {
            rx: bytes.to_vec(),
            ..Self::default()
        }
    }

    /// Peer that never sends anything
    pub fn silent() -> Self {
        Self {
            hang_at: Some(0),
            ..Self::default()
        }
    }

    /// Peer presenting `chain` to a [`SimulatedEngine`]
    pub fn serving(chain: &[&[u8]]) -> Self {
        Self::with_bytes(&chain_frames(chain))
    }

    /// Deliver at most `n` bytes per read
    pub fn max_read(mut self, n: usize) -> Self {
        self.max_read = Some(n);
        self
    }

    /// Fail the next `n` reads with a transient error
    pub fn interrupted(mut self, n: u32) -> Self {
        self.interrupts = n;
        self
    }

    /// Close the connection after `n` bytes
    pub fn truncate(mut self, n: usize) -> Self {
        self.eof_at = Some(n);
        self
    }

    /// Stop answering after `n` bytes
    pub fn hang_after(mut self, n: usize) -> Self {
        self.hang_at = Some(n);
        self
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }
}

impl ErrorType for PeerStream {
    type Error = ErrorKind;
}

impl Read for PeerStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.interrupts > 0 {
            self.interrupts -= 1;
            return Err(ErrorKind::Interrupted);
        }
        if self.hang_at.is_some_and(|at| self.pos >= at) {
            core::future::pending::<()>().await;
        }

        let mut limit = self.rx.len();
        if let Some(at) = self.eof_at {
            limit = limit.min(at);
        }
        if let Some(at) = self.hang_at {
            limit = limit.min(at);
        }

        let mut n = buf.len().min(limit.saturating_sub(self.pos));
        if let Some(max) = self.max_read {
            n = n.min(max);
        }
        buf[..n].copy_from_slice(&self.rx[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for PeerStream {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// `[count:u8]` then `[len:u16 BE][der]` per certificate
pub fn chain_frames(chain: &[&[u8]]) -> Vec<u8> {
    let mut out = vec![chain.len() as u8];
    for cert in chain {
        out.extend_from_slice(&(cert.len() as u16).to_be_bytes());
        out.extend_from_slice(cert);
    }
    out
}

/// Connector handing out copies of scripted peers
pub struct MockConnector {
    peers: Vec<PeerStream>,
    refuse_first: u32,
    refusal: ErrorKind,
    hang: bool,
    connects: u32,
    last: Option<(String, u16)>,
}

impl MockConnector {
    fn blank() -> Self {
        Self {
            peers: Vec::new(),
            refuse_first: 0,
            refusal: ErrorKind::ConnectionRefused,
            hang: false,
            connects: 0,
            last: None,
        }
    }

    pub fn serving(peer: PeerStream) -> Self {
        Self {
            peers: vec![peer],
            ..Self::blank()
        }
    }

    pub fn refusing(kind: ErrorKind) -> Self {
        Self {
            refusal: kind,
            ..Self::blank()
        }
    }

    /// Connect never completes
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::blank()
        }
    }

    /// Serve `peer` once the previously queued peers have been used
    pub fn then_serving(mut self, peer: PeerStream) -> Self {
        self.peers.push(peer);
        self
    }

    pub fn refuse_first(mut self, n: u32, kind: ErrorKind) -> Self {
        self.refuse_first = n;
        self.refusal = kind;
        self
    }

    pub fn connects(&self) -> u32 {
        self.connects
    }

    pub fn last_endpoint(&self) -> Option<(String, u16)> {
        self.last.clone()
    }
}

impl Connector for MockConnector {
    type Error = ErrorKind;
    type Connection<'a>
        = PeerStream
    where
        Self: 'a;

    async fn connect<'a>(
        &'a mut self,
        host: &str,
        port: u16,
    ) -> Result<Self::Connection<'a>, Self::Error> {
        self.connects += 1;
        self.last = Some((String::from(host), port));
        if self.hang {
            core::future::pending::<()>().await;
        }
        if self.connects <= self.refuse_first {
            return Err(self.refusal);
        }

        let served = (self.connects - self.refuse_first - 1) as usize;
        match self.peers.len() {
            0 => Err(self.refusal),
            len => Ok(self.peers[served.min(len - 1)].clone()),
        }
    }
}

/// Link that comes up after a number of failed joins
pub struct MockLink {
    failures_left: u32,
    up: bool,
    joins: Vec<(String, String)>,
}

impl MockLink {
    pub fn failing(n: u32) -> Self {
        Self {
            failures_left: n,
            up: false,
            joins: Vec::new(),
        }
    }

    pub fn joins(&self) -> &[(String, String)] {
        &self.joins
    }
}

impl NetworkLink for MockLink {
    type Error = ();

    async fn join(&mut self, ssid: &str, password: &str) -> Result<(), Self::Error> {
        self.joins.push((String::from(ssid), String::from(password)));
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(());
        }
        self.up = true;
        Ok(())
    }

    fn is_up(&self) -> bool {
        self.up
    }
}

/// Toy handshake: reads a framed chain, reports it to the observer, and
/// completes only when the observer accepts (unless built with `trusting`).
pub struct SimulatedEngine {
    chunk: usize,
    enforce: bool,
    /// Failure reported after the chain was accepted
    after_accept: Option<HandshakeError>,
    handshakes: u32,
}

impl SimulatedEngine {
    /// Report certificate bytes in pieces of at most `chunk`
    pub fn new(chunk: usize) -> Self {
        Self {
            chunk: chunk.max(1),
            enforce: true,
            after_accept: None,
            handshakes: 0,
        }
    }

    /// Engine that accepts the chain, then fails the key exchange with `e`
    pub fn failing_after_accept(chunk: usize, e: HandshakeError) -> Self {
        Self {
            after_accept: Some(e),
            ..Self::new(chunk)
        }
    }

    /// Engine that completes whatever the observer decides
    pub fn trusting() -> Self {
        Self {
            enforce: false,
            ..Self::new(16)
        }
    }

    pub fn handshakes(&self) -> u32 {
        self.handshakes
    }
}

fn io_error<E: embedded_io::Error>(e: E) -> HandshakeError {
    HandshakeError::Transport(TransportError::from_io(&e))
}

fn exact_error<E: embedded_io::Error>(e: ReadExactError<E>) -> HandshakeError {
    match e {
        ReadExactError::UnexpectedEof => HandshakeError::Transport(TransportError::Closed),
        ReadExactError::Other(e) => io_error(e),
    }
}

impl TlsEngine for SimulatedEngine {
    type Session<'a, S>
        = SimSession<S>
    where
        Self: 'a,
        S: Read + Write + 'a;

    async fn open<'a, S, O>(
        &'a mut self,
        mut stream: S,
        params: HandshakeParams<'_>,
        observer: &mut O,
    ) -> Result<Self::Session<'a, S>, HandshakeError>
    where
        S: Read + Write + 'a,
        O: ChainObserver,
    {
        self.handshakes += 1;
        if !params.profile.allows_version(TlsVersion::Tls13)
            || !params.profile.allows_suite(CipherSuite::Aes128GcmSha256)
        {
            return Err(HandshakeError::Unsupported);
        }

        stream.write_all(b"HELLO ").await.map_err(io_error)?;
        stream
            .write_all(params.server_name.as_bytes())
            .await
            .map_err(io_error)?;
        stream.flush().await.map_err(io_error)?;

        let mut count = [0u8; 1];
        stream.read_exact(&mut count).await.map_err(exact_error)?;
        observer.on_chain_start(Some(params.server_name));

        let mut buf = [0u8; 64];
        for _ in 0..count[0] {
            let mut len = [0u8; 2];
            stream.read_exact(&mut len).await.map_err(exact_error)?;
            let mut remaining = usize::from(u16::from_be_bytes(len));
            while remaining > 0 {
                let want = remaining.min(self.chunk).min(buf.len());
                let n = stream.read(&mut buf[..want]).await.map_err(io_error)?;
                if n == 0 {
                    return Err(HandshakeError::Transport(TransportError::Closed));
                }
                observer.on_certificate_bytes(&buf[..n]);
                remaining -= n;
            }
            observer.on_certificate_boundary();
        }

        let decision = observer.on_chain_end();
        if self.enforce && !decision.accepts() {
            return Err(HandshakeError::CertificateRejected);
        }
        if let Some(e) = self.after_accept {
            return Err(e);
        }
        Ok(SimSession { stream })
    }
}

/// Established [`SimulatedEngine`] session; plaintext passthrough
pub struct SimSession<S> {
    stream: S,
}

impl<S> SimSession<S> {
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: ErrorType> ErrorType for SimSession<S> {
    type Error = S::Error;
}

impl<S: Read> Read for SimSession<S> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.stream.read(buf).await
    }
}

impl<S: Write> Write for SimSession<S> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.stream.write(buf).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.stream.flush().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageFault;

#[derive(Default)]
struct StoredRecord {
    record: Option<Vec<u8>>,
    fail_writes: u32,
    writes: u32,
}

/// In-memory record storage shared between clones
#[derive(Clone, Default)]
pub struct MemoryStorage(Rc<RefCell<StoredRecord>>);

impl MemoryStorage {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn holding(bytes: &[u8]) -> Self {
        let storage = Self::default();
        storage.0.borrow_mut().record = Some(bytes.to_vec());
        storage
    }

    pub fn with_config(config: &DeviceConfig) -> Self {
        let mut buf = [0u8; CONFIG_RECORD_MAX];
        let len = config.encode(&mut buf).unwrap();
        Self::holding(&buf[..len])
    }

    pub fn fail_next_writes(&self, n: u32) {
        self.0.borrow_mut().fail_writes = n;
    }

    /// Successful writes so far
    pub fn writes(&self) -> u32 {
        self.0.borrow().writes
    }

    pub fn stored_config(&self) -> Option<DeviceConfig> {
        let inner = self.0.borrow();
        inner
            .record
            .as_deref()
            .map(|bytes| DeviceConfig::decode(bytes).unwrap())
    }
}

impl RecordStorage for MemoryStorage {
    type Error = StorageFault;

    async fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, Self::Error> {
        let inner = self.0.borrow();
        match inner.record.as_deref() {
            None => Ok(None),
            Some(bytes) if bytes.len() > buf.len() => Err(StorageFault),
            Some(bytes) => {
                buf[..bytes.len()].copy_from_slice(bytes);
                Ok(Some(bytes.len()))
            }
        }
    }

    async fn write(&mut self, record: &[u8]) -> Result<(), Self::Error> {
        let mut inner = self.0.borrow_mut();
        if inner.fail_writes > 0 {
            inner.fail_writes -= 1;
            return Err(StorageFault);
        }
        inner.record = Some(record.to_vec());
        inner.writes += 1;
        Ok(())
    }
}

/// Submitted portal form
pub struct FormMap(Vec<(&'static str, String)>);

impl FormMap {
    pub fn new(fields: &[(&'static str, &str)]) -> Self {
        Self(
            fields
                .iter()
                .map(|(name, value)| (*name, String::from(*value)))
                .collect(),
        )
    }
}

impl FormFields for FormMap {
    fn field(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}
