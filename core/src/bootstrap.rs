//! Bring-up sequencing from link join to a pinned collector session
//!
//! The board's control loop runs these steps in order while operating:
//!
//! 1. [`join_link`] with the stored credentials
//! 2. [`ensure_pin`] to obtain the collector pin, probing on first use
//! 3. [`connect_collector`] to open the pinned TLS session
//!
//! Every step checks the [`Cancellation`] source (normally the
//! [`ModeController`](crate::ModeController)) so a provisioning request is
//! noticed without waiting for the whole sequence.

use embedded_hal_async::delay::DelayNs;
use heapless::String;
use relay_hal::{Connector, NetworkLink, RecordStorage};

use crate::config::{BootstrapConfig, DeviceConfig};
use crate::error::{BootstrapError, ClientError, HandshakeError, ProbeError, TransportError};
use crate::storage::Settings;
use crate::tls::{
    with_timeout, Cancellation, ChainObserver, Elapsed, Fingerprint, PinnedClientFactory,
    TimedStream, TlsEngine, TrustProbe,
};

/// Collector host and port for these settings
pub fn collector_endpoint<'c>(
    config: &'c DeviceConfig,
    bootstrap: &BootstrapConfig,
) -> (&'c str, u16) {
    if config.has_custom_collector() {
        (config.collector.as_str(), bootstrap.collector_port)
    } else {
        (bootstrap.cloud_host, bootstrap.collector_port)
    }
}

/// Join the network, retrying until the link is up or `cancel` fires
pub async fn join_link<L, D, C>(
    link: &mut L,
    config: &DeviceConfig,
    delay: &mut D,
    cancel: &C,
    bootstrap: &BootstrapConfig,
) -> Result<(), BootstrapError>
where
    L: NetworkLink,
    D: DelayNs,
    C: Cancellation,
{
    if link.is_up() {
        return Ok(());
    }

    let mut attempts: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(BootstrapError::Interrupted);
        }
        attempts += 1;
        match link.join(&config.ssid, &config.password).await {
            Ok(()) => {
                info!("Network link up after {} attempt(s)", attempts);
                return Ok(());
            }
            Err(_) => {
                debug!("Join attempt {} failed", attempts);
                delay.delay_ms(bootstrap.link_retry_delay_ms).await;
            }
        }
    }
}

/// Pin to enforce for the collector.
///
/// A stored pin always wins. Without one, the default collector gets `None`
/// and a custom collector has its leaf fingerprint captured, persisted and
/// returned. Probing repeats until it succeeds or `cancel` fires.
pub async fn ensure_pin<S, N, E, D, C>(
    settings: &mut Settings<S>,
    connector: &mut N,
    engine: &mut E,
    mut delay: D,
    cancel: &C,
    bootstrap: &BootstrapConfig,
) -> Result<Option<Fingerprint>, BootstrapError>
where
    S: RecordStorage,
    N: Connector,
    E: TlsEngine,
    D: DelayNs + Clone,
    C: Cancellation,
{
    if let Some(issue) = settings.issue() {
        return Err(BootstrapError::NotConfigured(issue));
    }
    if let Some(pin) = settings.pin() {
        debug!("Using stored collector pin");
        return Ok(Some(pin));
    }
    if !settings.config().has_custom_collector() {
        return Ok(None);
    }

    let host: String<64> = settings.config().collector.clone();
    let port = bootstrap.collector_port;
    info!("No collector pin stored, capturing {}:{}", host.as_str(), port);

    let mut probe = TrustProbe::new(connector, engine, delay.clone()).with_config(bootstrap.probe);
    loop {
        match probe.probe(&host, port, cancel).await {
            Ok(fp) => {
                settings.store_pin(fp).await?;
                info!("Pinned collector fingerprint {}", fp);
                return Ok(Some(fp));
            }
            Err(ProbeError::Cancelled) => return Err(BootstrapError::Interrupted),
            Err(e) => warn!("Fingerprint capture round failed: {}", e),
        }

        if cancel.is_cancelled() {
            return Err(BootstrapError::Interrupted);
        }
        delay.delay_ms(bootstrap.probe_round_delay_ms).await;
    }
}

/// Open the pinned TLS session to the collector.
///
/// `fallback` decides trust when `pin` is `None`; pass
/// [`NoTrustStore`](crate::NoTrustStore) to refuse unpinned servers.
#[allow(clippy::too_many_arguments)]
pub async fn connect_collector<'c, 'e, N, E, D, F>(
    connector: &'c mut N,
    engine: &'e mut E,
    mut delay: D,
    factory: &PinnedClientFactory,
    config: &DeviceConfig,
    pin: Option<Fingerprint>,
    fallback: F,
    bootstrap: &BootstrapConfig,
) -> Result<E::Session<'e, TimedStream<N::Connection<'c>, D>>, BootstrapError>
where
    N: Connector,
    N::Connection<'c>: 'e,
    E: TlsEngine,
    D: DelayNs + Clone + 'e,
    F: ChainObserver,
{
    let (host, port) = collector_endpoint(config, bootstrap);
    info!("Connecting to collector {}:{}", host, port);

    let connection = match with_timeout(
        &mut delay,
        bootstrap.connect_timeout_ms,
        connector.connect(host, port),
    )
    .await
    {
        Ok(Ok(connection)) => connection,
        Ok(Err(e)) => return Err(ClientError::Transport(TransportError::from_io(&e)).into()),
        Err(Elapsed) => return Err(ClientError::Transport(TransportError::Timeout).into()),
    };

    let stream = TimedStream::new(connection, delay.clone(), bootstrap.io);
    let client = factory.build_client_with_fallback(pin, stream, fallback);
    match with_timeout(
        &mut delay,
        bootstrap.handshake_timeout_ms,
        client.handshake(engine, host),
    )
    .await
    {
        Ok(result) => result.map_err(BootstrapError::from),
        Err(Elapsed) => Err(ClientError::Handshake(HandshakeError::Transport(
            TransportError::Timeout,
        ))
        .into()),
    }
}
