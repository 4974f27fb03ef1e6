#![deny(unsafe_code)]
//! Device loop: bring-up, collector session and mode handling
//!
//! Runs inside the device task next to the W5500 and embassy-net runners.
//! While operating, each pass joins the link, makes sure a collector pin
//! exists, opens the pinned TLS session and relays until the mode changes or
//! something fails. While provisioning, the loop only polls the controller.

use core::sync::atomic::Ordering;

use defmt::{debug, error, info, warn};
use embassy_net::Stack;
use embassy_stm32::peripherals::RNG;
use embassy_stm32::rng::Rng;
use embedded_hal_async::delay::DelayNs;
use rand_core::CryptoRngCore;
use relay_core::bootstrap::{connect_collector, ensure_pin, join_link};
use relay_core::{
    BootstrapConfig, BootstrapError, ClientError, DeviceMode, HandshakeError, ModeController,
    NoTrustStore, PinnedClientFactory, Settings,
};

use crate::clock::{MonoClock, MonoDelay};
use crate::flash::SettingsStore;
use crate::network::collector::{self, SessionEnd};
use crate::network::{CollectorConfig, EmbeddedTlsEngine, EthernetLink, NetworkError, TcpConnector};
use crate::{tls_buffers, PROVISIONING};

pub type DeviceSettings = Settings<SettingsStore>;
pub type DeviceController = ModeController<'static, MonoClock>;

/// Why an operating pass ended early
#[derive(Debug, defmt::Format)]
pub enum OperateError {
    Bootstrap(BootstrapError),
    Session(NetworkError),
}

impl From<BootstrapError> for OperateError {
    fn from(e: BootstrapError) -> Self {
        Self::Bootstrap(e)
    }
}

impl From<NetworkError> for OperateError {
    fn from(e: NetworkError) -> Self {
        Self::Session(e)
    }
}

/// Everything an operating pass needs besides settings and the controller
pub struct Uplink<R> {
    link: EthernetLink,
    connector: TcpConnector,
    engine: EmbeddedTlsEngine<R>,
    factory: PinnedClientFactory,
    bootstrap: BootstrapConfig,
    collector: CollectorConfig,
}

impl<R: CryptoRngCore> Uplink<R> {
    /// Claim the static TLS and TCP buffers. Returns `None` if they were
    /// already handed out.
    pub fn take(stack: Stack<'static>, rng: R, dhcp_timeout_ms: u32) -> Option<Self> {
        let (read_buf, write_buf) = tls_buffers::take()?;
        Some(Self {
            link: EthernetLink::new(stack, dhcp_timeout_ms),
            connector: TcpConnector::take(stack)?,
            engine: EmbeddedTlsEngine::new(rng, read_buf, write_buf),
            factory: PinnedClientFactory::default(),
            bootstrap: BootstrapConfig::default(),
            collector: CollectorConfig::default(),
        })
    }

    /// One pass from link join to the end of a collector session
    async fn operate(
        &mut self,
        settings: &mut DeviceSettings,
        controller: &mut DeviceController,
    ) -> Result<SessionEnd, OperateError> {
        let config = settings.config().clone();

        join_link(
            &mut self.link,
            &config,
            &mut MonoDelay,
            &*controller,
            &self.bootstrap,
        )
        .await?;

        let pin = ensure_pin(
            settings,
            &mut self.connector,
            &mut self.engine,
            MonoDelay,
            &*controller,
            &self.bootstrap,
        )
        .await?;

        let session = connect_collector(
            &mut self.connector,
            &mut self.engine,
            MonoDelay,
            &self.factory,
            &config,
            pin,
            NoTrustStore,
            &self.bootstrap,
        )
        .await?;
        info!("Collector session open");

        Ok(collector::run(session, &self.collector, settings, controller).await?)
    }
}

/// Drive the device for the lifetime of the firmware
pub async fn run(
    stack: Stack<'static>,
    rng: Rng<'static, RNG>,
    dhcp_timeout_ms: u32,
    settings: &mut DeviceSettings,
    controller: &mut DeviceController,
) {
    let Some(mut uplink) = Uplink::take(stack, rng, dhcp_timeout_ms) else {
        error!("Network buffers already claimed");
        return;
    };
    let mut delay = MonoDelay;

    // Wait out the boot grace period so the first poll arms the trigger. DHCP
    // keeps running in the net runner meanwhile.
    let settle_ms = controller.grace_remaining_ms();
    if settle_ms > 0 {
        debug!("Trigger armed in {} ms", settle_ms);
        delay
            .delay_ms(u32::try_from(settle_ms).unwrap_or(u32::MAX))
            .await;
    }

    loop {
        match controller.poll(settings).await {
            Ok(Some(change)) => info!("Mode changed: {} -> {}", change.from, change.to),
            Ok(None) => {}
            Err(e) => error!("Mode change not persisted: {}", e),
        }

        let mode = controller.mode();
        PROVISIONING.store(mode == DeviceMode::Provisioning, Ordering::Relaxed);

        if mode == DeviceMode::Provisioning {
            delay.delay_ms(uplink.collector.poll_interval_ms).await;
            continue;
        }

        match uplink.operate(settings, controller).await {
            Ok(SessionEnd::ModeChanged) => {}
            Err(OperateError::Bootstrap(BootstrapError::Interrupted)) => {
                debug!("Bring-up interrupted by a mode request");
            }
            Err(OperateError::Bootstrap(BootstrapError::Client(ClientError::Handshake(
                HandshakeError::UnsupportedLeafKey,
            )))) => {
                error!(
                    "Pinned leaf key type unsupported, the collector needs an ECDSA P-256 certificate; retrying in {} ms",
                    uplink.collector.reconnect_delay_ms
                );
                delay.delay_ms(uplink.collector.reconnect_delay_ms).await;
            }
            Err(e) => {
                warn!(
                    "Collector unavailable ({}), retrying in {} ms",
                    e, uplink.collector.reconnect_delay_ms
                );
                delay.delay_ms(uplink.collector.reconnect_delay_ms).await;
            }
        }
    }
}
