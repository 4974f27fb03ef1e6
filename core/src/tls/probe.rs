//! Trust-on-first-use fingerprint probe
//!
//! The probe opens a throwaway TLS handshake with a capture-mode
//! [`CertificateInterceptor`]. The interceptor digests the leaf certificate and
//! then refuses the chain, so the handshake always fails; a `Captured`
//! decision recorded by the interceptor is what makes the attempt a success.
//! The engine's error value is never used to decide that.
//!
//! ## Example
//!
//! ```ignore
//! let mut probe = TrustProbe::new(&mut connector, &mut engine, delay)
//!     .with_config(ProbeConfig::default());
//! match probe.probe("10.0.0.5", 9443, &controller).await {
//!     Ok(fp) => settings.store_pin(fp).await?,
//!     Err(ProbeError::Cancelled) => return Ok(()),
//!     Err(e) => warn!("{}", e),
//! }
//! ```

use embedded_hal_async::delay::DelayNs;
use relay_hal::Connector;

use super::engine::{HandshakeParams, TlsEngine, TlsProfile};
use super::fingerprint::Fingerprint;
use super::interceptor::{CertificateInterceptor, TrustDecision};
use super::stream::{with_timeout, Elapsed, TimedStream};
use crate::config::ProbeConfig;
use crate::error::{AttemptFailure, HandshakeError, ProbeError, TransportError};

/// Source of cancellation for long-running operations
pub trait Cancellation {
    fn is_cancelled(&self) -> bool;
}

impl<T: Cancellation + ?Sized> Cancellation for &T {
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}

/// Cancellation source that never fires
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl Cancellation for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Captures a server's leaf certificate fingerprint without trusting it
pub struct TrustProbe<'r, N, E, D> {
    connector: &'r mut N,
    engine: &'r mut E,
    delay: D,
    config: ProbeConfig,
    profile: TlsProfile,
}

impl<'r, N, E, D> TrustProbe<'r, N, E, D>
where
    N: Connector,
    E: TlsEngine,
    D: DelayNs + Clone,
{
    pub fn new(connector: &'r mut N, engine: &'r mut E, delay: D) -> Self {
        Self {
            connector,
            engine,
            delay,
            config: ProbeConfig::default(),
            profile: TlsProfile::CONSERVATIVE,
        }
    }

    pub fn with_config(mut self, config: ProbeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_profile(mut self, profile: TlsProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Capture the leaf fingerprint of `host:port`.
    ///
    /// Makes up to `max_attempts` attempts with `retry_delay_ms` between them
    /// and checks `cancel` before each one.
    pub async fn probe<C: Cancellation>(
        &mut self,
        host: &str,
        port: u16,
        cancel: &C,
    ) -> Result<Fingerprint, ProbeError> {
        let attempts = self.config.max_attempts.max(1);
        let mut last = AttemptFailure::Incomplete;

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                info!("Fingerprint probe cancelled before attempt {}", attempt);
                return Err(ProbeError::Cancelled);
            }

            info!(
                "Probing {}:{} for certificate fingerprint (attempt {}/{})",
                host, port, attempt, attempts
            );
            match self.attempt(host, port).await {
                Ok(fp) => {
                    info!("Captured fingerprint {}", fp);
                    return Ok(fp);
                }
                Err(failure) => {
                    warn!("Probe attempt {} failed: {}", attempt, failure);
                    last = failure;
                }
            }

            if attempt < attempts {
                self.delay.delay_ms(self.config.retry_delay_ms).await;
            }
        }

        error!("Fingerprint probe gave up after {} attempts", attempts);
        Err(ProbeError::GaveUp { attempts, last })
    }

    async fn attempt(&mut self, host: &str, port: u16) -> Result<Fingerprint, AttemptFailure> {
        let connection = match with_timeout(
            &mut self.delay,
            self.config.connect_timeout_ms,
            self.connector.connect(host, port),
        )
        .await
        {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => return Err(AttemptFailure::Transport(TransportError::from_io(&e))),
            Err(Elapsed) => return Err(AttemptFailure::Transport(TransportError::Timeout)),
        };

        let stream = TimedStream::new(connection, self.delay.clone(), self.config.io);
        let mut interceptor = CertificateInterceptor::capture();
        let params = HandshakeParams {
            server_name: host,
            profile: &self.profile,
        };

        let engine_error = match with_timeout(
            &mut self.delay,
            self.config.handshake_timeout_ms,
            self.engine.open(stream, params, &mut interceptor),
        )
        .await
        {
            Ok(Ok(_session)) => None,
            Ok(Err(e)) => Some(e),
            Err(Elapsed) => Some(HandshakeError::Transport(TransportError::Timeout)),
        };

        match (interceptor.decision(), engine_error) {
            (Some(TrustDecision::Captured(fp)), Some(e)) => {
                debug!("Handshake ended as expected after capture: {}", e);
                Ok(fp)
            }
            (_, None) => Err(AttemptFailure::UnexpectedTrust),
            (Some(_), Some(_)) => Err(AttemptFailure::Incomplete),
            (None, Some(e)) => Err(AttemptFailure::Handshake(e)),
        }
    }
}
