#![deny(unsafe_code)]
//! Network link over the W5500
//!
//! The uplink is wired Ethernet, so the stored SSID and password have nothing
//! to authenticate against. A join is one bounded wait for a DHCP lease.

use defmt::{info, warn};
use embassy_net::Stack;
use relay_core::tls::with_timeout;
use relay_hal::NetworkLink;

use super::error::NetworkError;
use crate::clock::MonoDelay;

pub struct EthernetLink {
    stack: Stack<'static>,
    dhcp_timeout_ms: u32,
}

impl EthernetLink {
    pub fn new(stack: Stack<'static>, dhcp_timeout_ms: u32) -> Self {
        Self {
            stack,
            dhcp_timeout_ms,
        }
    }

    fn log_config(&self) {
        if let Some(config) = self.stack.config_v4() {
            let octets = config.address.address().octets();
            info!(
                "IP: {}.{}.{}.{}",
                octets[0], octets[1], octets[2], octets[3]
            );

            if let Some(gateway) = config.gateway {
                let gw_octets = gateway.octets();
                info!(
                    "Gateway: {}.{}.{}.{}",
                    gw_octets[0], gw_octets[1], gw_octets[2], gw_octets[3]
                );
            }
        }
    }
}

impl NetworkLink for EthernetLink {
    type Error = NetworkError;

    async fn join(&mut self, ssid: &str, _password: &str) -> Result<(), Self::Error> {
        info!("Waiting for DHCP (site network {})", ssid);
        let mut delay = MonoDelay;
        match with_timeout(&mut delay, self.dhcp_timeout_ms, self.stack.wait_config_up()).await {
            Ok(()) => {
                info!("Network is UP!");
                self.log_config();
                Ok(())
            }
            Err(_) => {
                warn!("No DHCP lease after {} ms", self.dhcp_timeout_ms);
                Err(NetworkError::LinkDown)
            }
        }
    }

    fn is_up(&self) -> bool {
        self.stack.is_config_up()
    }
}
