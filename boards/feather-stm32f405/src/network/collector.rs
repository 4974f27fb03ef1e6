//! MQTT v5.0 collector session over the pinned TLS stream
//!
//! Uses the bump allocator from `rust-mqtt` for no_std compatibility. The
//! session publishes a small status document every `publish_interval_ms` and
//! polls the mode controller in between, returning as soon as the device
//! changes mode.
//!
//! # Memory Management
//!
//! - MQTT packet buffer: 2KB for packet assembly
//! - TLS buffers: 34KB total (see `src/tls_buffers.rs`)
//! - TCP buffers: 8KB total (owned by the connector)

use core::fmt::Write as _;

use defmt::{debug, error, info, Debug2Format};
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{Read, Write};
use heapless::String;
use relay_core::{DeviceConfig, ModeController, Settings};
use relay_hal::{RecordStorage, Uptime};
use rust_mqtt::{
    buffer::BumpBuffer,
    client::{
        options::{ConnectOptions, PublicationOptions, TopicReference},
        Client,
    },
    config::{KeepAlive, SessionExpiryInterval},
    types::{MqttString, QoS, TopicName},
    Bytes,
};

use super::config::CollectorConfig;
use super::error::NetworkError;
use crate::clock::{MonoClock, MonoDelay};
use crate::device_id;

/// MQTT packet buffer size: 2KB for packet assembly
const MQTT_BUFFER_SIZE: usize = 2048;

/// Maximum MQTT topic length
/// Format: "relay/{client_id}/status" where client_id is 30 chars
const MAX_TOPIC_LEN: usize = 64;

/// Why a session ended without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum SessionEnd {
    /// The controller switched modes
    ModeChanged,
}

/// Run the collector session until the mode changes or the connection fails.
///
/// The collector authenticates the device by its token, sent as the MQTT
/// user name.
pub async fn run<T, S, C>(
    transport: T,
    config: &CollectorConfig,
    settings: &mut Settings<S>,
    controller: &mut ModeController<'_, C>,
) -> Result<SessionEnd, NetworkError>
where
    T: Read + Write,
    S: RecordStorage,
    C: Uptime,
{
    let client_id = device_id::client_id();
    let device = settings.config().clone();
    info!("MQTT client ID: {}", client_id.as_str());

    let mut mqtt_buffer = [0u8; MQTT_BUFFER_SIZE];
    let mut buffer = BumpBuffer::new(&mut mqtt_buffer);
    let mut mqtt_client = Client::<'_, _, _, 1, 1, 1, 0>::new(&mut buffer);

    let connect_opts = ConnectOptions {
        session_expiry_interval: SessionExpiryInterval::EndOnDisconnect,
        clean_start: config.clean_start,
        keep_alive: if config.keep_alive_secs == 0 {
            KeepAlive::Infinite
        } else {
            KeepAlive::Seconds(config.keep_alive_secs)
        },
        will: None,
        user_name: Some(MqttString::new(device.token.as_str().into()).map_err(|e| {
            error!("Token is not a valid MQTT string: {:?}", Debug2Format(&e));
            NetworkError::MqttProtocolError
        })?),
        password: None,
    };

    let mqtt_client_id = MqttString::new(client_id.as_str().into()).map_err(|e| {
        error!(
            "Failed to create MQTT client ID string: {:?}",
            Debug2Format(&e)
        );
        NetworkError::MqttProtocolError
    })?;

    mqtt_client
        .connect(transport, &connect_opts, Some(mqtt_client_id))
        .await
        .map_err(|e| {
            error!("MQTT connect failed: {:?}", Debug2Format(&e));
            NetworkError::MqttConnectionFailed
        })?;
    info!("Collector session established");

    let topic = format_topic(client_id.as_str(), "status")?;
    let mut delay = MonoDelay;
    let mut message_counter = 0u32;
    let mut since_publish_ms = config.publish_interval_ms;

    loop {
        match controller.poll(settings).await {
            Ok(Some(change)) => {
                info!("Leaving collector session: {:?} -> {:?}", change.from, change.to);
                return Ok(SessionEnd::ModeChanged);
            }
            Ok(None) => {}
            Err(e) => error!("Mode change not persisted: {}", e),
        }

        if since_publish_ms >= config.publish_interval_ms {
            since_publish_ms = 0;
            message_counter = message_counter.wrapping_add(1);

            let payload = status_payload(&device, message_counter, MonoClock.uptime_ms())?;

            // SAFETY: format_topic() validated that the topic string contains
            // no wildcard or null characters, so it is a valid topic name.
            #[allow(unsafe_code)]
            let topic_name = unsafe {
                TopicName::new_unchecked(MqttString::new(topic.as_str().into()).map_err(|e| {
                    error!("Failed to create MQTT topic string: {:?}", Debug2Format(&e));
                    NetworkError::MqttProtocolError
                })?)
            };
            let pub_options = PublicationOptions {
                retain: false,
                message_expiry_interval: None,
                topic: TopicReference::Name(topic_name),
                qos: QoS::AtMostOnce,
            };

            mqtt_client
                .publish(&pub_options, Bytes::from(payload.as_bytes()))
                .await
                .map_err(|e| {
                    error!(
                        "Failed to publish message #{}: {:?}",
                        message_counter,
                        Debug2Format(&e)
                    );
                    NetworkError::MqttPublishFailed
                })?;
            debug!("Status #{} published", message_counter);
        }

        delay.delay_ms(config.poll_interval_ms).await;
        since_publish_ms = since_publish_ms.saturating_add(config.poll_interval_ms);
    }
}

/// `{"name":…,"seq":N,"uptime_ms":N}`
fn status_payload(
    device: &DeviceConfig,
    seq: u32,
    uptime_ms: u64,
) -> Result<String<128>, NetworkError> {
    let name = device_id::display_name(device.id.as_str());
    let mut payload = String::new();
    write!(
        payload,
        "{{\"name\":\"{}\",\"seq\":{},\"uptime_ms\":{}}}",
        name.as_str(),
        seq,
        uptime_ms
    )
    .map_err(|_| NetworkError::MqttBufferError)?;
    Ok(payload)
}

/// Topic in the form `relay/{client_id}/{subtopic}`
fn format_topic(client_id: &str, subtopic: &str) -> Result<String<MAX_TOPIC_LEN>, NetworkError> {
    // Topic names cannot contain wildcards (+, #) or null characters
    for part in [client_id, subtopic] {
        if part.contains(|c| matches!(c, '+' | '#' | '\0')) {
            error!("Topic part contains invalid MQTT topic characters");
            return Err(NetworkError::MqttProtocolError);
        }
    }

    let mut topic = String::new();
    write!(topic, "relay/{}/{}", client_id, subtopic).map_err(|_| NetworkError::MqttBufferError)?;
    Ok(topic)
}
