//! MQTT implementation of [`MessageBus`].
//!
//! Readings are published as plain decimal strings to
//! `{namespace}/{alias}/voltage_V`, `.../current_A` and `.../power_W`.
//!
//! # Connection
//!
//! [`MqttBus::connect`] drives the rumqttc event loop until the broker
//! acknowledges the connection, then hands the event loop to a background
//! task. If the connection drops later, the task keeps polling (which makes
//! rumqttc reconnect) and publishes wait in the client's request queue until
//! the broker acknowledges a new connection. Once the queue is full a publish
//! blocks, so the caller's publish timeout bounds how long an outage is
//! tolerated.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{MessageBus, PublishError};
use crate::config::MqttConfig;

/// Port used when the broker address has none.
pub const DEFAULT_PORT: u16 = 1883;

/// Capacity of the client's request queue.
const REQUEST_CAPACITY: usize = 16;

/// Delay between reconnection attempts after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Time allowed for the DISCONNECT packet to go out at shutdown.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors parsing a broker address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerAddressError {
    #[error("unsupported scheme '{0}' (expected tcp:// or mqtt://)")]
    UnsupportedScheme(String),
    #[error("host cannot be empty")]
    EmptyHost,
    #[error("invalid port '{0}'")]
    InvalidPort(String),
}

/// A broker host and port.
///
/// Parses `host`, `host:port`, `tcp://host[:port]` and `mqtt://host[:port]`.
/// IPv6 hosts are written in brackets: `[::1]:1883`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl FromStr for BrokerAddress {
    type Err = BrokerAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = match s.split_once("://") {
            Some(("tcp" | "mqtt", rest)) => rest,
            Some((scheme, _)) => return Err(BrokerAddressError::UnsupportedScheme(scheme.to_string())),
            None => s,
        };

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            // [v6]:port or [v6]
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| BrokerAddressError::InvalidPort(rest.to_string()))?;
            match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if tail.is_empty() => (host, None),
                None => return Err(BrokerAddressError::InvalidPort(tail.to_string())),
            }
        } else {
            match rest.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(BrokerAddressError::EmptyHost);
        }

        let port = match port {
            Some(p) => match p.parse::<u16>() {
                Ok(0) | Err(_) => return Err(BrokerAddressError::InvalidPort(p.to_string())),
                Ok(port) => port,
            },
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "tcp://[{}]:{}", self.host, self.port)
        } else {
            write!(f, "tcp://{}:{}", self.host, self.port)
        }
    }
}

/// Map a numeric QoS level to rumqttc's enum. Levels above 2 map to 2.
pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// MQTT client publishing through a background event loop task.
pub struct MqttBus {
    client: AsyncClient,
    broker: BrokerAddress,
    qos: QoS,
    retain: bool,
    connected: Arc<AtomicBool>,
    stop: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for MqttBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttBus")
            .field("broker", &self.broker)
            .field("qos", &self.qos)
            .field("retain", &self.retain)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MqttBus {
    /// Connect to the broker in `config`.
    ///
    /// Returns once the broker has acknowledged the connection. The wait is
    /// bounded by the configured connect timeout and raced against `cancel`.
    #[tracing::instrument(level = "debug", skip_all, fields(broker = %config.broker))]
    pub async fn connect(
        config: &MqttConfig,
        client_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Self, PublishError> {
        let broker: BrokerAddress =
            config
                .broker
                .parse()
                .map_err(|e: BrokerAddressError| PublishError::Connect {
                    broker: config.broker.clone(),
                    reason: e.to_string(),
                })?;

        let mut options = MqttOptions::new(client_id, broker.host.clone(), broker.port);
        options.set_keep_alive(config.keep_alive());

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let limit = config.connect_timeout();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PublishError::Cancelled),
            result = timeout(limit, wait_for_connack(&mut eventloop, &broker)) => match result {
                Ok(inner) => inner?,
                Err(_) => {
                    return Err(PublishError::ConnectTimeout {
                        broker: broker.to_string(),
                        duration: limit,
                    });
                }
            },
        }
        info!("Connected to MQTT broker at {}", broker);

        let connected = Arc::new(AtomicBool::new(true));
        let stop = CancellationToken::new();
        let driver = tokio::spawn(drive(eventloop, Arc::clone(&connected), stop.clone()));

        Ok(Self {
            client,
            broker,
            qos: qos_from_level(config.qos),
            retain: config.retain,
            connected,
            stop,
            driver: Mutex::new(Some(driver)),
        })
    }

    /// Whether the broker connection is currently up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn wait_for_connack(
    eventloop: &mut EventLoop,
    broker: &BrokerAddress,
) -> Result<(), PublishError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(PublishError::Connect {
                        broker: broker.to_string(),
                        reason: format!("connection refused: {:?}", ack.code),
                    })
                };
            }
            Ok(_) => {}
            Err(e) => {
                return Err(PublishError::Connect {
                    broker: broker.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// Poll the event loop until the client disconnects or `stop` fires.
async fn drive(mut eventloop: EventLoop, connected: Arc<AtomicBool>, stop: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                if !connected.swap(true, Ordering::SeqCst) {
                    info!("Reconnected to MQTT broker");
                }
            }
            Ok(Event::Incoming(Packet::PingResp)) => {
                debug!("MQTT ping response received");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                connected.store(false, Ordering::SeqCst);
                warn!("MQTT connection error: {}. Reconnecting...", e);
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        if !self.is_connected() {
            debug!("Broker connection is down, queueing publish to {}", topic);
        }
        // Only fails once the event loop is gone
        self.client
            .publish(topic, self.qos, self.retain, payload.as_bytes().to_vec())
            .await
            .map_err(|e| {
                debug!("MQTT request queue closed: {}", e);
                PublishError::Disconnected
            })
    }

    async fn disconnect(&self) -> Result<(), PublishError> {
        let Some(driver) = self.driver.lock().await.take() else {
            return Ok(());
        };

        let result = match timeout(DISCONNECT_TIMEOUT, self.client.disconnect()).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err("request queue full".to_string()),
        };
        // Let the driver flush the DISCONNECT packet, then stop it regardless
        if timeout(DISCONNECT_TIMEOUT, driver).await.is_err() {
            debug!("MQTT event loop did not stop in time");
        }
        self.stop.cancel();
        self.connected.store(false, Ordering::SeqCst);

        result.map_err(|reason| PublishError::Rejected {
            topic: String::new(),
            reason,
        })
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
