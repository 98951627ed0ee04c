//! MQTT publisher.
//!
//! Messages are serialized as JSON and published with QoS 1. The rumqttc
//! event loop runs on its own thread and reconnects until the publisher is
//! closed.

use anyhow::{anyhow, Context, Result};
use rumqttc::{Client, Connection, Event, MqttOptions, QoS, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::message::PerceptionTargets;

use super::Publisher;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Broker address split into parts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

/// Parse a broker address.
///
/// Supports formats:
/// - `host:port` (plain TCP)
/// - `mqtt://host:port`, `tcp://host:port` (plain TCP)
/// - `mqtts://host:port`, `ssl://host:port` (TLS)
/// - `[ipv6]:port`
pub fn parse_mqtt_endpoint(addr: &str) -> Result<MqttEndpoint> {
    let mut use_tls = false;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    let (host, port) = split_host_port(remainder)?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid MQTT port in {}", addr))?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid MQTT port in {}", addr))?;
    Ok((host.to_string(), port))
}

#[derive(Clone, Debug)]
pub struct MqttPublisherConfig {
    pub broker: String,
    pub client_id: String,
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

pub struct MqttPublisher {
    client: Client,
    topic: String,
    closing: Arc<AtomicBool>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttPublisher {
    pub fn connect(config: &MqttPublisherConfig) -> Result<Self> {
        let endpoint = parse_mqtt_endpoint(&config.broker)?;
        let mut options = MqttOptions::new(&config.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_session(true);
        if let Some(user) = config.username.as_deref() {
            options.set_credentials(user, config.password.as_deref().unwrap_or_default());
        }
        if endpoint.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, connection) = Client::new(options, 10);
        let closing = Arc::new(AtomicBool::new(false));
        let handle = spawn_event_loop(connection, closing.clone())?;
        log::info!(
            "MQTT publisher for {}:{} (TLS: {}, auth: {}) on topic {}",
            endpoint.host,
            endpoint.port,
            endpoint.use_tls,
            config.username.is_some(),
            config.topic
        );
        Ok(Self {
            client,
            topic: config.topic.clone(),
            closing,
            event_loop: Mutex::new(Some(handle)),
        })
    }

    /// Disconnect and wait for the event loop thread.
    pub fn close(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        self.client.disconnect()?;
        let handle = self
            .event_loop
            .lock()
            .map_err(|_| anyhow!("MQTT event loop lock poisoned"))?
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        Ok(())
    }
}

fn spawn_event_loop(mut connection: Connection, closing: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("mqtt-event-loop".to_string())
        .spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                    Err(e) => {
                        if closing.load(Ordering::SeqCst) {
                            break;
                        }
                        log::warn!("MQTT connection error: {}. Reconnecting...", e);
                        std::thread::sleep(RECONNECT_DELAY);
                    }
                }
            }
        })
        .map_err(|e| anyhow!("failed to spawn MQTT event loop: {}", e))
}

impl Publisher for MqttPublisher {
    fn publish(&self, msg: &PerceptionTargets) -> Result<()> {
        let payload = msg.to_json().context("serialize perception message")?;
        self.client
            .publish(self.topic.as_str(), QoS::AtLeastOnce, false, payload)
            .map_err(|e| anyhow!("MQTT publish to {} failed: {}", self.topic, e))
    }
}
