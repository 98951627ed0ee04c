//! Publish boundary.
//!
//! The pipeline hands each assembled `PerceptionTargets` to a `Publisher`.
//! Delivery guarantees are the transport's business:
//! - `MemoryPublisher`: keeps messages in memory (tests, embedding)
//! - `LogPublisher`: logs a summary of each message
//! - `MqttPublisher`: JSON over MQTT with QoS 1

mod mqtt;

pub use mqtt::{parse_mqtt_endpoint, MqttEndpoint, MqttPublisher, MqttPublisherConfig};

use anyhow::{anyhow, Result};
use std::sync::Mutex;

use crate::message::PerceptionTargets;

pub trait Publisher: Send + Sync {
    fn publish(&self, msg: &PerceptionTargets) -> Result<()>;
}

/// Collects published messages.
#[derive(Default)]
pub struct MemoryPublisher {
    messages: Mutex<Vec<PerceptionTargets>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<PerceptionTargets> {
        match self.messages.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Publisher for MemoryPublisher {
    fn publish(&self, msg: &PerceptionTargets) -> Result<()> {
        self.messages
            .lock()
            .map_err(|_| anyhow!("memory publisher lock poisoned"))?
            .push(msg.clone());
        Ok(())
    }
}

/// Logs each message summary at info level.
pub struct LogPublisher {
    topic: String,
}

impl LogPublisher {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
        }
    }
}

impl Publisher for LogPublisher {
    fn publish(&self, msg: &PerceptionTargets) -> Result<()> {
        log::info!("[{}] {}", self.topic, msg.summary());
        Ok(())
    }
}
