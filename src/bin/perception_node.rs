//! perception_node - run the detection node against a frame source.
//!
//! Frames are pulled from the configured source at `target_fps`, correlated
//! with their inference completions and published as perception messages to
//! MQTT, or to the log when no broker is configured.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use perception_sync::config::NodeConfig;
use perception_sync::ingest::open_source;
use perception_sync::node::DetectionNode;
use perception_sync::transport::{LogPublisher, MqttPublisher, MqttPublisherConfig, Publisher};

#[derive(Parser, Debug)]
#[command(author, version, about = "Correlate frames with inference outputs and publish targets")]
struct Args {
    /// TOML config file.
    #[arg(long, env = "PERCEPTION_CONFIG")]
    config: Option<PathBuf>,

    /// Stop after this many frames (runs until Ctrl-C when unset).
    #[arg(long)]
    frames: Option<u64>,

    /// MQTT broker address; overrides the config file.
    #[arg(long)]
    mqtt_broker: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = NodeConfig::load_from(args.config.as_deref())?;
    if let Some(broker) = args.mqtt_broker {
        cfg.publish.mqtt_broker = Some(broker);
    }

    let mqtt = match cfg.publish.mqtt_broker.as_deref() {
        Some(broker) => Some(Arc::new(MqttPublisher::connect(&MqttPublisherConfig {
            broker: broker.to_string(),
            client_id: cfg.publish.client_id.clone(),
            topic: cfg.publish.topic.clone(),
            username: cfg.publish.username.clone(),
            password: cfg.publish.password.clone(),
        })?)),
        None => None,
    };
    let publisher: Arc<dyn Publisher> = match &mqtt {
        Some(mqtt) => mqtt.clone() as Arc<dyn Publisher>,
        None => Arc::new(LogPublisher::new(cfg.publish.topic.clone())),
    };

    let node = DetectionNode::from_config(&cfg, publisher)?;
    let mut source = open_source(cfg.source.clone())?;
    source.connect().context("connect frame source")?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .context("set Ctrl-C handler")?;

    let interval = Duration::from_secs_f64(1.0 / cfg.source.target_fps as f64);
    log::info!(
        "perception_node: {} at {} fps, publishing to {}",
        cfg.source.url,
        cfg.source.target_fps,
        cfg.publish.topic
    );

    let mut sent = 0u64;
    while running.load(Ordering::SeqCst) {
        if args.frames.is_some_and(|limit| sent >= limit) {
            break;
        }
        let tick = Instant::now();
        match source.next_frame() {
            Ok(frame) => {
                if let Err(e) = node.ingest(frame) {
                    log::error!("ingest failed: {:#}", e);
                }
                sent += 1;
            }
            Err(e) => log::error!("frame source error: {:#}", e),
        }
        if let Some(rest) = interval.checked_sub(tick.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    log::info!("shutdown after {} frames", sent);
    node.shutdown();
    if let Some(mqtt) = mqtt {
        mqtt.close()?;
    }
    Ok(())
}
