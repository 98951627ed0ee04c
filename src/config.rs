use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::correlator::{CorrelatorLimits, DEFAULT_CACHE_SIZE_LIMIT, DEFAULT_SMART_OUTPUT_TIMEOUT_MS};
use crate::frame::ImageEncoding;
use crate::infer::InferenceMode;
use crate::ingest::SourceConfig;
use crate::track::IouTrackerConfig;

const DEFAULT_MODEL_NAME: &str = "multitask_body_kps";
const DEFAULT_MODEL_WIDTH: u32 = 960;
const DEFAULT_MODEL_HEIGHT: u32 = 544;
const DEFAULT_TASK_NUM: usize = 2;
const DEFAULT_CATEGORIES: [&str; 4] = ["body", "head", "face", "hand"];
const DEFAULT_BODY_INDEX: usize = 0;
const DEFAULT_KPS_INDEX: usize = 4;
const DEFAULT_KPS_PER_TARGET: usize = 19;
const DEFAULT_PUB_TOPIC: &str = "perception/body_detection";
const DEFAULT_CLIENT_ID: &str = "perception-node";
const DEFAULT_SOURCE_URL: &str = "stub://camera";
const DEFAULT_SOURCE_FPS: u32 = 30;

#[derive(Debug, Deserialize, Default)]
struct NodeConfigFile {
    correlator: Option<CorrelatorConfigFile>,
    model: Option<ModelConfigFile>,
    inference: Option<InferenceConfigFile>,
    outputs: Option<OutputsConfigFile>,
    tracking: Option<TrackingConfigFile>,
    publish: Option<PublishConfigFile>,
    source: Option<SourceConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CorrelatorConfigFile {
    cache_size_limit: Option<usize>,
    smart_output_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    name: Option<String>,
    input_width: Option<u32>,
    input_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct InferenceConfigFile {
    mode: Option<String>,
    task_num: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct CategoryConfigFile {
    index: usize,
    label: String,
}

#[derive(Debug, Deserialize, Default)]
struct OutputsConfigFile {
    categories: Option<Vec<CategoryConfigFile>>,
    body_index: Option<usize>,
    kps_index: Option<usize>,
    kps_per_target: Option<usize>,
    score_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    categories: Option<Vec<String>>,
    iou_threshold: Option<f32>,
    max_lost_frames: Option<u32>,
    min_score: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct PublishConfigFile {
    topic: Option<String>,
    mqtt_broker: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    encoding: Option<String>,
}

/// Fully resolved node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub correlator: CorrelatorLimits,
    pub model: ModelSettings,
    pub inference: InferenceSettings,
    pub outputs: OutputSettings,
    pub tracking: TrackingSettings,
    pub publish: PublishSettings,
    pub source: SourceConfig,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub name: String,
    pub input_width: u32,
    pub input_height: u32,
}

#[derive(Debug, Clone)]
pub struct InferenceSettings {
    pub mode: InferenceMode,
    pub task_num: usize,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    /// Output index → category label.
    pub categories: BTreeMap<usize, String>,
    pub body_index: usize,
    pub kps_index: Option<usize>,
    pub kps_per_target: usize,
    pub score_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct TrackingSettings {
    /// Category labels that get an IoU tracker.
    pub categories: Vec<String>,
    pub iou: IouTrackerConfig,
}

#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub topic: String,
    /// `None` publishes to the log.
    pub mqtt_broker: Option<String>,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl NodeConfig {
    /// Load from the file named by `PERCEPTION_CONFIG`, if any.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PERCEPTION_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: NodeConfigFile) -> Result<Self> {
        let correlator = file.correlator.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let inference = file.inference.unwrap_or_default();
        let outputs = file.outputs.unwrap_or_default();
        let tracking = file.tracking.unwrap_or_default();
        let publish = file.publish.unwrap_or_default();
        let source = file.source.unwrap_or_default();

        let categories = match outputs.categories {
            Some(entries) => {
                let mut map = BTreeMap::new();
                for entry in entries {
                    if map.insert(entry.index, entry.label).is_some() {
                        bail!("output index {} declared more than once", entry.index);
                    }
                }
                map
            }
            None => default_categories(),
        };
        let mode = match inference.mode.as_deref() {
            Some(mode) => mode.parse()?,
            None => InferenceMode::default(),
        };
        let encoding = match source.encoding.as_deref() {
            Some(encoding) => encoding.parse()?,
            None => ImageEncoding::Nv12,
        };
        let iou_defaults = IouTrackerConfig::default();
        let kps_per_target = outputs.kps_per_target.unwrap_or(DEFAULT_KPS_PER_TARGET);
        // zero points per target disables keypoint parsing
        let kps_index = if kps_per_target == 0 {
            None
        } else {
            Some(outputs.kps_index.unwrap_or(DEFAULT_KPS_INDEX))
        };

        Ok(Self {
            correlator: CorrelatorLimits {
                cache_size_limit: correlator
                    .cache_size_limit
                    .unwrap_or(DEFAULT_CACHE_SIZE_LIMIT),
                smart_output_timeout_ms: correlator
                    .smart_output_timeout_ms
                    .unwrap_or(DEFAULT_SMART_OUTPUT_TIMEOUT_MS),
            },
            model: ModelSettings {
                name: model.name.unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string()),
                input_width: model.input_width.unwrap_or(DEFAULT_MODEL_WIDTH),
                input_height: model.input_height.unwrap_or(DEFAULT_MODEL_HEIGHT),
            },
            inference: InferenceSettings {
                mode,
                task_num: inference.task_num.unwrap_or(DEFAULT_TASK_NUM),
            },
            tracking: TrackingSettings {
                categories: tracking
                    .categories
                    .unwrap_or_else(|| categories.values().cloned().collect()),
                iou: IouTrackerConfig {
                    iou_threshold: tracking.iou_threshold.unwrap_or(iou_defaults.iou_threshold),
                    max_lost_frames: tracking
                        .max_lost_frames
                        .unwrap_or(iou_defaults.max_lost_frames),
                    min_score: tracking.min_score.unwrap_or(iou_defaults.min_score),
                },
            },
            outputs: OutputSettings {
                categories,
                body_index: outputs.body_index.unwrap_or(DEFAULT_BODY_INDEX),
                kps_index,
                kps_per_target,
                score_threshold: outputs.score_threshold.unwrap_or(0.0),
            },
            publish: PublishSettings {
                topic: publish
                    .topic
                    .unwrap_or_else(|| DEFAULT_PUB_TOPIC.to_string()),
                mqtt_broker: publish.mqtt_broker.filter(|b| !b.trim().is_empty()),
                client_id: publish
                    .client_id
                    .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
                username: publish.username,
                password: None,
            },
            source: SourceConfig {
                url: source.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                target_fps: source.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
                width: source.width.unwrap_or(DEFAULT_MODEL_WIDTH),
                height: source.height.unwrap_or(DEFAULT_MODEL_HEIGHT),
                encoding,
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(limit) = std::env::var("PERCEPTION_CACHE_SIZE_LIMIT") {
            self.correlator.cache_size_limit = limit
                .trim()
                .parse()
                .map_err(|_| anyhow!("PERCEPTION_CACHE_SIZE_LIMIT must be a positive integer"))?;
        }
        if let Ok(timeout) = std::env::var("PERCEPTION_OUTPUT_TIMEOUT_MS") {
            self.correlator.smart_output_timeout_ms = timeout.trim().parse().map_err(|_| {
                anyhow!("PERCEPTION_OUTPUT_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
        }
        if let Ok(mode) = std::env::var("PERCEPTION_INFERENCE_MODE") {
            if !mode.trim().is_empty() {
                self.inference.mode = mode.trim().parse()?;
            }
        }
        if let Ok(categories) = std::env::var("PERCEPTION_TRACK_CATEGORIES") {
            self.tracking.categories = split_csv(&categories);
        }
        if let Ok(topic) = std::env::var("PERCEPTION_PUB_TOPIC") {
            if !topic.trim().is_empty() {
                self.publish.topic = topic;
            }
        }
        if let Ok(broker) = std::env::var("PERCEPTION_MQTT_BROKER") {
            if !broker.trim().is_empty() {
                self.publish.mqtt_broker = Some(broker);
            }
        }
        if let Ok(user) = std::env::var("PERCEPTION_MQTT_USERNAME") {
            if !user.trim().is_empty() {
                self.publish.username = Some(user);
            }
        }
        if let Ok(password) = std::env::var("PERCEPTION_MQTT_PASSWORD") {
            self.publish.password = Some(password);
        }
        if let Ok(url) = std::env::var("PERCEPTION_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.correlator.cache_size_limit == 0 {
            return Err(anyhow!("correlator.cache_size_limit must be greater than zero"));
        }
        if self.model.input_width == 0 || self.model.input_height == 0 {
            return Err(anyhow!(
                "model input size must be non-zero, got {}x{}",
                self.model.input_width,
                self.model.input_height
            ));
        }
        if self.inference.task_num == 0 {
            return Err(anyhow!("inference.task_num must be greater than zero"));
        }
        if self.outputs.categories.is_empty() {
            return Err(anyhow!("outputs.categories must not be empty"));
        }
        if !self.outputs.categories.contains_key(&self.outputs.body_index) {
            return Err(anyhow!(
                "outputs.body_index {} is not a declared category index",
                self.outputs.body_index
            ));
        }
        if let Some(kps) = self.outputs.kps_index {
            if self.outputs.categories.contains_key(&kps) {
                return Err(anyhow!(
                    "outputs.kps_index {} collides with a category index",
                    kps
                ));
            }
        }
        let mut labels = HashSet::new();
        for label in self.outputs.categories.values() {
            if !labels.insert(label.as_str()) {
                return Err(anyhow!("category label '{}' declared more than once", label));
            }
        }
        for label in &self.tracking.categories {
            if !labels.contains(label.as_str()) {
                return Err(anyhow!(
                    "tracking category '{}' is not a declared output category",
                    label
                ));
            }
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source.target_fps must be greater than zero"));
        }
        Ok(())
    }
}

fn default_categories() -> BTreeMap<usize, String> {
    DEFAULT_CATEGORIES
        .iter()
        .enumerate()
        .map(|(index, label)| (index, label.to_string()))
        .collect()
}

fn read_config_file(path: &Path) -> Result<NodeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
