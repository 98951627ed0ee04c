//! Perception sync
//!
//! Correlates camera frames with the asynchronous inference results computed
//! from them and publishes one detection + tracking message per result.
//!
//! # Architecture
//!
//! Frame arrival and inference completion run on different threads at
//! different rates. The [`Correlator`] reconciles the two timestamp-keyed
//! streams:
//!
//! 1. **At most once**: a timestamp is emitted at most once.
//! 2. **In order**: emitted timestamps increase across all calls.
//! 3. **Bounded**: each registry holds at most `cache_size_limit` entries.
//! 4. **Stale drop**: entries trailing the other stream by more than the
//!    staleness timeout are discarded unmatched.
//!
//! A completion the correlator cannot pair is still published on its own,
//! so every completion yields a message attempt.
//!
//! # Module Structure
//!
//! - `timestamp`: capture stamps and the millisecond correlation key
//! - `correlator`: the two bounded registries and the matching loop
//! - `frame`: decoded frames and inference input preparation
//! - `infer`: backend trait, completion records, output parser, stub backend
//! - `track`: per-category trackers
//! - `message`: outbound `PerceptionTargets`
//! - `pipeline`: completion-side post-processing
//! - `transport`: publishers (memory, log, MQTT)
//! - `ingest`: frame sources
//! - `node`: the ingestion and completion boundaries wired together
//! - `config`: TOML + environment configuration

pub mod config;
pub mod correlator;
pub mod frame;
pub mod infer;
pub mod ingest;
pub mod message;
pub mod node;
pub mod pipeline;
pub mod timestamp;
pub mod track;
pub mod transport;

pub use config::NodeConfig;
pub use correlator::{Correlator, CorrelatorLimits};
pub use frame::{DecodedFrame, FrameHeader, ImageEncoding};
pub use infer::{CompletionSink, InferenceBackend, InferenceMode, InferenceOutput, ResultHandle};
pub use message::PerceptionTargets;
pub use node::DetectionNode;
pub use pipeline::{PipelineConfig, PostProcessor};
pub use timestamp::{CaptureStamp, TimestampKey};
pub use transport::Publisher;
