//! Detection node: frame ingestion on one side, completions on the other.
//!
//! `ingest` registers the frame with the correlator before submitting it, so
//! a completion can never be correlated before its frame is known.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::NodeConfig;
use crate::correlator::Correlator;
use crate::frame::{prepare_input, DecodedFrame};
use crate::infer::{
    BoxTensorParser, CompletionSink, InferenceBackend, InferenceMode, InferenceRequest,
    StubBackend, StubBackendConfig,
};
use crate::pipeline::{PipelineConfig, PostProcessor};
use crate::timestamp::{CaptureStamp, Span, TimestampKey};
use crate::track::{IouTracker, TrackerSet};
use crate::transport::Publisher;

pub struct DetectionNode {
    correlator: Arc<Correlator>,
    backend: Arc<dyn InferenceBackend>,
    sink: Arc<dyn CompletionSink>,
    mode: InferenceMode,
    shut_down: AtomicBool,
}

impl DetectionNode {
    pub fn new(
        correlator: Arc<Correlator>,
        backend: Arc<dyn InferenceBackend>,
        sink: Arc<dyn CompletionSink>,
        mode: InferenceMode,
    ) -> Self {
        Self {
            correlator,
            backend,
            sink,
            mode,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Build a node with the stub backend, box-tensor parser and IoU trackers.
    pub fn from_config(config: &NodeConfig, publisher: Arc<dyn Publisher>) -> Result<Self> {
        let correlator = Arc::new(Correlator::new(config.correlator));
        let outputs = &config.outputs;

        let box_outputs = outputs
            .categories
            .keys()
            .next_back()
            .map(|max| max + 1)
            .unwrap_or(0);
        if let Some(kps) = outputs.kps_index {
            if kps != box_outputs {
                log::warn!(
                    "stub backend writes keypoints at output {}, parser reads {}",
                    box_outputs,
                    kps
                );
            }
        }
        let backend = StubBackend::new(StubBackendConfig {
            task_num: config.inference.task_num,
            input_width: config.model.input_width,
            input_height: config.model.input_height,
            box_outputs,
            kps_per_target: outputs.kps_per_target,
            ..StubBackendConfig::default()
        })
        .context("start inference backend")?;

        let parser = BoxTensorParser::new(
            outputs.categories.keys().copied().collect(),
            outputs.kps_index,
            outputs.kps_per_target,
        )
        .with_score_threshold(outputs.score_threshold);

        let mut trackers = TrackerSet::new();
        for label in &config.tracking.categories {
            trackers.insert(label.clone(), IouTracker::new(config.tracking.iou.clone()));
        }

        let pipeline = PipelineConfig {
            model_name: config.model.name.clone(),
            model_size: (config.model.input_width, config.model.input_height),
            categories: outputs.categories.clone(),
            body_index: outputs.body_index,
        };
        let sink = PostProcessor::new(
            pipeline,
            correlator.clone(),
            Box::new(parser),
            trackers,
            publisher,
        );

        let limits = correlator.limits();
        log::info!(
            "DetectionNode: model {} ({}x{}), backend {}, mode {}, {} tracked categories, cache {} / timeout {} ms",
            config.model.name,
            config.model.input_width,
            config.model.input_height,
            backend.name(),
            config.inference.mode,
            config.tracking.categories.len(),
            limits.cache_size_limit,
            limits.smart_output_timeout_ms
        );
        Ok(Self::new(
            correlator,
            Arc::new(backend),
            Arc::new(sink),
            config.inference.mode,
        ))
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Register a frame and submit it for inference.
    pub fn ingest(&self, frame: DecodedFrame) -> Result<()> {
        if self.is_shut_down() {
            log::debug!("node shut down, frame {} ignored", frame.header.frame_id);
            return Ok(());
        }
        let preprocess_start = CaptureStamp::now();
        let header = frame.header.clone();
        let input = prepare_input(frame)?;

        let key = TimestampKey::from(header.stamp);
        log::debug!("recv frame_id: {}, stamp: {}", header.frame_id, header.stamp);
        self.correlator.notify_frame(key);

        let request = InferenceRequest {
            header,
            input,
            preprocess: Span::new(preprocess_start, CaptureStamp::now()),
        };
        if let Err(e) = self.backend.submit(request, self.sink.clone(), self.mode) {
            self.correlator.forget(key);
            return Err(e).with_context(|| format!("submit frame {} to {}", key, self.backend.name()));
        }
        Ok(())
    }

    /// Stop accepting frames and wait for in-flight inferences.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("DetectionNode: shutting down {} backend", self.backend.name());
        self.backend.shutdown();
    }
}

impl Drop for DetectionNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}
