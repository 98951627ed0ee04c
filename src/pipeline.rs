//! Completion-side post-processing.
//!
//! Every inference completion is correlated with its frame, parsed, tracked
//! per category and published as one `PerceptionTargets` per resolved pair.
//! A completion the correlator cannot pair is still processed on its own so
//! no completion goes unpublished.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::correlator::Correlator;
use crate::infer::{CompletionSink, OutputParser, ResultHandle};
use crate::message::{Perf, PerceptionTargets, Rect, Roi, Target};
use crate::timestamp::{duration_ms, CaptureStamp, Span, TimestampKey};
use crate::track::TrackerSet;
use crate::transport::Publisher;

/// Static description of the model outputs the pipeline consumes.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Prefix for perf annotation names.
    pub model_name: String,
    /// Model input size (width, height); rectangles are clamped to it.
    pub model_size: (u32, u32),
    /// Output index → category label.
    pub categories: BTreeMap<usize, String>,
    /// Output index whose regions receive body keypoints.
    pub body_index: usize,
}

pub struct PostProcessor {
    config: PipelineConfig,
    correlator: Arc<Correlator>,
    parser: Box<dyn OutputParser>,
    trackers: Mutex<TrackerSet>,
    publisher: Arc<dyn Publisher>,
}

impl PostProcessor {
    pub fn new(
        config: PipelineConfig,
        correlator: Arc<Correlator>,
        parser: Box<dyn OutputParser>,
        trackers: TrackerSet,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            config,
            correlator,
            parser,
            trackers: Mutex::new(trackers),
            publisher,
        }
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Handle one completion. Returns the number of messages published.
    pub fn process(&self, handle: ResultHandle) -> Result<usize> {
        let started = CaptureStamp::now();
        let key = handle.key();
        log::debug!(
            "recv infer output frame_id: {}, stamp: {}",
            handle.header.frame_id,
            handle.header.stamp
        );

        let mut pairs = self.correlator.notify_result_or_release(key, handle.clone());
        if pairs.is_empty() {
            log::debug!("no correlated frame for {}, processing uncorrelated", key);
            pairs.push((key, handle.clone()));
        }

        let mut published = 0;
        for (ts, output) in pairs {
            match self.publish_pair(ts, &output) {
                Ok(()) => published += 1,
                Err(e) => log::error!(
                    "frame_id {} ({}) not published: {:#}",
                    output.header.frame_id,
                    ts,
                    e
                ),
            }
        }

        let stats = &handle.stats;
        if stats.fps_updated {
            log::warn!(
                "input fps: {:.2}, out fps: {:.2}, infer time ms: {}, post process time ms: {}",
                stats.input_fps,
                stats.output_fps,
                stats.infer_time_ms,
                duration_ms(started, CaptureStamp::now())
            );
        }
        Ok(published)
    }

    fn publish_pair(&self, ts: TimestampKey, output: &ResultHandle) -> Result<()> {
        let post_start = CaptureStamp::now();
        let mut parsed = self
            .parser
            .parse(output)
            .map_err(|e| anyhow!("parse failed: {:#}", e))?;

        let (width, height) = self.config.model_size;
        for regions in parsed.regions.values_mut() {
            for region in regions.iter_mut() {
                region.clamp_to(width, height);
            }
        }

        let mut msg = PerceptionTargets::new(output.header.clone());
        msg.fps = output.stats.output_fps.round() as i32;

        {
            let mut trackers = match self.trackers.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            for (index, regions) in &parsed.regions {
                let label = self
                    .config
                    .categories
                    .get(index)
                    .ok_or_else(|| anyhow!("output index {} has no category", index))?;
                let Some(tracked) = trackers.track(label, regions, ts, self.config.model_size)
                else {
                    continue;
                };

                let keypoints = if *index == self.config.body_index {
                    match parsed.keypoints.as_ref() {
                        Some(kps) if kps.len() == regions.len() => Some(kps),
                        Some(kps) => {
                            log::debug!(
                                "{} body regions but {} keypoint sets, keypoints dropped",
                                regions.len(),
                                kps.len()
                            );
                            None
                        }
                        None => None,
                    }
                } else {
                    None
                };

                for (i, region) in tracked.regions.iter().enumerate() {
                    if !region.is_publishable() {
                        continue;
                    }
                    let mut target = Target::person(region.id);
                    target.rois.push(Roi {
                        kind: label.clone(),
                        rect: (&region.region).into(),
                        confidence: region.region.score,
                    });
                    if let Some(points) = keypoints.and_then(|kps| kps.get(i)) {
                        target.points.push(points.clone());
                    }
                    msg.targets.push(target);
                }
                for id in tracked.disappeared {
                    let mut target = Target::person(Some(id));
                    target.rois.push(Roi {
                        kind: label.clone(),
                        rect: Rect::default(),
                        confidence: 0.0,
                    });
                    msg.disappeared_targets.push(target);
                }
            }
        }

        let post_end = CaptureStamp::now();
        let model = &self.config.model_name;
        let stats = &output.stats;
        msg.perfs.push(Perf::from_span(format!("{}_preprocess", model), output.preprocess));
        msg.perfs.push(
            Perf::from_span(format!("{}_predict_infer", model), stats.infer)
                .with_duration(stats.infer_time_ms),
        );
        msg.perfs.push(
            Perf::from_span(format!("{}_predict_parse", model), stats.parse)
                .with_duration(stats.parse_time_ms),
        );
        msg.perfs.push(Perf::from_span(
            format!("{}_postprocess", model),
            Span::new(post_start, post_end),
        ));
        msg.perfs.push(Perf::from_span(
            format!("{}_pipeline", model),
            Span::new(output.header.stamp, CaptureStamp::now()),
        ));

        log::debug!("{}", msg.summary());
        self.publisher.publish(&msg)
    }
}

impl CompletionSink for PostProcessor {
    fn on_complete(&self, output: ResultHandle) {
        if let Err(e) = self.process(output) {
            log::error!("post-processing failed: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::CorrelatorLimits;
    use crate::frame::FrameHeader;
    use crate::infer::{
        BoxTensorParser, InferenceOutput, Keypoint, Keypoints, OutputTensor, ParsedOutput, Region,
    };
    use crate::track::{IouTracker, IouTrackerConfig, TrackOutput, TrackState, Tracker};
    use crate::transport::MemoryPublisher;

    struct FailingParser;

    impl OutputParser for FailingParser {
        fn parse(&self, _: &InferenceOutput) -> Result<ParsedOutput> {
            Err(anyhow!("corrupt output"))
        }
    }

    struct FailingTracker;

    impl Tracker for FailingTracker {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn track(&mut self, _: &[Region], _: TimestampKey, _: (u32, u32)) -> Result<TrackOutput> {
            Err(anyhow!("tracker state lost"))
        }
    }

    struct InvalidateAll;

    impl Tracker for InvalidateAll {
        fn name(&self) -> &'static str {
            "invalidate"
        }

        fn track(&mut self, regions: &[Region], _: TimestampKey, _: (u32, u32)) -> Result<TrackOutput> {
            let mut out = TrackOutput::passthrough(regions);
            for r in &mut out.regions {
                r.state = TrackState::Invalid;
            }
            Ok(out)
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            model_name: "m".to_string(),
            model_size: (960, 544),
            categories: BTreeMap::from([(0, "body".to_string()), (1, "head".to_string())]),
            body_index: 0,
        }
    }

    fn handle(ms: u64, tensors: Vec<OutputTensor>) -> ResultHandle {
        Arc::new(InferenceOutput {
            header: FrameHeader::new(ms.to_string(), CaptureStamp::from_millis(ms)),
            tensors,
            ..InferenceOutput::default()
        })
    }

    fn body_and_head() -> Vec<OutputTensor> {
        vec![
            OutputTensor::new(vec![1, 5], vec![100.0, 50.0, 300.0, 500.0, 0.9]),
            OutputTensor::new(vec![1, 5], vec![150.0, 50.0, 250.0, 120.0, 0.8]),
            OutputTensor::new(vec![0, 1, 3], vec![]),
        ]
    }

    fn body_track_ids(msg: &PerceptionTargets) -> Vec<Option<u64>> {
        msg.targets
            .iter()
            .filter(|t| t.rois[0].kind == "body")
            .map(|t| t.track_id)
            .collect()
    }

    fn one_body_with_kps(kps_sets: usize) -> Vec<OutputTensor> {
        let mut kps = Vec::new();
        for _ in 0..kps_sets {
            kps.extend_from_slice(&[1.0, 2.0, 0.9]);
        }
        vec![
            OutputTensor::new(vec![1, 5], vec![-10.0, 5.0, 2000.0, 100.0, 0.8]),
            OutputTensor::new(vec![0, 5], vec![]),
            OutputTensor::new(vec![kps_sets, 1, 3], kps),
        ]
    }

    fn processor(
        parser: Box<dyn OutputParser>,
        trackers: TrackerSet,
    ) -> (PostProcessor, Arc<MemoryPublisher>) {
        let publisher = Arc::new(MemoryPublisher::new());
        let correlator = Arc::new(Correlator::new(CorrelatorLimits::default()));
        let pp = PostProcessor::new(config(), correlator, parser, trackers, publisher.clone());
        (pp, publisher)
    }

    fn box_parser() -> Box<dyn OutputParser> {
        Box::new(BoxTensorParser::new(vec![0, 1], Some(2), 1))
    }

    #[test]
    fn matched_pair_is_published_with_clamped_rect_and_perfs() {
        let mut trackers = TrackerSet::new();
        trackers.insert("body", IouTracker::new(IouTrackerConfig::default()));
        let (pp, publisher) = processor(box_parser(), trackers);

        pp.correlator().notify_frame(TimestampKey::from_millis(1000));
        assert_eq!(pp.process(handle(1000, one_body_with_kps(1))).unwrap(), 1);

        let msgs = publisher.messages();
        assert_eq!(msgs.len(), 1);
        let target = &msgs[0].targets[0];
        assert_eq!(target.track_id, Some(1));
        assert_eq!(target.rois[0].kind, "body");
        assert_eq!(target.rois[0].rect.x_offset, 0);
        assert_eq!(target.rois[0].rect.width, 960);
        assert_eq!(target.points.len(), 1);
        let kinds: Vec<_> = msgs[0].perfs.iter().map(|p| p.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec!["m_preprocess", "m_predict_infer", "m_predict_parse", "m_postprocess", "m_pipeline"]
        );
        assert_eq!(pp.correlator().frame_count(), 0);
        assert_eq!(pp.correlator().result_count(), 0);
    }

    #[test]
    fn uncorrelated_completion_is_published_once_and_forgotten() {
        let (pp, publisher) = processor(box_parser(), TrackerSet::new());
        assert_eq!(pp.process(handle(500, one_body_with_kps(1))).unwrap(), 1);
        assert_eq!(publisher.len(), 1);
        assert_eq!(pp.correlator().result_count(), 0);
        // no tracker configured: pass-through without identity
        assert_eq!(publisher.messages()[0].targets[0].track_id, None);
    }

    #[test]
    fn parse_failure_skips_only_that_pair() {
        let (pp, publisher) = processor(Box::new(FailingParser), TrackerSet::new());
        pp.correlator().notify_frame(TimestampKey::from_millis(10));
        assert_eq!(pp.process(handle(10, vec![])).unwrap(), 0);
        assert!(publisher.is_empty());
        assert_eq!(pp.correlator().frame_count(), 0);
        assert_eq!(pp.correlator().result_count(), 0);
    }

    #[test]
    fn unknown_output_index_is_not_published() {
        let publisher = Arc::new(MemoryPublisher::new());
        let mut cfg = config();
        cfg.categories.remove(&1);
        let pp = PostProcessor::new(
            cfg,
            Arc::new(Correlator::default()),
            box_parser(),
            TrackerSet::new(),
            publisher.clone(),
        );
        assert_eq!(pp.process(handle(10, one_body_with_kps(1))).unwrap(), 0);
        assert!(publisher.is_empty());
    }

    #[test]
    fn keypoints_are_dropped_when_counts_differ() {
        let parser = Box::new(BoxTensorParser::new(vec![0, 1], Some(2), 1));
        let (pp, publisher) = processor(parser, TrackerSet::new());
        pp.process(handle(10, one_body_with_kps(2))).unwrap();
        let msgs = publisher.messages();
        assert_eq!(msgs[0].targets.len(), 1);
        assert!(msgs[0].targets[0].points.is_empty());
    }

    #[test]
    fn invalid_regions_are_not_published() {
        let mut trackers = TrackerSet::new();
        trackers.insert("body", InvalidateAll);
        let (pp, publisher) = processor(box_parser(), trackers);
        assert_eq!(pp.process(handle(10, one_body_with_kps(1))).unwrap(), 1);
        assert!(publisher.messages()[0].targets.is_empty());
    }

    #[test]
    fn late_completion_keeps_tracked_identity() {
        let mut trackers = TrackerSet::new();
        trackers.insert("body", IouTracker::new(IouTrackerConfig::default()));
        let (pp, publisher) = processor(box_parser(), trackers);

        assert_eq!(pp.process(handle(1033, body_and_head())).unwrap(), 1);
        assert_eq!(pp.process(handle(1000, body_and_head())).unwrap(), 1);

        let msgs = publisher.messages();
        assert_eq!(body_track_ids(&msgs[0]), vec![Some(1)]);
        assert_eq!(body_track_ids(&msgs[1]), vec![Some(1)]);
    }

    #[test]
    fn tracker_failure_drops_only_that_category() {
        let mut trackers = TrackerSet::new();
        trackers.insert("body", FailingTracker);
        let (pp, publisher) = processor(box_parser(), trackers);

        assert_eq!(pp.process(handle(10, body_and_head())).unwrap(), 1);
        let msgs = publisher.messages();
        let kinds: Vec<_> = msgs[0].targets.iter().map(|t| t.rois[0].kind.as_str()).collect();
        assert_eq!(kinds, vec!["head"]);
    }

    #[test]
    fn disappeared_targets_carry_their_category() {
        let mut trackers = TrackerSet::new();
        trackers.insert(
            "body",
            IouTracker::new(IouTrackerConfig {
                max_lost_frames: 0,
                ..IouTrackerConfig::default()
            }),
        );
        let (pp, publisher) = processor(box_parser(), trackers);

        pp.process(handle(10, body_and_head())).unwrap();
        let empty = vec![
            OutputTensor::new(vec![0, 5], vec![]),
            OutputTensor::new(vec![0, 5], vec![]),
            OutputTensor::new(vec![0, 1, 3], vec![]),
        ];
        pp.process(handle(43, empty)).unwrap();

        let msgs = publisher.messages();
        let gone = &msgs[1].disappeared_targets;
        assert_eq!(gone.len(), 1);
        assert_eq!(gone[0].track_id, Some(1));
        assert_eq!(gone[0].rois[0].kind, "body");
        assert_eq!(gone[0].rois[0].rect, Rect::default());
    }

    #[test]
    fn keypoint_kind_is_carried_to_target() {
        let (pp, publisher) = processor(box_parser(), TrackerSet::new());
        pp.process(handle(10, one_body_with_kps(1))).unwrap();
        let points = &publisher.messages()[0].targets[0].points;
        assert_eq!(
            points[0],
            Keypoints {
                kind: "body_kps".to_string(),
                points: vec![Keypoint { x: 1.0, y: 2.0, score: 0.9 }],
            }
        );
    }
}
