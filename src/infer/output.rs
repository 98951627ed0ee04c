use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::frame::FrameHeader;
use crate::timestamp::{Span, TimestampKey};

/// Shared handle to a finished inference. The correlator never looks inside.
pub type ResultHandle = Arc<InferenceOutput>;

/// One raw output tensor: shape plus row-major values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutputTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl OutputTensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }
}

/// Timing and rate figures reported by the backend alongside an output.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RuntimeStats {
    pub input_fps: f32,
    pub output_fps: f32,
    /// True on the output that closed a one-second fps window.
    pub fps_updated: bool,
    pub infer: Span,
    pub infer_time_ms: i64,
    pub parse: Span,
    pub parse_time_ms: i64,
}

/// A finished inference together with the header of the frame it ran on.
#[derive(Clone, Debug, Default)]
pub struct InferenceOutput {
    pub header: FrameHeader,
    pub tensors: Vec<OutputTensor>,
    pub preprocess: Span,
    pub stats: RuntimeStats,
}

impl InferenceOutput {
    pub fn key(&self) -> TimestampKey {
        self.header.key()
    }

    pub fn tensor(&self, index: usize) -> Option<&OutputTensor> {
        self.tensors.get(index)
    }
}

/// Counts events over one-second windows.
#[derive(Debug)]
pub struct FpsCounter {
    window_start: Instant,
    count: u32,
    fps: f32,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            count: 0,
            fps: 0.0,
        }
    }

    /// Count one event. Returns true when a window closed and `fps` changed.
    pub fn tick(&mut self) -> bool {
        self.count += 1;
        let elapsed = self.window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            self.fps = self.count as f32 / elapsed.as_secs_f32();
            self.count = 0;
            self.window_start = Instant::now();
            return true;
        }
        false
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::CaptureStamp;

    #[test]
    fn output_key_comes_from_header_stamp() {
        let output = InferenceOutput {
            header: FrameHeader::new("3", CaptureStamp::new(2, 5_000_000)),
            ..InferenceOutput::default()
        };
        assert_eq!(output.key(), TimestampKey::from_millis(2005));
    }

    #[test]
    fn fps_counter_does_not_update_inside_window() {
        let mut counter = FpsCounter::new();
        assert!(!counter.tick());
        assert_eq!(counter.fps(), 0.0);
    }
}
