//! Outbound perception message.

use serde::Serialize;

use crate::frame::FrameHeader;
use crate::infer::{Keypoints, Region};
use crate::timestamp::{CaptureStamp, Span};

/// Target type label used for every published target.
pub const TARGET_TYPE_PERSON: &str = "person";

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Rect {
    pub x_offset: u32,
    pub y_offset: u32,
    pub width: u32,
    pub height: u32,
}

impl From<&Region> for Rect {
    fn from(r: &Region) -> Self {
        let x1 = r.x1.max(0.0) as u32;
        let y1 = r.y1.max(0.0) as u32;
        let x2 = r.x2.max(0.0) as u32;
        let y2 = r.y2.max(0.0) as u32;
        Self {
            x_offset: x1,
            y_offset: y1,
            width: x2.saturating_sub(x1),
            height: y2.saturating_sub(y1),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Roi {
    #[serde(rename = "type")]
    pub kind: String,
    pub rect: Rect,
    pub confidence: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Target {
    #[serde(rename = "type")]
    pub kind: String,
    pub track_id: Option<u64>,
    pub rois: Vec<Roi>,
    pub points: Vec<Keypoints>,
}

impl Target {
    pub fn person(track_id: Option<u64>) -> Self {
        Self {
            kind: TARGET_TYPE_PERSON.to_string(),
            track_id,
            rois: Vec::new(),
            points: Vec::new(),
        }
    }
}

/// One timing annotation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Perf {
    #[serde(rename = "type")]
    pub kind: String,
    pub stamp_start: CaptureStamp,
    pub stamp_end: CaptureStamp,
    pub time_ms_duration: i64,
}

impl Perf {
    pub fn from_span(kind: impl Into<String>, span: Span) -> Self {
        Self {
            kind: kind.into(),
            stamp_start: span.start,
            stamp_end: span.end,
            time_ms_duration: span.duration_ms(),
        }
    }

    /// Use a duration reported by the runtime instead of the span's.
    pub fn with_duration(mut self, ms: i64) -> Self {
        self.time_ms_duration = ms;
        self
    }
}

/// Combined detection + tracking result for one frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PerceptionTargets {
    pub header: FrameHeader,
    pub fps: i32,
    pub targets: Vec<Target>,
    pub disappeared_targets: Vec<Target>,
    pub perfs: Vec<Perf>,
}

impl PerceptionTargets {
    pub fn new(header: FrameHeader) -> Self {
        Self {
            header,
            fps: 0,
            targets: Vec::new(),
            disappeared_targets: Vec::new(),
            perfs: Vec::new(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Multi-line human readable summary for logs.
    pub fn summary(&self) -> String {
        let mut s = format!(
            "Publish frame_id: {}, time_stamp: {}\ntargets.size: {}\n",
            self.header.frame_id,
            self.header.stamp,
            self.targets.len()
        );
        for target in &self.targets {
            s.push_str(&format!(
                "target track_id: {}, rois.size: {}",
                display_id(target.track_id),
                target.rois.len()
            ));
            for roi in &target.rois {
                s.push_str(&format!(", {}", roi.kind));
            }
            s.push_str(&format!(", points.size: {}\n", target.points.len()));
        }
        s.push_str(&format!(
            "disappeared_targets.size: {}\n",
            self.disappeared_targets.len()
        ));
        for target in &self.disappeared_targets {
            s.push_str(&format!(
                "disappeared target track_id: {}\n",
                display_id(target.track_id)
            ));
        }
        s
    }
}

fn display_id(id: Option<u64>) -> String {
    id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string())
}
