//! Multi-object tracking boundary.
//!
//! Trackers are looked up by category label. A category without a tracker
//! passes its regions through unchanged and without identity. A category
//! whose tracker fails yields nothing for that step.

mod iou;

pub use iou::{IouTracker, IouTrackerConfig};

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;

use crate::infer::Region;
use crate::timestamp::TimestampKey;

pub type TrackId = u64;

/// Lifecycle of a tracked region on the current step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    /// First step this identity is visible.
    New,
    /// Continuing identity.
    Tracked,
    /// Region suppressed by the tracker (kept in order, no identity).
    Filtered,
    /// Region must not be published.
    Invalid,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrackedRegion {
    pub region: Region,
    pub id: Option<TrackId>,
    pub state: TrackState,
}

impl TrackedRegion {
    pub fn untracked(region: Region) -> Self {
        Self {
            region,
            id: None,
            state: TrackState::Tracked,
        }
    }

    /// Whether this region should appear in the published targets.
    pub fn is_publishable(&self) -> bool {
        self.state != TrackState::Invalid
    }
}

/// Result of one tracking step. `regions` keeps the input order and length.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackOutput {
    pub regions: Vec<TrackedRegion>,
    pub disappeared: Vec<TrackId>,
}

impl TrackOutput {
    pub fn passthrough(regions: &[Region]) -> Self {
        Self {
            regions: regions.iter().copied().map(TrackedRegion::untracked).collect(),
            disappeared: Vec::new(),
        }
    }
}

/// Per-category tracker.
pub trait Tracker: Send {
    fn name(&self) -> &'static str;

    /// Advance one step with this frame's regions.
    fn track(
        &mut self,
        regions: &[Region],
        ts: TimestampKey,
        frame_size: (u32, u32),
    ) -> Result<TrackOutput>;
}

/// Category label → tracker.
#[derive(Default)]
pub struct TrackerSet {
    trackers: HashMap<String, Box<dyn Tracker>>,
}

impl TrackerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Tracker + 'static>(&mut self, category: impl Into<String>, tracker: T) {
        self.trackers.insert(category.into(), Box::new(tracker));
    }

    /// Track one category. A missing tracker passes through; a failed
    /// tracker returns `None` and the category is left out of this step.
    pub fn track(
        &mut self,
        category: &str,
        regions: &[Region],
        ts: TimestampKey,
        frame_size: (u32, u32),
    ) -> Option<TrackOutput> {
        let Some(tracker) = self.trackers.get_mut(category) else {
            return Some(TrackOutput::passthrough(regions));
        };
        match tracker.track(regions, ts, frame_size) {
            Ok(out) => Some(out),
            Err(e) => {
                log::error!("{} tracker failed for {}: {}", tracker.name(), category, e);
                None
            }
        }
    }
}
