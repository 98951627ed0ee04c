use anyhow::Result;

use crate::infer::Region;
use crate::timestamp::TimestampKey;

use super::{TrackId, TrackOutput, TrackState, TrackedRegion, Tracker};

#[derive(Clone, Debug)]
pub struct IouTrackerConfig {
    /// Minimum IoU for a region to continue an existing track.
    pub iou_threshold: f32,
    /// Steps a track may go unmatched before it is reported disappeared.
    pub max_lost_frames: u32,
    /// Regions scoring below this are marked filtered and never start a track.
    pub min_score: f32,
}

impl Default for IouTrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            max_lost_frames: 10,
            min_score: 0.0,
        }
    }
}

#[derive(Clone, Debug)]
struct Track {
    id: TrackId,
    region: Region,
    lost: u32,
}

/// Greedy IoU association tracker.
///
/// A step older than the newest one seen is still associated, but it neither
/// moves matched tracks nor ages unmatched ones.
pub struct IouTracker {
    config: IouTrackerConfig,
    tracks: Vec<Track>,
    next_id: TrackId,
    last_ts: Option<TimestampKey>,
}

impl IouTracker {
    pub fn new(config: IouTrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
            last_ts: None,
        }
    }

    pub fn active_tracks(&self) -> usize {
        self.tracks.len()
    }
}

impl Tracker for IouTracker {
    fn name(&self) -> &'static str {
        "iou"
    }

    fn track(
        &mut self,
        regions: &[Region],
        ts: TimestampKey,
        _frame_size: (u32, u32),
    ) -> Result<TrackOutput> {
        let late = self.last_ts.is_some_and(|last| ts < last);
        if late {
            log::debug!("late tracking step {} after {:?}", ts, self.last_ts);
        } else {
            self.last_ts = Some(ts);
        }

        let mut out: Vec<TrackedRegion> = regions
            .iter()
            .map(|r| TrackedRegion {
                region: *r,
                id: None,
                state: if r.score < self.config.min_score {
                    TrackState::Filtered
                } else {
                    TrackState::New
                },
            })
            .collect();

        // (track index, region index, iou), best first
        let mut candidates = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (ri, tracked) in out.iter().enumerate() {
                if tracked.state == TrackState::Filtered {
                    continue;
                }
                let iou = track.region.iou(&tracked.region);
                if iou >= self.config.iou_threshold {
                    candidates.push((ti, ri, iou));
                }
            }
        }
        candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

        let mut track_used = vec![false; self.tracks.len()];
        let mut region_used = vec![false; out.len()];
        for (ti, ri, _) in candidates {
            if track_used[ti] || region_used[ri] {
                continue;
            }
            track_used[ti] = true;
            region_used[ri] = true;
            let track = &mut self.tracks[ti];
            if !late {
                track.region = out[ri].region;
                track.lost = 0;
            }
            out[ri].id = Some(track.id);
            out[ri].state = TrackState::Tracked;
        }

        let mut disappeared = Vec::new();
        let max_lost = self.config.max_lost_frames;
        let mut idx = 0;
        self.tracks.retain_mut(|track| {
            let matched = track_used[idx];
            idx += 1;
            if matched || late {
                return true;
            }
            track.lost += 1;
            if track.lost > max_lost {
                disappeared.push(track.id);
                return false;
            }
            true
        });

        for (ri, tracked) in out.iter_mut().enumerate() {
            if region_used[ri] || tracked.state != TrackState::New {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            tracked.id = Some(id);
            self.tracks.push(Track {
                id,
                region: tracked.region,
                lost: 0,
            });
        }

        Ok(TrackOutput {
            regions: out,
            disappeared,
        })
    }
}
