//! Frame/output correlation.
//!
//! Frame arrivals (ingestion thread) and inference completions (backend
//! worker threads) are recorded here under a single lock. Each completion
//! drains every pair that can be resolved in timestamp order:
//!
//! - equal heads are matched and emitted,
//! - a head that trails the other registry's head by more than the staleness
//!   timeout is dropped without emission,
//! - anything else waits for a later call.
//!
//! Both registries are bounded; overflow evicts the smallest key
//! unconditionally, so memory stays bounded even when the two streams never
//! line up.

mod registry;

pub use registry::{FrameArrivalRegistry, ResultArrivalRegistry};

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::infer::ResultHandle;
use crate::timestamp::TimestampKey;

pub const DEFAULT_CACHE_SIZE_LIMIT: usize = 3;
pub const DEFAULT_SMART_OUTPUT_TIMEOUT_MS: u64 = 200;

/// Registry bound and staleness threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CorrelatorLimits {
    pub cache_size_limit: usize,
    pub smart_output_timeout_ms: u64,
}

impl Default for CorrelatorLimits {
    fn default() -> Self {
        Self {
            cache_size_limit: DEFAULT_CACHE_SIZE_LIMIT,
            smart_output_timeout_ms: DEFAULT_SMART_OUTPUT_TIMEOUT_MS,
        }
    }
}

struct Registries<H> {
    frames: FrameArrivalRegistry,
    results: ResultArrivalRegistry<H>,
}

/// Thread-safe correlator of frame arrivals and inference completions.
///
/// Generic over the handle type so tests can use lightweight handles; the
/// node uses [`ResultHandle`].
pub struct Correlator<H = ResultHandle> {
    limits: CorrelatorLimits,
    inner: Mutex<Registries<H>>,
}

impl<H: Clone> Correlator<H> {
    pub fn new(limits: CorrelatorLimits) -> Self {
        Self {
            limits,
            inner: Mutex::new(Registries {
                frames: FrameArrivalRegistry::new(limits.cache_size_limit),
                results: ResultArrivalRegistry::new(limits.cache_size_limit),
            }),
        }
    }

    pub fn limits(&self) -> CorrelatorLimits {
        self.limits
    }

    // Every mutation leaves both registries consistent, so a panic in another
    // holder cannot leave a half-updated state behind.
    fn lock(&self) -> MutexGuard<'_, Registries<H>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that a frame with this timestamp was submitted for inference.
    pub fn notify_frame(&self, ts: TimestampKey) {
        log::debug!("feed frame ts: {}", ts);
        let mut reg = self.lock();
        if let Some(evicted) = reg.frames.insert(ts) {
            log::debug!("frame cache full, evicted ts: {}", evicted);
        }
        log::debug!("pending frames: {}", reg.frames.len());
    }

    /// Record a completed inference result and drain every resolvable pair.
    ///
    /// Returned pairs are in increasing timestamp order. An empty result
    /// means nothing could be matched on this call.
    pub fn notify_result(&self, ts: TimestampKey, handle: H) -> Vec<(TimestampKey, H)> {
        let mut reg = self.lock();
        self.drain(&mut reg, ts, handle)
    }

    /// `notify_result` followed by `forget(ts)` when nothing resolved, under
    /// one lock acquisition.
    ///
    /// A caller that falls back to processing an unmatched result itself
    /// needs this: with a separate `forget`, a concurrent completion could
    /// match the stored entry in between and the result would be processed
    /// twice.
    pub fn notify_result_or_release(&self, ts: TimestampKey, handle: H) -> Vec<(TimestampKey, H)> {
        let mut reg = self.lock();
        let ready = self.drain(&mut reg, ts, handle);
        if ready.is_empty() {
            reg.frames.remove(ts);
            reg.results.remove(ts);
        }
        ready
    }

    fn drain(&self, reg: &mut Registries<H>, ts: TimestampKey, handle: H) -> Vec<(TimestampKey, H)> {
        log::debug!("feed result ts: {}", ts);
        let timeout = self.limits.smart_output_timeout_ms;
        let mut ready = Vec::new();

        if let Some((evicted, _)) = reg.results.insert(ts, handle) {
            log::debug!("result cache full, evicted ts: {}", evicted);
        }
        if reg.frames.is_empty() {
            return ready;
        }

        let rounds = reg.results.len();
        for _ in 0..rounds {
            let (Some(frame_ts), Some(result_ts)) = (reg.frames.first(), reg.results.first_key())
            else {
                break;
            };

            if frame_ts == result_ts {
                reg.frames.pop_first();
                if let Some((key, matched)) = reg.results.pop_first() {
                    log::debug!("push ts: {}", key);
                    ready.push((key, matched));
                }
            } else if result_ts > frame_ts && result_ts.gap(frame_ts) > timeout {
                reg.frames.pop_first();
                log::info!(
                    "drop stale frame ts: {} (result head {} is {} ms ahead)",
                    frame_ts,
                    result_ts,
                    result_ts.gap(frame_ts)
                );
            } else if frame_ts > result_ts && frame_ts.gap(result_ts) > timeout {
                reg.results.pop_first();
                log::info!(
                    "drop stale result ts: {} (frame head {} is {} ms ahead)",
                    result_ts,
                    frame_ts,
                    frame_ts.gap(result_ts)
                );
            } else {
                break;
            }
        }

        ready
    }

    /// Remove `ts` from both registries if present.
    pub fn forget(&self, ts: TimestampKey) {
        let mut reg = self.lock();
        reg.frames.remove(ts);
        reg.results.remove(ts);
    }

    pub fn pending_frames(&self) -> Vec<TimestampKey> {
        self.lock().frames.keys()
    }

    pub fn pending_results(&self) -> Vec<TimestampKey> {
        self.lock().results.keys()
    }

    pub fn frame_count(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn result_count(&self) -> usize {
        self.lock().results.len()
    }
}

impl<H: Clone> Default for Correlator<H> {
    fn default() -> Self {
        Self::new(CorrelatorLimits::default())
    }
}
