use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use perception_sync::correlator::{Correlator, CorrelatorLimits};
use perception_sync::timestamp::TimestampKey;

fn k(ms: u64) -> TimestampKey {
    TimestampKey::from_millis(ms)
}

fn limits(cache_size_limit: usize, smart_output_timeout_ms: u64) -> CorrelatorLimits {
    CorrelatorLimits {
        cache_size_limit,
        smart_output_timeout_ms,
    }
}

#[derive(Clone, Copy, Debug)]
enum Event {
    Frame(u64),
    Result(u64),
}

fn keys_of(pairs: &[(TimestampKey, u64)]) -> Vec<u64> {
    pairs.iter().map(|(ts, _)| ts.as_millis()).collect()
}

#[test]
fn matching_frame_and_result_emit_one_pair() {
    let c = Correlator::<u64>::new(limits(3, 200));
    c.notify_frame(k(1000));
    assert_eq!(c.notify_result(k(1000), 7), vec![(k(1000), 7)]);
    assert_eq!(c.frame_count(), 0);
    assert_eq!(c.result_count(), 0);
    // the same key is never emitted twice
    assert!(c.notify_result(k(1000), 8).is_empty());
}

#[test]
fn in_order_stream_matches_every_key() {
    let c = Correlator::<u64>::new(limits(3, 200));
    let mut emitted = Vec::new();
    for i in 0..50u64 {
        let ts = 1_000 + i * 33;
        c.notify_frame(k(ts));
        emitted.extend(keys_of(&c.notify_result(k(ts), ts)));
    }
    let expected: Vec<u64> = (0..50u64).map(|i| 1_000 + i * 33).collect();
    assert_eq!(emitted, expected);
}

#[test]
fn lagging_results_still_match_within_bound() {
    let c = Correlator::<u64>::new(limits(3, 200));
    let mut emitted = Vec::new();
    c.notify_frame(k(0));
    c.notify_frame(k(33));
    for i in 0..20u64 {
        c.notify_frame(k((i + 2) * 33));
        emitted.extend(keys_of(&c.notify_result(k(i * 33), i)));
    }
    let expected: Vec<u64> = (0..20u64).map(|i| i * 33).collect();
    assert_eq!(emitted, expected);
}

#[test]
fn stale_frame_is_dropped_after_timeout() {
    let c = Correlator::<u64>::new(limits(3, 200));
    c.notify_frame(k(100));
    assert!(c.notify_result(k(400), 1).is_empty());
    assert_eq!(c.frame_count(), 0);
    assert_eq!(c.pending_results(), vec![k(400)]);
}

#[test]
fn stale_result_is_dropped_after_timeout() {
    let c = Correlator::<u64>::new(limits(3, 200));
    c.notify_frame(k(400));
    assert!(c.notify_result(k(100), 1).is_empty());
    assert_eq!(c.result_count(), 0);
    assert_eq!(c.pending_frames(), vec![k(400)]);
}

#[test]
fn overflow_evicts_smallest_keys() {
    let c = Correlator::<u64>::new(limits(3, 200));
    for ts in 1..=4 {
        c.notify_frame(k(ts));
    }
    assert_eq!(c.pending_frames(), vec![k(2), k(3), k(4)]);

    let c = Correlator::<u64>::new(limits(2, 10_000));
    c.notify_frame(k(1_000));
    for ts in [10, 20, 30] {
        assert!(c.notify_result(k(ts), ts).is_empty());
    }
    assert_eq!(c.pending_results(), vec![k(20), k(30)]);
}

#[test]
fn result_without_any_frame_is_left_for_fallback() {
    let c = Correlator::<u64>::new(limits(3, 200));
    assert!(c.notify_result(k(500), 1).is_empty());
    c.forget(k(500));
    assert_eq!(c.result_count(), 0);
    assert_eq!(c.frame_count(), 0);
}

#[test]
fn shuffled_streams_keep_every_invariant() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for round in 0..20 {
        let limit = 1 + round % 5;
        let c = Correlator::<u64>::new(limits(limit, 120));
        // frames arrive in capture order, completions in any order
        let mut frames: VecDeque<u64> = (0..60u64).map(|i| i * 33).collect();
        let mut results: Vec<u64> = frames.iter().copied().collect();
        results.shuffle(&mut rng);
        let mut results: VecDeque<u64> = results.into();
        let mut events = Vec::new();
        while !frames.is_empty() || !results.is_empty() {
            let take_frame = !frames.is_empty() && (results.is_empty() || rng.gen_bool(0.5));
            if take_frame {
                events.extend(frames.pop_front().map(Event::Frame));
            } else {
                events.extend(results.pop_front().map(Event::Result));
            }
        }

        let mut emitted: Vec<u64> = Vec::new();
        for event in events {
            match event {
                Event::Frame(ts) => c.notify_frame(k(ts)),
                Event::Result(ts) => {
                    let pairs = c.notify_result(k(ts), ts);
                    for (key, handle) in &pairs {
                        assert_eq!(key.as_millis(), *handle, "pair carries its own handle");
                    }
                    emitted.extend(keys_of(&pairs));
                }
            }
            assert!(c.frame_count() <= limit);
            assert!(c.result_count() <= limit);
        }

        let unique: HashSet<u64> = emitted.iter().copied().collect();
        assert_eq!(unique.len(), emitted.len(), "duplicate emission");
        assert!(
            emitted.windows(2).all(|w| w[0] < w[1]),
            "emissions out of order: {:?}",
            emitted
        );
    }
}

#[test]
fn jittered_frame_arrival_keeps_bounds_and_uniqueness() {
    let mut rng = StdRng::seed_from_u64(0x0f0f);
    for round in 0..20 {
        let limit = 1 + round % 5;
        let c = Correlator::<u64>::new(limits(limit, 120));
        // neighbouring frames swap arrival now and then
        let mut frames: Vec<u64> = (0..60u64).map(|i| i * 33).collect();
        let mut i = 0;
        while i + 1 < frames.len() {
            if rng.gen_bool(0.3) {
                frames.swap(i, i + 1);
                i += 1;
            }
            i += 1;
        }
        let mut results = frames.clone();
        results.shuffle(&mut rng);

        let mut frames: VecDeque<u64> = frames.into();
        let mut results: VecDeque<u64> = results.into();
        let mut emitted: Vec<u64> = Vec::new();
        while !frames.is_empty() || !results.is_empty() {
            let take_frame = !frames.is_empty() && (results.is_empty() || rng.gen_bool(0.5));
            if take_frame {
                if let Some(ts) = frames.pop_front() {
                    c.notify_frame(k(ts));
                }
            } else if let Some(ts) = results.pop_front() {
                let pairs = c.notify_result(k(ts), ts);
                for (key, handle) in &pairs {
                    assert_eq!(key.as_millis(), *handle, "pair carries its own handle");
                }
                emitted.extend(keys_of(&pairs));
            }
            assert!(c.frame_count() <= limit);
            assert!(c.result_count() <= limit);
        }

        let unique: HashSet<u64> = emitted.iter().copied().collect();
        assert_eq!(unique.len(), emitted.len(), "duplicate emission in round {}", round);
    }
}

#[test]
fn concurrent_producers_never_duplicate() {
    let c = Arc::new(Correlator::<u64>::new(limits(4, 200)));
    let keys: Vec<u64> = (0..400u64).map(|i| 10_000 + i * 10).collect();

    let frames = {
        let c = c.clone();
        let keys = keys.clone();
        thread::spawn(move || {
            for ts in keys {
                c.notify_frame(k(ts));
            }
        })
    };

    let emitted = Arc::new(Mutex::new(Vec::new()));
    let mut workers = Vec::new();
    for parity in 0..2u64 {
        let c = c.clone();
        let keys = keys.clone();
        let emitted = emitted.clone();
        workers.push(thread::spawn(move || {
            let mut local = Vec::new();
            for ts in keys.into_iter().filter(|ts| (ts / 10) % 2 == parity) {
                local.extend(keys_of(&c.notify_result(k(ts), ts)));
                assert!(c.frame_count() <= 4);
                assert!(c.result_count() <= 4);
            }
            assert!(local.windows(2).all(|w| w[0] < w[1]));
            emitted.lock().unwrap().extend(local);
        }));
    }

    frames.join().unwrap();
    for worker in workers {
        worker.join().unwrap();
    }

    let emitted = emitted.lock().unwrap();
    let unique: HashSet<u64> = emitted.iter().copied().collect();
    assert_eq!(unique.len(), emitted.len());
    assert!(emitted.iter().all(|ts| keys.contains(ts)));
}
