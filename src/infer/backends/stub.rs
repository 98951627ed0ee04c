//! Threaded stand-in for the inference runtime.
//!
//! Requests are queued to a fixed pool of worker threads. Each worker sleeps a
//! jittered latency and emits synthetic box/keypoint tensors derived from the
//! frame id, so completions arrive out of submission order the way a real
//! multi-task runtime's do. No model is executed.

use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::infer::backend::{CompletionSink, InferenceBackend, InferenceMode, InferenceRequest};
use crate::infer::output::{FpsCounter, InferenceOutput, OutputTensor, RuntimeStats};
use crate::infer::parser::{BOX_ROW_LEN, KPS_POINT_LEN};
use crate::timestamp::{CaptureStamp, Span};

#[derive(Clone, Debug)]
pub struct StubBackendConfig {
    /// Number of worker threads.
    pub task_num: usize,
    pub input_width: u32,
    pub input_height: u32,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    /// Number of box outputs (one per category) written before the keypoint output.
    pub box_outputs: usize,
    pub kps_per_target: usize,
}

impl Default for StubBackendConfig {
    fn default() -> Self {
        Self {
            task_num: 2,
            input_width: 960,
            input_height: 544,
            min_latency_ms: 5,
            max_latency_ms: 40,
            box_outputs: 4,
            kps_per_target: 19,
        }
    }
}

struct Job {
    request: InferenceRequest,
    sink: Arc<dyn CompletionSink>,
}

#[derive(Default)]
struct Rates {
    input: FpsCounter,
    output: FpsCounter,
}

/// Stub backend for tests and the demo node.
pub struct StubBackend {
    config: StubBackendConfig,
    queue: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    rates: Arc<Mutex<Rates>>,
}

impl StubBackend {
    pub fn new(config: StubBackendConfig) -> Result<Self> {
        if config.task_num == 0 {
            return Err(anyhow!("stub backend needs at least one worker"));
        }
        if config.min_latency_ms > config.max_latency_ms {
            return Err(anyhow!(
                "stub backend latency range is empty ({} > {})",
                config.min_latency_ms,
                config.max_latency_ms
            ));
        }
        let (tx, rx) = unbounded::<Job>();
        let rates = Arc::new(Mutex::new(Rates::default()));
        let mut workers = Vec::with_capacity(config.task_num);
        for idx in 0..config.task_num {
            let rx: Receiver<Job> = rx.clone();
            let cfg = config.clone();
            let rates = rates.clone();
            let handle = std::thread::Builder::new()
                .name(format!("stub-infer-{}", idx))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        let output = run_job(&cfg, &rates, job.request);
                        job.sink.on_complete(Arc::new(output));
                    }
                    log::debug!("stub inference worker {} exited", idx);
                })
                .map_err(|e| anyhow!("failed to spawn inference worker: {}", e))?;
            workers.push(handle);
        }
        log::info!(
            "StubBackend: {} workers, latency {}..={} ms",
            config.task_num,
            config.min_latency_ms,
            config.max_latency_ms
        );
        Ok(Self {
            config,
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            rates,
        })
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn submit(
        &self,
        request: InferenceRequest,
        sink: Arc<dyn CompletionSink>,
        mode: InferenceMode,
    ) -> Result<()> {
        if let Ok(mut rates) = self.rates.lock() {
            rates.input.tick();
        }
        match mode {
            InferenceMode::Sync => {
                let output = run_job(&self.config, &self.rates, request);
                sink.on_complete(Arc::new(output));
                Ok(())
            }
            InferenceMode::Async => {
                let queue = self
                    .queue
                    .lock()
                    .map_err(|_| anyhow!("inference queue lock poisoned"))?;
                let tx = queue
                    .as_ref()
                    .ok_or_else(|| anyhow!("stub backend is shut down"))?;
                tx.send(Job { request, sink })
                    .map_err(|_| anyhow!("inference workers are gone"))
            }
        }
    }

    fn shutdown(&self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.take();
        }
        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => return,
        };
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for StubBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_job(cfg: &StubBackendConfig, rates: &Mutex<Rates>, request: InferenceRequest) -> InferenceOutput {
    let infer_start = CaptureStamp::now();
    let latency = if cfg.max_latency_ms > cfg.min_latency_ms {
        rand::thread_rng().gen_range(cfg.min_latency_ms..=cfg.max_latency_ms)
    } else {
        cfg.min_latency_ms
    };
    std::thread::sleep(Duration::from_millis(latency));
    let infer_end = CaptureStamp::now();

    let parse_start = CaptureStamp::now();
    let seq = request.header.frame_id.parse::<u64>().unwrap_or(0);
    let tensors = synthesize_tensors(cfg, seq);
    let parse_end = CaptureStamp::now();

    let (input_fps, output_fps, fps_updated) = match rates.lock() {
        Ok(mut rates) => {
            let updated = rates.output.tick();
            (rates.input.fps(), rates.output.fps(), updated)
        }
        Err(_) => (0.0, 0.0, false),
    };

    let infer = Span::new(infer_start, infer_end);
    let parse = Span::new(parse_start, parse_end);
    InferenceOutput {
        header: request.header,
        tensors,
        preprocess: request.preprocess,
        stats: RuntimeStats {
            input_fps,
            output_fps,
            fps_updated,
            infer,
            infer_time_ms: infer.duration_ms(),
            parse,
            parse_time_ms: parse.duration_ms(),
        },
    }
}

/// Deterministic targets that drift a few pixels per frame, kept inside the
/// model input.
pub(crate) fn synthesize_tensors(cfg: &StubBackendConfig, seq: u64) -> Vec<OutputTensor> {
    let targets = 1 + (seq / 90 % 3) as usize;
    let drift = (seq % 120) as f32 * 2.0;
    let (max_x, max_y) = (cfg.input_width as f32, cfg.input_height as f32);
    let mut tensors = Vec::with_capacity(cfg.box_outputs + 1);

    for category in 0..cfg.box_outputs {
        let scale = 1.0 / (category as f32 + 1.0);
        let mut data = Vec::with_capacity(targets * BOX_ROW_LEN);
        for t in 0..targets {
            let x1 = 40.0 + t as f32 * 300.0 + drift;
            let y1 = 30.0 + category as f32 * 20.0;
            let w = 180.0 * scale;
            let h = 420.0 * scale;
            let (x2, y2) = ((x1 + w).min(max_x), (y1 + h).min(max_y));
            data.extend_from_slice(&[x1.min(max_x), y1.min(max_y), x2, y2, 0.95 - 0.1 * t as f32]);
        }
        tensors.push(OutputTensor::new(vec![targets, BOX_ROW_LEN], data));
    }

    let mut kps = Vec::with_capacity(targets * cfg.kps_per_target * KPS_POINT_LEN);
    for t in 0..targets {
        let cx = 130.0 + t as f32 * 300.0 + drift;
        for p in 0..cfg.kps_per_target {
            kps.extend_from_slice(&[cx, 40.0 + p as f32 * 20.0, 0.9]);
        }
    }
    tensors.push(OutputTensor::new(
        vec![targets, cfg.kps_per_target, KPS_POINT_LEN],
        kps,
    ));
    tensors
}
