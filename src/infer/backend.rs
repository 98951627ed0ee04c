use anyhow::Result;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::frame::{FrameHeader, InferenceInput};
use crate::timestamp::Span;

use super::output::ResultHandle;

/// Whether `submit` completes on the caller's thread or on a worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InferenceMode {
    Sync,
    #[default]
    Async,
}

impl FromStr for InferenceMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "async" => Ok(Self::Async),
            other => Err(anyhow::anyhow!(
                "unknown inference mode '{}': expected 'sync' or 'async'",
                other
            )),
        }
    }
}

impl fmt::Display for InferenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Async => write!(f, "async"),
        }
    }
}

/// A frame ready to be run through the model.
#[derive(Clone, Debug)]
pub struct InferenceRequest {
    pub header: FrameHeader,
    pub input: InferenceInput,
    pub preprocess: Span,
}

/// Receiver of finished inference outputs.
///
/// Called from whichever thread the backend completes on.
pub trait CompletionSink: Send + Sync {
    fn on_complete(&self, output: ResultHandle);
}

/// Inference runtime boundary.
///
/// Backends own model execution and output tensor layout. They must deliver
/// exactly one completion per accepted request, unless `submit` returns an
/// error, in which case none is delivered.
pub trait InferenceBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Queue a request. In `Sync` mode the completion is delivered before
    /// this returns.
    fn submit(
        &self,
        request: InferenceRequest,
        sink: Arc<dyn CompletionSink>,
        mode: InferenceMode,
    ) -> Result<()>;

    /// Stop accepting work and wait for in-flight requests.
    fn shutdown(&self) {}
}
