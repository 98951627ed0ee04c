//! Inference runtime boundary: backend trait, completion records, output parsing.

mod backend;
pub mod backends;
mod output;
pub mod parser;

pub use backend::{CompletionSink, InferenceBackend, InferenceMode, InferenceRequest};
pub use backends::{StubBackend, StubBackendConfig};
pub use output::{FpsCounter, InferenceOutput, OutputTensor, ResultHandle, RuntimeStats};
pub use parser::{BoxTensorParser, Keypoint, Keypoints, OutputParser, ParsedOutput, Region};
