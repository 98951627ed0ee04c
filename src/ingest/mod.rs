//! Frame sources.
//!
//! A source hands decoded frames to the node. Camera decoding is an external
//! collaborator; the crate ships only the `stub://` synthetic camera, which is
//! enough to drive the whole pipeline in tests and demos.

mod synthetic;

pub use synthetic::SyntheticSource;

use anyhow::{bail, Result};

use crate::frame::{DecodedFrame, ImageEncoding};

pub const STUB_SCHEME: &str = "stub://";

#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// Source URL. Only `stub://...` is handled in-crate.
    pub url: String,
    /// Frames per second the run loop aims for.
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    pub encoding: ImageEncoding,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            target_fps: 30,
            width: 960,
            height: 544,
            encoding: ImageEncoding::Nv12,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub url: String,
}

pub trait FrameSource: Send {
    fn connect(&mut self) -> Result<()>;
    fn next_frame(&mut self) -> Result<DecodedFrame>;
    fn is_healthy(&self) -> bool;
    fn stats(&self) -> SourceStats;
}

/// Open the source named by `config.url`.
pub fn open_source(config: SourceConfig) -> Result<Box<dyn FrameSource>> {
    if config.url.starts_with(STUB_SCHEME) {
        return Ok(Box::new(SyntheticSource::new(config)?));
    }
    bail!(
        "unsupported source url {}: only {} sources are built in",
        config.url,
        STUB_SCHEME
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_stub_url_is_rejected() {
        let config = SourceConfig {
            url: "rtsp://10.0.0.2:554/stream".to_string(),
            ..SourceConfig::default()
        };
        assert!(open_source(config).is_err());
    }

    #[test]
    fn stub_url_opens() -> Result<()> {
        let mut source = open_source(SourceConfig::default())?;
        source.connect()?;
        assert!(source.is_healthy());
        assert_eq!(source.stats().url, "stub://camera");
        Ok(())
    }
}
