use anyhow::{bail, Result};

use crate::frame::{DecodedFrame, FrameHeader};
use crate::timestamp::{CaptureStamp, TimestampKey};

use super::{FrameSource, SourceConfig, SourceStats};

/// Synthetic camera for `stub://` URLs.
///
/// Frame ids count up from 1. Capture stamps come from the realtime clock and
/// are bumped by a millisecond when two frames would share a key.
pub struct SyntheticSource {
    config: SourceConfig,
    frame_count: u64,
    last_key: Option<TimestampKey>,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            bail!(
                "synthetic source {} needs non-zero dimensions, got {}x{}",
                config.url,
                config.width,
                config.height
            );
        }
        Ok(Self {
            config,
            frame_count: 0,
            last_key: None,
        })
    }

    fn next_stamp(&mut self) -> CaptureStamp {
        let mut stamp = CaptureStamp::now();
        if let Some(last) = self.last_key {
            if stamp.key() <= last {
                stamp = CaptureStamp::from_millis(last.as_millis() + 1);
            }
        }
        self.last_key = Some(stamp.key());
        stamp
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let len = self
            .config
            .encoding
            .expected_len(self.config.width, self.config.height);
        let shift = self.frame_count;
        (0..len)
            .map(|i| ((i as u64 + shift) % 256) as u8)
            .collect()
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!("SyntheticSource: connected to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<DecodedFrame> {
        self.frame_count += 1;
        let stamp = self.next_stamp();
        let data = self.generate_pixels();
        Ok(DecodedFrame::new(
            FrameHeader::new(self.frame_count.to_string(), stamp),
            self.config.encoding,
            self.config.width,
            self.config.height,
            data,
        ))
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }
}
