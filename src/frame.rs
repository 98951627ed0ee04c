//! Decoded frames and their conversion into inference input.
//!
//! - `DecodedFrame`: what a frame source hands to the node (header + pixels).
//! - `InferenceInput`: shared, validated pixel buffer handed to the backend.
//!
//! Color conversion and resizing belong to the image-processing collaborator;
//! this layer only checks that the buffer matches the declared encoding.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::timestamp::{CaptureStamp, TimestampKey};

/// Pixel encodings accepted by the ingestion boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageEncoding {
    Rgb8,
    Nv12,
}

impl ImageEncoding {
    /// Expected buffer length for a `width x height` image.
    pub fn expected_len(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::Rgb8 => pixels * 3,
            Self::Nv12 => pixels * 3 / 2,
        }
    }
}

impl FromStr for ImageEncoding {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "rgb8" => Ok(Self::Rgb8),
            "nv12" => Ok(Self::Nv12),
            other => Err(anyhow!(
                "unsupported image encoding '{}': expected 'rgb8' or 'nv12'",
                other
            )),
        }
    }
}

impl fmt::Display for ImageEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rgb8 => write!(f, "rgb8"),
            Self::Nv12 => write!(f, "nv12"),
        }
    }
}

/// Frame identity carried from capture through to the published message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub frame_id: String,
    pub stamp: CaptureStamp,
}

impl FrameHeader {
    pub fn new(frame_id: impl Into<String>, stamp: CaptureStamp) -> Self {
        Self {
            frame_id: frame_id.into(),
            stamp,
        }
    }

    pub fn key(&self) -> TimestampKey {
        self.stamp.key()
    }
}

/// A decoded frame from a source.
#[derive(Clone, Debug)]
pub struct DecodedFrame {
    pub header: FrameHeader,
    pub encoding: ImageEncoding,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl DecodedFrame {
    pub fn new(
        header: FrameHeader,
        encoding: ImageEncoding,
        width: u32,
        height: u32,
        data: Vec<u8>,
    ) -> Self {
        Self {
            header,
            encoding,
            width,
            height,
            data,
        }
    }
}

/// Validated pixel buffer for the inference backend.
///
/// The buffer is shared so a backend can keep it alive on a worker thread
/// without copying.
#[derive(Clone, Debug)]
pub struct InferenceInput {
    pub encoding: ImageEncoding,
    pub width: u32,
    pub height: u32,
    data: Arc<Vec<u8>>,
}

impl InferenceInput {
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Convert a decoded frame into backend input.
pub fn prepare_input(frame: DecodedFrame) -> Result<InferenceInput> {
    if frame.width == 0 || frame.height == 0 {
        bail!(
            "frame {} has empty dimensions {}x{}",
            frame.header.frame_id,
            frame.width,
            frame.height
        );
    }
    let expected = frame.encoding.expected_len(frame.width, frame.height);
    if frame.data.len() != expected {
        bail!(
            "frame {} {} buffer is {} bytes, expected {} for {}x{}",
            frame.header.frame_id,
            frame.encoding,
            frame.data.len(),
            expected,
            frame.width,
            frame.height
        );
    }
    Ok(InferenceInput {
        encoding: frame.encoding,
        width: frame.width,
        height: frame.height,
        data: Arc::new(frame.data),
    })
}
