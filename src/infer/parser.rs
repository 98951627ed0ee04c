use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::output::{InferenceOutput, OutputTensor};

/// Values per box row: x1, y1, x2, y2, score.
pub const BOX_ROW_LEN: usize = 5;
/// Values per keypoint: x, y, score.
pub const KPS_POINT_LEN: usize = 3;

/// Axis-aligned detection rectangle in model input coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
}

impl Region {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            score,
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &Region) -> f32 {
        let l = self.x1.max(other.x1);
        let r = self.x2.min(other.x2);
        let t = self.y1.max(other.y1);
        let b = self.y2.min(other.y2);
        let inter = (r - l).max(0.0) * (b - t).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }

    /// Clamp to `[0, width] x [0, height]`.
    pub fn clamp_to(&mut self, width: u32, height: u32) {
        let (w, h) = (width as f32, height as f32);
        self.x1 = self.x1.max(0.0);
        self.y1 = self.y1.max(0.0);
        self.x2 = self.x2.min(w);
        self.y2 = self.y2.min(h);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub score: f32,
}

/// Keypoint set for one detected target.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Keypoints {
    #[serde(rename = "type")]
    pub kind: String,
    pub points: Vec<Keypoint>,
}

/// Parsed model output.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedOutput {
    /// Regions keyed by model output index (one index per category).
    pub regions: BTreeMap<usize, Vec<Region>>,
    pub keypoints: Option<Vec<Keypoints>>,
}

impl ParsedOutput {
    pub fn region_count(&self) -> usize {
        self.regions.values().map(Vec::len).sum()
    }
}

/// Parser boundary. `Err` means the output could not be interpreted;
/// "nothing detected" is an `Ok` with empty region lists.
pub trait OutputParser: Send + Sync {
    fn parse(&self, output: &InferenceOutput) -> Result<ParsedOutput>;
}

/// Parser for flat `[x1, y1, x2, y2, score]` box tensors and
/// `[x, y, score] * K` keypoint tensors.
#[derive(Clone, Debug)]
pub struct BoxTensorParser {
    pub box_outputs: Vec<usize>,
    pub kps_output: Option<usize>,
    pub kps_per_target: usize,
    pub score_threshold: f32,
}

impl BoxTensorParser {
    pub fn new(box_outputs: Vec<usize>, kps_output: Option<usize>, kps_per_target: usize) -> Self {
        Self {
            box_outputs,
            kps_output,
            kps_per_target,
            score_threshold: 0.0,
        }
    }

    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    fn parse_boxes(&self, index: usize, tensor: &OutputTensor) -> Result<Vec<Region>> {
        if tensor.data.len() % BOX_ROW_LEN != 0 {
            bail!(
                "box output {} has {} values, not a multiple of {}",
                index,
                tensor.data.len(),
                BOX_ROW_LEN
            );
        }
        Ok(tensor
            .data
            .chunks_exact(BOX_ROW_LEN)
            .map(|row| Region::new(row[0], row[1], row[2], row[3], row[4]))
            .filter(|region| region.score >= self.score_threshold)
            .collect())
    }

    fn parse_keypoints(&self, index: usize, tensor: &OutputTensor) -> Result<Vec<Keypoints>> {
        let stride = self.kps_per_target * KPS_POINT_LEN;
        if stride == 0 {
            bail!("keypoint output {} configured with zero points per target", index);
        }
        if tensor.data.len() % stride != 0 {
            bail!(
                "keypoint output {} has {} values, not a multiple of {}",
                index,
                tensor.data.len(),
                stride
            );
        }
        Ok(tensor
            .data
            .chunks_exact(stride)
            .map(|target| Keypoints {
                kind: "body_kps".to_string(),
                points: target
                    .chunks_exact(KPS_POINT_LEN)
                    .map(|p| Keypoint {
                        x: p[0],
                        y: p[1],
                        score: p[2],
                    })
                    .collect(),
            })
            .collect())
    }
}

impl OutputParser for BoxTensorParser {
    fn parse(&self, output: &InferenceOutput) -> Result<ParsedOutput> {
        let mut parsed = ParsedOutput::default();
        for &index in &self.box_outputs {
            let tensor = output.tensor(index).ok_or_else(|| {
                anyhow!(
                    "output index {} exceeds tensor count {}",
                    index,
                    output.tensors.len()
                )
            })?;
            parsed.regions.insert(index, self.parse_boxes(index, tensor)?);
        }
        if let Some(index) = self.kps_output {
            let tensor = output
                .tensor(index)
                .ok_or_else(|| anyhow!("keypoint output index {} missing", index))?;
            parsed.keypoints = Some(self.parse_keypoints(index, tensor)?);
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(tensors: Vec<OutputTensor>) -> InferenceOutput {
        InferenceOutput {
            tensors,
            ..InferenceOutput::default()
        }
    }

    #[test]
    fn parses_boxes_and_keypoints() {
        let parser = BoxTensorParser::new(vec![0, 1], Some(2), 2);
        let out = output(vec![
            OutputTensor::new(vec![1, 5], vec![1.0, 2.0, 11.0, 22.0, 0.9]),
            OutputTensor::new(vec![0, 5], vec![]),
            OutputTensor::new(vec![1, 2, 3], vec![3.0, 4.0, 0.8, 5.0, 6.0, 0.7]),
        ]);
        let parsed = parser.parse(&out).unwrap();
        assert_eq!(parsed.regions[&0], vec![Region::new(1.0, 2.0, 11.0, 22.0, 0.9)]);
        assert!(parsed.regions[&1].is_empty());
        let kps = parsed.keypoints.unwrap();
        assert_eq!(kps.len(), 1);
        assert_eq!(kps[0].points[1], Keypoint { x: 5.0, y: 6.0, score: 0.7 });
    }

    #[test]
    fn empty_detections_are_not_an_error() {
        let parser = BoxTensorParser::new(vec![0], None, 0);
        let parsed = parser.parse(&output(vec![OutputTensor::default()])).unwrap();
        assert_eq!(parsed.region_count(), 0);
        assert!(parsed.keypoints.is_none());
    }

    #[test]
    fn missing_tensor_is_an_error() {
        let parser = BoxTensorParser::new(vec![3], None, 0);
        assert!(parser.parse(&output(vec![OutputTensor::default()])).is_err());
    }

    #[test]
    fn ragged_box_tensor_is_an_error() {
        let parser = BoxTensorParser::new(vec![0], None, 0);
        let out = output(vec![OutputTensor::new(vec![1, 4], vec![1.0, 2.0, 3.0, 4.0])]);
        assert!(parser.parse(&out).is_err());
    }

    #[test]
    fn score_threshold_filters_rows() {
        let parser = BoxTensorParser::new(vec![0], None, 0).with_score_threshold(0.5);
        let out = output(vec![OutputTensor::new(
            vec![2, 5],
            vec![0.0, 0.0, 1.0, 1.0, 0.4, 0.0, 0.0, 2.0, 2.0, 0.6],
        )]);
        assert_eq!(parser.parse(&out).unwrap().regions[&0].len(), 1);
    }

    #[test]
    fn clamp_limits_rect_to_model_input() {
        let mut r = Region::new(-5.0, -1.0, 1000.0, 600.0, 0.9);
        r.clamp_to(960, 544);
        assert_eq!(r, Region::new(0.0, 0.0, 960.0, 544.0, 0.9));
    }

    #[test]
    fn iou_of_identical_regions_is_one() {
        let r = Region::new(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((r.iou(&r) - 1.0).abs() < 1e-6);
        let far = Region::new(20.0, 20.0, 30.0, 30.0, 1.0);
        assert_eq!(r.iou(&far), 0.0);
    }
}
