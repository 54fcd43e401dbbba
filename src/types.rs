use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::compgraph::Param;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub calibration: CalibrationConfig,
    pub camera: CameraConfig,
    pub session: SessionConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub reference_images: Vec<String>,
    /// Bird's-eye canvas as (width, height).
    pub canvas_size: [u32; 2],
    pub offset_x: f64,
    pub offset_y: f64,
    /// Sideways widening of the sampled road region, in pixels.
    #[serde(default)]
    pub lateral_offset: f64,
    /// Rig-specific x correction applied to the top-right source point.
    #[serde(default)]
    pub top_right_nudge_x: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub camera_matrix_path: String,
    pub dist_coeffs_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub image_dir: String,
    #[serde(default)]
    pub videos: Vec<String>,
    pub output_dir: String,
    pub diagram_name: String,
}

/// Per-key overrides of the reference pipelines' frozen parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub straight_lanes: BTreeMap<String, Param>,
    #[serde(default)]
    pub lane_rendering: BTreeMap<String, Param>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2D) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Lane boundary segment. Endpoints may come in either order; `top` is
/// the one with the smaller y (farther from the camera).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Line {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    fn is_top_first(&self) -> bool {
        self.y1 <= self.y2
    }

    pub fn top(&self) -> Point2D {
        if self.is_top_first() {
            Point2D::new(self.x1, self.y1)
        } else {
            Point2D::new(self.x2, self.y2)
        }
    }

    pub fn bottom(&self) -> Point2D {
        if self.is_top_first() {
            Point2D::new(self.x2, self.y2)
        } else {
            Point2D::new(self.x1, self.y1)
        }
    }

    /// Same segment with the top endpoint first.
    pub fn oriented(&self) -> Line {
        let (top, bottom) = (self.top(), self.bottom());
        Line::new(top.x, top.y, bottom.x, bottom.y)
    }

    /// Move the line sideways by `dx` pixels; y and slope are unchanged.
    pub fn shifted(&self, dx: f64) -> Line {
        Line {
            x1: self.x1 + dx,
            x2: self.x2 + dx,
            ..*self
        }
    }

    pub fn length(&self) -> f64 {
        self.top().distance(&self.bottom())
    }

    /// Mean of each endpoint coordinate. `None` for an empty slice.
    pub fn mean(lines: &[Line]) -> Option<Line> {
        if lines.is_empty() {
            return None;
        }
        let n = lines.len() as f64;
        let sum = lines.iter().fold(Line::new(0.0, 0.0, 0.0, 0.0), |acc, l| {
            Line::new(acc.x1 + l.x1, acc.y1 + l.y1, acc.x2 + l.x2, acc.y2 + l.y2)
        });
        Some(Line::new(sum.x1 / n, sum.y1 / n, sum.x2 / n, sum.y2 / n))
    }
}

/// Left and right lane boundaries detected in one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LanePair {
    pub left: Line,
    pub right: Line,
}

impl LanePair {
    /// Both lines with their top endpoint first.
    pub fn oriented(&self) -> LanePair {
        LanePair {
            left: self.left.oriented(),
            right: self.right.oriented(),
        }
    }

    /// Widen the pair symmetrically: left moves by `-offset`, right by `+offset`.
    pub fn widened(&self, offset: f64) -> LanePair {
        LanePair {
            left: self.left.shifted(-offset),
            right: self.right.shifted(offset),
        }
    }
}
