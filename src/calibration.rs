// src/calibration.rs
//
// Road-plane calibration: derive the bird's-eye homography pair from lane
// lines detected on a few images of a straight, flat road.
//
// All reference images must come from the same camera pose and show a
// locally straight road. Averaging across them suppresses per-image
// detection noise; it cannot detect a violated precondition.

use crate::compgraph::{CompGraph, CompGraphRunner, FrozenParams, OutputKey, RunInputs, Token};
use crate::error::{CalibrationError, PipelineError};
use crate::geometry::{perspective_transform, Quad, TransformPair};
use crate::types::{LanePair, Line};
use opencv::core::Mat;
use opencv::prelude::*;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Detects the left and right lane lines of one image.
pub trait LaneLineExtractor {
    type Image;

    fn detect(&self, image: &Self::Image) -> Result<LanePair, PipelineError>;
}

/// Extractor backed by a computation graph exposing `avg_line_left` and
/// `avg_line_right`, taking the image as its `image` input.
pub struct GraphLineExtractor {
    runner: CompGraphRunner,
    left: OutputKey,
    right: OutputKey,
}

impl GraphLineExtractor {
    pub const LEFT: &'static str = "avg_line_left";
    pub const RIGHT: &'static str = "avg_line_right";

    pub fn new(graph: Arc<CompGraph>, params: FrozenParams) -> Result<Self, PipelineError> {
        let runner = CompGraphRunner::new(graph, params)?;
        let left = runner.output(Self::LEFT)?;
        let right = runner.output(Self::RIGHT)?;
        Ok(Self {
            runner,
            left,
            right,
        })
    }
}

impl LaneLineExtractor for GraphLineExtractor {
    type Image = Mat;

    fn detect(&self, image: &Mat) -> Result<LanePair, PipelineError> {
        let inputs = RunInputs::new().with("image", Token::Image(image.try_clone()?));
        let state = self.runner.run(inputs)?;
        let left = state.get(&self.left)?.clone().into_line(Self::LEFT)?;
        let right = state.get(&self.right)?.clone().into_line(Self::RIGHT)?;
        Ok(LanePair { left, right })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationSettings {
    /// Bird's-eye canvas as (width, height) in pixels.
    pub canvas_size: (u32, u32),
    pub offset_x: f64,
    pub offset_y: f64,
    /// Widens the sampled region: left line moves by -offset, right by +offset.
    pub lateral_offset: f64,
    /// Empirical x correction of the top-right source corner for one
    /// specific camera rig. Zero disables it.
    pub top_right_nudge_x: f64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            canvas_size: (500, 1500),
            offset_x: 100.0,
            offset_y: 0.0,
            lateral_offset: 0.0,
            top_right_nudge_x: 0.0,
        }
    }
}

pub struct RoadPlaneCalibrator<E: LaneLineExtractor> {
    extractor: E,
    settings: CalibrationSettings,
}

impl<E: LaneLineExtractor> RoadPlaneCalibrator<E> {
    pub fn new(extractor: E, settings: CalibrationSettings) -> Self {
        Self {
            extractor,
            settings,
        }
    }

    /// Averaged ground-plane region seen by the camera, as
    /// [top-left, top-right, bottom-right, bottom-left].
    pub fn define_flat_plane_on_road(&self, images: &[E::Image]) -> Result<Quad, CalibrationError> {
        if images.is_empty() {
            return Err(CalibrationError::NoReferenceImages);
        }

        let mut left_lines = Vec::with_capacity(images.len());
        let mut right_lines = Vec::with_capacity(images.len());

        for (index, image) in images.iter().enumerate() {
            let pair = self
                .extractor
                .detect(image)
                .map_err(|source| CalibrationError::Extraction { index, source })?
                .oriented()
                .widened(self.settings.lateral_offset);

            debug!(
                "Reference {}: left {:?}, right {:?}",
                index, pair.left, pair.right
            );
            left_lines.push(pair.left);
            right_lines.push(pair.right);
        }

        let (Some(left), Some(right)) = (Line::mean(&left_lines), Line::mean(&right_lines)) else {
            return Err(CalibrationError::NoReferenceImages);
        };

        Ok(Quad::from_lines(&left, &right))
    }

    /// Destination rectangle on the bird's-eye canvas.
    pub fn destination_quad(&self) -> Result<Quad, CalibrationError> {
        let s = &self.settings;
        let (w, h) = s.canvas_size;
        let invalid = s.offset_x < 0.0
            || s.offset_y < 0.0
            || 2.0 * s.offset_x >= w as f64
            || 2.0 * s.offset_y >= h as f64;
        if invalid {
            return Err(CalibrationError::InvalidCanvas {
                width: w,
                height: h,
                offset_x: s.offset_x,
                offset_y: s.offset_y,
            });
        }
        Ok(Quad::inset_rectangle(s.canvas_size, s.offset_x, s.offset_y))
    }

    /// Compute the forward (camera -> bird's-eye) and inverse transforms.
    pub fn calibrate(&self, images: &[E::Image]) -> Result<TransformPair, CalibrationError> {
        info!("Calibrating road plane from {} reference image(s)", images.len());

        let mut src = self.define_flat_plane_on_road(images)?;
        if self.settings.top_right_nudge_x != 0.0 {
            warn!(
                "Applying rig-specific top-right correction of {:+.1}px",
                self.settings.top_right_nudge_x
            );
            src.0[1].x += self.settings.top_right_nudge_x;
        }
        let dst = self.destination_quad()?;

        transforms_between(&src, &dst)
    }
}

/// Forward src -> dst and inverse dst -> src homographies, each from the
/// four correspondences directly.
pub fn transforms_between(src: &Quad, dst: &Quad) -> Result<TransformPair, CalibrationError> {
    if let Some((i, j)) = src.coincident_pair() {
        return Err(CalibrationError::DegenerateQuad {
            quad: "source",
            i,
            j,
        });
    }
    if let Some((i, j)) = dst.coincident_pair() {
        return Err(CalibrationError::DegenerateQuad {
            quad: "destination",
            i,
            j,
        });
    }

    let forward =
        perspective_transform(src, dst).ok_or(CalibrationError::SingularHomography("forward"))?;
    let inverse =
        perspective_transform(dst, src).ok_or(CalibrationError::SingularHomography("inverse"))?;

    let pair = TransformPair { forward, inverse };
    debug!(
        "Source quad {:?} maps to {:?}",
        src.points(),
        src.points().map(|p| pair.to_birds_eye(p))
    );
    debug!(
        "Destination quad {:?} maps back to {:?}",
        dst.points(),
        dst.points().map(|p| pair.to_camera(p))
    );

    Ok(pair)
}
