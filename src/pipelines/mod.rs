// src/pipelines/mod.rs
//
// Reference computation graphs used by a session:
//   - straight_lanes: Hough-based left/right line extraction for calibration
//   - lane_rendering: bird's-eye lane fit rendered back onto the frame

pub mod lane_rendering;
pub mod straight_lanes;

use crate::compgraph::{FrozenParams, Param};
use crate::error::PipelineError;
use crate::geometry::to_rows;
use crate::types::Point2D;
use nalgebra::Matrix3;
use opencv::core::{Mat, Point, Vector};
use opencv::prelude::*;
use std::collections::BTreeMap;

/// Defaults with per-key overrides applied on top.
pub fn merge_params(defaults: FrozenParams, overrides: &BTreeMap<String, Param>) -> FrozenParams {
    let mut params = defaults;
    for (k, v) in overrides {
        params.insert(k.clone(), v.clone());
    }
    params
}

pub(crate) fn transform_to_mat(m: &Matrix3<f64>) -> Result<Mat, PipelineError> {
    Ok(Mat::from_slice_2d(&to_rows(m))?)
}

pub(crate) fn polygon_to_cv(points: &[Point2D]) -> Vector<Vector<Point>> {
    let ring: Vector<Point> = points
        .iter()
        .map(|p| Point::new(p.x.round() as i32, p.y.round() as i32))
        .collect();
    let mut polys = Vector::new();
    polys.push(ring);
    polys
}

pub(crate) fn empty_like(image: &Mat) -> Result<Mat, PipelineError> {
    Ok(Mat::zeros(image.rows(), image.cols(), image.typ())?.to_mat()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_overrides_single_keys() {
        let mut defaults = FrozenParams::new();
        defaults.insert("a".into(), Param::Int(1));
        defaults.insert("b".into(), Param::Float(0.5));

        let mut overrides = BTreeMap::new();
        overrides.insert("b".into(), Param::Float(0.25));

        let merged = merge_params(defaults, &overrides);
        assert_eq!(merged["a"], Param::Int(1));
        assert_eq!(merged["b"], Param::Float(0.25));
    }

    #[test]
    fn test_polygon_to_cv_rounds() {
        let polys = polygon_to_cv(&[Point2D::new(1.4, 2.6), Point2D::new(10.0, 0.0)]);
        assert_eq!(polys.len(), 1);
        let ring = polys.get(0).unwrap();
        assert_eq!(ring.get(0).unwrap(), Point::new(1, 3));
    }
}
