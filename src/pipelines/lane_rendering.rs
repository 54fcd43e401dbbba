// src/pipelines/lane_rendering.rs
//
// Per-frame lane overlay: undistort, warp to the bird's-eye canvas,
// threshold, fit one quadratic per lane with a sliding-window search,
// fill the lane region and warp it back over the frame.

use super::{polygon_to_cv, transform_to_mat};
use crate::compgraph::{CompGraph, Curve, FrozenParams, Node, NodeArgs, Param, Token};
use crate::error::PipelineError;
use crate::types::Point2D;
use nalgebra::{DMatrix, DVector};
use opencv::{
    calib3d,
    core::{self, Mat, Point, Scalar, Size, Vector},
    imgproc,
    prelude::*,
};
use std::collections::BTreeSet;
use tracing::debug;

/// Token holding the blended frame.
pub const OUTPUT: &str = "im_lane_rendering";

pub fn graph() -> Result<CompGraph, PipelineError> {
    let nodes = vec![
        Node::new(
            "undistort",
            &["image", "camera_matrix", "dist_coeffs"],
            &["im_undistorted"],
            |args| {
                let camera_matrix = camera_matrix_mat(args, 1)?;
                let dist_coeffs = Mat::from_slice(&args.list(2)?)?.try_clone()?;
                let mut out = Mat::default();
                calib3d::undistort(
                    args.image(0)?,
                    &mut out,
                    &camera_matrix,
                    &dist_coeffs,
                    &core::no_array(),
                )?;
                Ok(vec![Token::Image(out)])
            },
        ),
        Node::new(
            "warp",
            &["im_undistorted", "M", "canvas_size"],
            &["im_warped"],
            |args| {
                let m = transform_to_mat(args.transform(1)?)?;
                let mut out = Mat::default();
                imgproc::warp_perspective(
                    args.image(0)?,
                    &mut out,
                    &m,
                    canvas(args, 2)?,
                    imgproc::INTER_LINEAR,
                    core::BORDER_CONSTANT,
                    Scalar::default(),
                )?;
                Ok(vec![Token::Image(out)])
            },
        ),
        Node::new(
            "threshold_saturation",
            &["im_warped", "s_thresh"],
            &["im_binary_s"],
            |args| {
                let [lo, hi] = args.pair(1)?;
                let mut hls = Mat::default();
                imgproc::cvt_color(args.image(0)?, &mut hls, imgproc::COLOR_BGR2HLS, 0)?;
                let mut saturation = Mat::default();
                core::extract_channel(&hls, &mut saturation, 2)?;
                Ok(vec![Token::Image(band(&saturation, lo, hi)?)])
            },
        ),
        Node::new(
            "threshold_gradient",
            &["im_warped", "sobel_kernel", "gradient_thresh"],
            &["im_binary_grad"],
            |args| {
                let [lo, hi] = args.pair(2)?;
                let mut gray = Mat::default();
                imgproc::cvt_color(args.image(0)?, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;
                let mut sobel_x = Mat::default();
                imgproc::sobel(
                    &gray,
                    &mut sobel_x,
                    core::CV_16S,
                    1,
                    0,
                    args.int(1)? as i32,
                    1.0,
                    0.0,
                    core::BORDER_DEFAULT,
                )?;
                let mut magnitude = Mat::default();
                core::convert_scale_abs(&sobel_x, &mut magnitude, 1.0, 0.0)?;
                Ok(vec![Token::Image(band(&magnitude, lo, hi)?)])
            },
        ),
        Node::new(
            "combine_binary",
            &["im_binary_s", "im_binary_grad"],
            &["im_binary"],
            |args| {
                let mut out = Mat::default();
                core::bitwise_or(args.image(0)?, args.image(1)?, &mut out, &core::no_array())?;
                Ok(vec![Token::Image(out)])
            },
        ),
        Node::new("sample_rows", &["canvas_size"], &["plot_y"], |args| {
            let [_, height] = args.pair(0)?;
            let rows = (0..height.max(0.0) as usize).map(|y| y as f64).collect();
            Ok(vec![Token::Values(rows)])
        }),
        Node::new(
            "fit_lanes",
            &["im_binary", "n_windows", "window_margin", "min_window_pixels"],
            &["curve_left", "curve_right"],
            |args| {
                let binary = args.image(0)?;
                let mut found: Vector<Point> = Vector::new();
                core::find_non_zero(binary, &mut found)?;
                let pixels: Vec<(f64, f64)> =
                    found.iter().map(|p| (p.x as f64, p.y as f64)).collect();

                let search = WindowSearch {
                    n_windows: args.int(1)?.max(1) as usize,
                    margin: args.float(2)?,
                    min_pixels: args.int(3)?.max(0) as usize,
                };
                let (left, right) = sliding_window_fit(
                    &pixels,
                    binary.cols() as usize,
                    binary.rows() as f64,
                    &search,
                );
                debug!(
                    "Lane fit on {} pixels: left={}, right={}",
                    pixels.len(),
                    left.is_some(),
                    right.is_some()
                );
                Ok(vec![Token::Curve(left), Token::Curve(right)])
            },
        ),
        Node::new(
            "draw_lane_region",
            &["curve_left", "curve_right", "plot_y", "canvas_size"],
            &["im_lane_region"],
            |args| {
                let size = canvas(args, 3)?;
                let mut region = Mat::new_rows_cols_with_default(
                    size.height,
                    size.width,
                    core::CV_8UC3,
                    Scalar::all(0.0),
                )?;
                if let (Some(left), Some(right)) = (args.curve(0)?, args.curve(1)?) {
                    let rows = args.values(2)?;
                    let polygon = lane_polygon(&left, &right, rows);
                    imgproc::fill_poly(
                        &mut region,
                        &polygon_to_cv(&polygon),
                        Scalar::new(0.0, 255.0, 0.0, 0.0),
                        imgproc::LINE_8,
                        0,
                        Point::default(),
                    )?;
                }
                Ok(vec![Token::Image(region)])
            },
        ),
        Node::new(
            "unwarp",
            &["im_lane_region", "Minv", "im_undistorted"],
            &["im_lane_region_camera"],
            |args| {
                let minv = transform_to_mat(args.transform(1)?)?;
                let mut out = Mat::default();
                imgproc::warp_perspective(
                    args.image(0)?,
                    &mut out,
                    &minv,
                    args.image(2)?.size()?,
                    imgproc::INTER_LINEAR,
                    core::BORDER_CONSTANT,
                    Scalar::default(),
                )?;
                Ok(vec![Token::Image(out)])
            },
        ),
        Node::new(
            "blend_overlay",
            &["im_undistorted", "im_lane_region_camera", "overlay_alpha"],
            &[OUTPUT],
            |args| {
                let mut out = Mat::default();
                core::add_weighted(
                    args.image(0)?,
                    1.0,
                    args.image(1)?,
                    args.float(2)?,
                    0.0,
                    &mut out,
                    -1,
                )?;
                Ok(vec![Token::Image(out)])
            },
        ),
    ];

    CompGraph::new(nodes, &["image", "M", "Minv"])
}

/// Everything except `camera_matrix` and `dist_coeffs`.
pub fn default_params() -> FrozenParams {
    let mut p = FrozenParams::new();
    p.insert("canvas_size".into(), Param::Pair([500.0, 1500.0]));
    p.insert("s_thresh".into(), Param::Pair([170.0, 255.0]));
    p.insert("sobel_kernel".into(), Param::Int(3));
    p.insert("gradient_thresh".into(), Param::Pair([20.0, 100.0]));
    p.insert("n_windows".into(), Param::Int(9));
    p.insert("window_margin".into(), Param::Float(100.0));
    p.insert("min_window_pixels".into(), Param::Int(50));
    p.insert("overlay_alpha".into(), Param::Float(0.3));
    p
}

fn canvas(args: &NodeArgs<'_>, i: usize) -> Result<Size, PipelineError> {
    let [w, h] = args.pair(i)?;
    if w < 1.0 || h < 1.0 {
        return Err(args.fail(format!("canvas {w}x{h} is empty")));
    }
    Ok(Size::new(w as i32, h as i32))
}

/// 255 where `lo <= value <= hi` on an 8-bit single-channel image.
fn band(src: &Mat, lo: f64, hi: f64) -> Result<Mat, PipelineError> {
    let mut above = Mat::default();
    imgproc::threshold(src, &mut above, lo - 0.5, 255.0, imgproc::THRESH_BINARY)?;
    let mut below = Mat::default();
    imgproc::threshold(src, &mut below, hi + 0.5, 255.0, imgproc::THRESH_BINARY_INV)?;
    let mut out = Mat::default();
    core::bitwise_and(&above, &below, &mut out, &core::no_array())?;
    Ok(out)
}

fn camera_matrix_mat(args: &NodeArgs<'_>, i: usize) -> Result<Mat, PipelineError> {
    let values = args.list(i)?;
    if values.len() != 9 {
        return Err(args.fail(format!(
            "camera_matrix needs 9 values, got {}",
            values.len()
        )));
    }
    let rows = [
        [values[0], values[1], values[2]],
        [values[3], values[4], values[5]],
        [values[6], values[7], values[8]],
    ];
    Ok(Mat::from_slice_2d(&rows)?)
}

pub fn eval_curve(curve: &Curve, y: f64) -> f64 {
    curve[0] * y * y + curve[1] * y + curve[2]
}

/// Left curve top to bottom, then right curve bottom to top.
fn lane_polygon(left: &Curve, right: &Curve, rows: &[f64]) -> Vec<Point2D> {
    let mut polygon: Vec<Point2D> = rows
        .iter()
        .map(|&y| Point2D::new(eval_curve(left, y), y))
        .collect();
    polygon.extend(
        rows.iter()
            .rev()
            .map(|&y| Point2D::new(eval_curve(right, y), y)),
    );
    polygon
}

#[derive(Debug, Clone, Copy)]
pub struct WindowSearch {
    pub n_windows: usize,
    pub margin: f64,
    /// Pixels needed in a window before it recentres the next one.
    pub min_pixels: usize,
}

/// Sliding-window lane search over nonzero pixels `(x, y)` of a binary
/// bird's-eye image. Each side starts at the peak of the column histogram
/// of the lower half and climbs `n_windows` windows. Returns the fitted
/// `x = a*y^2 + b*y + c` per side, or None where too few rows were found.
pub fn sliding_window_fit(
    pixels: &[(f64, f64)],
    width: usize,
    height: f64,
    search: &WindowSearch,
) -> (Option<Curve>, Option<Curve>) {
    if width == 0 || search.n_windows == 0 {
        return (None, None);
    }

    let mut histogram = vec![0usize; width];
    for &(x, y) in pixels {
        if y >= height / 2.0 && x >= 0.0 && (x as usize) < width {
            histogram[x as usize] += 1;
        }
    }
    let midpoint = width / 2;
    let left_base = peak(&histogram[..midpoint]);
    let right_base = midpoint + peak(&histogram[midpoint..]);

    let mut left_x = left_base as f64;
    let mut right_x = right_base as f64;
    let mut left_points = Vec::new();
    let mut right_points = Vec::new();

    let window_height = height / search.n_windows as f64;
    for w in 0..search.n_windows {
        let y_high = height - w as f64 * window_height;
        let y_low = y_high - window_height;

        for (center, points) in [
            (&mut left_x, &mut left_points),
            (&mut right_x, &mut right_points),
        ] {
            let inside: Vec<(f64, f64)> = pixels
                .iter()
                .copied()
                .filter(|&(x, y)| y >= y_low && y < y_high && (x - *center).abs() < search.margin)
                .collect();
            if inside.len() > search.min_pixels {
                *center = inside.iter().map(|p| p.0).sum::<f64>() / inside.len() as f64;
            }
            points.extend(inside);
        }
    }

    (fit_quadratic(&left_points), fit_quadratic(&right_points))
}

fn peak(histogram: &[usize]) -> usize {
    let mut best = 0;
    for (i, &count) in histogram.iter().enumerate() {
        if count > histogram[best] {
            best = i;
        }
    }
    best
}

/// Least-squares `x = a*y^2 + b*y + c`. Needs three distinct rows.
pub fn fit_quadratic(points: &[(f64, f64)]) -> Option<Curve> {
    let rows: BTreeSet<i64> = points.iter().map(|p| p.1.round() as i64).collect();
    if rows.len() < 3 {
        return None;
    }

    let design = DMatrix::from_fn(points.len(), 3, |r, c| points[r].1.powi(2 - c as i32));
    let xs = DVector::from_iterator(points.len(), points.iter().map(|p| p.0));
    let coeffs = design.svd(true, true).solve(&xs, 1e-12).ok()?;

    let curve = [coeffs[0], coeffs[1], coeffs[2]];
    curve.iter().all(|c| c.is_finite()).then_some(curve)
}
