// src/pipelines/straight_lanes.rs
//
// Left/right lane line extraction on images of a straight road:
// gray -> blur -> Canny -> trapezoid ROI -> Hough segments -> per-side
// length-weighted line fit spanning the ROI height.

use super::{empty_like, polygon_to_cv};
use crate::compgraph::{CompGraph, FrozenParams, Node, NodeArgs, Param, Token};
use crate::error::PipelineError;
use crate::types::{Line, Point2D};
use opencv::{
    core::{self, Mat, Point, Scalar, Size, Vec4i, Vector},
    imgproc,
    prelude::*,
};
use tracing::debug;

pub fn graph() -> Result<CompGraph, PipelineError> {
    let nodes = vec![
        Node::new("convert_to_gray", &["image"], &["im_gray"], |args| {
            let mut gray = Mat::default();
            imgproc::cvt_color(args.image(0)?, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;
            Ok(vec![Token::Image(gray)])
        }),
        Node::new(
            "gaussian_blur",
            &["im_gray", "blur_kernel"],
            &["im_blurred"],
            |args| {
                let k = args.int(1)? as i32;
                let mut out = Mat::default();
                imgproc::gaussian_blur(
                    args.image(0)?,
                    &mut out,
                    Size::new(k, k),
                    0.0,
                    0.0,
                    core::BORDER_DEFAULT,
                )?;
                Ok(vec![Token::Image(out)])
            },
        ),
        Node::new(
            "detect_edges",
            &["im_blurred", "canny_thresh"],
            &["im_edges"],
            |args| {
                let [lo, hi] = args.pair(1)?;
                let mut edges = Mat::default();
                imgproc::canny(args.image(0)?, &mut edges, lo, hi, 3, false)?;
                Ok(vec![Token::Image(edges)])
            },
        ),
        Node::new(
            "define_roi",
            &["image", "roi_top", "roi_top_half_width", "roi_bottom_margin"],
            &["roi_vertices"],
            |args| {
                let image = args.image(0)?;
                let roi = roi_trapezoid(
                    image.cols() as f64,
                    image.rows() as f64,
                    args.float(1)?,
                    args.float(2)?,
                    args.float(3)?,
                );
                Ok(vec![Token::Polygon(roi)])
            },
        ),
        Node::new(
            "mask_roi",
            &["im_edges", "roi_vertices"],
            &["im_edges_roi"],
            |args| {
                let edges = args.image(0)?;
                let mut mask = empty_like(edges)?;
                imgproc::fill_poly(
                    &mut mask,
                    &polygon_to_cv(args.polygon(1)?),
                    Scalar::all(255.0),
                    imgproc::LINE_8,
                    0,
                    Point::default(),
                )?;
                let mut out = Mat::default();
                core::bitwise_and(edges, edges, &mut out, &mask)?;
                Ok(vec![Token::Image(out)])
            },
        ),
        Node::new(
            "hough_lines",
            &[
                "im_edges_roi",
                "hough_rho",
                "hough_theta_deg",
                "hough_threshold",
                "hough_min_line_len",
                "hough_max_line_gap",
            ],
            &["lines"],
            |args| {
                let mut segments: Vector<Vec4i> = Vector::new();
                imgproc::hough_lines_p(
                    args.image(0)?,
                    &mut segments,
                    args.float(1)?,
                    args.float(2)?.to_radians(),
                    args.int(3)? as i32,
                    args.float(4)?,
                    args.float(5)?,
                )?;
                let lines: Vec<Line> = segments
                    .iter()
                    .map(|s| Line::new(s[0] as f64, s[1] as f64, s[2] as f64, s[3] as f64))
                    .collect();
                debug!("Hough found {} segments", lines.len());
                Ok(vec![Token::Lines(lines)])
            },
        ),
        Node::new(
            "split_lines",
            &["lines", "image", "min_abs_slope"],
            &["lines_left", "lines_right"],
            |args| {
                let center_x = args.image(1)?.cols() as f64 / 2.0;
                let (left, right) = split_by_slope(args.lines(0)?, center_x, args.float(2)?);
                Ok(vec![Token::Lines(left), Token::Lines(right)])
            },
        ),
        Node::new(
            "average_left",
            &["lines_left", "roi_vertices"],
            &["avg_line_left"],
            |args| average_node(args.lines(0)?, args.polygon(1)?, "left", args),
        ),
        Node::new(
            "average_right",
            &["lines_right", "roi_vertices"],
            &["avg_line_right"],
            |args| average_node(args.lines(0)?, args.polygon(1)?, "right", args),
        ),
    ];

    CompGraph::new(nodes, &["image"])
}

pub fn default_params() -> FrozenParams {
    let mut p = FrozenParams::new();
    p.insert("blur_kernel".into(), Param::Int(5));
    p.insert("canny_thresh".into(), Param::Pair([50.0, 150.0]));
    p.insert("roi_top".into(), Param::Float(0.62));
    p.insert("roi_top_half_width".into(), Param::Float(0.07));
    p.insert("roi_bottom_margin".into(), Param::Float(0.05));
    p.insert("hough_rho".into(), Param::Float(2.0));
    p.insert("hough_theta_deg".into(), Param::Float(1.0));
    p.insert("hough_threshold".into(), Param::Int(20));
    p.insert("hough_min_line_len".into(), Param::Float(20.0));
    p.insert("hough_max_line_gap".into(), Param::Float(100.0));
    p.insert("min_abs_slope".into(), Param::Float(0.3));
    p
}

fn average_node(
    segments: &[Line],
    roi: &[Point2D],
    side: &str,
    args: &NodeArgs<'_>,
) -> Result<Vec<Token>, PipelineError> {
    let y_top = roi.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
    let y_bottom = roi.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
    let line = fit_line(segments, y_top, y_bottom)
        .ok_or_else(|| args.fail(format!("no usable {} lane segments", side)))?;
    Ok(vec![Token::Line(line)])
}

/// Trapezoid [bottom-left, top-left, top-right, bottom-right] where `top`
/// is the top edge as a fraction of height, `top_half_width` and
/// `bottom_margin` are fractions of width.
pub fn roi_trapezoid(
    width: f64,
    height: f64,
    top: f64,
    top_half_width: f64,
    bottom_margin: f64,
) -> Vec<Point2D> {
    let cx = width / 2.0;
    let y_top = height * top;
    let half_top = width * top_half_width;
    let margin = width * bottom_margin;
    vec![
        Point2D::new(margin, height),
        Point2D::new(cx - half_top, y_top),
        Point2D::new(cx + half_top, y_top),
        Point2D::new(width - margin, height),
    ]
}

/// Left lane segments rise to the right (negative dy/dx in image
/// coordinates) and sit left of centre; right lane segments mirror that.
pub fn split_by_slope(lines: &[Line], center_x: f64, min_abs_slope: f64) -> (Vec<Line>, Vec<Line>) {
    let mut left = Vec::new();
    let mut right = Vec::new();

    for line in lines {
        let dx = line.x2 - line.x1;
        if dx == 0.0 {
            continue;
        }
        let slope = (line.y2 - line.y1) / dx;
        let mid_x = (line.x1 + line.x2) / 2.0;

        if slope < -min_abs_slope && mid_x < center_x {
            left.push(*line);
        } else if slope > min_abs_slope && mid_x > center_x {
            right.push(*line);
        }
    }

    (left, right)
}

/// Length-weighted least-squares fit of x = a*y + b through the segment
/// endpoints, evaluated at `y_top` and `y_bottom`.
pub fn fit_line(segments: &[Line], y_top: f64, y_bottom: f64) -> Option<Line> {
    let (mut sw, mut sy, mut sx, mut syy, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);

    for seg in segments {
        let w = seg.length();
        for p in [seg.top(), seg.bottom()] {
            sw += w;
            sy += w * p.y;
            sx += w * p.x;
            syy += w * p.y * p.y;
            sxy += w * p.x * p.y;
        }
    }

    let denom = sw * syy - sy * sy;
    if sw <= 0.0 || denom.abs() < 1e-9 {
        return None;
    }
    let a = (sw * sxy - sy * sx) / denom;
    let b = (sx - a * sy) / sw;

    Some(Line::new(a * y_top + b, y_top, a * y_bottom + b, y_bottom))
}
