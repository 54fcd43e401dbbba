// src/geometry.rs
//
// Planar projective geometry for the road-plane mapping: quads, the
// four-point homography solve and point projection.

use crate::types::{Line, Point2D};
use nalgebra::{Matrix3, SMatrix, Vector3};

/// Points closer than this are treated as coincident.
pub const COINCIDENT_EPS: f64 = 1e-6;

const PROJECTIVE_EPS: f64 = 1e-12;

/// Relative singular-value floor below which the DLT solution is not unique.
const RANK_EPS: f64 = 1e-10;

/// Four ordered points: [top-left, top-right, bottom-right, bottom-left].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad(pub [Point2D; 4]);

impl Quad {
    /// Source region spanned by the left and right lane lines.
    pub fn from_lines(left: &Line, right: &Line) -> Self {
        Quad([left.top(), right.top(), right.bottom(), left.bottom()])
    }

    /// Canvas rectangle of size (width, height) inset by the given margins.
    pub fn inset_rectangle(canvas: (u32, u32), offset_x: f64, offset_y: f64) -> Self {
        let w = canvas.0 as f64;
        let h = canvas.1 as f64;
        Quad([
            Point2D::new(offset_x, offset_y),
            Point2D::new(w - offset_x, offset_y),
            Point2D::new(w - offset_x, h - offset_y),
            Point2D::new(offset_x, h - offset_y),
        ])
    }

    pub fn points(&self) -> &[Point2D; 4] {
        &self.0
    }

    /// First pair of coincident corners, if any.
    pub fn coincident_pair(&self) -> Option<(usize, usize)> {
        for i in 0..4 {
            for j in (i + 1)..4 {
                if self.0[i].distance(&self.0[j]) < COINCIDENT_EPS {
                    return Some((i, j));
                }
            }
        }
        None
    }
}

/// Forward (camera -> bird's-eye) and inverse homographies of one session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformPair {
    pub forward: Matrix3<f64>,
    pub inverse: Matrix3<f64>,
}

impl TransformPair {
    pub fn to_birds_eye(&self, p: Point2D) -> Option<Point2D> {
        project(&self.forward, p)
    }

    pub fn to_camera(&self, p: Point2D) -> Option<Point2D> {
        project(&self.inverse, p)
    }
}

/// Solve the homography mapping `src[i]` onto `dst[i]` for exactly four
/// correspondences.
///
/// The 8x9 DLT system is solved for its null vector on Hartley-normalized
/// points, so no entry of H is assumed nonzero. H is scaled to h33 = 1
/// when h33 is not ~0 and to unit norm otherwise. Returns `None` when the
/// null space is not one-dimensional or H is singular (e.g. three collinear
/// corners).
pub fn perspective_transform(src: &Quad, dst: &Quad) -> Option<Matrix3<f64>> {
    let t_src = normalizing_transform(src)?;
    let t_dst = normalizing_transform(dst)?;

    // Padded to 9x9 so the SVD exposes the full right null space.
    let mut a = SMatrix::<f64, 9, 9>::zeros();
    for (i, (s, d)) in src.0.iter().zip(dst.0.iter()).enumerate() {
        let s = project(&t_src, *s)?;
        let d = project(&t_dst, *d)?;
        let r0 = 2 * i;
        let r1 = 2 * i + 1;

        a[(r0, 0)] = -s.x;
        a[(r0, 1)] = -s.y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = d.x * s.x;
        a[(r0, 7)] = d.x * s.y;
        a[(r0, 8)] = d.x;

        a[(r1, 3)] = -s.x;
        a[(r1, 4)] = -s.y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = d.y * s.x;
        a[(r1, 7)] = d.y * s.y;
        a[(r1, 8)] = d.y;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let sv = svd.singular_values;

    let mut order: Vec<usize> = (0..9).collect();
    order.sort_by(|&i, &j| sv[i].total_cmp(&sv[j]));
    let (smallest, second) = (order[0], order[1]);
    let largest = sv[order[8]];
    if largest.is_nan() || largest <= 0.0 || sv[second] <= RANK_EPS * largest {
        return None;
    }

    let h = v_t.row(smallest);
    let normalized = Matrix3::new(
        h[0], h[1], h[2], //
        h[3], h[4], h[5], //
        h[6], h[7], h[8],
    );
    // Unit-norm and well scaled here, unlike the denormalized H.
    if normalized.determinant().abs() <= RANK_EPS {
        return None;
    }
    let m = scale_homography(t_dst.try_inverse()? * normalized * t_src)?;

    // Only accept a solution that reproduces every correspondence.
    let scale = 1.0
        + src
            .0
            .iter()
            .chain(dst.0.iter())
            .map(|p| p.x.abs().max(p.y.abs()))
            .fold(0.0, f64::max);
    for (s, d) in src.0.iter().zip(dst.0.iter()) {
        let p = project(&m, *s)?;
        if p.distance(d) > 1e-6 * scale {
            return None;
        }
    }

    Some(m)
}

/// Similarity moving the centroid to the origin with mean distance sqrt(2).
fn normalizing_transform(quad: &Quad) -> Option<Matrix3<f64>> {
    let n = quad.0.len() as f64;
    let cx = quad.0.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = quad.0.iter().map(|p| p.y).sum::<f64>() / n;
    let centroid = Point2D::new(cx, cy);
    let mean_dist = quad.0.iter().map(|p| p.distance(&centroid)).sum::<f64>() / n;
    if !mean_dist.is_finite() || mean_dist <= COINCIDENT_EPS {
        return None;
    }
    let k = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(
        k, 0.0, -k * cx, //
        0.0, k, -k * cy, //
        0.0, 0.0, 1.0,
    ))
}

fn scale_homography(m: Matrix3<f64>) -> Option<Matrix3<f64>> {
    let norm = m.norm();
    if !norm.is_finite() || norm <= PROJECTIVE_EPS {
        return None;
    }
    let h33 = m[(2, 2)];
    if h33.abs() > RANK_EPS * norm {
        Some(m / h33)
    } else {
        Some(m / norm)
    }
}

/// Apply a homography to one point. `None` if the point maps to infinity.
pub fn project(h: &Matrix3<f64>, p: Point2D) -> Option<Point2D> {
    let v = h * Vector3::new(p.x, p.y, 1.0);
    let w = v[2];
    if !w.is_finite() || w.abs() <= PROJECTIVE_EPS {
        return None;
    }
    Some(Point2D::new(v[0] / w, v[1] / w))
}

/// Row-major copy of a 3x3 matrix, the layout OpenCV expects.
pub fn to_rows(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
    let mut rows = [[0.0; 3]; 3];
    for (r, row) in rows.iter_mut().enumerate() {
        for (c, v) in row.iter_mut().enumerate() {
            *v = m[(r, c)];
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn scenario_quads() -> (Quad, Quad) {
        let src = Quad([
            Point2D::new(100.0, 200.0),
            Point2D::new(250.0, 200.0),
            Point2D::new(250.0, 400.0),
            Point2D::new(100.0, 400.0),
        ]);
        let dst = Quad::inset_rectangle((500, 1500), 100.0, 0.0);
        (src, dst)
    }

    #[test]
    fn test_inset_rectangle() {
        let dst = Quad::inset_rectangle((500, 1500), 100.0, 0.0);
        assert_eq!(
            dst.0,
            [
                Point2D::new(100.0, 0.0),
                Point2D::new(400.0, 0.0),
                Point2D::new(400.0, 1500.0),
                Point2D::new(100.0, 1500.0),
            ]
        );
    }

    #[test]
    fn test_from_lines_ordering() {
        let left = Line::new(150.0, 200.0, 100.0, 400.0);
        let right = Line::new(250.0, 200.0, 300.0, 400.0);
        let quad = Quad::from_lines(&left, &right);
        assert_eq!(quad.0[0], Point2D::new(150.0, 200.0));
        assert_eq!(quad.0[1], Point2D::new(250.0, 200.0));
        assert_eq!(quad.0[2], Point2D::new(300.0, 400.0));
        assert_eq!(quad.0[3], Point2D::new(100.0, 400.0));
    }

    #[test]
    fn test_from_lines_accepts_bottom_first_endpoints() {
        let left = Line::new(100.0, 400.0, 150.0, 200.0);
        let right = Line::new(300.0, 400.0, 250.0, 200.0);
        let top_first = Quad::from_lines(&left.oriented(), &right.oriented());
        assert_eq!(Quad::from_lines(&left, &right), top_first);
        assert_eq!(top_first.0[0], Point2D::new(150.0, 200.0));
        assert_eq!(top_first.0[3], Point2D::new(100.0, 400.0));
    }

    #[test]
    fn test_horizon_through_origin() {
        // Lines meet at (200, 0): the vanishing line is y = 0, so h33 vanishes.
        let src = Quad([
            Point2D::new(150.0, 200.0),
            Point2D::new(250.0, 200.0),
            Point2D::new(300.0, 400.0),
            Point2D::new(100.0, 400.0),
        ]);
        let dst = Quad::inset_rectangle((500, 1500), 100.0, 0.0);
        let m = perspective_transform(&src, &dst).unwrap();

        assert_abs_diff_eq!(m[(2, 2)], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(m[(2, 0)], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(m[(0, 1)] / m[(0, 0)], 250.0 / 600.0, epsilon = 1e-9);
        assert_abs_diff_eq!(m[(1, 1)] / m[(2, 1)], 3000.0, epsilon = 1e-6);

        for (s, d) in src.0.iter().zip(dst.0.iter()) {
            let p = project(&m, *s).unwrap();
            assert_abs_diff_eq!(p.x, d.x, epsilon = 1e-6);
            assert_abs_diff_eq!(p.y, d.y, epsilon = 1e-6);
        }

        let inverse = perspective_transform(&dst, &src).unwrap();
        let pair = TransformPair { forward: m, inverse };
        let back = pair
            .to_birds_eye(pair.to_camera(Point2D::new(250.0, 750.0)).unwrap())
            .unwrap();
        assert_abs_diff_eq!(back.x, 250.0, epsilon = 1e-6);
        assert_abs_diff_eq!(back.y, 750.0, epsilon = 1e-6);
    }

    #[test]
    fn test_corners_map_onto_destination() {
        let (src, dst) = scenario_quads();
        let m = perspective_transform(&src, &dst).unwrap();

        let p = project(&m, Point2D::new(100.0, 200.0)).unwrap();
        assert_abs_diff_eq!(p.x, 100.0, epsilon = 1e-6);
        assert_abs_diff_eq!(p.y, 0.0, epsilon = 1e-6);

        let p = project(&m, Point2D::new(250.0, 400.0)).unwrap();
        assert_abs_diff_eq!(p.x, 400.0, epsilon = 1e-6);
        assert_abs_diff_eq!(p.y, 1500.0, epsilon = 1e-6);

        for (s, d) in src.0.iter().zip(dst.0.iter()) {
            let p = project(&m, *s).unwrap();
            assert_abs_diff_eq!(p.x, d.x, epsilon = 1e-6);
            assert_abs_diff_eq!(p.y, d.y, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_trapezoid_round_trip() {
        let src = Quad([
            Point2D::new(585.0, 455.0),
            Point2D::new(700.0, 455.0),
            Point2D::new(1120.0, 720.0),
            Point2D::new(190.0, 720.0),
        ]);
        let dst = Quad::inset_rectangle((500, 1500), 100.0, 0.0);
        let pair = TransformPair {
            forward: perspective_transform(&src, &dst).unwrap(),
            inverse: perspective_transform(&dst, &src).unwrap(),
        };

        for &(x, y) in &[(0.0, 0.0), (250.0, 750.0), (499.0, 1499.0), (120.0, 40.0)] {
            let p = Point2D::new(x, y);
            let back = pair.to_birds_eye(pair.to_camera(p).unwrap()).unwrap();
            assert_abs_diff_eq!(back.x, x, epsilon = 1e-3);
            assert_abs_diff_eq!(back.y, y, epsilon = 1e-3);
        }

        for &(x, y) in &[(640.0, 600.0), (300.0, 700.0), (650.0, 460.0)] {
            let p = Point2D::new(x, y);
            let back = pair.to_camera(pair.to_birds_eye(p).unwrap()).unwrap();
            assert_abs_diff_eq!(back.x, x, epsilon = 1e-3);
            assert_abs_diff_eq!(back.y, y, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_collinear_source_is_singular() {
        let src = Quad([
            Point2D::new(0.0, 0.0),
            Point2D::new(1.0, 1.0),
            Point2D::new(2.0, 2.0),
            Point2D::new(3.0, 3.0),
        ]);
        let dst = Quad::inset_rectangle((10, 10), 1.0, 1.0);
        assert!(perspective_transform(&src, &dst).is_none());
    }

    #[test]
    fn test_coincident_pair() {
        let quad = Quad([
            Point2D::new(0.0, 0.0),
            Point2D::new(5.0, 0.0),
            Point2D::new(5.0, 0.0),
            Point2D::new(0.0, 5.0),
        ]);
        assert_eq!(quad.coincident_pair(), Some((1, 2)));
        assert_eq!(Quad::inset_rectangle((10, 10), 1.0, 1.0).coincident_pair(), None);
    }

    #[test]
    fn test_to_rows_layout() {
        let m = Matrix3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0);
        assert_eq!(to_rows(&m)[1], [4.0, 5.0, 6.0]);
    }
}
