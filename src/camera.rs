// src/camera.rs
//
// Precomputed camera intrinsics: a 3x3 camera matrix and the distortion
// coefficients, stored as JSON arrays next to the session.

use crate::compgraph::{FrozenParams, Param};
use crate::error::IoError;
use crate::types::CameraConfig;
use opencv::{calib3d, core, core::Mat, prelude::*};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct CameraParams {
    pub camera_matrix: [[f64; 3]; 3],
    pub dist_coeffs: Vec<f64>,
}

impl CameraParams {
    pub fn load(config: &CameraConfig) -> Result<Self, IoError> {
        let camera_matrix: [[f64; 3]; 3] = read_json(Path::new(&config.camera_matrix_path))?;
        let dist_coeffs: Vec<f64> = read_json(Path::new(&config.dist_coeffs_path))?;

        info!(
            "✓ Camera parameters loaded (fx={:.1}, fy={:.1}, {} distortion coefficients)",
            camera_matrix[0][0],
            camera_matrix[1][1],
            dist_coeffs.len()
        );

        Ok(Self {
            camera_matrix,
            dist_coeffs,
        })
    }

    pub fn undistort(&self, image: &Mat) -> Result<Mat, opencv::Error> {
        let camera_matrix = Mat::from_slice_2d(&self.camera_matrix)?;
        let dist_coeffs = Mat::from_slice(&self.dist_coeffs)?.try_clone()?;

        let mut out = Mat::default();
        calib3d::undistort(
            image,
            &mut out,
            &camera_matrix,
            &dist_coeffs,
            &core::no_array(),
        )?;
        Ok(out)
    }

    /// Insert `camera_matrix` (row-major, 9 values) and `dist_coeffs` into a
    /// pipeline's frozen parameters.
    pub fn bind_into(&self, params: &mut FrozenParams) {
        let flat: Vec<f64> = self.camera_matrix.iter().flatten().copied().collect();
        params.insert("camera_matrix".to_string(), Param::List(flat));
        params.insert(
            "dist_coeffs".to_string(),
            Param::List(self.dist_coeffs.clone()),
        );
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, IoError> {
    let contents = fs::read_to_string(path).map_err(|e| IoError::CameraParams {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&contents).map_err(|e| IoError::CameraParams {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
