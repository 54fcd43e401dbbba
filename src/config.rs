use crate::calibration::CalibrationSettings;
use crate::types::Config;
use anyhow::{Context, Result};
use std::fs;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path))?;
        Ok(config)
    }

    pub fn calibration_settings(&self) -> CalibrationSettings {
        let c = &self.calibration;
        CalibrationSettings {
            canvas_size: (c.canvas_size[0], c.canvas_size[1]),
            offset_x: c.offset_x,
            offset_y: c.offset_y,
            lateral_offset: c.lateral_offset,
            top_right_nudge_x: c.top_right_nudge_x,
        }
    }
}
