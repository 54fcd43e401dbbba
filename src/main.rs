// src/main.rs

mod calibration;
mod camera;
mod compgraph;
mod config;
mod error;
mod frame_processor;
mod geometry;
mod media;
mod pipelines;
mod types;
mod video_processor;
mod visualize;

use anyhow::{Context, Result};
use calibration::{GraphLineExtractor, RoadPlaneCalibrator};
use camera::CameraParams;
use compgraph::{FrozenParams, Param};
use frame_processor::{make_processor, process_images, process_video, save_images};
use geometry::to_rows;
use opencv::core::Mat;
use pipelines::{lane_rendering, merge_params, straight_lanes};
use std::env;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};
use types::Config;

const CONFIG_ENV: &str = "ROADPLANE_CONFIG";

fn main() -> Result<()> {
    let config_path =
        env::var(CONFIG_ENV).unwrap_or_else(|_| config::DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(format!("roadplane={}", config.logging.level))
        .init();

    info!("🛣️ Road-plane session starting");
    info!("✓ Configuration loaded from {}", config_path);

    let camera = CameraParams::load(&config.camera).context("Failed to load camera parameters")?;
    let references = load_reference_images(&config, &camera)?;
    info!("✓ {} reference images undistorted", references.len());

    let extractor = GraphLineExtractor::new(
        Arc::new(straight_lanes::graph()?),
        merge_params(
            straight_lanes::default_params(),
            &config.pipeline.straight_lanes,
        ),
    )?;
    let calibrator = RoadPlaneCalibrator::new(extractor, config.calibration_settings());
    let transforms = calibrator
        .calibrate(&references)
        .context("Road-plane calibration failed")?;
    info!("✓ Calibration complete");
    info!("M = {:?}", to_rows(&transforms.forward));
    debug!("Minv = {:?}", to_rows(&transforms.inverse));

    let output_dir = Path::new(&config.session.output_dir);
    media::create_dir(output_dir)?;

    let rendering = Arc::new(lane_rendering::graph()?);
    let params = rendering_params(&config, &camera);

    let diagram = output_dir.join(&config.session.diagram_name);
    if let Err(e) = visualize::render_pipeline(&diagram, rendering.clone(), params.clone()) {
        error!("❌ Pipeline diagram failed: {:#}", anyhow::Error::new(e));
    }

    let processor = make_processor(rendering, params, &transforms)?;

    let sources = media::list_images(Path::new(&config.session.image_dir))?;
    let destinations = media::mirror_paths(&sources, output_dir)?;
    save_images(process_images(sources, &processor), destinations)
        .context("Failed to process session images")?;

    for video in &config.session.videos {
        let src = Path::new(video);
        let name = src
            .file_name()
            .with_context(|| format!("Video path {} has no file name", video))?;
        process_video(src, &output_dir.join(name), &processor)
            .with_context(|| format!("Failed to process video {}", video))?;
    }

    info!("✅ Session complete");
    Ok(())
}

fn load_reference_images(config: &Config, camera: &CameraParams) -> Result<Vec<Mat>> {
    config
        .calibration
        .reference_images
        .iter()
        .map(|path| {
            let image = media::read_image(Path::new(path))?;
            camera
                .undistort(&image)
                .with_context(|| format!("Failed to undistort {}", path))
        })
        .collect()
}

/// Rendering parameters with the session camera and the calibrated canvas.
fn rendering_params(config: &Config, camera: &CameraParams) -> FrozenParams {
    let mut params = merge_params(
        lane_rendering::default_params(),
        &config.pipeline.lane_rendering,
    );
    camera.bind_into(&mut params);

    let [width, height] = config.calibration.canvas_size;
    params.insert(
        "canvas_size".to_string(),
        Param::Pair([width as f64, height as f64]),
    );
    params
}
