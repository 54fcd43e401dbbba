// src/frame_processor.rs
//
// Drives a calibrated rendering graph over still images and videos.
// Images are pulled one at a time; nothing is read ahead.

use crate::compgraph::{CompGraph, CompGraphRunner, FrozenParams, RunInputs, Token};
use crate::error::{DriverError, IoError, PipelineError};
use crate::geometry::TransformPair;
use crate::media;
use crate::pipelines::lane_rendering;
use crate::video_processor::{VideoReader, VideoSink};
use opencv::core::Mat;
use opencv::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const FALLBACK_FPS: f64 = 25.0;

/// Binds `params` to `graph` and returns a per-frame function that feeds
/// the frame with `M`/`Minv` and yields the rendered overlay.
pub fn make_processor(
    graph: Arc<CompGraph>,
    params: FrozenParams,
    transforms: &TransformPair,
) -> Result<impl Fn(&Mat) -> Result<Mat, PipelineError>, PipelineError> {
    let runner = CompGraphRunner::new(graph, params)?;
    let output = runner.output(lane_rendering::OUTPUT)?;
    let forward = transforms.forward;
    let inverse = transforms.inverse;

    Ok(move |frame: &Mat| {
        let inputs = RunInputs::new()
            .with("image", Token::Image(frame.try_clone()?))
            .with("M", Token::Transform(forward))
            .with("Minv", Token::Transform(inverse));
        let mut state = runner.run(inputs)?;
        state.take(&output)?.into_image(output.as_str())
    })
}

/// Single-pass iterator reading and processing one image per `next`.
pub struct ProcessedImages<I, L, P> {
    paths: I,
    load: L,
    process: P,
}

impl<I, L, P> Iterator for ProcessedImages<I, L, P>
where
    I: Iterator<Item = PathBuf>,
    L: FnMut(&Path) -> Result<Mat, IoError>,
    P: Fn(&Mat) -> Result<Mat, PipelineError>,
{
    type Item = Result<Mat, DriverError>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.paths.next()?;
        debug!("Processing {}", path.display());
        Some(
            (self.load)(&path)
                .map_err(DriverError::from)
                .and_then(|image| (self.process)(&image).map_err(DriverError::from)),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.paths.size_hint()
    }
}

impl<I, L, P> ExactSizeIterator for ProcessedImages<I, L, P>
where
    I: ExactSizeIterator<Item = PathBuf>,
    L: FnMut(&Path) -> Result<Mat, IoError>,
    P: Fn(&Mat) -> Result<Mat, PipelineError>,
{
}

pub fn process_images<F, P>(
    filenames: F,
    processor: P,
) -> ProcessedImages<F::IntoIter, fn(&Path) -> Result<Mat, IoError>, P>
where
    F: IntoIterator<Item = PathBuf>,
    P: Fn(&Mat) -> Result<Mat, PipelineError>,
{
    process_images_with(
        filenames,
        media::read_image as fn(&Path) -> Result<Mat, IoError>,
        processor,
    )
}

/// Like `process_images` with a custom image loader.
pub fn process_images_with<F, L, P>(filenames: F, load: L, processor: P) -> ProcessedImages<F::IntoIter, L, P>
where
    F: IntoIterator<Item = PathBuf>,
    L: FnMut(&Path) -> Result<Mat, IoError>,
    P: Fn(&Mat) -> Result<Mat, PipelineError>,
{
    ProcessedImages {
        paths: filenames.into_iter(),
        load,
        process: processor,
    }
}

pub fn save_images<I, D>(images: I, destinations: D) -> Result<usize, DriverError>
where
    I: IntoIterator<Item = Result<Mat, DriverError>>,
    D: IntoIterator<Item = PathBuf>,
{
    save_images_with(images, destinations, |path, image| media::write_image(path, image))
}

/// Writes image/destination pairs in order. Stops at the first error; if
/// either side runs out before the other, the pairs already matched are
/// written and `LengthMismatch` is returned.
pub fn save_images_with<I, D, W>(images: I, destinations: D, mut write: W) -> Result<usize, DriverError>
where
    I: IntoIterator<Item = Result<Mat, DriverError>>,
    D: IntoIterator<Item = PathBuf>,
    W: FnMut(&Path, &Mat) -> Result<(), IoError>,
{
    let mut images = images.into_iter();
    let mut destinations = destinations.into_iter();
    let mut written = 0;

    loop {
        let Some(path) = destinations.next() else {
            return if images_remain(&mut images)? {
                Err(DriverError::LengthMismatch {
                    written,
                    missing: "destination",
                })
            } else {
                info!("✓ Saved {} images", written);
                Ok(written)
            };
        };

        let image = match images.next() {
            Some(image) => image?,
            None => {
                return Err(DriverError::LengthMismatch {
                    written,
                    missing: "image",
                })
            }
        };

        write(&path, &image)?;
        debug!("Wrote {}", path.display());
        written += 1;
    }
}

/// Answers from `size_hint` when it is conclusive, otherwise pulls one item.
fn images_remain<I>(images: &mut I) -> Result<bool, DriverError>
where
    I: Iterator<Item = Result<Mat, DriverError>>,
{
    match images.size_hint() {
        (lower, _) if lower > 0 => Ok(true),
        (_, Some(0)) => Ok(false),
        _ => match images.next() {
            Some(image) => image.map(|_| true),
            None => Ok(false),
        },
    }
}

/// Processes frames strictly in order, handing each result to `sink`.
pub fn process_frames<F, P, S>(frames: F, processor: &P, mut sink: S) -> Result<u64, DriverError>
where
    F: IntoIterator<Item = Result<Mat, IoError>>,
    P: Fn(&Mat) -> Result<Mat, PipelineError>,
    S: FnMut(&Mat) -> Result<(), IoError>,
{
    let mut count = 0u64;
    for frame in frames {
        let rendered = processor(&frame?)?;
        sink(&rendered)?;
        count += 1;
        if count % 100 == 0 {
            debug!("Processed {} frames", count);
        }
    }
    Ok(count)
}

/// Decodes `src`, processes every frame and encodes the result to `dst`
/// at the source frame rate. Audio is not carried over.
pub fn process_video<P>(src: &Path, dst: &Path, processor: &P) -> Result<u64, DriverError>
where
    P: Fn(&Mat) -> Result<Mat, PipelineError>,
{
    let mut reader = VideoReader::open(src)?;
    let fps = if reader.fps > 0.0 {
        reader.fps
    } else {
        warn!(
            "⚠️ {} reports no frame rate, encoding at {} FPS",
            src.display(),
            FALLBACK_FPS
        );
        FALLBACK_FPS
    };

    let mut sink = VideoSink::new(dst, fps);
    let count = process_frames(reader.frames(), processor, |frame| sink.write(frame))?;
    sink.finish()?;

    info!(
        "✓ Processed {} frames ({:.0}%) of {} -> {}",
        count,
        reader.progress(),
        src.display(),
        dst.display()
    );
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraParams;
    use crate::compgraph::Param;
    use crate::pipelines::merge_params;
    use nalgebra::Matrix3;
    use opencv::core::{self, Scalar};
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeMap;

    fn constant(value: u8) -> Mat {
        Mat::new_rows_cols_with_default(1, 1, core::CV_8UC1, Scalar::all(value as f64)).unwrap()
    }

    fn value_of(image: &Mat) -> u8 {
        *image.at_2d::<u8>(0, 0).unwrap()
    }

    fn increment(image: &Mat) -> Result<Mat, PipelineError> {
        Ok(constant(value_of(image) + 1))
    }

    fn paths(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("img{i}.png"))).collect()
    }

    #[test]
    fn test_images_are_loaded_lazily() {
        let loads = Cell::new(0);
        let mut images = process_images_with(
            paths(3),
            |_: &Path| {
                loads.set(loads.get() + 1);
                Ok(constant(loads.get() as u8))
            },
            increment,
        );

        assert_eq!(loads.get(), 0);
        assert_eq!(images.len(), 3);

        let first = images.next().unwrap().unwrap();
        assert_eq!(loads.get(), 1);
        assert_eq!(value_of(&first), 2);
        assert_eq!(images.size_hint(), (2, Some(2)));
    }

    #[test]
    fn test_load_failure_is_reported_per_image() {
        let mut images = process_images_with(
            paths(1),
            |p: &Path| {
                Err(IoError::ImageRead {
                    path: p.to_path_buf(),
                })
            },
            increment,
        );
        assert!(matches!(
            images.next(),
            Some(Err(DriverError::Io(IoError::ImageRead { .. })))
        ));
        assert!(images.next().is_none());
    }

    #[test]
    fn test_more_images_than_destinations() {
        let loads = Cell::new(0);
        let images = process_images_with(
            paths(3),
            |_: &Path| {
                loads.set(loads.get() + 1);
                Ok(constant(0))
            },
            increment,
        );
        let written = RefCell::new(Vec::new());

        let result = save_images_with(images, paths(2), |p, _| {
            written.borrow_mut().push(p.to_path_buf());
            Ok(())
        });

        assert!(matches!(
            result,
            Err(DriverError::LengthMismatch {
                written: 2,
                missing: "destination"
            })
        ));
        assert_eq!(written.borrow().len(), 2);
        assert_eq!(loads.get(), 2);
    }

    #[test]
    fn test_fewer_images_than_destinations() {
        let images = vec![Ok(constant(1))];
        let mut count = 0;
        let result = save_images_with(images, paths(2), |_, _| {
            count += 1;
            Ok(())
        });
        assert!(matches!(
            result,
            Err(DriverError::LengthMismatch {
                written: 1,
                missing: "image"
            })
        ));
        assert_eq!(count, 1);
    }

    #[test]
    fn test_matched_lengths_write_in_order() {
        let images = process_images_with(paths(3), |_: &Path| Ok(constant(7)), increment);
        let written = RefCell::new(Vec::new());
        let n = save_images_with(images, paths(3), |p, image| {
            written.borrow_mut().push((p.to_path_buf(), value_of(image)));
            Ok(())
        })
        .unwrap();

        assert_eq!(n, 3);
        let written = written.into_inner();
        assert_eq!(written[0], (PathBuf::from("img0.png"), 8));
        assert_eq!(written[2], (PathBuf::from("img2.png"), 8));
    }

    #[test]
    fn test_frames_keep_their_order() {
        let frames = (0..5u8).map(|v| Ok(constant(v)));
        let mut seen = Vec::new();
        let count = process_frames(frames, &increment, |frame| {
            seen.push(value_of(frame));
            Ok(())
        })
        .unwrap();

        assert_eq!(count, 5);
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_frame_failure_stops_the_stream() {
        let frames = (0..5u8).map(|v| Ok(constant(v)));
        let fail_on_two = |image: &Mat| {
            if value_of(image) == 2 {
                Err(PipelineError::NodeFailed {
                    node: "render".into(),
                    reason: "boom".into(),
                })
            } else {
                increment(image)
            }
        };
        let mut seen = Vec::new();
        let result = process_frames(frames, &fail_on_two, |frame| {
            seen.push(value_of(frame));
            Ok(())
        });

        assert!(matches!(result, Err(DriverError::Pipeline(_))));
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn test_processor_renders_frame_sized_overlay() {
        let camera = CameraParams {
            camera_matrix: [[100.0, 0.0, 40.0], [0.0, 100.0, 30.0], [0.0, 0.0, 1.0]],
            dist_coeffs: vec![0.0; 5],
        };
        let mut overrides = BTreeMap::new();
        overrides.insert("canvas_size".to_string(), Param::Pair([50.0, 150.0]));
        let mut params = merge_params(lane_rendering::default_params(), &overrides);
        camera.bind_into(&mut params);

        let transforms = TransformPair {
            forward: Matrix3::new(0.5, 0.0, 0.0, 0.0, 2.5, 0.0, 0.0, 0.0, 1.0),
            inverse: Matrix3::new(2.0, 0.0, 0.0, 0.0, 0.4, 0.0, 0.0, 0.0, 1.0),
        };
        let processor =
            make_processor(Arc::new(lane_rendering::graph().unwrap()), params, &transforms)
                .unwrap();

        let black =
            Mat::new_rows_cols_with_default(60, 80, core::CV_8UC3, Scalar::all(0.0)).unwrap();
        for _ in 0..2 {
            let out = processor(&black).unwrap();
            assert_eq!(out.rows(), 60);
            assert_eq!(out.cols(), 80);
        }
    }

    #[test]
    fn test_processor_rejects_incomplete_params() {
        let result = make_processor(
            Arc::new(lane_rendering::graph().unwrap()),
            lane_rendering::default_params(),
            &TransformPair {
                forward: Matrix3::identity(),
                inverse: Matrix3::identity(),
            },
        );
        assert!(matches!(result, Err(PipelineError::UnboundParameter(_))));
    }
}
