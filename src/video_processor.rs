// src/video_processor.rs
//
// OpenCV video decode/encode used by the frame-processing driver.

use crate::error::IoError;
use crate::media::path_str;
use opencv::{
    core::{Mat, Size},
    prelude::*,
    videoio::{
        self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst, VideoWriter,
        VideoWriterTrait,
    },
};
use std::path::{Path, PathBuf};
use tracing::info;

pub struct VideoReader {
    path: PathBuf,
    cap: VideoCapture,
    pub fps: f64,
    pub total_frames: i32,
    pub current_frame: i32,
}

impl VideoReader {
    pub fn open(path: &Path) -> Result<Self, IoError> {
        info!("Opening video: {}", path.display());

        let cap = VideoCapture::from_file(path_str(path)?, videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            return Err(IoError::VideoOpen {
                path: path.to_path_buf(),
            });
        }

        let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
        let total_frames = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_COUNT)? as i32;
        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;

        info!(
            "Video properties: {}x{} @ {:.1} FPS, {} frames",
            width, height, fps, total_frames
        );

        Ok(Self {
            path: path.to_path_buf(),
            cap,
            fps,
            total_frames,
            current_frame: 0,
        })
    }

    /// Next decoded frame in BGR, or None at the end of the stream.
    pub fn read_frame(&mut self) -> Result<Option<Mat>, IoError> {
        let mut frame = Mat::default();
        let got = VideoCaptureTrait::read(&mut self.cap, &mut frame).map_err(|source| IoError::Video {
            path: self.path.clone(),
            source,
        })?;
        if !got || frame.empty() {
            return Ok(None);
        }
        self.current_frame += 1;
        Ok(Some(frame))
    }

    pub fn frames(&mut self) -> Frames<'_> {
        Frames { reader: self }
    }

    pub fn progress(&self) -> f32 {
        if self.total_frames == 0 {
            return 0.0;
        }
        (self.current_frame as f32 / self.total_frames as f32) * 100.0
    }
}

/// Decoded frames in stream order.
pub struct Frames<'a> {
    reader: &'a mut VideoReader,
}

impl Iterator for Frames<'_> {
    type Item = Result<Mat, IoError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_frame().transpose()
    }
}

/// mp4v encoder whose frame size is fixed by the first frame written.
pub struct VideoSink {
    path: PathBuf,
    fps: f64,
    writer: Option<VideoWriter>,
    pub frames_written: u64,
}

impl VideoSink {
    pub fn new(path: &Path, fps: f64) -> Self {
        Self {
            path: path.to_path_buf(),
            fps,
            writer: None,
            frames_written: 0,
        }
    }

    pub fn write(&mut self, frame: &Mat) -> Result<(), IoError> {
        if self.writer.is_none() {
            self.writer = Some(self.open(frame.size()?)?);
        }
        if let Some(writer) = self.writer.as_mut() {
            VideoWriterTrait::write(writer, frame).map_err(|source| IoError::Video {
                path: self.path.clone(),
                source,
            })?;
        }
        self.frames_written += 1;
        Ok(())
    }

    fn open(&self, size: Size) -> Result<VideoWriter, IoError> {
        info!(
            "Output video: {} ({}x{} @ {:.1} FPS)",
            self.path.display(),
            size.width,
            size.height,
            self.fps
        );

        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = VideoWriter::new(path_str(&self.path)?, fourcc, self.fps, size, true)?;
        if !writer.is_opened()? {
            return Err(IoError::VideoOpen {
                path: self.path.clone(),
            });
        }
        Ok(writer)
    }

    /// Flushes the container. A sink that never received a frame writes
    /// nothing.
    pub fn finish(mut self) -> Result<u64, IoError> {
        if let Some(mut writer) = self.writer.take() {
            writer.release().map_err(|source| IoError::Video {
                path: self.path.clone(),
                source,
            })?;
        }
        Ok(self.frames_written)
    }
}
