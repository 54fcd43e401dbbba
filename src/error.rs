// src/error.rs
//
// Typed errors for every stage of a session. The binary wraps these in
// anyhow at the top level; everything below main returns one of these.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to derive the road-plane transform pair.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("at least one reference image is required")]
    NoReferenceImages,

    #[error("lane line extraction failed on reference image {index}")]
    Extraction {
        index: usize,
        #[source]
        source: PipelineError,
    },

    #[error("{quad} quad is degenerate: points {i} and {j} coincide")]
    DegenerateQuad {
        quad: &'static str,
        i: usize,
        j: usize,
    },

    #[error("invalid canvas {width}x{height} with offsets ({offset_x}, {offset_y})")]
    InvalidCanvas {
        width: u32,
        height: u32,
        offset_x: f64,
        offset_y: f64,
    },

    #[error("{0} homography is singular")]
    SingularHomography(&'static str),
}

/// Filesystem, image, video and camera-parameter failures.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to access {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read image {path}")]
    ImageRead { path: PathBuf },

    #[error("failed to write image {path}")]
    ImageWrite { path: PathBuf },

    #[error("failed to open video {path}")]
    VideoOpen { path: PathBuf },

    #[error("video error on {path}")]
    Video {
        path: PathBuf,
        #[source]
        source: opencv::Error,
    },

    #[error("failed to load camera parameters from {path}: {reason}")]
    CameraParams { path: PathBuf, reason: String },

    #[error("path {0} is not valid UTF-8")]
    NonUtf8Path(PathBuf),

    #[error("path {0} has no file name")]
    NoFileName(PathBuf),

    #[error(transparent)]
    OpenCv(#[from] opencv::Error),
}

/// Graph construction, binding and evaluation failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("duplicate node name '{0}'")]
    DuplicateNode(String),

    #[error("token '{token}' is produced by both '{first}' and '{second}'")]
    DuplicateProducer {
        token: String,
        first: String,
        second: String,
    },

    #[error("graph input '{0}' is also produced by a node")]
    ProducedInput(String),

    #[error("graph contains a cycle through node '{0}'")]
    Cycle(String),

    #[error("unknown token '{0}'")]
    UnknownToken(String),

    #[error("parameter '{0}' has no frozen value")]
    UnboundParameter(String),

    #[error("missing input '{0}'")]
    MissingInput(String),

    #[error("unexpected input '{0}'")]
    UnknownInput(String),

    #[error("output '{0}' is not available in this run")]
    MissingOutput(String),

    #[error("node '{node}' returned {got} values, expected {expected}")]
    OutputArity {
        node: String,
        expected: usize,
        got: usize,
    },

    #[error("token '{token}' is {found}, expected {expected}")]
    TokenType {
        token: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("node '{node}' failed: {reason}")]
    NodeFailed { node: String, reason: String },

    #[error(transparent)]
    OpenCv(#[from] opencv::Error),
}

/// Failures while driving a processor over images or video frames.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("wrote {written} images, then ran out of {missing}s")]
    LengthMismatch {
        written: usize,
        missing: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum VisualizeError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("graphviz 'dot' could not be started")]
    LayoutEngine(#[source] std::io::Error),

    #[error("graphviz 'dot' exited with {status}: {stderr}")]
    LayoutFailed { status: String, stderr: String },
}
