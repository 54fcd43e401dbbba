// src/visualize.rs
//
// Renders a bound pipeline as a Graphviz diagram.

use crate::compgraph::{CompGraph, CompGraphRunner, FrozenParams};
use crate::error::VisualizeError;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::info;

const DEFAULT_FORMAT: &str = "png";

/// Writes `<output>.dot` next to the diagram, then renders `output` with
/// the `dot` executable. The format follows the output extension.
pub fn render_pipeline(
    output_path: &Path,
    graph: Arc<CompGraph>,
    params: FrozenParams,
) -> Result<(), VisualizeError> {
    let runner = CompGraphRunner::new(graph, params)?;
    let dot = runner.to_dot();

    let dot_path = dot_path_for(output_path);
    fs::write(&dot_path, &dot).map_err(|source| VisualizeError::Write {
        path: dot_path.clone(),
        source,
    })?;

    run_layout(&dot, output_path)?;
    info!("✓ Pipeline diagram written to {}", output_path.display());
    Ok(())
}

fn dot_path_for(output_path: &Path) -> PathBuf {
    let mut name = output_path.as_os_str().to_os_string();
    name.push(".dot");
    PathBuf::from(name)
}

fn output_format(output_path: &Path) -> &str {
    output_path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or(DEFAULT_FORMAT)
}

fn run_layout(dot: &str, output_path: &Path) -> Result<(), VisualizeError> {
    let mut child = Command::new("dot")
        .arg(format!("-T{}", output_format(output_path)))
        .arg("-o")
        .arg(output_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(VisualizeError::LayoutEngine)?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(dot.as_bytes())
            .map_err(VisualizeError::LayoutEngine)?;
    }

    let result = child
        .wait_with_output()
        .map_err(VisualizeError::LayoutEngine)?;
    if !result.status.success() {
        return Err(VisualizeError::LayoutFailed {
            status: result.status.to_string(),
            stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
        });
    }
    Ok(())
}
