// src/media.rs
//
// Image files of a session: listing, output path mirroring, read/write.

use crate::error::IoError;
use opencv::{core::Mat, core::Vector, imgcodecs, prelude::*};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

/// Image files directly inside `dir`, sorted by path.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, IoError> {
    let mut images = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
        let entry = entry.map_err(|e| IoError::File {
            path: dir.to_path_buf(),
            source: e.into(),
        })?;
        if entry.file_type().is_file() && is_image(entry.path()) {
            images.push(entry.into_path());
        }
    }

    images.sort();
    info!("Found {} images in {}", images.len(), dir.display());
    Ok(images)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Same file names, placed under `dst_dir`. One destination per source.
pub fn mirror_paths(sources: &[PathBuf], dst_dir: &Path) -> Result<Vec<PathBuf>, IoError> {
    sources
        .iter()
        .map(|src| {
            src.file_name()
                .map(|name| dst_dir.join(name))
                .ok_or_else(|| IoError::NoFileName(src.clone()))
        })
        .collect()
}

pub fn create_dir(dir: &Path) -> Result<(), IoError> {
    if !dir.exists() {
        debug!("Creating {}", dir.display());
    }
    fs::create_dir_all(dir).map_err(|source| IoError::File {
        path: dir.to_path_buf(),
        source,
    })
}

pub(crate) fn path_str(path: &Path) -> Result<&str, IoError> {
    path.to_str()
        .ok_or_else(|| IoError::NonUtf8Path(path.to_path_buf()))
}

/// Reads a colour image; a missing or undecodable file is an error.
pub fn read_image(path: &Path) -> Result<Mat, IoError> {
    let image = imgcodecs::imread(path_str(path)?, imgcodecs::IMREAD_COLOR)?;
    if image.empty() {
        return Err(IoError::ImageRead {
            path: path.to_path_buf(),
        });
    }
    Ok(image)
}

pub fn write_image(path: &Path, image: &Mat) -> Result<(), IoError> {
    let written = imgcodecs::imwrite(path_str(path)?, image, &Vector::new())?;
    if !written {
        return Err(IoError::ImageWrite {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{self, Scalar};
    use tempfile::TempDir;

    #[test]
    fn test_list_images_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        for name in ["b.jpg", "a.PNG", "notes.txt", "c.jpeg"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("d.jpg"), b"x").unwrap();

        let images = list_images(dir.path()).unwrap();
        let names: Vec<_> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.PNG", "b.jpg", "c.jpeg"]);
    }

    #[test]
    fn test_mirror_paths_keeps_file_names() {
        let sources = vec![PathBuf::from("test_images/straight1.jpg"), PathBuf::from("x/y.png")];
        let mirrored = mirror_paths(&sources, Path::new("output_images")).unwrap();
        assert_eq!(
            mirrored,
            vec![
                PathBuf::from("output_images/straight1.jpg"),
                PathBuf::from("output_images/y.png")
            ]
        );
    }

    #[test]
    fn test_mirror_paths_rejects_source_without_file_name() {
        let sources = vec![PathBuf::from("a.jpg"), PathBuf::from("test_images/..")];
        let result = mirror_paths(&sources, Path::new("output_images"));
        assert!(matches!(result, Err(IoError::NoFileName(p)) if p == Path::new("test_images/..")));
    }

    #[test]
    fn test_image_write_then_read() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("nested").join("frame.png");
        create_dir(out.parent().unwrap()).unwrap();

        let image =
            Mat::new_rows_cols_with_default(12, 20, core::CV_8UC3, Scalar::all(200.0)).unwrap();
        write_image(&out, &image).unwrap();

        let back = read_image(&out).unwrap();
        assert_eq!(back.rows(), 12);
        assert_eq!(back.cols(), 20);
    }

    #[test]
    fn test_unreadable_image_is_an_error() {
        let dir = TempDir::new().unwrap();
        let bogus = dir.path().join("broken.jpg");
        fs::write(&bogus, b"not an image").unwrap();
        assert!(matches!(read_image(&bogus), Err(IoError::ImageRead { .. })));
    }
}
