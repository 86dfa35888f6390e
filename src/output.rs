//! PNG output for marker tiles

use image::imageops::FilterType;
use image::RgbaImage;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::coords::TileKey;
use crate::template::Template;

/// Error type for output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Save an RGBA image to a PNG file, creating parent directories.
pub fn save_png(image: &RgbaImage, path: &Path) -> Result<(), OutputError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    image.save(path)?;
    Ok(())
}

/// Scale image by integer factor using nearest-neighbor interpolation.
pub fn scale_image(image: &RgbaImage, factor: u32) -> RgbaImage {
    if factor <= 1 {
        return image.clone();
    }
    let (w, h) = image.dimensions();
    image::imageops::resize(image, w * factor, h * factor, FilterType::Nearest)
}

/// File name for a tile: the tile key with commas replaced, e.g.
/// `0012_0034_005_000.png`.
pub fn tile_file_name(key: &TileKey) -> String {
    format!("{}.png", key.to_string().replace(',', "_"))
}

/// Write every marker tile of `template` into `dir`, scaled by `scale`.
///
/// Returns the written paths in tile-key order.
pub fn export_marker_tiles(
    template: &Template,
    dir: &Path,
    scale: u32,
) -> Result<Vec<PathBuf>, OutputError> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(template.chunked.len());
    for (key, tile) in &template.chunked {
        let path = dir.join(tile_file_name(key));
        save_png(&scale_image(&tile.image, scale), &path)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateInfo;
    use image::Rgba;
    use tempfile::TempDir;

    #[test]
    fn test_tile_file_name() {
        assert_eq!(tile_file_name(&TileKey::new(12, 34, 5, 0)), "0012_0034_005_000.png");
    }

    #[test]
    fn test_scale_image() {
        let image = RgbaImage::from_pixel(2, 3, Rgba([1, 2, 3, 255]));
        assert_eq!(scale_image(&image, 1).dimensions(), (2, 3));
        let scaled = scale_image(&image, 4);
        assert_eq!(scaled.dimensions(), (8, 12));
        assert_eq!(*scaled.get_pixel(7, 11), Rgba([1, 2, 3, 255]));
    }

    #[test]
    fn test_export_marker_tiles() {
        let temp = TempDir::new().expect("should create temp dir");
        let source = RgbaImage::from_pixel(4, 1, Rgba([0, 0, 0, 255]));
        let template =
            Template::from_image(TemplateInfo::default(), &source, TileKey::new(0, 0, 8, 0), 10)
                .unwrap();

        let dir = temp.path().join("tiles");
        let written = export_marker_tiles(&template, &dir, 1).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0], dir.join("0000_0000_008_000.png"));
        assert_eq!(written[1], dir.join("0001_0000_000_000.png"));

        let loaded = image::open(&written[0]).unwrap().to_rgba8();
        assert_eq!(loaded.dimensions(), (6, 3));
        assert_eq!(loaded.get_pixel(1, 1)[3], 255);
        assert_eq!(loaded.get_pixel(0, 0)[3], 0);
    }
}
