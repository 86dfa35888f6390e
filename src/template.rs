//! Template data model and persisted format
//!
//! A template is a source image cut into marker tiles keyed by [`TileKey`].
//! The persisted form maps each key's canonical string to the base64 PNG of
//! its marker tile, next to the template metadata.

use base64::Engine;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::coords::{CoordError, TileKey};
use crate::tiler::{Tiler, MARKER_SCALE};

/// Error type for template construction and loading.
///
/// These errors describe a structurally bad template and are never retried.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The source image has zero width or height
    #[error("source image is empty")]
    EmptySource,
    /// Tile size of zero
    #[error("invalid tile size {0}")]
    InvalidTileSize(u32),
    /// Template has no chunk data to work with
    #[error("template has no chunk data")]
    MissingChunks,
    /// Malformed tile key or coordinate
    #[error("invalid coordinates: {0}")]
    Coord(#[from] CoordError),
    /// Malformed tile key in a persisted template
    #[error("invalid tile key '{key}': {source}")]
    TileKey { key: String, source: CoordError },
    /// Persisted tile is not valid base64
    #[error("tile {key} is not valid base64: {source}")]
    Base64 { key: String, source: base64::DecodeError },
    /// Marker tile has impossible dimensions
    #[error("tile {key} has invalid marker dimensions {width}x{height}")]
    TileDimensions { key: String, width: u32, height: u32 },
    /// Image encoding or decoding failed
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    /// Template document could not be (de)serialized
    #[error("template document error: {0}")]
    Json(#[from] serde_json::Error),
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A 3x upscaled tile in which only block centers may be opaque.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerTile {
    pub image: RgbaImage,
    /// PNG encoding of `image`, handed to the persistence layer
    pub encoded: Vec<u8>,
}

impl MarkerTile {
    /// Decode a marker tile from PNG bytes.
    pub fn decode(encoded: Vec<u8>) -> Result<Self, TemplateError> {
        let image = image::load_from_memory(&encoded)?.to_rgba8();
        Ok(Self { image, encoded })
    }

    /// Size of the covered canvas area in logical pixels.
    pub fn logical_size(&self) -> (u32, u32) {
        (self.image.width() / MARKER_SCALE, self.image.height() / MARKER_SCALE)
    }
}

/// Descriptive template metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInfo {
    pub display_name: String,
    #[serde(rename = "sortID")]
    pub sort_id: u32,
    #[serde(rename = "authorID")]
    pub author_id: String,
    #[serde(rename = "sourceURL", default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

/// A tiled template anchored on the canvas.
#[derive(Debug, Clone)]
pub struct Template {
    pub info: TemplateInfo,
    pub top_left: TileKey,
    pub tile_size: u32,
    pub chunked: BTreeMap<TileKey, MarkerTile>,
    /// Opaque source pixels; used for progress display only
    pub pixel_count: u64,
}

impl Template {
    /// Tile a source image into a new template.
    pub fn from_image(
        info: TemplateInfo,
        source: &RgbaImage,
        top_left: TileKey,
        tile_size: u32,
    ) -> Result<Self, TemplateError> {
        let tiled = Tiler::new(tile_size).tile(source, top_left)?;
        Ok(Self { info, top_left, tile_size, chunked: tiled.chunked, pixel_count: tiled.pixel_count })
    }

    /// Like [`Template::from_image`] but yields to the runtime between tiles.
    pub async fn from_image_cooperative(
        info: TemplateInfo,
        source: &RgbaImage,
        top_left: TileKey,
        tile_size: u32,
    ) -> Result<Self, TemplateError> {
        let tiled = Tiler::new(tile_size).tile_cooperative(source, top_left).await?;
        Ok(Self { info, top_left, tile_size, chunked: tiled.chunked, pixel_count: tiled.pixel_count })
    }

    /// Convert to the persisted document form.
    pub fn to_persisted(&self) -> PersistedTemplate {
        let engine = base64::engine::general_purpose::STANDARD;
        PersistedTemplate {
            info: self.info.clone(),
            top_left: self.top_left.to_string(),
            tile_size: self.tile_size,
            pixel_count: self.pixel_count,
            tiles: self
                .chunked
                .iter()
                .map(|(key, tile)| (key.to_string(), engine.encode(&tile.encoded)))
                .collect(),
        }
    }

    /// Rebuild a template from its persisted document form.
    pub fn from_persisted(doc: PersistedTemplate) -> Result<Self, TemplateError> {
        let engine = base64::engine::general_purpose::STANDARD;
        if doc.tile_size == 0 {
            return Err(TemplateError::InvalidTileSize(0));
        }
        let top_left: TileKey = doc.top_left.parse()?;

        let mut chunked = BTreeMap::new();
        for (raw_key, data) in doc.tiles {
            let key: TileKey = raw_key
                .parse()
                .map_err(|source| TemplateError::TileKey { key: raw_key.clone(), source })?;
            key.validate(doc.tile_size)
                .map_err(|source| TemplateError::TileKey { key: raw_key.clone(), source })?;

            let bytes = engine
                .decode(data.as_bytes())
                .map_err(|source| TemplateError::Base64 { key: raw_key.clone(), source })?;
            let tile = MarkerTile::decode(bytes)?;

            let (width, height) = tile.image.dimensions();
            let (lw, lh) = tile.logical_size();
            if width % MARKER_SCALE != 0
                || height % MARKER_SCALE != 0
                || key.pixel_x + lw > doc.tile_size
                || key.pixel_y + lh > doc.tile_size
            {
                return Err(TemplateError::TileDimensions { key: raw_key, width, height });
            }
            chunked.insert(key, tile);
        }

        Ok(Self {
            info: doc.info,
            top_left,
            tile_size: doc.tile_size,
            chunked,
            pixel_count: doc.pixel_count,
        })
    }

    /// Read a persisted template document from disk.
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let contents = fs::read_to_string(path)?;
        let doc: PersistedTemplate = serde_json::from_str(&contents)?;
        Self::from_persisted(doc)
    }

    /// Write the persisted template document to disk.
    pub fn save(&self, path: &Path) -> Result<(), TemplateError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&self.to_persisted())?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Serialized template: metadata plus `tileKey -> base64(PNG)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTemplate {
    #[serde(flatten)]
    pub info: TemplateInfo,
    pub top_left: String,
    pub tile_size: u32,
    pub pixel_count: u64,
    pub tiles: BTreeMap<String, String>,
}
