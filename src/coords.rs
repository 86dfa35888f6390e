//! Canvas coordinate types
//!
//! The remote canvas is addressed in two levels: a chunk (tile) grid and a
//! pixel offset inside each chunk. A [`TileKey`] names both at once and has a
//! canonical text form, `TTTT,TTTT,PPP,PPP`, used as the key of every marker
//! tile in a template.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default edge length of a canvas chunk in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 1000;

/// Error type for coordinate parsing failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordError {
    /// Wrong number of comma-separated fields
    #[error("expected 4 comma-separated fields, found {0}")]
    FieldCount(usize),
    /// A field was not a non-negative integer
    #[error("invalid coordinate field '{0}'")]
    InvalidField(String),
    /// Pixel offset does not fit inside the tile
    #[error("pixel offset ({x}, {y}) is outside a {tile_size}px tile")]
    OffsetOutOfRange { x: u32, y: u32, tile_size: u32 },
}

/// Address of one chunk on the remote canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: u32,
    pub y: u32,
}

impl ChunkCoord {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// A pixel position on the whole canvas: `chunk * tile_size + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalPixel {
    pub x: u64,
    pub y: u64,
}

impl GlobalPixel {
    pub fn new(x: u64, y: u64) -> Self {
        Self { x, y }
    }

    /// The eight grid neighbours (N, S, E, W and diagonals).
    ///
    /// Neighbours that would fall off the top or left edge of the canvas are
    /// omitted.
    pub fn neighbors(self) -> impl Iterator<Item = GlobalPixel> {
        const OFFSETS: [(i64, i64); 8] =
            [(-1, -1), (0, -1), (1, -1), (-1, 0), (1, 0), (-1, 1), (0, 1), (1, 1)];
        OFFSETS.into_iter().filter_map(move |(dx, dy)| {
            let x = self.x.checked_add_signed(dx)?;
            let y = self.y.checked_add_signed(dy)?;
            Some(GlobalPixel { x, y })
        })
    }
}

/// A chunk coordinate plus a pixel offset inside that chunk.
///
/// Displays as four zero-padded fields, e.g. `0012,0345,007,999`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub tile_x: u32,
    pub tile_y: u32,
    pub pixel_x: u32,
    pub pixel_y: u32,
}

impl TileKey {
    pub fn new(tile_x: u32, tile_y: u32, pixel_x: u32, pixel_y: u32) -> Self {
        Self { tile_x, tile_y, pixel_x, pixel_y }
    }

    /// Build a key from an absolute canvas position.
    pub fn from_global(x: u64, y: u64, tile_size: u32) -> Self {
        let t = tile_size as u64;
        Self {
            tile_x: (x / t) as u32,
            tile_y: (y / t) as u32,
            pixel_x: (x % t) as u32,
            pixel_y: (y % t) as u32,
        }
    }

    pub fn chunk(&self) -> ChunkCoord {
        ChunkCoord::new(self.tile_x, self.tile_y)
    }

    /// Absolute canvas position of this key's pixel offset.
    pub fn global(&self, tile_size: u32) -> GlobalPixel {
        let t = tile_size as u64;
        GlobalPixel {
            x: self.tile_x as u64 * t + self.pixel_x as u64,
            y: self.tile_y as u64 * t + self.pixel_y as u64,
        }
    }

    /// Check that the pixel offset lies inside a tile of the given size.
    pub fn validate(&self, tile_size: u32) -> Result<(), CoordError> {
        if self.pixel_x >= tile_size || self.pixel_y >= tile_size {
            return Err(CoordError::OffsetOutOfRange {
                x: self.pixel_x,
                y: self.pixel_y,
                tile_size,
            });
        }
        Ok(())
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04},{:04},{:03},{:03}",
            self.tile_x, self.tile_y, self.pixel_x, self.pixel_y
        )
    }
}

impl FromStr for TileKey {
    type Err = CoordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').map(str::trim).collect();
        if fields.len() != 4 {
            return Err(CoordError::FieldCount(fields.len()));
        }

        let mut parsed = [0u32; 4];
        for (slot, field) in parsed.iter_mut().zip(&fields) {
            *slot = field.parse().map_err(|_| CoordError::InvalidField(field.to_string()))?;
        }

        Ok(TileKey::new(parsed[0], parsed[1], parsed[2], parsed[3]))
    }
}

impl Serialize for TileKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TileKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
