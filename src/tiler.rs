//! Template tiling and marker encoding
//!
//! Splits a source image along the canvas chunk grid and turns every segment
//! into a marker tile: the segment is upscaled 3x with nearest-neighbor
//! sampling and every pixel except the center of each 3x3 block is cleared.
//! One opaque center pixel therefore stands for one logical canvas pixel.

use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, Rgba, RgbaImage};
use std::collections::BTreeMap;

use crate::coords::TileKey;
use crate::template::{MarkerTile, TemplateError};

/// Upscale factor of a marker tile. Must be odd so each block has a center.
pub const MARKER_SCALE: u32 = 3;

/// Offset of the retained pixel inside each `MARKER_SCALE` block.
pub const MARKER_CENTER: u32 = MARKER_SCALE / 2;

/// One tile-aligned rectangle of the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Chunk and in-chunk pixel offset of the segment's top-left corner
    pub key: TileKey,
    /// Top-left corner in source image coordinates
    pub src_x: u32,
    pub src_y: u32,
    pub width: u32,
    pub height: u32,
}

/// Output of tiling a source image.
#[derive(Debug, Clone, Default)]
pub struct TiledImage {
    pub chunked: BTreeMap<TileKey, MarkerTile>,
    /// Source pixels with alpha > 0
    pub pixel_count: u64,
}

/// Compute the tile-aligned segments covering a `width x height` image whose
/// top-left corner sits at `origin`.
///
/// Segments are produced in row-major tile order. Each one is clipped to
/// `min(tile_size - (pos mod tile_size), remaining extent)` on both axes so
/// partial first and last tiles line up with the chunk grid.
pub fn segments(width: u32, height: u32, origin: TileKey, tile_size: u32) -> Vec<Segment> {
    let t = tile_size as u64;
    let start = origin.global(tile_size);
    let end_x = start.x + width as u64;
    let end_y = start.y + height as u64;

    let mut out = Vec::new();
    let mut py = start.y;
    while py < end_y {
        let draw_h = (t - py % t).min(end_y - py);
        let mut px = start.x;
        while px < end_x {
            let draw_w = (t - px % t).min(end_x - px);
            out.push(Segment {
                key: TileKey::from_global(px, py, tile_size),
                src_x: (px - start.x) as u32,
                src_y: (py - start.y) as u32,
                width: draw_w as u32,
                height: draw_h as u32,
            });
            px += draw_w;
        }
        py += draw_h;
    }
    out
}

/// Returns true if `(x, y)` is a block center of a marker tile.
pub fn is_marker_position(x: u32, y: u32) -> bool {
    x % MARKER_SCALE == MARKER_CENTER && y % MARKER_SCALE == MARKER_CENTER
}

/// Render one segment into a marker image and count its opaque pixels.
pub fn render_segment(source: &RgbaImage, segment: &Segment) -> (RgbaImage, u64) {
    let mut opaque = 0u64;
    let image = RgbaImage::from_fn(
        segment.width * MARKER_SCALE,
        segment.height * MARKER_SCALE,
        |x, y| {
            let src = *source.get_pixel(
                segment.src_x + x / MARKER_SCALE,
                segment.src_y + y / MARKER_SCALE,
            );
            if !is_marker_position(x, y) {
                return Rgba([src[0], src[1], src[2], 0]);
            }
            if src[3] > 0 {
                opaque += 1;
            }
            src
        },
    );
    (image, opaque)
}

/// Encode a marker image as PNG bytes.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, TemplateError> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgba8,
    )?;
    Ok(buf)
}

/// Tiles a source image into marker tiles.
#[derive(Debug, Clone, Copy)]
pub struct Tiler {
    pub tile_size: u32,
}

impl Tiler {
    pub fn new(tile_size: u32) -> Self {
        Self { tile_size }
    }

    fn plan(&self, source: &RgbaImage, origin: TileKey) -> Result<Vec<Segment>, TemplateError> {
        if self.tile_size == 0 {
            return Err(TemplateError::InvalidTileSize(self.tile_size));
        }
        if source.width() == 0 || source.height() == 0 {
            return Err(TemplateError::EmptySource);
        }
        origin.validate(self.tile_size)?;
        Ok(segments(source.width(), source.height(), origin, self.tile_size))
    }

    fn build_tile(
        &self,
        source: &RgbaImage,
        segment: &Segment,
        out: &mut TiledImage,
    ) -> Result<(), TemplateError> {
        let (image, opaque) = render_segment(source, segment);
        let encoded = encode_png(&image)?;
        out.pixel_count += opaque;
        out.chunked.insert(segment.key, MarkerTile { image, encoded });
        Ok(())
    }

    /// Tile `source` with its top-left corner at `origin`.
    pub fn tile(&self, source: &RgbaImage, origin: TileKey) -> Result<TiledImage, TemplateError> {
        let mut out = TiledImage::default();
        for segment in self.plan(source, origin)? {
            self.build_tile(source, &segment, &mut out)?;
        }
        Ok(out)
    }

    /// Same as [`Tiler::tile`], yielding to the runtime after every tile so a
    /// large image does not starve other tasks.
    pub async fn tile_cooperative(
        &self,
        source: &RgbaImage,
        origin: TileKey,
    ) -> Result<TiledImage, TemplateError> {
        let mut out = TiledImage::default();
        for segment in self.plan(source, origin)? {
            self.build_tile(source, &segment, &mut out)?;
            tokio::task::yield_now().await;
        }
        tracing::debug!(tiles = out.chunked.len(), pixels = out.pixel_count, "tiling finished");
        Ok(out)
    }
}
