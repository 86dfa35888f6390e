//! Template analysis
//!
//! Extracts one record per opaque marker pixel of a template, quantizes its
//! color, decides whether the current identity may place it and classifies
//! it as border or interior. The result is memoized on the template's
//! structure and the owned-color set.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use crate::coords::{ChunkCoord, GlobalPixel, TileKey};
use crate::palette::quantize;
use crate::template::{MarkerTile, Template, TemplateError};
use crate::tiler::{MARKER_CENTER, MARKER_SCALE};

/// Yield to the runtime after this many tiles during a cooperative pass.
const YIELD_EVERY_TILES: usize = 4;

/// Yield to the runtime after this many pixels while classifying borders.
const YIELD_EVERY_PIXELS: usize = 50_000;

/// One opaque pixel of the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplatePixelRecord {
    pub chunk: ChunkCoord,
    /// Position inside the chunk
    pub logical_x: u32,
    pub logical_y: u32,
    pub color_id: u8,
    /// Whether the current identity may place `color_id`
    pub owned_color: bool,
}

impl TemplatePixelRecord {
    pub fn global(&self, tile_size: u32) -> GlobalPixel {
        TileKey::new(self.chunk.x, self.chunk.y, self.logical_x, self.logical_y).global(tile_size)
    }
}

/// Memoization key: template structure plus the sorted owned-color list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub tile_count: usize,
    pub marker_area: u64,
    pub encoded_bytes: u64,
    pub pixel_count: u64,
    pub top_left: TileKey,
    pub tile_size: u32,
    pub owned: Vec<u8>,
}

impl CacheKey {
    pub fn new(template: &Template, owned: &BTreeSet<u8>) -> Self {
        let marker_area = template
            .chunked
            .values()
            .map(|t| t.image.width() as u64 * t.image.height() as u64)
            .sum();
        let encoded_bytes = template.chunked.values().map(|t| t.encoded.len() as u64).sum();
        Self {
            tile_count: template.chunked.len(),
            marker_area,
            encoded_bytes,
            pixel_count: template.pixel_count,
            top_left: template.top_left,
            tile_size: template.tile_size,
            owned: owned.iter().copied().collect(),
        }
    }
}

/// Cached analysis of one template for one owned-color set.
#[derive(Debug, Clone)]
pub struct AnalysisCache {
    pub key: CacheKey,
    pub tile_size: u32,
    pub all_pixel_keys: HashSet<GlobalPixel>,
    pub per_chunk_records: BTreeMap<TileKey, Vec<TemplatePixelRecord>>,
    pub border_keys: HashSet<GlobalPixel>,
}

impl AnalysisCache {
    /// All records across all tiles.
    pub fn records(&self) -> impl Iterator<Item = &TemplatePixelRecord> {
        self.per_chunk_records.values().flatten()
    }

    /// Number of records the current identity may place.
    pub fn eligible_count(&self) -> usize {
        self.records().filter(|r| r.owned_color).count()
    }

    /// Chunks holding at least one owned pixel, in key order.
    pub fn eligible_chunks(&self) -> Vec<ChunkCoord> {
        let mut seen = BTreeSet::new();
        for record in self.records().filter(|r| r.owned_color) {
            seen.insert(record.chunk);
        }
        seen.into_iter().collect()
    }

    pub fn is_border(&self, pixel: &GlobalPixel) -> bool {
        self.border_keys.contains(pixel)
    }
}

/// Hit/miss counters of the analyzer cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Memoizing template analyzer.
#[derive(Debug, Default)]
pub struct TemplateAnalyzer {
    cached: Option<Arc<AnalysisCache>>,
    stats: CacheStats,
}

impl TemplateAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Drop the cached analysis (template replaced, disabled or reset).
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    fn lookup(&mut self, key: &CacheKey) -> Option<Arc<AnalysisCache>> {
        let hit = self.cached.as_ref().filter(|c| &c.key == key).cloned();
        if hit.is_some() {
            self.stats.hits += 1;
            tracing::debug!(hits = self.stats.hits, "analysis cache hit");
        }
        hit
    }

    fn store(&mut self, analysis: AnalysisCache) -> Arc<AnalysisCache> {
        self.stats.misses += 1;
        tracing::debug!(
            misses = self.stats.misses,
            pixels = analysis.all_pixel_keys.len(),
            borders = analysis.border_keys.len(),
            "analysis cache rebuilt"
        );
        let analysis = Arc::new(analysis);
        self.cached = Some(Arc::clone(&analysis));
        analysis
    }

    /// Analyze `template`, yielding to the runtime during long passes.
    pub async fn analyze(
        &mut self,
        template: &Template,
        owned: &BTreeSet<u8>,
    ) -> Result<Arc<AnalysisCache>, TemplateError> {
        if template.chunked.is_empty() {
            return Err(TemplateError::MissingChunks);
        }
        let key = CacheKey::new(template, owned);
        if let Some(hit) = self.lookup(&key) {
            return Ok(hit);
        }

        let mut builder = AnalysisBuilder::new(template.tile_size);
        for (i, (tile_key, tile)) in template.chunked.iter().enumerate() {
            builder.add_tile(*tile_key, tile, owned);
            if (i + 1) % YIELD_EVERY_TILES == 0 {
                tokio::task::yield_now().await;
            }
        }

        let pixels: Vec<GlobalPixel> = builder.all_pixel_keys.iter().copied().collect();
        for chunk in pixels.chunks(YIELD_EVERY_PIXELS) {
            builder.classify(chunk);
            tokio::task::yield_now().await;
        }

        Ok(self.store(builder.finish(key)))
    }

    /// Analyze `template` in one uninterrupted pass.
    pub fn analyze_blocking(
        &mut self,
        template: &Template,
        owned: &BTreeSet<u8>,
    ) -> Result<Arc<AnalysisCache>, TemplateError> {
        if template.chunked.is_empty() {
            return Err(TemplateError::MissingChunks);
        }
        let key = CacheKey::new(template, owned);
        if let Some(hit) = self.lookup(&key) {
            return Ok(hit);
        }

        let mut builder = AnalysisBuilder::new(template.tile_size);
        for (tile_key, tile) in &template.chunked {
            builder.add_tile(*tile_key, tile, owned);
        }
        let pixels: Vec<GlobalPixel> = builder.all_pixel_keys.iter().copied().collect();
        builder.classify(&pixels);

        Ok(self.store(builder.finish(key)))
    }
}

struct AnalysisBuilder {
    tile_size: u32,
    all_pixel_keys: HashSet<GlobalPixel>,
    per_chunk_records: BTreeMap<TileKey, Vec<TemplatePixelRecord>>,
    border_keys: HashSet<GlobalPixel>,
}

impl AnalysisBuilder {
    fn new(tile_size: u32) -> Self {
        Self {
            tile_size,
            all_pixel_keys: HashSet::new(),
            per_chunk_records: BTreeMap::new(),
            border_keys: HashSet::new(),
        }
    }

    fn add_tile(&mut self, key: TileKey, tile: &MarkerTile, owned: &BTreeSet<u8>) {
        let image = &tile.image;
        let mut records = Vec::new();

        for my in (MARKER_CENTER..image.height()).step_by(MARKER_SCALE as usize) {
            for mx in (MARKER_CENTER..image.width()).step_by(MARKER_SCALE as usize) {
                let pixel = *image.get_pixel(mx, my);
                if pixel[3] == 0 {
                    continue;
                }
                let color_id = quantize(pixel);
                let record = TemplatePixelRecord {
                    chunk: key.chunk(),
                    logical_x: key.pixel_x + mx / MARKER_SCALE,
                    logical_y: key.pixel_y + my / MARKER_SCALE,
                    color_id,
                    owned_color: owned.is_empty() || owned.contains(&color_id),
                };
                self.all_pixel_keys.insert(record.global(self.tile_size));
                records.push(record);
            }
        }

        self.per_chunk_records.entry(key).or_default().extend(records);
    }

    fn classify(&mut self, pixels: &[GlobalPixel]) {
        for pixel in pixels {
            if is_border(pixel, &self.all_pixel_keys) {
                self.border_keys.insert(*pixel);
            }
        }
    }

    fn finish(self, key: CacheKey) -> AnalysisCache {
        AnalysisCache {
            key,
            tile_size: self.tile_size,
            all_pixel_keys: self.all_pixel_keys,
            per_chunk_records: self.per_chunk_records,
            border_keys: self.border_keys,
        }
    }
}

/// A pixel is on the border if any of its 8 neighbours is not in `pixels`.
///
/// Pixels on the canvas's top or left edge always count as border.
pub fn is_border(pixel: &GlobalPixel, pixels: &HashSet<GlobalPixel>) -> bool {
    pixel.neighbors().count() < 8 || pixel.neighbors().any(|n| !pixels.contains(&n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateInfo;
    use image::{Rgba, RgbaImage};

    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
    const RED: Rgba<u8> = Rgba([237, 28, 36, 255]);
    const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);

    fn template_from(source: &RgbaImage, origin: TileKey, tile_size: u32) -> Template {
        Template::from_image(TemplateInfo::default(), source, origin, tile_size).unwrap()
    }

    #[test]
    fn test_owned_color_filter() {
        let source = RgbaImage::from_fn(2, 1, |x, _| if x == 0 { BLACK } else { RED });
        let template = template_from(&source, TileKey::new(0, 0, 0, 0), 1000);
        let owned: BTreeSet<u8> = [1].into_iter().collect();

        let analysis = TemplateAnalyzer::new().analyze_blocking(&template, &owned).unwrap();
        assert_eq!(analysis.records().count(), 2);
        assert_eq!(analysis.eligible_count(), 1);
        let eligible: Vec<_> = analysis.records().filter(|r| r.owned_color).collect();
        assert_eq!(eligible[0].color_id, 1);
    }

    #[test]
    fn test_empty_owned_set_allows_everything() {
        let source = RgbaImage::from_fn(2, 1, |x, _| if x == 0 { BLACK } else { RED });
        let template = template_from(&source, TileKey::new(0, 0, 0, 0), 1000);
        let analysis = TemplateAnalyzer::new().analyze_blocking(&template, &BTreeSet::new()).unwrap();
        assert_eq!(analysis.eligible_count(), 2);
    }

    #[test]
    fn test_logical_positions_use_tile_offset() {
        let source = RgbaImage::from_pixel(3, 1, BLACK);
        // Starts 2 pixels before the end of chunk 4
        let template = template_from(&source, TileKey::new(4, 0, 8, 5), 10);
        let analysis = TemplateAnalyzer::new().analyze_blocking(&template, &BTreeSet::new()).unwrap();

        let mut positions: Vec<_> =
            analysis.records().map(|r| (r.chunk.x, r.logical_x, r.logical_y)).collect();
        positions.sort();
        assert_eq!(positions, vec![(4, 8, 5), (4, 9, 5), (5, 0, 5)]);
        assert!(analysis.all_pixel_keys.contains(&GlobalPixel::new(50, 5)));
    }

    #[test]
    fn test_border_classification() {
        // 5x5 solid block away from the canvas edge: only the center 3x3 is interior
        let source = RgbaImage::from_pixel(5, 5, BLACK);
        let template = template_from(&source, TileKey::new(0, 0, 10, 10), 1000);
        let analysis = TemplateAnalyzer::new().analyze_blocking(&template, &BTreeSet::new()).unwrap();

        assert_eq!(analysis.all_pixel_keys.len(), 25);
        assert_eq!(analysis.border_keys.len(), 16);
        for y in 11..14 {
            for x in 11..14 {
                assert!(!analysis.is_border(&GlobalPixel::new(x, y)));
            }
        }
        assert!(analysis.is_border(&GlobalPixel::new(10, 10)));
    }

    #[test]
    fn test_isolated_pixel_is_border() {
        let source = RgbaImage::from_fn(3, 3, |x, y| if x == 1 && y == 1 { BLACK } else { CLEAR });
        let template = template_from(&source, TileKey::new(0, 0, 5, 5), 1000);
        let analysis = TemplateAnalyzer::new().analyze_blocking(&template, &BTreeSet::new()).unwrap();
        assert_eq!(analysis.all_pixel_keys.len(), 1);
        assert!(analysis.is_border(&GlobalPixel::new(6, 6)));
    }

    #[test]
    fn test_canvas_edge_pixel_is_border() {
        let mut pixels = HashSet::new();
        for y in 0..3 {
            for x in 0..3 {
                pixels.insert(GlobalPixel::new(x, y));
            }
        }
        assert!(is_border(&GlobalPixel::new(0, 1), &pixels));
        assert!(is_border(&GlobalPixel::new(1, 0), &pixels));
        assert!(is_border(&GlobalPixel::new(0, 0), &pixels));
        assert!(!is_border(&GlobalPixel::new(1, 1), &pixels));
    }

    #[test]
    fn test_missing_chunks_is_error() {
        let template = Template {
            info: TemplateInfo::default(),
            top_left: TileKey::new(0, 0, 0, 0),
            tile_size: 1000,
            chunked: BTreeMap::new(),
            pixel_count: 0,
        };
        assert!(matches!(
            TemplateAnalyzer::new().analyze_blocking(&template, &BTreeSet::new()),
            Err(TemplateError::MissingChunks)
        ));
    }

    #[test]
    fn test_cache_hit_returns_same_result() {
        let source = RgbaImage::from_pixel(4, 4, RED);
        let template = template_from(&source, TileKey::new(0, 0, 0, 0), 1000);
        let owned: BTreeSet<u8> = (0..32).collect();
        let mut analyzer = TemplateAnalyzer::new();

        let first = analyzer.analyze_blocking(&template, &owned).unwrap();
        let second = analyzer.analyze_blocking(&template, &owned).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(analyzer.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn test_owned_set_change_invalidates() {
        let source = RgbaImage::from_pixel(4, 4, RED);
        let template = template_from(&source, TileKey::new(0, 0, 0, 0), 1000);
        let mut analyzer = TemplateAnalyzer::new();

        let a = analyzer.analyze_blocking(&template, &[1].into_iter().collect()).unwrap();
        let b = analyzer.analyze_blocking(&template, &[1, 7].into_iter().collect()).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.eligible_count(), 0);
        assert_eq!(b.eligible_count(), 16);
        assert_eq!(analyzer.stats().misses, 2);
    }

    #[tokio::test]
    async fn test_cooperative_matches_blocking() {
        let source = RgbaImage::from_fn(30, 20, |x, y| if (x * y) % 7 == 0 { CLEAR } else { RED });
        let template = template_from(&source, TileKey::new(0, 0, 3, 3), 8);
        let owned = BTreeSet::new();

        let blocking = TemplateAnalyzer::new().analyze_blocking(&template, &owned).unwrap();
        let cooperative = TemplateAnalyzer::new().analyze(&template, &owned).await.unwrap();
        assert_eq!(blocking.all_pixel_keys, cooperative.all_pixel_keys);
        assert_eq!(blocking.border_keys, cooperative.border_keys);
        assert_eq!(blocking.per_chunk_records, cooperative.per_chunk_records);
    }
}
