//! Collection pass: diff remote chunk state against the template
//!
//! Produces the pixels that still need placement, border first, truncated
//! to the placement quota and grouped into per-chunk batches.

use image::RgbaImage;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::analyze::{AnalysisCache, TemplatePixelRecord};
use crate::client::{CanvasClient, PlacementRequest};
use crate::coords::{ChunkCoord, GlobalPixel};
use crate::palette::{quantize, TRANSPARENT_ID};

/// Order in which pixels are placed within each priority class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Ascending global y, then global x
    #[default]
    Scan,
    /// Uniform shuffle
    Random,
}

/// Remote raster of each chunk as seen in the current cycle; `None` means
/// missing, unreadable or mis-sized, and every pixel counts as unplaced.
pub type ChunkStates = HashMap<ChunkCoord, Option<RgbaImage>>;

/// Pixels to place in one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementBatch {
    pub chunk: ChunkCoord,
    /// `(x, y, color_id)` in chunk coordinates
    pub pixels: Vec<(u32, u32, u8)>,
}

impl PlacementBatch {
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn to_request(&self) -> PlacementRequest {
        PlacementRequest {
            colors: self.pixels.iter().map(|p| p.2).collect(),
            coords: self.pixels.iter().flat_map(|p| [p.0, p.1]).collect(),
            auth_token: None,
        }
    }

    pub fn global_pixels(&self, tile_size: u32) -> impl Iterator<Item = GlobalPixel> + '_ {
        let base_x = self.chunk.x as u64 * tile_size as u64;
        let base_y = self.chunk.y as u64 * tile_size as u64;
        self.pixels.iter().map(move |&(x, y, _)| GlobalPixel::new(base_x + x as u64, base_y + y as u64))
    }
}

/// Result of one collection pass.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub batches: Vec<PlacementBatch>,
    /// Pixels still needing placement before truncation
    pub remaining: usize,
    /// Eligible template pixels
    pub total: usize,
}

impl Collection {
    pub fn placed(&self) -> usize {
        self.total.saturating_sub(self.remaining)
    }

    pub fn batched_pixels(&self) -> usize {
        self.batches.iter().map(PlacementBatch::len).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

/// Fetch the remote raster of every chunk in `chunks`.
///
/// Fetch failures and rasters that are not `tile_size` square are logged and
/// recorded as `None`; they never abort the cycle.
pub async fn fetch_chunk_states(
    client: &dyn CanvasClient,
    chunks: &[ChunkCoord],
    tile_size: u32,
) -> ChunkStates {
    let mut states = ChunkStates::with_capacity(chunks.len());
    for &chunk in chunks {
        let state = match client.fetch_chunk(chunk).await {
            Ok(Some(image)) if image.dimensions() == (tile_size, tile_size) => Some(image),
            Ok(Some(image)) => {
                tracing::warn!(
                    %chunk,
                    width = image.width(),
                    height = image.height(),
                    "chunk has unexpected size, treating as empty"
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(%chunk, error = %e, "chunk fetch failed, treating as empty");
                None
            }
        };
        states.insert(chunk, state);
    }
    states
}

fn remote_color(states: &ChunkStates, record: &TemplatePixelRecord) -> u8 {
    match states.get(&record.chunk) {
        Some(Some(image)) => image
            .get_pixel_checked(record.logical_x, record.logical_y)
            .map(|p| quantize(*p))
            .unwrap_or(TRANSPARENT_ID),
        _ => TRANSPARENT_ID,
    }
}

/// Diff `states` against `analysis` and build at most `limit` placements.
///
/// Only owned pixels are considered. Pixels in `submitted` are skipped even
/// if the remote state does not show them yet.
pub fn collect<R: Rng + ?Sized>(
    analysis: &AnalysisCache,
    states: &ChunkStates,
    submitted: &HashSet<GlobalPixel>,
    mode: ScanMode,
    limit: usize,
    rng: &mut R,
) -> Collection {
    let tile_size = analysis.tile_size;
    let mut border = Vec::new();
    let mut interior = Vec::new();
    let mut total = 0;

    for record in analysis.records().filter(|r| r.owned_color) {
        total += 1;
        let global = record.global(tile_size);
        if submitted.contains(&global) || remote_color(states, record) == record.color_id {
            continue;
        }
        if analysis.is_border(&global) {
            border.push((global, record));
        } else {
            interior.push((global, record));
        }
    }

    for group in [&mut border, &mut interior] {
        match mode {
            ScanMode::Scan => group.sort_by_key(|(g, _)| (g.y, g.x)),
            ScanMode::Random => group.shuffle(rng),
        }
    }

    let remaining = border.len() + interior.len();
    let mut batches: Vec<PlacementBatch> = Vec::new();
    let mut index: HashMap<ChunkCoord, usize> = HashMap::new();
    for (_, record) in border.iter().chain(interior.iter()).take(limit) {
        let slot = *index.entry(record.chunk).or_insert_with(|| {
            batches.push(PlacementBatch { chunk: record.chunk, pixels: Vec::new() });
            batches.len() - 1
        });
        batches[slot].pixels.push((record.logical_x, record.logical_y, record.color_id));
    }

    Collection { batches, remaining, total }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::TemplateAnalyzer;
    use crate::charges::Charges;
    use crate::client::MemoryCanvas;
    use crate::coords::TileKey;
    use crate::template::{Template, TemplateInfo};
    use image::Rgba;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
    const TILE: u32 = 100;

    fn analysis_of(source: &RgbaImage, origin: TileKey) -> Arc<AnalysisCache> {
        let template = Template::from_image(TemplateInfo::default(), source, origin, TILE).unwrap();
        TemplateAnalyzer::new().analyze_blocking(&template, &BTreeSet::new()).unwrap()
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn all_pixels(c: &Collection) -> Vec<(u32, u32, u8)> {
        c.batches.iter().flat_map(|b| b.pixels.iter().copied()).collect()
    }

    #[test]
    fn test_quota_truncates_batch() {
        // 10 pixels needing placement, 2.5 charges
        let source = RgbaImage::from_pixel(10, 1, BLACK);
        let analysis = analysis_of(&source, TileKey::new(0, 0, 5, 5));
        let charges = Charges::new(2.5, 5, 30_000);

        let c = collect(
            &analysis,
            &ChunkStates::new(),
            &HashSet::new(),
            ScanMode::Scan,
            charges.whole() as usize,
            &mut rng(),
        );
        assert_eq!(c.remaining, 10);
        assert_eq!(c.batched_pixels(), 2);
        assert_eq!(charges.time_until_next().as_millis(), 15_000);
    }

    #[test]
    fn test_border_before_interior() {
        let source = RgbaImage::from_pixel(5, 5, BLACK);
        let analysis = analysis_of(&source, TileKey::new(0, 0, 10, 10));

        for mode in [ScanMode::Scan, ScanMode::Random] {
            let c = collect(&analysis, &ChunkStates::new(), &HashSet::new(), mode, 25, &mut rng());
            let order = all_pixels(&c);
            assert_eq!(order.len(), 25);
            let first_interior = order
                .iter()
                .position(|&(x, y, _)| (11..14).contains(&x) && (11..14).contains(&y))
                .unwrap();
            assert_eq!(first_interior, 16);
        }
    }

    #[test]
    fn test_scan_order() {
        let source = RgbaImage::from_pixel(3, 2, BLACK);
        let analysis = analysis_of(&source, TileKey::new(0, 0, 0, 0));
        let c = collect(&analysis, &ChunkStates::new(), &HashSet::new(), ScanMode::Scan, 10, &mut rng());
        let coords: Vec<_> = all_pixels(&c).into_iter().map(|(x, y, _)| (x, y)).collect();
        assert_eq!(coords, vec![(0, 0), (1, 0), (2, 0), (0, 1), (1, 1), (2, 1)]);
    }

    #[test]
    fn test_matching_remote_pixels_are_done() {
        let source = RgbaImage::from_pixel(2, 1, BLACK);
        let analysis = analysis_of(&source, TileKey::new(0, 0, 0, 0));
        let mut remote = RgbaImage::new(TILE, TILE);
        remote.put_pixel(0, 0, Rgba([3, 2, 1, 255]));
        let states: ChunkStates = [(ChunkCoord::new(0, 0), Some(remote))].into_iter().collect();

        let c = collect(&analysis, &states, &HashSet::new(), ScanMode::Scan, 10, &mut rng());
        assert_eq!(c.total, 2);
        assert_eq!(c.remaining, 1);
        assert_eq!(c.placed(), 1);
        assert_eq!(all_pixels(&c), vec![(1, 0, 1)]);
    }

    #[test]
    fn test_submitted_pixels_are_skipped() {
        let source = RgbaImage::from_pixel(3, 1, BLACK);
        let analysis = analysis_of(&source, TileKey::new(0, 0, 0, 0));
        let submitted: HashSet<_> = [GlobalPixel::new(1, 0)].into_iter().collect();

        let c = collect(&analysis, &ChunkStates::new(), &submitted, ScanMode::Scan, 10, &mut rng());
        assert_eq!(c.remaining, 2);
        assert_eq!(all_pixels(&c), vec![(0, 0, 1), (2, 0, 1)]);
    }

    #[test]
    fn test_batches_grouped_by_chunk() {
        // Crosses from chunk 0 into chunk 1
        let source = RgbaImage::from_pixel(4, 1, BLACK);
        let analysis = analysis_of(&source, TileKey::new(0, 0, 98, 0));
        let c = collect(&analysis, &ChunkStates::new(), &HashSet::new(), ScanMode::Scan, 10, &mut rng());

        assert_eq!(c.batches.len(), 2);
        assert_eq!(c.batches[0].chunk, ChunkCoord::new(0, 0));
        assert_eq!(c.batches[0].pixels, vec![(98, 0, 1), (99, 0, 1)]);
        assert_eq!(c.batches[1].chunk, ChunkCoord::new(1, 0));
        assert_eq!(c.batches[1].to_request().coords, vec![0, 0, 1, 0]);
        let globals: Vec<_> = c.batches[1].global_pixels(TILE).collect();
        assert_eq!(globals, vec![GlobalPixel::new(100, 0), GlobalPixel::new(101, 0)]);
    }

    #[test]
    fn test_zero_limit_only_counts() {
        let source = RgbaImage::from_pixel(4, 4, BLACK);
        let analysis = analysis_of(&source, TileKey::new(0, 0, 0, 0));
        let c = collect(&analysis, &ChunkStates::new(), &HashSet::new(), ScanMode::Scan, 0, &mut rng());
        assert!(c.batches.is_empty());
        assert_eq!(c.remaining, 16);
        assert!(!c.is_complete());
    }

    #[tokio::test]
    async fn test_failed_and_mis_sized_chunks_are_empty() {
        let canvas = MemoryCanvas::new(TILE, Charges::new(0.0, 1, 1_000));
        let good = ChunkCoord::new(0, 0);
        let failing = ChunkCoord::new(1, 0);
        let small = ChunkCoord::new(2, 0);
        canvas.paint(good, 0, 0, BLACK);
        canvas.paint(failing, 0, 0, BLACK);
        canvas.fail_fetches(failing, true);
        canvas.put_chunk(small, RgbaImage::from_pixel(10, 10, BLACK));

        let states = fetch_chunk_states(&canvas, &[good, failing, small], TILE).await;
        assert!(states[&good].is_some());
        assert!(states[&failing].is_none());
        assert!(states[&small].is_none());

        // A mis-sized chunk leaves every template pixel in it unplaced
        let source = RgbaImage::from_pixel(2, 1, BLACK);
        let analysis = analysis_of(&source, TileKey::new(2, 0, 0, 0));
        let c = collect(&analysis, &states, &HashSet::new(), ScanMode::Scan, 10, &mut rng());
        assert_eq!(c.remaining, 2);
    }
}
