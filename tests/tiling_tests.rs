//! Integration tests for tiling, templates and analysis
//!
//! These tests drive the public API from a source image to an analyzed
//! template and check the invariants the placement loop relies on.

use image::{Rgba, RgbaImage};
use pixelwarden::analyze::TemplateAnalyzer;
use pixelwarden::coords::{GlobalPixel, TileKey};
use pixelwarden::palette::{owned_colors, quantize};
use pixelwarden::template::{Template, TemplateInfo};
use pixelwarden::tiler::{is_marker_position, Tiler, MARKER_SCALE};
use std::collections::{BTreeSet, HashMap};
use tempfile::TempDir;

const RED: Rgba<u8> = Rgba([237, 28, 36, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Deterministic image with scattered transparent pixels
fn patterned(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        if (x * 3 + y * 5) % 7 == 0 {
            Rgba([10, 20, 30, 0])
        } else {
            Rgba([(x * 40 % 256) as u8, (y * 60 % 256) as u8, 128, 200])
        }
    })
}

fn tiles_touched(offset: u32, extent: u32, tile_size: u32) -> usize {
    ((offset + extent - 1) / tile_size + 1) as usize
}

/// For every source size and offset, the tiles cover each source pixel
/// exactly once and the tile count matches the grid.
#[test]
fn test_tiles_cover_source_exactly() {
    let tile_size = 16;
    let cases = [(1, 1, 0, 0), (16, 16, 0, 0), (17, 5, 15, 0), (40, 33, 7, 12), (5, 50, 15, 15)];

    for (width, height, px, py) in cases {
        let origin = TileKey::new(2, 3, px, py);
        let source = patterned(width, height);
        let tiled = Tiler::new(tile_size).tile(&source, origin).expect("tiling should succeed");

        let expected = tiles_touched(px, width, tile_size) * tiles_touched(py, height, tile_size);
        assert_eq!(tiled.chunked.len(), expected, "tile count for {}x{} at {}", width, height, origin);

        let base = origin.global(tile_size);
        let mut covered: HashMap<GlobalPixel, usize> = HashMap::new();
        for (key, tile) in &tiled.chunked {
            let (w, h) = tile.logical_size();
            let start = key.global(tile_size);
            for y in 0..h as u64 {
                for x in 0..w as u64 {
                    *covered.entry(GlobalPixel::new(start.x + x, start.y + y)).or_default() += 1;
                }
            }
        }

        assert_eq!(covered.len(), (width * height) as usize);
        assert!(covered.values().all(|&n| n == 1), "overlap for {}x{}", width, height);
        for y in 0..height as u64 {
            for x in 0..width as u64 {
                assert!(covered.contains_key(&GlobalPixel::new(base.x + x, base.y + y)));
            }
        }
    }
}

#[test]
fn test_pixel_count_and_marker_sparsity() {
    let source = patterned(45, 21);
    let opaque = source.pixels().filter(|p| p[3] > 0).count() as u64;

    for origin in [TileKey::new(0, 0, 0, 0), TileKey::new(9, 9, 19, 3)] {
        let tiled = Tiler::new(20).tile(&source, origin).expect("tiling should succeed");
        assert_eq!(tiled.pixel_count, opaque);

        let mut markers = 0;
        for tile in tiled.chunked.values() {
            for (x, y, p) in tile.image.enumerate_pixels() {
                if p[3] > 0 {
                    assert!(is_marker_position(x, y), "opaque non-marker pixel at ({}, {})", x, y);
                    markers += 1;
                }
            }
        }
        assert_eq!(markers, opaque);
    }
}

#[test]
fn test_two_by_two_source() {
    let source = RgbaImage::from_pixel(2, 2, RED);
    let template =
        Template::from_image(TemplateInfo::default(), &source, TileKey::new(0, 0, 0, 0), 1000).unwrap();

    let keys: Vec<String> = template.chunked.keys().map(|k| k.to_string()).collect();
    assert_eq!(keys, vec!["0000,0000,000,000"]);
    let tile = &template.chunked[&TileKey::new(0, 0, 0, 0)];
    assert_eq!(tile.image.dimensions(), (2 * MARKER_SCALE, 2 * MARKER_SCALE));
    assert_eq!(tile.image.pixels().filter(|p| p[3] > 0).count(), 4);
    assert_eq!(template.pixel_count, 4);
}

#[test]
fn test_template_file_roundtrip_then_analyze() {
    let temp = TempDir::new().expect("should create temp dir");
    let path = temp.path().join("logo.template.json");

    let source = RgbaImage::from_fn(30, 4, |x, _| if x % 2 == 0 { BLACK } else { RED });
    let info = TemplateInfo {
        display_name: "logo".to_string(),
        sort_id: 3,
        author_id: "42".to_string(),
        source_url: None,
    };
    let template = Template::from_image(info, &source, TileKey::new(7, 7, 990, 998), 1000).unwrap();
    template.save(&path).unwrap();

    let loaded = Template::load(&path).unwrap();
    assert_eq!(loaded.info, template.info);
    assert_eq!(loaded.top_left, template.top_left);
    assert_eq!(loaded.pixel_count, 120);
    assert_eq!(loaded.chunked.len(), 4);

    // Black and red are both free colors
    let free = owned_colors(0);
    let analysis = TemplateAnalyzer::new().analyze_blocking(&loaded, &free).unwrap();
    assert_eq!(analysis.records().count(), 120);
    assert_eq!(analysis.eligible_count(), 120);

    // Black only
    let black_only: BTreeSet<u8> = [quantize(BLACK)].into_iter().collect();
    let analysis = TemplateAnalyzer::new().analyze_blocking(&loaded, &black_only).unwrap();
    assert_eq!(analysis.eligible_count(), 60);
}

#[test]
fn test_black_and_red_with_black_owned() {
    let source = RgbaImage::from_fn(2, 1, |x, _| if x == 0 { BLACK } else { RED });
    let template =
        Template::from_image(TemplateInfo::default(), &source, TileKey::new(0, 0, 0, 0), 1000).unwrap();
    let owned: BTreeSet<u8> = [1].into_iter().collect();

    let analysis = TemplateAnalyzer::new().analyze_blocking(&template, &owned).unwrap();
    let eligible: Vec<_> = analysis.records().filter(|r| r.owned_color).collect();
    assert_eq!(eligible.len(), 1);
    assert_eq!((eligible[0].logical_x, eligible[0].color_id), (0, 1));
}

#[test]
fn test_border_set_matches_adjacency() {
    let source = patterned(24, 18);
    let template =
        Template::from_image(TemplateInfo::default(), &source, TileKey::new(1, 1, 10, 10), 16).unwrap();
    let analysis = TemplateAnalyzer::new().analyze_blocking(&template, &BTreeSet::new()).unwrap();

    for pixel in &analysis.all_pixel_keys {
        let present = pixel.neighbors().filter(|n| analysis.all_pixel_keys.contains(n)).count();
        if present == 8 {
            assert!(!analysis.is_border(pixel), "{:?} has all neighbours", pixel);
        }
        if present == 0 {
            assert!(analysis.is_border(pixel), "{:?} is isolated", pixel);
        }
    }
}

#[test]
fn test_analysis_is_cached() {
    let source = patterned(12, 12);
    let template =
        Template::from_image(TemplateInfo::default(), &source, TileKey::new(0, 0, 0, 0), 1000).unwrap();
    let owned = owned_colors(0b101);
    let mut analyzer = TemplateAnalyzer::new();

    let first = analyzer.analyze_blocking(&template, &owned).unwrap();
    let second = analyzer.analyze_blocking(&template, &owned).unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert_eq!(analyzer.stats().misses, 1);
    assert_eq!(analyzer.stats().hits, 1);
}
