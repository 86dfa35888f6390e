//! Canvas palette and nearest-color quantization.
//!
//! The canvas accepts 64 color ids. Id 0 is the transparent sentinel; ids
//! 1-63 are opaque colors. Ids 0-31 are free for everyone, ids 32-63 must be
//! unlocked and are reported through the `extraColorsBitmap` field of the
//! user state.

use image::Rgba;
use std::collections::BTreeSet;
use thiserror::Error;

/// Number of entries in the canvas palette, including the transparent sentinel.
pub const PALETTE_SIZE: usize = 64;

/// Id of the transparent sentinel.
pub const TRANSPARENT_ID: u8 = 0;

/// First color id that has to be unlocked.
pub const FIRST_PREMIUM_ID: u8 = 32;

/// Error type for palette table validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaletteError {
    #[error("palette has {0} entries, expected {PALETTE_SIZE}")]
    WrongSize(usize),
    #[error("palette entry at index {index} declares id {id}")]
    IdGap { index: usize, id: u8 },
    #[error("palette entry 0 must be the transparent sentinel")]
    MissingSentinel,
}

/// A single palette entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaletteColor {
    pub id: u8,
    pub name: &'static str,
    /// `None` only for the transparent sentinel
    pub rgb: Option<[u8; 3]>,
}

const fn color(id: u8, name: &'static str, r: u8, g: u8, b: u8) -> PaletteColor {
    PaletteColor { id, name, rgb: Some([r, g, b]) }
}

/// The canvas palette, indexed by color id.
pub static CANVAS_PALETTE: [PaletteColor; PALETTE_SIZE] = [
    PaletteColor { id: 0, name: "Transparent", rgb: None },
    color(1, "Black", 0, 0, 0),
    color(2, "Dark Gray", 60, 60, 60),
    color(3, "Gray", 120, 120, 120),
    color(4, "Light Gray", 210, 210, 210),
    color(5, "White", 255, 255, 255),
    color(6, "Deep Red", 96, 0, 24),
    color(7, "Red", 237, 28, 36),
    color(8, "Orange", 255, 127, 39),
    color(9, "Gold", 246, 170, 9),
    color(10, "Yellow", 249, 221, 59),
    color(11, "Light Yellow", 255, 250, 188),
    color(12, "Dark Green", 14, 185, 104),
    color(13, "Green", 19, 230, 123),
    color(14, "Light Green", 135, 255, 94),
    color(15, "Dark Teal", 12, 129, 110),
    color(16, "Teal", 16, 174, 166),
    color(17, "Light Teal", 19, 225, 190),
    color(18, "Dark Blue", 40, 80, 158),
    color(19, "Blue", 64, 147, 228),
    color(20, "Cyan", 96, 247, 242),
    color(21, "Indigo", 107, 80, 246),
    color(22, "Light Indigo", 153, 177, 251),
    color(23, "Dark Purple", 120, 12, 153),
    color(24, "Purple", 170, 56, 185),
    color(25, "Light Purple", 224, 159, 249),
    color(26, "Dark Pink", 203, 0, 122),
    color(27, "Pink", 236, 31, 128),
    color(28, "Light Pink", 243, 141, 169),
    color(29, "Dark Brown", 104, 70, 52),
    color(30, "Brown", 149, 104, 42),
    color(31, "Beige", 248, 178, 119),
    color(32, "Medium Gray", 170, 170, 170),
    color(33, "Dark Red", 165, 14, 30),
    color(34, "Light Red", 250, 128, 114),
    color(35, "Dark Orange", 228, 92, 26),
    color(36, "Light Tan", 214, 181, 148),
    color(37, "Dark Goldenrod", 156, 132, 49),
    color(38, "Goldenrod", 197, 173, 49),
    color(39, "Light Goldenrod", 232, 212, 95),
    color(40, "Dark Olive", 74, 107, 58),
    color(41, "Olive", 90, 148, 74),
    color(42, "Light Olive", 132, 197, 115),
    color(43, "Dark Cyan", 15, 121, 159),
    color(44, "Light Cyan", 187, 250, 242),
    color(45, "Light Blue", 125, 199, 255),
    color(46, "Dark Indigo", 77, 49, 184),
    color(47, "Dark Slate Blue", 74, 66, 132),
    color(48, "Slate Blue", 122, 113, 196),
    color(49, "Light Slate Blue", 181, 174, 241),
    color(50, "Light Brown", 219, 164, 99),
    color(51, "Dark Beige", 209, 128, 81),
    color(52, "Light Beige", 255, 197, 165),
    color(53, "Dark Peach", 155, 82, 73),
    color(54, "Peach", 209, 128, 120),
    color(55, "Light Peach", 250, 182, 164),
    color(56, "Dark Tan", 123, 99, 82),
    color(57, "Tan", 156, 132, 107),
    color(58, "Dark Slate", 51, 57, 65),
    color(59, "Slate", 109, 117, 141),
    color(60, "Light Slate", 179, 185, 209),
    color(61, "Dark Stone", 109, 100, 63),
    color(62, "Stone", 148, 140, 107),
    color(63, "Light Stone", 205, 197, 158),
];

/// Check that a palette table is indexed by id with no gaps and a sentinel at 0.
pub fn validate_palette(table: &[PaletteColor]) -> Result<(), PaletteError> {
    if table.len() != PALETTE_SIZE {
        return Err(PaletteError::WrongSize(table.len()));
    }
    for (index, entry) in table.iter().enumerate() {
        if entry.id as usize != index {
            return Err(PaletteError::IdGap { index, id: entry.id });
        }
    }
    if table[0].rgb.is_some() || table[1..].iter().any(|c| c.rgb.is_none()) {
        return Err(PaletteError::MissingSentinel);
    }
    Ok(())
}

/// Look up a palette entry by id.
pub fn palette_color(id: u8) -> Option<&'static PaletteColor> {
    CANVAS_PALETTE.get(id as usize)
}

/// Map an RGBA sample to the nearest palette id.
///
/// Alpha 0 always maps to [`TRANSPARENT_ID`]; any other alpha is ignored and
/// the nearest opaque entry by Euclidean RGB distance wins. Entries are
/// scanned in ascending id order and only a strictly smaller distance
/// replaces the current best, so ties go to the lowest id.
pub fn quantize(pixel: Rgba<u8>) -> u8 {
    let [r, g, b, a] = pixel.0;
    if a == 0 {
        return TRANSPARENT_ID;
    }

    let mut best_id = 1u8;
    let mut best_dist = u32::MAX;
    for entry in &CANVAS_PALETTE[1..] {
        let Some([pr, pg, pb]) = entry.rgb else { continue };
        let dr = r as i32 - pr as i32;
        let dg = g as i32 - pg as i32;
        let db = b as i32 - pb as i32;
        let dist = (dr * dr + dg * dg + db * db) as u32;
        if dist < best_dist {
            best_dist = dist;
            best_id = entry.id;
            if dist == 0 {
                break;
            }
        }
    }
    best_id
}

/// Decode the set of colors the current identity may place.
///
/// Ids 0-31 are always owned. Bit `i` of `extra_bitmap` unlocks id `32 + i`.
pub fn owned_colors(extra_bitmap: u64) -> BTreeSet<u8> {
    let mut owned: BTreeSet<u8> = (0..FIRST_PREMIUM_ID).collect();
    for bit in 0..(PALETTE_SIZE as u8 - FIRST_PREMIUM_ID) {
        if extra_bitmap & (1u64 << bit) != 0 {
            owned.insert(FIRST_PREMIUM_ID + bit);
        }
    }
    owned
}

/// Parse a comma-separated list of color ids, e.g. `"1,5,32"`.
pub fn parse_color_ids(s: &str) -> Result<BTreeSet<u8>, String> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.parse::<u8>() {
            Ok(id) if (id as usize) < PALETTE_SIZE => Ok(id),
            _ => Err(format!("invalid color id '{}'", part)),
        })
        .collect()
}
