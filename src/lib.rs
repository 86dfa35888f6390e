//! Pixelwarden - tile images into marker templates and keep a shared canvas
//! in sync with them
//!
//! This library provides functionality to:
//! - Tile a source image into grid-aligned, palette-quantized marker tiles
//! - Analyze templates into per-chunk pixel records with border detection
//! - Drive a charge-budgeted placement loop against a remote canvas, with
//!   an optional protection monitor that repairs drift

pub mod analyze;
pub mod charges;
pub mod cli;
pub mod client;
pub mod config;
pub mod coords;
pub mod logging;
pub mod output;
pub mod palette;
pub mod scheduler;
pub mod status;
pub mod template;
pub mod tiler;
