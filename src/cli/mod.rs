//! Command-line interface implementation
//!
//! This module provides the CLI entry point and dispatches to submodules
//! for specific command implementations.

mod analyze;
mod palette;
mod run;
mod tile;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use crate::coords::TileKey;
use crate::palette::{validate_palette, CANVAS_PALETTE};
use crate::scheduler::ScanMode;

/// Exit codes
pub(crate) const EXIT_SUCCESS: u8 = 0;
pub(crate) const EXIT_ERROR: u8 = 1;
pub(crate) const EXIT_INVALID_ARGS: u8 = 2;

/// Pixelwarden - tile images into marker templates and keep a canvas in sync with them
#[derive(Parser)]
#[command(name = "pxw")]
#[command(about = "Pixelwarden - tile images into marker templates and place them on a shared canvas")]
#[command(version)]
pub struct Cli {
    /// Config file (default: pxw.toml found from the working directory up)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Tile an image into a template document
    Tile {
        /// Source image (any format the image decoder understands)
        image: PathBuf,

        /// Top-left position as tileX,tileY,pixelX,pixelY
        #[arg(long, value_name = "TX,TY,PX,PY")]
        origin: TileKey,

        /// Chunk edge length (overrides config)
        #[arg(long)]
        tile_size: Option<u32>,

        /// Display name stored in the template
        #[arg(long)]
        name: Option<String>,

        /// Author id stored in the template
        #[arg(long, default_value = "")]
        author: String,

        /// Sort id stored in the template
        #[arg(long, default_value_t = 0)]
        sort_id: u32,

        /// Source URL stored in the template
        #[arg(long)]
        source_url: Option<String>,

        /// Output template file (default: {image}.template.json)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Also write every marker tile as PNG into this directory
        #[arg(long, value_name = "DIR")]
        export_dir: Option<PathBuf>,

        /// Extra nearest-neighbor scale for exported tiles
        #[arg(long, default_value_t = 1)]
        export_scale: u32,
    },

    /// Analyze a template: pixel records, owned colors and borders
    Analyze {
        /// Template document produced by `pxw tile`
        template: PathBuf,

        /// Owned color ids, comma separated (default: all colors)
        #[arg(long, value_name = "IDS", conflicts_with = "extra_colors")]
        owned: Option<String>,

        /// Owned colors as an entitlement bitmap (ids 0-31 plus set bits)
        #[arg(long, value_name = "BITMAP")]
        extra_colors: Option<u64>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Place a template on the canvas and keep it there
    Run {
        /// Template document produced by `pxw tile`
        template: PathBuf,

        /// Canvas backend URL (overrides config)
        #[arg(long)]
        base_url: Option<String>,

        /// Auth token injected into placements (overrides config)
        #[arg(long, env = "PXW_AUTH_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Placement order within border and interior pixels
        #[arg(long, value_enum)]
        mode: Option<ScanMode>,

        /// Sleep whole charge waits in one step
        #[arg(long)]
        low_activity: bool,

        /// Keep watching after completion and repair drift
        #[arg(long)]
        protect: bool,

        /// Seed for random mode
        #[arg(long)]
        seed: Option<u64>,

        /// Run against an in-memory canvas instead of the backend
        #[arg(long)]
        dry_run: bool,

        /// Starting charges for --dry-run
        #[arg(long, default_value_t = 30.0, requires = "dry_run")]
        charges: f64,

        /// Charge pool size for --dry-run
        #[arg(long, default_value_t = 30, requires = "dry_run")]
        max_charges: u32,

        /// Cooldown per charge for --dry-run, in milliseconds
        #[arg(long, default_value_t = 30_000, requires = "dry_run")]
        cooldown_ms: u64,

        /// Emit status events as JSON lines on stdout
        #[arg(long)]
        json: bool,

        /// Also print state changes and countdowns
        #[arg(short, long)]
        verbose: bool,

        /// Log filter (overrides config; RUST_LOG still wins)
        #[arg(long, value_name = "FILTER")]
        log_level: Option<String>,
    },

    /// List the canvas palette
    Palette {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Run the CLI application
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = validate_palette(&CANVAS_PALETTE) {
        eprintln!("Error: built-in palette is invalid: {}", e);
        return ExitCode::from(EXIT_ERROR);
    }

    match cli.command {
        Commands::Tile {
            image,
            origin,
            tile_size,
            name,
            author,
            sort_id,
            source_url,
            out,
            export_dir,
            export_scale,
        } => tile::run_tile(tile::TileArgs {
            image,
            origin,
            tile_size,
            name,
            author,
            sort_id,
            source_url,
            out,
            export_dir,
            export_scale,
            config: cli.config,
        }),
        Commands::Analyze { template, owned, extra_colors, json } => {
            analyze::run_analyze(&template, owned.as_deref(), extra_colors, json)
        }
        Commands::Run {
            template,
            base_url,
            token,
            mode,
            low_activity,
            protect,
            seed,
            dry_run,
            charges,
            max_charges,
            cooldown_ms,
            json,
            verbose,
            log_level,
        } => run::run_scheduler(run::RunArgs {
            template,
            config: cli.config,
            base_url,
            token,
            mode,
            low_activity,
            protect,
            seed,
            dry_run,
            charges,
            max_charges,
            cooldown_ms,
            json,
            verbose,
            log_level,
        }),
        Commands::Palette { json } => palette::run_palette(json),
    }
}
