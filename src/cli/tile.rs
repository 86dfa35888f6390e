//! Tile command implementation

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::config::{resolve_config, CliOverrides};
use crate::coords::TileKey;
use crate::output::export_marker_tiles;
use crate::template::{Template, TemplateInfo};

use super::{EXIT_ERROR, EXIT_INVALID_ARGS, EXIT_SUCCESS};

pub struct TileArgs {
    pub image: PathBuf,
    pub origin: TileKey,
    pub tile_size: Option<u32>,
    pub name: Option<String>,
    pub author: String,
    pub sort_id: u32,
    pub source_url: Option<String>,
    pub out: Option<PathBuf>,
    pub export_dir: Option<PathBuf>,
    pub export_scale: u32,
    pub config: Option<PathBuf>,
}

/// Default template path: `logo.png` becomes `logo.template.json`.
fn default_out(image: &Path) -> PathBuf {
    let stem = image.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    image.with_file_name(format!("{}.template.json", stem))
}

/// Execute the tile command
pub fn run_tile(args: TileArgs) -> ExitCode {
    let overrides = CliOverrides { tile_size: args.tile_size, ..Default::default() };
    let config = match resolve_config(args.config.as_deref(), &overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };
    let tile_size = config.canvas.tile_size;

    if let Err(e) = args.origin.validate(tile_size) {
        eprintln!("Error: --origin {}: {}", args.origin, e);
        return ExitCode::from(EXIT_INVALID_ARGS);
    }

    let source = match image::open(&args.image) {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            eprintln!("Error: Cannot read image '{}': {}", args.image.display(), e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    let display_name = args.name.unwrap_or_else(|| {
        args.image.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
    });
    let info = TemplateInfo {
        display_name,
        sort_id: args.sort_id,
        author_id: args.author,
        source_url: args.source_url,
    };

    let template = match Template::from_image(info, &source, args.origin, tile_size) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    let out = args.out.unwrap_or_else(|| default_out(&args.image));
    if let Err(e) = template.save(&out) {
        eprintln!("Error: Cannot write '{}': {}", out.display(), e);
        return ExitCode::from(EXIT_ERROR);
    }

    println!(
        "{}: {} tiles, {} pixels -> {}",
        template.info.display_name,
        template.chunked.len(),
        template.pixel_count,
        out.display()
    );

    if let Some(dir) = args.export_dir {
        match export_marker_tiles(&template, &dir, args.export_scale) {
            Ok(paths) => println!("Exported {} marker tiles to {}", paths.len(), dir.display()),
            Err(e) => {
                eprintln!("Error: Cannot export tiles: {}", e);
                return ExitCode::from(EXIT_ERROR);
            }
        }
    }

    ExitCode::from(EXIT_SUCCESS)
}
