//! Analyze command implementation

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::process::ExitCode;

use crate::analyze::{AnalysisCache, TemplateAnalyzer};
use crate::palette::{owned_colors, palette_color, parse_color_ids};
use crate::template::Template;

use super::{EXIT_ERROR, EXIT_INVALID_ARGS, EXIT_SUCCESS};

/// Per-color record counts: `(total, border)`.
fn color_counts(analysis: &AnalysisCache) -> BTreeMap<u8, (usize, usize)> {
    let mut counts: BTreeMap<u8, (usize, usize)> = BTreeMap::new();
    for record in analysis.records() {
        let entry = counts.entry(record.color_id).or_default();
        entry.0 += 1;
        if analysis.is_border(&record.global(analysis.tile_size)) {
            entry.1 += 1;
        }
    }
    counts
}

/// Execute the analyze command
pub fn run_analyze(
    path: &Path,
    owned: Option<&str>,
    extra_colors: Option<u64>,
    json: bool,
) -> ExitCode {
    let owned: BTreeSet<u8> = match (owned, extra_colors) {
        (Some(list), _) => match parse_color_ids(list) {
            Ok(set) => set,
            Err(e) => {
                eprintln!("Error: --owned: {}", e);
                return ExitCode::from(EXIT_INVALID_ARGS);
            }
        },
        (None, Some(bitmap)) => owned_colors(bitmap),
        (None, None) => BTreeSet::new(),
    };

    let template = match Template::load(path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: Cannot load template '{}': {}", path.display(), e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    let analysis = match TemplateAnalyzer::new().analyze_blocking(&template, &owned) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    let total = analysis.records().count();
    let eligible = analysis.eligible_count();
    let border = analysis.border_keys.len();
    let chunks = analysis.eligible_chunks();
    let counts = color_counts(&analysis);

    if json {
        let colors: Vec<_> = counts
            .iter()
            .map(|(&id, &(count, border))| {
                serde_json::json!({
                    "id": id,
                    "name": palette_color(id).map(|c| c.name),
                    "pixels": count,
                    "border": border,
                    "owned": owned.is_empty() || owned.contains(&id),
                })
            })
            .collect();
        let report = serde_json::json!({
            "name": template.info.display_name,
            "topLeft": template.top_left,
            "tileSize": template.tile_size,
            "tiles": template.chunked.len(),
            "pixels": total,
            "eligible": eligible,
            "border": border,
            "interior": total - border,
            "chunks": chunks,
            "colors": colors,
        });
        match serde_json::to_string_pretty(&report) {
            Ok(s) => println!("{}", s),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::from(EXIT_ERROR);
            }
        }
        return ExitCode::from(EXIT_SUCCESS);
    }

    println!("Template: {} (origin {}, tile size {})", template.info.display_name, template.top_left, template.tile_size);
    println!("  Tiles:    {}", template.chunked.len());
    println!("  Pixels:   {} ({} border, {} interior)", total, border, total - border);
    println!("  Eligible: {}", eligible);
    println!("  Chunks:   {}", chunks.len());
    println!();
    println!("  {:>3}  {:<18} {:>8} {:>8}", "ID", "COLOR", "PIXELS", "BORDER");
    for (id, (count, border)) in &counts {
        let name = palette_color(*id).map(|c| c.name).unwrap_or("?");
        let marker = if owned.is_empty() || owned.contains(id) { "" } else { "  (not owned)" };
        println!("  {:>3}  {:<18} {:>8} {:>8}{}", id, name, count, border, marker);
    }

    ExitCode::from(EXIT_SUCCESS)
}
