//! Palette command implementation

use std::process::ExitCode;

use crate::palette::{CANVAS_PALETTE, FIRST_PREMIUM_ID};

use super::{EXIT_ERROR, EXIT_SUCCESS};

/// Execute the palette command
pub fn run_palette(json: bool) -> ExitCode {
    if json {
        let entries: Vec<_> = CANVAS_PALETTE
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.id,
                    "name": c.name,
                    "rgb": c.rgb,
                    "premium": c.id >= FIRST_PREMIUM_ID,
                })
            })
            .collect();
        return match serde_json::to_string_pretty(&entries) {
            Ok(s) => {
                println!("{}", s);
                ExitCode::from(EXIT_SUCCESS)
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::from(EXIT_ERROR)
            }
        };
    }

    for color in CANVAS_PALETTE.iter() {
        let hex = match color.rgb {
            Some([r, g, b]) => format!("#{:02X}{:02X}{:02X}", r, g, b),
            None => "transparent".to_string(),
        };
        let premium = if color.id >= FIRST_PREMIUM_ID { "  premium" } else { "" };
        println!("{:>3}  {:<18} {}{}", color.id, color.name, hex, premium);
    }
    ExitCode::from(EXIT_SUCCESS)
}
