//! Pixelwarden - command-line tool for tiling templates and placing them on a canvas

use std::process::ExitCode;

use pixelwarden::cli;

fn main() -> ExitCode {
    cli::run()
}
