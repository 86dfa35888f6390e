//! Run command implementation

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use crate::charges::Charges;
use crate::client::{CanvasClient, ClientError, MemoryCanvas, WithAuth};
use crate::config::{resolve_config, CanvasConfig, CliOverrides};
use crate::logging::init_logging;
use crate::scheduler::{PlacementScheduler, RunOutcome, ScanMode, SchedulerSettings};
use crate::status::{ConsoleStatus, JsonStatus, StatusSink};
use crate::template::Template;

use super::{EXIT_ERROR, EXIT_INVALID_ARGS, EXIT_SUCCESS};

pub struct RunArgs {
    pub template: PathBuf,
    pub config: Option<PathBuf>,
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub mode: Option<ScanMode>,
    pub low_activity: bool,
    pub protect: bool,
    pub seed: Option<u64>,
    pub dry_run: bool,
    pub charges: f64,
    pub max_charges: u32,
    pub cooldown_ms: u64,
    pub json: bool,
    pub verbose: bool,
    pub log_level: Option<String>,
}

fn with_token<C: CanvasClient + 'static>(client: C, token: Option<&String>) -> Arc<dyn CanvasClient> {
    match token {
        Some(token) => Arc::new(WithAuth::new(client, token.clone())),
        None => Arc::new(client),
    }
}

#[cfg(feature = "http")]
fn backend_client(canvas: &CanvasConfig) -> Result<Arc<dyn CanvasClient>, ClientError> {
    let client = crate::client::http::HttpCanvasClient::new(canvas.base_url.clone())?;
    Ok(with_token(client, canvas.auth_token.as_ref()))
}

#[cfg(not(feature = "http"))]
fn backend_client(_canvas: &CanvasConfig) -> Result<Arc<dyn CanvasClient>, ClientError> {
    Err(ClientError::NotReady("built without the `http` feature, use --dry-run".to_string()))
}

/// Execute the run command
pub fn run_scheduler(args: RunArgs) -> ExitCode {
    let overrides = CliOverrides {
        base_url: args.base_url,
        auth_token: args.token,
        mode: args.mode,
        low_activity: args.low_activity.then_some(true),
        protect: args.protect.then_some(true),
        seed: args.seed,
        log_level: args.log_level,
        ..Default::default()
    };
    let config = match resolve_config(args.config.as_deref(), &overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };
    init_logging(&config.logging);

    let template = match Template::load(&args.template) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: Cannot load template '{}': {}", args.template.display(), e);
            return ExitCode::from(EXIT_ERROR);
        }
    };
    if template.tile_size != config.canvas.tile_size {
        tracing::warn!(
            template = template.tile_size,
            canvas = config.canvas.tile_size,
            "template tile size differs from canvas tile size"
        );
    }

    let client = if args.dry_run {
        let charges = Charges::new(args.charges, args.max_charges, args.cooldown_ms);
        let canvas = MemoryCanvas::new(template.tile_size, charges);
        with_token(canvas, config.canvas.auth_token.as_ref())
    } else {
        match backend_client(&config.canvas) {
            Ok(client) => client,
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::from(EXIT_ERROR);
            }
        }
    };

    let status: Arc<dyn StatusSink> = if args.json {
        Arc::new(JsonStatus::new())
    } else {
        Arc::new(
            ConsoleStatus::new()
                .with_colors(std::io::stderr().is_terminal())
                .with_verbose(args.verbose),
        )
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: Failed to create async runtime: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    let settings = SchedulerSettings::from(&config.scheduler);
    let result = rt.block_on(async move {
        let mut scheduler = PlacementScheduler::new(client, Arc::new(template), settings, status);
        let control = scheduler.control();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, stopping");
                control.stop();
            }
        });
        scheduler.run().await
    });

    match result {
        Ok(RunOutcome::Completed) | Ok(RunOutcome::Stopped) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
