//! GeoResolve command line
//!
//! Runs or validates a single execution against the configured engine.
//!
//! ```bash
//! georesolve run \
//!   --workspace ./out \
//!   --query im:Nature \
//!   --wkt "EPSG:4326 POLYGON((10 45, 11 45, 11 46, 10 46, 10 45))" \
//!   --year 2020
//! ```
//!
//! Results and validation reports are printed as JSON on stdout; logs go to
//! stderr.

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use georesolve_common::{
    config::{AppConfig, ObservabilityConfig},
    errors::AppError,
    validate, ExecutionArgs, ModelRunner, ValidationIssue,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Exit status for rejected arguments
const EXIT_INVALID: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "georesolve", version, about = "Resolve semantic geospatial queries into raster files")]
struct Cli {
    /// Configuration file (otherwise config/default, config/{APP_ENV}, config/local)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect, resolve and export one result
    Run(ExecutionOpts),
    /// Check arguments without contacting the engine
    Validate(ExecutionOpts),
}

#[derive(Args, Debug, Clone)]
struct ExecutionOpts {
    /// Directory that receives result[_suffix].tif
    #[arg(long)]
    workspace: PathBuf,

    /// Semantic query naming the observable, e.g. im:Nature
    #[arg(long)]
    query: String,

    /// Area as WKT, optionally prefixed with EPSG:4326
    #[arg(long)]
    wkt: Option<String>,

    /// Vector file holding the area (.wkt, .txt, .geojson, .json)
    #[arg(long)]
    vector: Option<PathBuf>,

    /// Calendar year, 1900 or later
    #[arg(long, allow_negative_numbers = true)]
    year: i32,

    /// Appended to the result file name
    #[arg(long)]
    suffix: Option<String>,

    /// Credentials file for the remote engine
    #[arg(long)]
    credentials: Option<PathBuf>,
}

impl From<ExecutionOpts> for ExecutionArgs {
    fn from(opts: ExecutionOpts) -> Self {
        ExecutionArgs {
            workspace_dir: opts.workspace,
            results_suffix: opts.suffix,
            semantic_query: opts.query,
            spatial_context: opts.wkt,
            vector_path: opts.vector,
            year: opts.year,
            credentials_path: opts.credentials,
        }
    }
}

#[derive(Serialize)]
struct ValidationReport {
    valid: bool,
    issues: Vec<ValidationIssue>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Command failed");
            eprintln!("error: {:#}", e);
            match e.downcast_ref::<AppError>() {
                Some(AppError::Validation { .. }) => ExitCode::from(EXIT_INVALID),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => AppConfig::load().context("loading configuration")?,
    };
    init_tracing(&config.observability);

    match cli.command {
        Command::Validate(opts) => {
            let issues = validate(&opts.into());
            let valid = issues.is_empty();
            println!(
                "{}",
                serde_json::to_string_pretty(&ValidationReport { valid, issues })?
            );
            Ok(if valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_INVALID)
            })
        }
        Command::Run(opts) => {
            info!("Starting GeoResolve v{}", georesolve_common::VERSION);
            let runner = ModelRunner::from_config(config)?;
            let report = runner.execute(&opts.into()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}
