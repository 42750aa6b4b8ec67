//! Execution entry points: validate caller arguments, then run one pipeline
//! with its own session.

use crate::config::AppConfig;
use crate::engine::{create_session_factory, CandidateKind, ConnectionCandidate, EngineConnector, SessionFactory};
use crate::errors::{AppError, Result};
use crate::export::ExportFormat;
use crate::pipeline::{Pipeline, PipelineRequest};
use crate::resolve::SemanticQuery;
use crate::spatial::{
    RawWktBuilder, Resolution, SpatialContextBuilder, SpatialTemporalExtent, VectorFileBuilder,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

/// Caller-supplied arguments for one execution
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ExecutionArgs {
    /// Directory receiving `result[_suffix].tif`
    pub workspace_dir: PathBuf,

    #[serde(default)]
    #[validate(length(max = 64, message = "Suffix must be at most 64 characters"))]
    pub results_suffix: Option<String>,

    #[validate(length(max = 2000, message = "Semantic query must be at most 2000 characters"))]
    pub semantic_query: String,

    /// Inline area, `EPSG:4326 <WKT>` or bare WKT
    #[serde(default)]
    pub spatial_context: Option<String>,

    /// Vector file holding the area; exclusive with `spatial_context`
    #[serde(default)]
    pub vector_path: Option<PathBuf>,

    #[validate(range(min = 1900, max = 9999, message = "Year must be between 1900 and 9999"))]
    pub year: i32,

    /// Overrides the configured remote credentials file
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
}

/// One problem found in `ExecutionArgs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Collect every problem with `args`. Empty means the execution may run.
pub fn validate(args: &ExecutionArgs) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if let Err(errors) = Validate::validate(args) {
        for (field, list) in errors.field_errors() {
            for error in list.iter() {
                let message = error
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| error.code.to_string());
                issues.push(ValidationIssue::new(field.to_string(), message));
            }
        }
    }

    if args.workspace_dir.as_os_str().is_empty() {
        issues.push(ValidationIssue::new("workspace_dir", "Workspace directory is required"));
    }

    if args.semantic_query.trim().is_empty() {
        issues.push(ValidationIssue::new("semantic_query", "Semantic query is required"));
    }

    if let Some(suffix) = &args.results_suffix {
        let allowed = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.';
        if !suffix.chars().all(allowed) {
            issues.push(ValidationIssue::new(
                "results_suffix",
                "Suffix may only contain letters, digits, '-', '_' and '.'",
            ));
        }
    }

    match spatial_builder(args) {
        Ok(builder) => {
            if let Err(e) = builder.build_area() {
                issues.push(issue_from(e, "spatial_context"));
            }
        }
        Err(e) => issues.push(issue_from(e, "spatial_context")),
    }

    issues.sort_by(|a, b| a.field.cmp(&b.field));
    issues
}

fn issue_from(error: AppError, default_field: &str) -> ValidationIssue {
    match error {
        AppError::Validation { message, field } => {
            ValidationIssue::new(field.unwrap_or_else(|| default_field.to_string()), message)
        }
        other => ValidationIssue::new(default_field, other.to_string()),
    }
}

/// Pick the area strategy; exactly one geometry input must be given
fn spatial_builder(args: &ExecutionArgs) -> Result<Box<dyn SpatialContextBuilder>> {
    let inline = args
        .spatial_context
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    match (inline, &args.vector_path) {
        (Some(wkt), None) => Ok(Box::new(RawWktBuilder::new(wkt))),
        (None, Some(path)) => Ok(Box::new(VectorFileBuilder::new(path))),
        (Some(_), Some(_)) => Err(AppError::validation(
            "spatial_context",
            "Give either spatial_context or vector_path, not both",
        )),
        (None, None) => Err(AppError::validation(
            "spatial_context",
            "An area is required: spatial_context (WKT) or vector_path",
        )),
    }
}

/// What a successful execution produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub output_path: PathBuf,
    pub bytes_written: u64,
    pub session_endpoint: String,
    pub candidate: CandidateKind,
    pub duration_ms: u64,
}

/// Runs executions against the configured engine
#[derive(Clone)]
pub struct ModelRunner {
    config: Arc<AppConfig>,
    pipeline: Pipeline,
}

impl ModelRunner {
    /// Build a runner with the session factory named in configuration
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let factory = create_session_factory(&config.engine)?;
        Ok(Self::new(config, factory))
    }

    pub fn new(config: AppConfig, factory: Arc<dyn SessionFactory>) -> Self {
        let connector = EngineConnector::new(factory, config.engine.connect_timeout());
        let pipeline = Pipeline::new(connector, config.engine.ticket_timeout());
        Self {
            config: Arc::new(config),
            pipeline,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Candidates tried for `args`, in order
    pub fn candidates(&self, args: &ExecutionArgs) -> Vec<ConnectionCandidate> {
        self.config.engine.candidates(args.credentials_path.as_deref())
    }

    /// Validate, then connect, resolve, export and close.
    ///
    /// Invalid arguments fail before any connection attempt.
    #[instrument(skip_all, fields(query = %args.semantic_query, year = args.year))]
    pub async fn execute(&self, args: &ExecutionArgs) -> Result<ExecutionReport> {
        let started = Instant::now();

        let issues = validate(args);
        if !issues.is_empty() {
            warn!(issues = issues.len(), "Rejected invalid execution arguments");
            return Err(validation_error(&issues));
        }

        let request = self.build_request(args)?;
        info!(
            output = %request.output_path.display(),
            area = %request.extent.area(),
            resolution = %request.extent.resolution(),
            "Starting execution"
        );

        let outcome = self.pipeline.run(&self.candidates(args), &request).await?;

        Ok(ExecutionReport {
            output_path: outcome.output_path,
            bytes_written: outcome.bytes_written,
            session_endpoint: outcome.session_endpoint,
            candidate: outcome.candidate,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn build_request(&self, args: &ExecutionArgs) -> Result<PipelineRequest> {
        let pipeline = &self.config.pipeline;

        let builder = spatial_builder(args)?;
        let area = builder.build_area()?;
        debug!(strategy = builder.strategy(), "Area built");
        let resolution: Resolution = pipeline.resolution.parse().map_err(configuration)?;
        let extent = SpatialTemporalExtent::new(area, resolution, args.year)?;
        let format = pipeline.export_format.parse::<ExportFormat>().map_err(configuration)?;

        Ok(PipelineRequest {
            base_observable: SemanticQuery::new(pipeline.base_observable.as_str())
                .map_err(configuration)?,
            query: SemanticQuery::new(args.semantic_query.as_str())?,
            extent,
            format,
            output_path: args
                .workspace_dir
                .join(pipeline.output_file_name(args.results_suffix.as_deref(), format)),
        })
    }
}

fn configuration(error: AppError) -> AppError {
    AppError::Configuration {
        message: format!("pipeline settings: {}", error),
    }
}

fn validation_error(issues: &[ValidationIssue]) -> AppError {
    let message = issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    let field = match issues {
        [only] => Some(only.field.clone()),
        _ => None,
    };
    AppError::Validation { message, field }
}
