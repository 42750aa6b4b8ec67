//! Materializes a resolved dataset as a file

use crate::engine::{Dataset, DatasetShape};
use crate::errors::{AppError, Result};
use crate::metrics::{record_export, StageTimer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, instrument, warn};

/// Payload encodings the engine can serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Raw engine bytes, no re-encoding
    ByteStream,
    PngImage,
    GeoJson,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::ByteStream => "bytestream",
            ExportFormat::PngImage => "png",
            ExportFormat::GeoJson => "geojson",
        }
    }

    /// Extension used for result files in this format
    pub fn file_extension(&self) -> &'static str {
        match self {
            ExportFormat::ByteStream => "tif",
            ExportFormat::PngImage => "png",
            ExportFormat::GeoJson => "geojson",
        }
    }

    /// Whether a dataset of `shape` can be served in this format
    pub fn supports(&self, shape: DatasetShape) -> bool {
        match self {
            ExportFormat::ByteStream => true,
            ExportFormat::PngImage => shape == DatasetShape::Raster,
            ExportFormat::GeoJson => shape == DatasetShape::Vector,
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bytestream" | "byte_stream" | "bytes" => Ok(ExportFormat::ByteStream),
            "png" | "pngimage" | "png_image" => Ok(ExportFormat::PngImage),
            "geojson" | "geo_json" => Ok(ExportFormat::GeoJson),
            other => Err(AppError::InvalidFormat {
                message: format!(
                    "unknown export format \"{}\" (expected bytestream, png or geojson)",
                    other
                ),
            }),
        }
    }
}

/// Writes dataset payloads to disk
#[derive(Debug, Clone, Copy, Default)]
pub struct Exporter;

impl Exporter {
    /// Fetch `dataset` as `format` and write it to `path`, returning the
    /// number of bytes written. The file appears only once fully written.
    #[instrument(skip_all, fields(dataset = %dataset.handle().id, format = %format, path = %path.display()))]
    pub async fn export(&self, dataset: &Dataset<'_>, format: ExportFormat, path: &Path) -> Result<u64> {
        let timer = StageTimer::start("export");
        let outcome = write_dataset(dataset, format, path).await;
        timer.finish(outcome.is_ok());

        if let Ok(bytes) = outcome {
            record_export(bytes, format.as_str());
            info!(bytes, "Dataset exported");
        }
        outcome
    }
}

async fn write_dataset(dataset: &Dataset<'_>, format: ExportFormat, path: &Path) -> Result<u64> {
    let fail = |message: String| AppError::Export {
        path: path.display().to_string(),
        message,
    };

    if !format.supports(dataset.shape()) {
        return Err(fail(format!(
            "{:?} dataset cannot be exported as {}",
            dataset.shape(),
            format
        )));
    }

    let payload = dataset
        .fetch(format)
        .await
        .map_err(|e| fail(format!("fetching payload: {}", e)))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| fail(format!("creating {}: {}", parent.display(), e)))?;
    }

    let staging = staging_path(path);
    if let Err(e) = tokio::fs::write(&staging, &payload).await {
        discard(&staging).await;
        return Err(fail(format!("writing: {}", e)));
    }
    if let Err(e) = tokio::fs::rename(&staging, path).await {
        discard(&staging).await;
        return Err(fail(format!("moving into place: {}", e)));
    }

    Ok(payload.len() as u64)
}

/// Hidden sibling of `path` used while writing
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "export".to_string());
    path.with_file_name(format!(".{}.{}.partial", name, uuid::Uuid::new_v4().simple()))
}

async fn discard(staging: &Path) {
    if let Err(e) = tokio::fs::remove_file(staging).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %staging.display(), error = %e, "Failed to remove partial export");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use crate::engine::{ConnectionCandidate, EngineConnector, Session};
    use crate::errors::ErrorCode;
    use crate::resolve::{ContextResolver, ObservableResolver, SemanticQuery};
    use crate::spatial::{RawWktBuilder, SpatialContextBuilder, SpatialTemporalExtent};
    use std::sync::Arc;
    use std::time::Duration;

    async fn session(engine: &MockEngine) -> Session {
        EngineConnector::new(Arc::new(engine.clone()), Duration::from_secs(5))
            .connect(&[ConnectionCandidate::local()])
            .await
            .unwrap()
    }

    /// Resolve a dataset and export it with `format` into `path`
    async fn export_with(engine: &MockEngine, format: ExportFormat, path: &Path) -> Result<u64> {
        let session = session(engine).await;
        let area = RawWktBuilder::new("POLYGON((0 0, 1 0, 1 1, 0 1, 0 0))")
            .build_area()
            .unwrap();
        let extent = SpatialTemporalExtent::new(area, "1 km".parse().unwrap(), 2020).unwrap();

        let outcome = {
            let context = ContextResolver::default()
                .resolve_context(&session, &SemanticQuery::new("earth:Region").unwrap(), &extent)
                .await
                .unwrap();
            let dataset = ObservableResolver::default()
                .resolve_observable(&context, &SemanticQuery::new("im:Nature").unwrap())
                .await
                .unwrap();
            Exporter.export(&dataset, format, path).await
        };
        session.close().await.unwrap();
        outcome
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("ByteStream".parse::<ExportFormat>().unwrap(), ExportFormat::ByteStream);
        assert_eq!("png".parse::<ExportFormat>().unwrap(), ExportFormat::PngImage);
        assert_eq!("geojson".parse::<ExportFormat>().unwrap(), ExportFormat::GeoJson);
        assert!("tiff".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_format_shape_support() {
        assert!(ExportFormat::ByteStream.supports(DatasetShape::Scalar));
        assert!(ExportFormat::PngImage.supports(DatasetShape::Raster));
        assert!(!ExportFormat::PngImage.supports(DatasetShape::Vector));
        assert!(ExportFormat::GeoJson.supports(DatasetShape::Vector));
        assert!(!ExportFormat::GeoJson.supports(DatasetShape::Raster));
    }

    #[tokio::test]
    async fn test_export_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/out/result.tif");
        let engine = MockEngine::default();
        engine.set_payload(&b"raster-bytes"[..]);

        let written = export_with(&engine, ExportFormat::ByteStream, &target)
            .await
            .unwrap();

        assert_eq!(written, 12);
        assert_eq!(std::fs::read(&target).unwrap(), b"raster-bytes");
        // Only the result, no staging leftovers
        assert_eq!(std::fs::read_dir(target.parent().unwrap()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_format_for_shape() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("result.png");
        let engine = MockEngine::default();
        engine.set_shape(DatasetShape::Vector);

        let err = export_with(&engine, ExportFormat::PngImage, &target)
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::ExportError);
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("result.tif");
        let engine = MockEngine::default();
        engine.fail_export("dataset evicted");

        let err = export_with(&engine, ExportFormat::ByteStream, &target)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("dataset evicted"));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_write_failure_is_export_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let target = blocker.join("result.tif");

        let err = export_with(&MockEngine::default(), ExportFormat::ByteStream, &target)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Export { .. }));
    }
}
