//! Model registry clients: resolve a model name + stage to a concrete
//! version and fetch that version's artifact.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{RegistryError, StartupError};

mod fs;
mod mlflow;

pub use fs::FsRegistry;
pub use mlflow::MlflowRegistry;

/// Deployment lifecycle stage of a registered version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
pub enum Stage {
    None,
    Staging,
    Production,
    Archived,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::None => "None",
            Stage::Staging => "Staging",
            Stage::Production => "Production",
            Stage::Archived => "Archived",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Stage::None),
            "staging" => Ok(Stage::Staging),
            "production" => Ok(Stage::Production),
            "archived" => Ok(Stage::Archived),
            other => Err(format!("unknown stage '{}'", other)),
        }
    }
}

/// A concrete, resolved registry entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelVersion {
    pub name: String,
    pub version: String,
    pub stage: Stage,
    /// Where the version's artifacts live (registry specific URI or path).
    pub source: String,
    pub run_id: Option<String>,
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{} ({})", self.name, self.version, self.stage)
    }
}

/// What to load: a stage to resolve dynamically, optionally pinned to a version.
#[derive(Debug, Clone)]
pub struct ModelRef {
    pub name: String,
    pub stage: Stage,
    pub version: Option<String>,
    /// Training run recorded alongside the model name, if any.
    pub run_id: Option<String>,
}

#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Human readable location, for logs and errors.
    fn endpoint(&self) -> String;

    /// Highest version of `name` currently in `stage`.
    async fn latest_version(&self, name: &str, stage: Stage)
        -> Result<ModelVersion, RegistryError>;

    async fn get_version(&self, name: &str, version: &str) -> Result<ModelVersion, RegistryError>;

    /// Raw bytes of `file` inside the version's artifact directory.
    async fn fetch_artifact(
        &self,
        version: &ModelVersion,
        file: &str,
    ) -> Result<Vec<u8>, RegistryError>;
}

/// Resolve a model reference to one concrete version.
pub async fn resolve(
    registry: &dyn ModelRegistry,
    model: &ModelRef,
) -> Result<ModelVersion, RegistryError> {
    match &model.version {
        Some(pinned) => {
            let resolved = registry.get_version(&model.name, pinned).await?;
            if resolved.stage != model.stage {
                tracing::warn!(
                    "pinned {} is in stage {}, not {}; serving it anyway",
                    resolved,
                    resolved.stage,
                    model.stage
                );
            }
            Ok(resolved)
        }
        None => registry.latest_version(&model.name, model.stage).await,
    }
}

/// Connection settings for remote registries.
#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Option<Duration>,
}

/// Pick a registry client from a tracking URI: `http(s)://` talks to an
/// MLflow server, `file://` or a bare path reads a local registry directory.
pub fn from_tracking_uri(
    uri: &str,
    options: &RegistryOptions,
) -> Result<Box<dyn ModelRegistry>, StartupError> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        let registry = MlflowRegistry::new(uri, options)?;
        return Ok(Box::new(registry));
    }
    if let Some(path) = uri.strip_prefix("file://") {
        return Ok(Box::new(FsRegistry::new(path)));
    }
    if uri.contains("://") {
        return Err(StartupError::Config(format!(
            "unsupported tracking URI scheme in '{}'",
            uri
        )));
    }
    if uri.trim().is_empty() {
        return Err(StartupError::Config("tracking URI is empty".to_string()));
    }
    Ok(Box::new(FsRegistry::new(uri)))
}

/// Local filesystem location of an artifact source, if it is one.
fn local_source(source: &str) -> Option<PathBuf> {
    if let Some(path) = source.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    let path = Path::new(source);
    path.is_absolute().then(|| path.to_path_buf())
}

async fn read_local(path: &Path) -> Result<Vec<u8>, RegistryError> {
    tokio::fs::read(path).await.map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })
}
