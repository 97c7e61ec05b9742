//! Startup-time artifact loading: run metadata, the fitted preprocessor from
//! local disk, and the model version resolved through the registry.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ArtifactError, StartupError};
use crate::model::{load_regressor, Regressor};
use crate::preprocess::{ColumnTransformer, Transform};
use crate::registry::{self, ModelRef, ModelRegistry, ModelVersion};

/// Metadata written by the training run (`run_information.json`).
#[derive(Debug, Clone, Deserialize)]
pub struct RunInformation {
    pub model_name: String,
    #[serde(default)]
    pub run_id: Option<String>,
}

impl RunInformation {
    pub fn load(path: &Path) -> Result<Self, StartupError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| StartupError::Metadata(format!("failed to read {}: {}", path.display(), e)))?;
        let info: RunInformation = serde_json::from_str(&raw)
            .map_err(|e| StartupError::Metadata(format!("failed to parse {}: {}", path.display(), e)))?;
        if info.model_name.trim().is_empty() {
            return Err(StartupError::Metadata(format!(
                "{} has an empty model_name",
                path.display()
            )));
        }
        Ok(info)
    }
}

pub fn read_artifact(path: &Path) -> Result<Vec<u8>, ArtifactError> {
    fs::read(path).map_err(|source| {
        if source.kind() == ErrorKind::NotFound {
            ArtifactError::Missing {
                path: path.to_path_buf(),
            }
        } else {
            ArtifactError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

pub fn load_transformer(path: &Path) -> Result<ColumnTransformer, ArtifactError> {
    let bytes = read_artifact(path)?;
    ColumnTransformer::from_slice(&bytes, &path.display().to_string())
}

/// Everything the pipeline needs, loaded once.
pub struct LoadedArtifacts {
    pub transformer: ColumnTransformer,
    pub regressor: Box<dyn Regressor>,
    pub version: ModelVersion,
}

/// Runs behind the recorded training metadata and the resolved version, when they disagree.
fn foreign_run<'a>(model: &'a ModelRef, version: &'a ModelVersion) -> Option<(&'a str, &'a str)> {
    match (model.run_id.as_deref(), version.run_id.as_deref()) {
        (Some(recorded), Some(resolved)) if recorded != resolved => Some((recorded, resolved)),
        _ => None,
    }
}

/// Resolve and load the model, then load the preprocessor. No retries: any
/// failure here keeps the service from starting.
pub async fn load_artifacts(
    registry: &dyn ModelRegistry,
    model: &ModelRef,
    model_file: &str,
    preprocessor: &Path,
) -> Result<LoadedArtifacts, StartupError> {
    let version = registry::resolve(registry, model).await?;
    tracing::info!(
        "resolved {} from {} (source {})",
        version,
        registry.endpoint(),
        version.source
    );
    if model.version.is_none() {
        tracing::info!(
            "version {} was resolved from stage {}; pass --model-version {} to pin it",
            version.version,
            model.stage,
            version.version
        );
    }

    if let Some((recorded, resolved)) = foreign_run(model, &version) {
        tracing::warn!(
            "{} was produced by run {}, but the run information names run {}",
            version,
            resolved,
            recorded
        );
    }

    let bytes = registry.fetch_artifact(&version, model_file).await?;
    let regressor = load_regressor(&bytes, model_file)?;
    tracing::info!("loaded {} model from {}", regressor.kind(), model_file);

    let transformer = load_transformer(preprocessor)?;
    tracing::info!(
        "loaded preprocessor {}: {} columns in, {} features out",
        preprocessor.display(),
        transformer.feature_names_in().len(),
        transformer.feature_names_out().len()
    );

    Ok(LoadedArtifacts {
        transformer,
        regressor,
        version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::registry::{FsRegistry, Stage};
    use serde_json::json;

    #[test]
    fn run_information_requires_a_name() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run_information.json");

        std::fs::write(&path, json!({ "run_id": "abc", "model_name": "eta" }).to_string()).unwrap();
        let info = RunInformation::load(&path).unwrap();
        assert_eq!(info.model_name, "eta");
        assert_eq!(info.run_id.as_deref(), Some("abc"));

        std::fs::write(&path, json!({ "model_name": " " }).to_string()).unwrap();
        assert!(matches!(RunInformation::load(&path), Err(StartupError::Metadata(_))));

        assert!(RunInformation::load(&tmp.path().join("absent.json")).is_err());
    }

    #[test]
    fn missing_and_corrupt_transformers() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("preprocessor.json");
        assert!(matches!(load_transformer(&path), Err(ArtifactError::Missing { .. })));

        std::fs::write(&path, b"\x80\x04\x95joblib").unwrap();
        assert!(matches!(load_transformer(&path), Err(ArtifactError::Corrupt { .. })));
    }

    #[test]
    fn recorded_run_is_compared_with_resolved_version() {
        let version = ModelVersion {
            name: "eta".into(),
            version: "3".into(),
            stage: Stage::Staging,
            source: "runs:/r3/model".into(),
            run_id: Some("r3".into()),
        };
        let mut model = ModelRef {
            name: "eta".into(),
            stage: Stage::Staging,
            version: None,
            run_id: Some("r3".into()),
        };
        assert_eq!(foreign_run(&model, &version), None);

        model.run_id = Some("r1".into());
        assert_eq!(foreign_run(&model, &version), Some(("r1", "r3")));

        model.run_id = None;
        assert_eq!(foreign_run(&model, &version), None);
    }

    #[tokio::test]
    async fn no_registered_version_aborts_loading() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = FsRegistry::new(tmp.path());
        let model = ModelRef {
            name: "eta".into(),
            stage: Stage::Staging,
            version: None,
            run_id: None,
        };
        let err = load_artifacts(&registry, &model, "model.json", &tmp.path().join("p.json"))
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            StartupError::Registry(RegistryError::NoVersion { .. })
        ));
    }
}
