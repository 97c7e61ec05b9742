use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use super::{local_source, read_local, ModelRegistry, ModelVersion, Stage};
use crate::error::RegistryError;

/// Registry kept in a local directory:
///
/// ```text
/// <root>/models/<name>/version-<n>/meta.json
/// ```
///
/// `meta.json` holds `version`, `current_stage`, `source` and optionally
/// `run_id`. A relative `source` is resolved against the version directory.
pub struct FsRegistry {
    root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct VersionMeta {
    version: u64,
    current_stage: Stage,
    source: String,
    #[serde(default)]
    run_id: Option<String>,
}

impl FsRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn model_dir(&self, name: &str) -> PathBuf {
        self.root.join("models").join(name)
    }

    fn version_dir(&self, name: &str, number: u64) -> PathBuf {
        self.model_dir(name).join(format!("version-{}", number))
    }

    /// `meta.json` of `version-<number>`; its `version` must agree with the directory.
    async fn read_meta(
        &self,
        name: &str,
        number: u64,
        dir: &Path,
    ) -> Result<ModelVersion, RegistryError> {
        let path = dir.join("meta.json");
        let raw = read_local(&path).await?;
        let meta: VersionMeta = serde_json::from_slice(&raw)
            .map_err(|e| RegistryError::Malformed(format!("{}: {}", path.display(), e)))?;
        if meta.version != number {
            return Err(RegistryError::Malformed(format!(
                "{}: records version {} inside version-{}",
                path.display(),
                meta.version,
                number
            )));
        }

        let source = match local_source(&meta.source) {
            Some(p) => p,
            None => dir.join(&meta.source),
        };
        Ok(ModelVersion {
            name: name.to_string(),
            version: meta.version.to_string(),
            stage: meta.current_stage,
            source: source.display().to_string(),
            run_id: meta.run_id,
        })
    }
}

#[async_trait]
impl ModelRegistry for FsRegistry {
    fn endpoint(&self) -> String {
        self.root.display().to_string()
    }

    async fn latest_version(
        &self,
        name: &str,
        stage: Stage,
    ) -> Result<ModelVersion, RegistryError> {
        let no_version = || RegistryError::NoVersion {
            name: name.to_string(),
            stage: stage.to_string(),
        };
        let model_dir = self.model_dir(name);
        let mut entries = match tokio::fs::read_dir(&model_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(no_version()),
            Err(source) => {
                return Err(RegistryError::Io {
                    path: model_dir,
                    source,
                })
            }
        };

        let mut best: Option<(u64, ModelVersion)> = None;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    return Err(RegistryError::Io {
                        path: model_dir,
                        source,
                    })
                }
            };
            let dir_name = entry.file_name();
            let Some(number) = dir_name
                .to_str()
                .and_then(|n| n.strip_prefix("version-"))
                .and_then(|n| n.parse::<u64>().ok())
            else {
                continue;
            };
            let version = self.read_meta(name, number, &entry.path()).await?;
            if version.stage != stage {
                continue;
            }
            if best.as_ref().map_or(true, |(n, _)| number > *n) {
                best = Some((number, version));
            }
        }
        best.map(|(_, v)| v).ok_or_else(no_version)
    }

    async fn get_version(&self, name: &str, version: &str) -> Result<ModelVersion, RegistryError> {
        let unknown = || RegistryError::UnknownVersion {
            name: name.to_string(),
            version: version.to_string(),
        };
        let number = version.trim().parse::<u64>().map_err(|_| unknown())?;
        let dir = self.version_dir(name, number);
        let meta = dir.join("meta.json");
        match tokio::fs::try_exists(&meta).await {
            Ok(true) => self.read_meta(name, number, &dir).await,
            Ok(false) => Err(unknown()),
            Err(source) => Err(RegistryError::Io { path: meta, source }),
        }
    }

    async fn fetch_artifact(
        &self,
        version: &ModelVersion,
        file: &str,
    ) -> Result<Vec<u8>, RegistryError> {
        read_local(&Path::new(&version.source).join(file)).await
    }
}
