use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::{local_source, read_local, ModelRegistry, ModelVersion, RegistryOptions, Stage};
use crate::error::RegistryError;

/// Client for an MLflow tracking server's model registry REST API.
pub struct MlflowRegistry {
    base: String,
    client: Client,
    credentials: Option<(String, Option<String>)>,
}

#[derive(Debug, Deserialize)]
struct RestModelVersion {
    name: String,
    version: String,
    #[serde(default)]
    current_stage: Option<String>,
    #[serde(default)]
    source: String,
    #[serde(default)]
    run_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LatestVersions {
    #[serde(default)]
    model_versions: Vec<RestModelVersion>,
}

#[derive(Debug, Deserialize)]
struct GetVersion {
    model_version: RestModelVersion,
}

impl TryFrom<RestModelVersion> for ModelVersion {
    type Error = RegistryError;

    fn try_from(v: RestModelVersion) -> Result<Self, Self::Error> {
        let stage = match v.current_stage.as_deref() {
            None | Some("") => Stage::None,
            Some(s) => s.parse().map_err(RegistryError::Malformed)?,
        };
        Ok(ModelVersion {
            name: v.name,
            version: v.version,
            stage,
            source: v.source,
            run_id: v.run_id.filter(|r| !r.is_empty()),
        })
    }
}

/// How an artifact source maps onto the tracking server.
#[derive(Debug, PartialEq)]
enum ArtifactLocation {
    /// Served by the artifact proxy under `/api/2.0/mlflow-artifacts/artifacts/`.
    Proxied(String),
    /// Run-relative path fetched through `/get-artifact`.
    Run { run_id: String, path: String },
    Local(std::path::PathBuf),
}

fn locate(source: &str) -> Result<ArtifactLocation, RegistryError> {
    if let Some(rest) = source.strip_prefix("mlflow-artifacts:") {
        // mlflow-artifacts://host:port/path or mlflow-artifacts:/path
        let path = match rest.strip_prefix("//") {
            Some(with_host) => with_host.split_once('/').map(|(_, p)| p).unwrap_or(""),
            None => rest,
        };
        return Ok(ArtifactLocation::Proxied(path.trim_matches('/').to_string()));
    }
    if let Some(rest) = source.strip_prefix("runs:/") {
        let rest = rest.trim_start_matches('/');
        let (run_id, path) = rest.split_once('/').unwrap_or((rest, ""));
        if run_id.is_empty() {
            return Err(RegistryError::UnsupportedSource(source.to_string()));
        }
        return Ok(ArtifactLocation::Run {
            run_id: run_id.to_string(),
            path: path.trim_matches('/').to_string(),
        });
    }
    local_source(source)
        .map(ArtifactLocation::Local)
        .ok_or_else(|| RegistryError::UnsupportedSource(source.to_string()))
}

fn join(dir: &str, file: &str) -> String {
    if dir.is_empty() {
        file.to_string()
    } else {
        format!("{}/{}", dir, file)
    }
}

impl MlflowRegistry {
    pub fn new(tracking_uri: &str, options: &RegistryOptions) -> Result<Self, RegistryError> {
        let base = tracking_uri.trim_end_matches('/').to_string();
        let mut builder = Client::builder();
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|source| RegistryError::Unreachable {
            endpoint: base.clone(),
            source,
        })?;
        let credentials = options
            .username
            .clone()
            .map(|user| (user, options.password.clone()));
        Ok(Self {
            base,
            client,
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, password)) => req.basic_auth(user, password.as_deref()),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder, url: &str) -> Result<reqwest::Response, RegistryError> {
        let resp = self
            .authed(req)
            .send()
            .await
            .map_err(|source| RegistryError::Unreachable {
                endpoint: self.base.clone(),
                source,
            })?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(RegistryError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        url: &str,
    ) -> Result<T, RegistryError> {
        let resp = self.send(req, url).await?;
        resp.json::<T>()
            .await
            .map_err(|e| RegistryError::Malformed(format!("{}: {}", url, e)))
    }

    async fn download(&self, req: RequestBuilder, url: &str) -> Result<Vec<u8>, RegistryError> {
        let resp = self.send(req, url).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|source| RegistryError::Unreachable {
                endpoint: self.base.clone(),
                source,
            })?;
        Ok(bytes.to_vec())
    }
}

fn is_not_found(err: &RegistryError) -> bool {
    matches!(err, RegistryError::Status { status, .. } if *status == StatusCode::NOT_FOUND.as_u16())
}

#[async_trait]
impl ModelRegistry for MlflowRegistry {
    fn endpoint(&self) -> String {
        self.base.clone()
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
        let url = self.url("api/2.0/mlflow/registered-models/get-latest-versions");
        let req = self
            .client
            .post(&url)
            .json(&json!({ "name": name, "stages": [stage.as_str()] }));

        let latest: LatestVersions = match self.send_json(req, &url).await {
            Ok(latest) => latest,
            Err(e) if is_not_found(&e) => return Err(no_version()),
            Err(e) => return Err(e),
        };

        let mut best: Option<(u64, ModelVersion)> = None;
        for raw in latest.model_versions {
            let number = raw.version.parse::<u64>().map_err(|_| {
                RegistryError::Malformed(format!("non-numeric version '{}'", raw.version))
            })?;
            let version = ModelVersion::try_from(raw)?;
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
        let url = self.url("api/2.0/mlflow/model-versions/get");
        let req = self
            .client
            .get(&url)
            .query(&[("name", name), ("version", version)]);
        match self.send_json::<GetVersion>(req, &url).await {
            Ok(found) => ModelVersion::try_from(found.model_version),
            Err(e) if is_not_found(&e) => Err(RegistryError::UnknownVersion {
                name: name.to_string(),
                version: version.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn fetch_artifact(
        &self,
        version: &ModelVersion,
        file: &str,
    ) -> Result<Vec<u8>, RegistryError> {
        match locate(&version.source)? {
            ArtifactLocation::Proxied(dir) => {
                let url = self.url(&format!(
                    "api/2.0/mlflow-artifacts/artifacts/{}",
                    join(&dir, file)
                ));
                self.download(self.client.get(&url), &url).await
            }
            ArtifactLocation::Run { run_id, path } => {
                let url = self.url("get-artifact");
                let artifact = join(&path, file);
                let req = self
                    .client
                    .get(&url)
                    .query(&[("path", artifact.as_str()), ("run_uuid", run_id.as_str())]);
                self.download(req, &url).await
            }
            ArtifactLocation::Local(dir) => read_local(&dir.join(file)).await,
        }
    }
}
