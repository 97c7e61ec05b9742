use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::StartupError;
use crate::registry::{RegistryOptions, Stage};

/// Delivery-time prediction service.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Settings {
    /// Model registry: an MLflow tracking server (http/https) or a local registry directory.
    #[arg(long, env = "MLFLOW_TRACKING_URI", default_value = "file://./registry")]
    pub tracking_uri: String,

    /// Training run metadata holding the registered model name.
    #[arg(long, env = "ETA_RUN_INFO", default_value = "run_information.json")]
    pub run_info: PathBuf,

    /// Registry stage to load the latest version from.
    #[arg(long, env = "ETA_MODEL_STAGE", value_enum, ignore_case = true, default_value = "staging")]
    pub stage: Stage,

    /// Serve exactly this registered version instead of the latest in the stage.
    #[arg(long, env = "ETA_MODEL_VERSION")]
    pub model_version: Option<String>,

    /// Model file inside the version's artifact directory.
    #[arg(long, env = "ETA_MODEL_FILE", default_value = "model.json")]
    pub model_file: String,

    /// Fitted preprocessing transformer.
    #[arg(long, env = "ETA_PREPROCESSOR", default_value = "models/preprocessor.json")]
    pub preprocessor: PathBuf,

    #[arg(long, env = "ETA_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Timeout for each registry request.
    #[arg(long, env = "ETA_REGISTRY_TIMEOUT_SECS", default_value_t = 30)]
    pub registry_timeout_secs: u64,

    #[arg(long, env = "MLFLOW_TRACKING_USERNAME")]
    pub registry_username: Option<String>,

    #[arg(long, env = "MLFLOW_TRACKING_PASSWORD", hide_env_values = true)]
    pub registry_password: Option<String>,
}

impl Settings {
    pub fn bind_addr(&self) -> Result<SocketAddr, StartupError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| StartupError::Config(format!("bad bind address {}:{}: {}", self.host, self.port, e)))
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            username: self.registry_username.clone(),
            password: self.registry_password.clone(),
            timeout: Some(Duration::from_secs(self.registry_timeout_secs)),
        }
    }
}
