use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// ---------- Startup ----------

/// Anything that stops the service from becoming ready. Never retried.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("run information: {0}")]
    Metadata(String),

    #[error("registry lookup failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("artifact load failed: {0}")]
    Artifact(#[from] ArtifactError),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry at {endpoint} is unreachable: {source}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("registry returned {status} for {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("no version of model '{name}' is registered in stage {stage}")]
    NoVersion { name: String, stage: String },

    #[error("model '{name}' has no version {version}")]
    UnknownVersion { name: String, version: String },

    #[error("unsupported artifact source '{0}'")]
    UnsupportedSource(String),

    #[error("malformed registry response: {0}")]
    Malformed(String),

    #[error("registry i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found at {}", path.display())]
    Missing { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt artifact {name}: {source}")]
    Corrupt {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid artifact {name}: {reason}")]
    Invalid { name: String, reason: String },
}

// ---------- Per request ----------

/// Caller-side problems with a `/predict` body. Raised before the pipeline runs.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("request body is not valid JSON: {0}")]
    MalformedBody(String),

    #[error("request body must be a JSON object")]
    NotAnObject,

    #[error("field required: {0}")]
    MissingField(&'static str),

    #[error("field {field}: {reason}")]
    InvalidType { field: String, reason: String },
}

/// Failures inside the composed pipeline.
#[derive(Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("feature names do not match the fitted schema: expected {expected:?}, got {found:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("column '{column}' expects a number, got {value:?}")]
    TypeCoercion { column: String, value: String },

    #[error("column '{column}' has unknown category {value:?}")]
    UnknownCategory { column: String, value: String },

    #[error("model inference failed: {0}")]
    Model(String),

    #[error("unexpected model output: {0}")]
    Output(String),
}

// ---------- HTTP mapping ----------

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(ValidationError::MalformedBody(_)) => StatusCode::BAD_REQUEST,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Pipeline(PipelineError::UnknownCategory { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "request_validation",
            ApiError::Pipeline(PipelineError::SchemaMismatch { .. }) => "schema_mismatch",
            ApiError::Pipeline(PipelineError::TypeCoercion { .. }) => "type_coercion",
            ApiError::Pipeline(PipelineError::UnknownCategory { .. }) => "unknown_category",
            ApiError::Pipeline(PipelineError::Model(_)) => "model",
            ApiError::Pipeline(PipelineError::Output(_)) => "model_output",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("predict failed: {}", self);
        } else {
            tracing::debug!("rejected request: {}", self);
        }
        let body = Json(json!({ "error": self.kind(), "detail": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_client_errors() {
        let missing = ApiError::from(ValidationError::MissingField("distance"));
        assert_eq!(missing.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(missing.kind(), "request_validation");

        let garbled = ApiError::from(ValidationError::MalformedBody("eof".into()));
        assert_eq!(garbled.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn drift_errors_are_server_errors() {
        let mismatch = ApiError::from(PipelineError::SchemaMismatch {
            expected: vec!["age".into()],
            found: vec!["Delivery_person_Age".into()],
        });
        assert_eq!(mismatch.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(mismatch.kind(), "schema_mismatch");

        let coercion = ApiError::from(PipelineError::TypeCoercion {
            column: "is_weekend".into(),
            value: "maybe".into(),
        });
        assert_eq!(coercion.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
