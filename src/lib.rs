//! Delivery-time inference service.
//!
//! A fitted preprocessor and a registry-resolved regression model are
//! composed into one immutable pipeline at startup and served over HTTP.

pub mod artifacts;
pub mod config;
pub mod error;
pub mod features;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod registry;
pub mod schema;
pub mod server;
pub mod service;

pub use config::Settings;
pub use error::{ApiError, PipelineError, StartupError, ValidationError};
pub use pipeline::{Pipeline, Predictor};
pub use service::PredictionService;
