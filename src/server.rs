use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post},
    Json, Router,
};

use crate::artifacts::{load_artifacts, RunInformation};
use crate::config::Settings;
use crate::error::{ApiError, StartupError};
use crate::pipeline::{Pipeline, Predictor};
use crate::preprocess::Transform;
use crate::registry::{self, ModelRef, ModelVersion};
use crate::schema;
use crate::service::PredictionService;

pub const WELCOME: &str = "Welcome to the Swiggy Food Delivery Time Prediction App";

// ---------- Server state ----------

/// Built once at startup and handed to the router; never mutated afterwards.
#[derive(Clone)]
pub struct AppState {
    service: Arc<PredictionService>,
    model: Arc<Option<ModelVersion>>,
}

impl AppState {
    pub fn new(pipeline: Arc<dyn Predictor>, model: Option<ModelVersion>) -> Self {
        Self {
            service: Arc::new(PredictionService::new(pipeline)),
            model: Arc::new(model),
        }
    }
}

/// Load every artifact and compose the pipeline. Errors here mean the
/// process must not serve traffic.
pub async fn bootstrap(settings: &Settings) -> Result<AppState, StartupError> {
    let run_info = RunInformation::load(&settings.run_info)?;
    let registry = registry::from_tracking_uri(&settings.tracking_uri, &settings.registry_options())?;
    let model = ModelRef {
        name: run_info.model_name,
        stage: settings.stage,
        version: settings.model_version.clone(),
        run_id: run_info.run_id,
    };

    let loaded = load_artifacts(
        registry.as_ref(),
        &model,
        &settings.model_file,
        &settings.preprocessor,
    )
    .await?;

    let out_dim = loaded.transformer.n_features_out();
    if let Some(in_dim) = loaded.regressor.n_features() {
        if in_dim != out_dim {
            tracing::warn!(
                "preprocessor emits {} features but the model expects {}; every prediction will fail",
                out_dim,
                in_dim
            );
        }
    }

    let pipeline = Pipeline::compose(Box::new(loaded.transformer), loaded.regressor);
    tracing::info!("composed pipeline {:?}", Pipeline::STEPS);
    Ok(AppState::new(Arc::new(pipeline), Some(loaded.version)))
}

// ---------- Handlers ----------

async fn home(State(state): State<AppState>) -> String {
    match state.model.as_ref() {
        Some(v) => format!("{}\nmodel: {}\n", WELCOME, v),
        None => format!("{}\n", WELCOME),
    }
}

async fn do_prediction(State(state): State<AppState>, body: Bytes) -> Result<Json<f64>, ApiError> {
    let record = schema::parse_body(&body)?;
    let minutes = state.service.predict(&record)?;
    tracing::debug!(
        "predicted {:.2} min for order {}",
        minutes,
        record.id.as_deref().unwrap_or("-")
    );
    Ok(Json(minutes))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/predict", post(do_prediction))
        .with_state(state)
}

/// Resolves on ctrl-c, or on SIGTERM where there is one. The SIGTERM handler
/// is installed when this is called, not when the future is first polled.
pub fn shutdown_signal() -> impl Future<Output = ()> {
    #[cfg(unix)]
    let terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate());

    async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async move {
            match terminate {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::error!("failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
        tracing::info!("shutting down");
    }
}
