#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use eta_predictor::features::FeatureRow;
use eta_predictor::registry::Stage;
use eta_predictor::{PipelineError, Predictor, Settings};

pub fn fixture(rel: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join(rel)
}

/// Order from the service's reference scenario, keyed by feature names.
pub fn scenario() -> Value {
    json!({
        "weather": "Sunny",
        "traffic": "Low",
        "distance": 5.2,
        "age": 30,
        "ratings": 4.5,
        "vehicle_condition": 1,
        "type_of_order": "Snack",
        "type_of_vehicle": "motorcycle",
        "multiple_deliveries": "0",
        "festival": "No",
        "city_type": "Urban",
        "is_weekend": "0",
        "pickup_time_minutes": 10,
        "order_time_of_day": "Afternoon",
        "distance_type": "short"
    })
}

pub fn settings(tracking_uri: &str, run_info: &Path, preprocessor: &Path) -> Settings {
    Settings {
        tracking_uri: tracking_uri.to_string(),
        run_info: run_info.to_path_buf(),
        stage: Stage::Staging,
        model_version: None,
        model_file: "model.json".to_string(),
        preprocessor: preprocessor.to_path_buf(),
        host: "127.0.0.1".to_string(),
        port: 0,
        registry_timeout_secs: 5,
        registry_username: None,
        registry_password: None,
    }
}

pub fn write_run_info(dir: &Path, model_name: &str) -> PathBuf {
    let path = dir.join("run_information.json");
    std::fs::write(&path, json!({ "model_name": model_name }).to_string()).unwrap();
    path
}

/// Register `model` under `<root>/models/<name>/version-<n>/artifacts/model.json`.
pub fn register(root: &Path, name: &str, version: u64, stage: &str, model: &Value) {
    let dir = root.join("models").join(name).join(format!("version-{}", version));
    std::fs::create_dir_all(dir.join("artifacts")).unwrap();
    let meta = json!({ "version": version, "current_stage": stage, "source": "artifacts" });
    std::fs::write(dir.join("meta.json"), meta.to_string()).unwrap();
    std::fs::write(dir.join("artifacts/model.json"), model.to_string()).unwrap();
}

/// Stand-in pipeline that counts its invocations.
pub struct CountingPredictor {
    pub calls: AtomicUsize,
    pub minutes: f64,
}

impl CountingPredictor {
    pub fn new(minutes: f64) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            minutes,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Predictor for CountingPredictor {
    fn predict(&self, rows: &[FeatureRow]) -> Result<Vec<f64>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(rows.iter().map(|_| self.minutes).collect())
    }
}

pub fn post_json(uri: &str, body: impl Into<String>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.into()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn send(app: Router, req: Request<Body>) -> (StatusCode, String) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}
