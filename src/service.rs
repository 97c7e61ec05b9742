use std::sync::Arc;

use crate::error::PipelineError;
use crate::features::FeatureRow;
use crate::pipeline::Predictor;
use crate::schema::RawRecord;

/// Turns one validated record into one delivery-time estimate (minutes).
///
/// Stateless: holds only a shared handle to the immutable pipeline.
#[derive(Clone)]
pub struct PredictionService {
    pipeline: Arc<dyn Predictor>,
}

impl PredictionService {
    pub fn new(pipeline: Arc<dyn Predictor>) -> Self {
        Self { pipeline }
    }

    pub fn predict(&self, record: &RawRecord) -> Result<f64, PipelineError> {
        let row = FeatureRow::from_record(record);
        let out = self.pipeline.predict(std::slice::from_ref(&row))?;
        match out.as_slice() {
            [minutes] if minutes.is_finite() => Ok(*minutes),
            [other] => Err(PipelineError::Output(format!("non-finite prediction {}", other))),
            many => Err(PipelineError::Output(format!(
                "expected 1 value for 1 row, got {}",
                many.len()
            ))),
        }
    }
}
