//! Two-stage inference pipeline: preprocess, then regress.

use crate::error::PipelineError;
use crate::features::FeatureRow;
use crate::model::Regressor;
use crate::preprocess::Transform;

/// Anything that turns feature rows into predictions. The prediction service
/// only depends on this, which lets tests swap in fakes.
pub trait Predictor: Send + Sync {
    fn predict(&self, rows: &[FeatureRow]) -> Result<Vec<f64>, PipelineError>;
}

/// Composed pipeline. Built once at startup, then only read.
pub struct Pipeline {
    preprocess: Box<dyn Transform>,
    regressor: Box<dyn Regressor>,
}

impl Pipeline {
    pub const STEPS: [&'static str; 2] = ["preprocess", "regressor"];

    /// Purely structural; the stages are not checked against each other.
    pub fn compose(preprocess: Box<dyn Transform>, regressor: Box<dyn Regressor>) -> Self {
        Self {
            preprocess,
            regressor,
        }
    }

    pub fn preprocess(&self) -> &dyn Transform {
        self.preprocess.as_ref()
    }

    pub fn regressor(&self) -> &dyn Regressor {
        self.regressor.as_ref()
    }
}

impl Predictor for Pipeline {
    fn predict(&self, rows: &[FeatureRow]) -> Result<Vec<f64>, PipelineError> {
        let transformed = self.preprocess.transform(rows)?;
        self.regressor.predict(&transformed)
    }
}
