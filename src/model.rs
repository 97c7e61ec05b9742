use serde::Deserialize;

use crate::error::{ArtifactError, PipelineError};

/// The regression stage of the pipeline.
pub trait Regressor: Send + Sync {
    /// Short format name used in startup logs.
    fn kind(&self) -> &'static str;

    /// Expected input width, when the artifact declares one.
    fn n_features(&self) -> Option<usize>;

    /// One prediction per input row.
    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, PipelineError>;
}

// ---------- JSON model formats ----------

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelArtifact {
    Linear(LinearModel),
    TreeEnsemble(TreeEnsemble),
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinearModel {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Boosted ensembles: leaves already carry the learning rate.
    #[default]
    Sum,
    /// Forests.
    Mean,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Leaf {
        leaf: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        #[serde(default = "default_missing_left")]
        missing_goes_left: bool,
    },
}

fn default_missing_left() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Deserialize)]
struct EnsembleSpec {
    n_features: usize,
    #[serde(default)]
    base_score: f64,
    #[serde(default)]
    aggregation: Aggregation,
    trees: Vec<Tree>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "EnsembleSpec")]
pub struct TreeEnsemble {
    n_features: usize,
    base_score: f64,
    aggregation: Aggregation,
    trees: Vec<Tree>,
}

impl TryFrom<EnsembleSpec> for TreeEnsemble {
    type Error = String;

    fn try_from(spec: EnsembleSpec) -> Result<Self, Self::Error> {
        if spec.trees.is_empty() {
            return Err("ensemble has no trees".to_string());
        }
        for (t, tree) in spec.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(format!("tree {} has no nodes", t));
            }
            for (i, node) in tree.nodes.iter().enumerate() {
                if let Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } = node
                {
                    if *feature >= spec.n_features {
                        return Err(format!(
                            "tree {} node {} splits on feature {} of {}",
                            t, i, feature, spec.n_features
                        ));
                    }
                    // children after parents keeps traversal acyclic
                    for child in [*left, *right] {
                        if child <= i || child >= tree.nodes.len() {
                            return Err(format!("tree {} node {} has bad child {}", t, i, child));
                        }
                    }
                }
            }
        }
        Ok(Self {
            n_features: spec.n_features,
            base_score: spec.base_score,
            aggregation: spec.aggregation,
            trees: spec.trees,
        })
    }
}

impl Tree {
    fn leaf_value(&self, x: &[f64]) -> f64 {
        let mut i = 0;
        loop {
            match &self.nodes[i] {
                Node::Leaf { leaf } => return *leaf,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    missing_goes_left,
                } => {
                    let v = x[*feature];
                    let go_left = if v.is_nan() {
                        *missing_goes_left
                    } else {
                        v <= *threshold
                    };
                    i = if go_left { *left } else { *right };
                }
            }
        }
    }
}

fn check_width(x: &[Vec<f64>], expected: usize) -> Result<(), PipelineError> {
    match x.iter().find(|row| row.len() != expected) {
        Some(row) => Err(PipelineError::Model(format!(
            "feature length mismatch: got {}, expected {}",
            row.len(),
            expected
        ))),
        None => Ok(()),
    }
}

impl Regressor for LinearModel {
    fn kind(&self) -> &'static str {
        "linear"
    }

    fn n_features(&self) -> Option<usize> {
        Some(self.coefficients.len())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, PipelineError> {
        check_width(x, self.coefficients.len())?;
        Ok(x
            .iter()
            .map(|row| {
                self.intercept
                    + row
                        .iter()
                        .zip(&self.coefficients)
                        .map(|(v, w)| v * w)
                        .sum::<f64>()
            })
            .collect())
    }
}

impl Regressor for TreeEnsemble {
    fn kind(&self) -> &'static str {
        "tree_ensemble"
    }

    fn n_features(&self) -> Option<usize> {
        Some(self.n_features)
    }

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, PipelineError> {
        check_width(x, self.n_features)?;
        let n_trees = self.trees.len() as f64;
        Ok(x
            .iter()
            .map(|row| {
                let total: f64 = self.trees.iter().map(|t| t.leaf_value(row)).sum();
                match self.aggregation {
                    Aggregation::Sum => self.base_score + total,
                    Aggregation::Mean => self.base_score + total / n_trees,
                }
            })
            .collect())
    }
}

impl Regressor for ModelArtifact {
    fn kind(&self) -> &'static str {
        match self {
            ModelArtifact::Linear(m) => m.kind(),
            ModelArtifact::TreeEnsemble(m) => m.kind(),
        }
    }

    fn n_features(&self) -> Option<usize> {
        match self {
            ModelArtifact::Linear(m) => m.n_features(),
            ModelArtifact::TreeEnsemble(m) => m.n_features(),
        }
    }

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, PipelineError> {
        match self {
            ModelArtifact::Linear(m) => m.predict(x),
            ModelArtifact::TreeEnsemble(m) => m.predict(x),
        }
    }
}

// ---------- TorchScript ----------

#[cfg(feature = "torch")]
pub use torchscript::TorchScriptRegressor;

#[cfg(feature = "torch")]
mod torchscript {
    use std::io::Cursor;

    use tch::{kind::Kind, CModule, Device, Tensor};

    use super::Regressor;
    use crate::error::{ArtifactError, PipelineError};

    pub struct TorchScriptRegressor {
        module: CModule,
        device: Device,
    }

    impl TorchScriptRegressor {
        pub fn from_bytes(bytes: &[u8], name: &str) -> Result<Self, ArtifactError> {
            let device = Device::Cpu;
            let module = CModule::load_data_on_device(&mut Cursor::new(bytes), device).map_err(
                |e| ArtifactError::Invalid {
                    name: name.to_string(),
                    reason: e.to_string(),
                },
            )?;
            Ok(Self { module, device })
        }
    }

    impl Regressor for TorchScriptRegressor {
        fn kind(&self) -> &'static str {
            "torchscript"
        }

        // TorchScript modules do not carry their input width
        fn n_features(&self) -> Option<usize> {
            None
        }

        fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, PipelineError> {
            let width = x.first().map(Vec::len).unwrap_or(0);
            super::check_width(x, width)?;

            let flat: Vec<f32> = x.iter().flatten().map(|v| *v as f32).collect();
            let input = Tensor::from_slice(&flat)
                .reshape([x.len() as i64, width as i64])
                .to_device(self.device);

            // [N] or [N, 1]
            let out = self
                .module
                .forward_ts(&[input])
                .map_err(|e| PipelineError::Model(e.to_string()))?;
            let out = out.to_kind(Kind::Double).flatten(0, -1);
            Vec::<f64>::try_from(&out).map_err(|e| PipelineError::Model(e.to_string()))
        }
    }
}

/// Decode a model artifact fetched from the registry. `name` is the artifact
/// file name; `.pt` files are TorchScript, anything else is a JSON model.
pub fn load_regressor(bytes: &[u8], name: &str) -> Result<Box<dyn Regressor>, ArtifactError> {
    if name.ends_with(".pt") || name.ends_with(".torchscript") {
        #[cfg(feature = "torch")]
        {
            return Ok(Box::new(TorchScriptRegressor::from_bytes(bytes, name)?));
        }
        #[cfg(not(feature = "torch"))]
        {
            return Err(ArtifactError::Invalid {
                name: name.to_string(),
                reason: "TorchScript models need the `torch` feature".to_string(),
            });
        }
    }
    let model: ModelArtifact =
        serde_json::from_slice(bytes).map_err(|source| ArtifactError::Corrupt {
            name: name.to_string(),
            source,
        })?;
    Ok(Box::new(model))
}
