//! Fitted column transformer: the preprocessing stage of the pipeline.
//!
//! The artifact is a JSON export of a fitted column transformer: the column
//! layout it was fitted on, a list of encoder steps over named columns, and a
//! remainder policy for the columns no step claims. Column references are
//! resolved and parameter shapes checked when the artifact is deserialized,
//! so a loaded transformer can only fail on the data it is given.

use std::collections::HashSet;

use serde::Deserialize;

use crate::error::{ArtifactError, PipelineError};
use crate::features::{FeatureRow, FeatureValue};

/// The preprocessing stage, as seen by the pipeline.
pub trait Transform: Send + Sync {
    /// Column names, in order, the transformer was fitted on.
    fn feature_names_in(&self) -> &[String];

    /// Width of one transformed row.
    fn n_features_out(&self) -> usize;

    fn transform(&self, rows: &[FeatureRow]) -> Result<Vec<Vec<f64>>, PipelineError>;
}

// ---------- Artifact shape ----------

#[derive(Debug, Clone, Deserialize)]
struct TransformerSpec {
    feature_names_in: Vec<String>,
    transformers: Vec<StepSpec>,
    #[serde(default)]
    remainder: Remainder,
}

#[derive(Debug, Clone, Deserialize)]
struct StepSpec {
    name: String,
    columns: Vec<String>,
    encoder: Encoder,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remainder {
    #[default]
    Drop,
    Passthrough,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleUnknown {
    Error,
    #[default]
    Ignore,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Encoder {
    MinMax {
        data_min: Vec<f64>,
        data_max: Vec<f64>,
        #[serde(default = "unit_range")]
        feature_range: [f64; 2],
    },
    Standard {
        mean: Vec<f64>,
        scale: Vec<f64>,
    },
    OneHot {
        categories: Vec<Vec<String>>,
        #[serde(default)]
        drop_first: bool,
        #[serde(default)]
        handle_unknown: HandleUnknown,
    },
    Ordinal {
        categories: Vec<Vec<String>>,
        #[serde(default)]
        unknown_value: Option<f64>,
    },
}

fn unit_range() -> [f64; 2] {
    [0.0, 1.0]
}

impl Encoder {
    fn params_len(&self) -> Vec<usize> {
        match self {
            Encoder::MinMax { data_min, data_max, .. } => vec![data_min.len(), data_max.len()],
            Encoder::Standard { mean, scale } => vec![mean.len(), scale.len()],
            Encoder::OneHot { categories, .. } | Encoder::Ordinal { categories, .. } => {
                vec![categories.len()]
            }
        }
    }

    fn output_names(&self, step: &str, columns: &[String]) -> Vec<String> {
        match self {
            Encoder::OneHot { categories, drop_first, .. } => columns
                .iter()
                .zip(categories)
                .flat_map(|(col, cats)| {
                    let skip = usize::from(*drop_first);
                    cats.iter()
                        .skip(skip)
                        .map(move |cat| format!("{}__{}_{}", step, col, cat))
                })
                .collect(),
            _ => columns.iter().map(|c| format!("{}__{}", step, c)).collect(),
        }
    }
}

// ---------- Fitted transformer ----------

#[derive(Debug, Clone)]
struct Step {
    columns: Vec<(usize, String)>,
    encoder: Encoder,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "TransformerSpec")]
pub struct ColumnTransformer {
    feature_names_in: Vec<String>,
    steps: Vec<Step>,
    remainder: Vec<(usize, String)>,
    feature_names_out: Vec<String>,
}

impl TryFrom<TransformerSpec> for ColumnTransformer {
    type Error = String;

    fn try_from(spec: TransformerSpec) -> Result<Self, Self::Error> {
        if spec.feature_names_in.is_empty() {
            return Err("feature_names_in is empty".to_string());
        }
        let mut claimed = HashSet::new();
        let mut steps = Vec::with_capacity(spec.transformers.len());
        let mut feature_names_out = Vec::new();

        for step in spec.transformers {
            for len in step.encoder.params_len() {
                if len != step.columns.len() {
                    return Err(format!(
                        "step '{}' has {} columns but {} fitted parameters",
                        step.name,
                        step.columns.len(),
                        len
                    ));
                }
            }
            if let Encoder::OneHot { categories, .. } | Encoder::Ordinal { categories, .. } =
                &step.encoder
            {
                if categories.iter().any(|c| c.is_empty()) {
                    return Err(format!("step '{}' has an empty category list", step.name));
                }
            }
            let mut columns = Vec::with_capacity(step.columns.len());
            for col in &step.columns {
                let idx = spec
                    .feature_names_in
                    .iter()
                    .position(|f| f == col)
                    .ok_or_else(|| format!("step '{}' uses unknown column '{}'", step.name, col))?;
                if !claimed.insert(idx) {
                    return Err(format!("column '{}' is used by more than one step", col));
                }
                columns.push((idx, col.clone()));
            }
            feature_names_out.extend(step.encoder.output_names(&step.name, &step.columns));
            steps.push(Step {
                columns,
                encoder: step.encoder,
            });
        }

        let remainder: Vec<(usize, String)> = match spec.remainder {
            Remainder::Drop => Vec::new(),
            Remainder::Passthrough => spec
                .feature_names_in
                .iter()
                .enumerate()
                .filter(|(idx, _)| !claimed.contains(idx))
                .map(|(idx, name)| (idx, name.clone()))
                .collect(),
        };
        feature_names_out.extend(remainder.iter().map(|(_, n)| format!("remainder__{}", n)));

        Ok(Self {
            feature_names_in: spec.feature_names_in,
            steps,
            remainder,
            feature_names_out,
        })
    }
}

impl ColumnTransformer {
    /// Decode a transformer artifact. `name` is only used in errors.
    pub fn from_slice(bytes: &[u8], name: &str) -> Result<Self, ArtifactError> {
        serde_json::from_slice(bytes).map_err(|source| ArtifactError::Corrupt {
            name: name.to_string(),
            source,
        })
    }

    pub fn feature_names_out(&self) -> &[String] {
        &self.feature_names_out
    }

    fn check_schema(&self, row: &FeatureRow) -> Result<(), PipelineError> {
        let same_width = !row.is_empty() && row.len() == self.feature_names_in.len();
        if same_width && row.names().eq(self.feature_names_in.iter().map(String::as_str)) {
            return Ok(());
        }
        Err(PipelineError::SchemaMismatch {
            expected: self.feature_names_in.clone(),
            found: row.names().map(str::to_string).collect(),
        })
    }

    fn transform_row(&self, row: &FeatureRow) -> Result<Vec<f64>, PipelineError> {
        self.check_schema(row)?;
        let mut out = Vec::with_capacity(self.feature_names_out.len());

        for step in &self.steps {
            for (pos, (idx, column)) in step.columns.iter().enumerate() {
                let value = row.value_at(*idx).ok_or_else(|| {
                    PipelineError::Model(format!("row has no value for column '{}'", column))
                })?;
                encode(&step.encoder, pos, column, value, &mut out)?;
            }
        }
        for (idx, column) in &self.remainder {
            let value = row.value_at(*idx).ok_or_else(|| {
                PipelineError::Model(format!("row has no value for column '{}'", column))
            })?;
            out.push(numeric(column, value)?);
        }
        Ok(out)
    }
}

impl Transform for ColumnTransformer {
    fn feature_names_in(&self) -> &[String] {
        &self.feature_names_in
    }

    fn n_features_out(&self) -> usize {
        self.feature_names_out.len()
    }

    fn transform(&self, rows: &[FeatureRow]) -> Result<Vec<Vec<f64>>, PipelineError> {
        rows.iter().map(|row| self.transform_row(row)).collect()
    }
}

fn numeric(column: &str, value: &FeatureValue) -> Result<f64, PipelineError> {
    value.as_number().ok_or_else(|| PipelineError::TypeCoercion {
        column: column.to_string(),
        value: value.to_string(),
    })
}

// zero-width fitted ranges scale by 1, as the fitting side does
fn non_zero(v: f64) -> f64 {
    if v == 0.0 {
        1.0
    } else {
        v
    }
}

fn encode(
    encoder: &Encoder,
    pos: usize,
    column: &str,
    value: &FeatureValue,
    out: &mut Vec<f64>,
) -> Result<(), PipelineError> {
    match encoder {
        Encoder::MinMax {
            data_min,
            data_max,
            feature_range,
        } => {
            let x = numeric(column, value)?;
            let [lo, hi] = *feature_range;
            let scale = (hi - lo) / non_zero(data_max[pos] - data_min[pos]);
            out.push((x - data_min[pos]) * scale + lo);
        }
        Encoder::Standard { mean, scale } => {
            let x = numeric(column, value)?;
            out.push((x - mean[pos]) / non_zero(scale[pos]));
        }
        Encoder::OneHot {
            categories,
            drop_first,
            handle_unknown,
        } => {
            let cats = &categories[pos];
            let category = value.as_category();
            let hit = cats.iter().position(|c| *c == category);
            if hit.is_none() && *handle_unknown == HandleUnknown::Error {
                return Err(PipelineError::UnknownCategory {
                    column: column.to_string(),
                    value: category,
                });
            }
            let skip = usize::from(*drop_first);
            out.extend((skip..cats.len()).map(|i| if hit == Some(i) { 1.0 } else { 0.0 }));
        }
        Encoder::Ordinal {
            categories,
            unknown_value,
        } => {
            let category = value.as_category();
            match categories[pos].iter().position(|c| *c == category) {
                Some(i) => out.push(i as f64),
                None => match unknown_value {
                    Some(v) => out.push(*v),
                    None => {
                        return Err(PipelineError::UnknownCategory {
                            column: column.to_string(),
                            value: category,
                        })
                    }
                },
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transformer() -> ColumnTransformer {
        let spec = json!({
            "feature_names_in": ["age", "weather", "traffic", "vehicle_condition"],
            "transformers": [
                {
                    "name": "scale",
                    "columns": ["age"],
                    "encoder": { "kind": "min_max", "data_min": [20.0], "data_max": [40.0] }
                },
                {
                    "name": "nominal",
                    "columns": ["weather"],
                    "encoder": {
                        "kind": "one_hot",
                        "categories": [["Cloudy", "Fog", "Sunny"]],
                        "drop_first": true
                    }
                },
                {
                    "name": "ordinal",
                    "columns": ["traffic"],
                    "encoder": {
                        "kind": "ordinal",
                        "categories": [["Low", "Medium", "High", "Jam"]],
                        "unknown_value": -1.0
                    }
                }
            ],
            "remainder": "passthrough"
        });
        serde_json::from_value(spec).unwrap()
    }

    fn row(age: f64, weather: &str, traffic: &str) -> FeatureRow {
        FeatureRow::default()
            .with_column("age", FeatureValue::Number(age))
            .with_column("weather", FeatureValue::Text(weather.into()))
            .with_column("traffic", FeatureValue::Text(traffic.into()))
            .with_column("vehicle_condition", FeatureValue::Number(2.0))
    }

    #[test]
    fn output_layout_follows_steps_then_remainder() {
        let ct = transformer();
        assert_eq!(
            ct.feature_names_out(),
            [
                "scale__age",
                "nominal__weather_Fog",
                "nominal__weather_Sunny",
                "ordinal__traffic",
                "remainder__vehicle_condition"
            ]
        );
        assert_eq!(ct.n_features_out(), 5);
    }

    #[test]
    fn encodes_a_row() {
        let ct = transformer();
        let out = ct.transform(&[row(30.0, "Sunny", "High")]).unwrap();
        assert_eq!(out, vec![vec![0.5, 0.0, 1.0, 2.0, 2.0]]);
    }

    #[test]
    fn dropped_and_unknown_categories_encode_as_zeros() {
        let ct = transformer();
        let dropped = ct.transform(&[row(20.0, "Cloudy", "Low")]).unwrap();
        assert_eq!(dropped[0], vec![0.0, 0.0, 0.0, 0.0, 2.0]);

        let unknown = ct.transform(&[row(40.0, "Hail", "Gridlock")]).unwrap();
        assert_eq!(unknown[0], vec![1.0, 0.0, 0.0, -1.0, 2.0]);
    }

    #[test]
    fn reordered_columns_are_a_schema_mismatch() {
        let ct = transformer();
        let swapped = FeatureRow::default()
            .with_column("weather", FeatureValue::Text("Sunny".into()))
            .with_column("age", FeatureValue::Number(30.0))
            .with_column("traffic", FeatureValue::Text("Low".into()))
            .with_column("vehicle_condition", FeatureValue::Number(2.0));
        assert!(matches!(
            ct.transform(&[swapped]),
            Err(PipelineError::SchemaMismatch { .. })
        ));

        let renamed = FeatureRow::default()
            .with_column("Delivery_person_Age", FeatureValue::Number(30.0))
            .with_column("weather", FeatureValue::Text("Sunny".into()))
            .with_column("traffic", FeatureValue::Text("Low".into()))
            .with_column("vehicle_condition", FeatureValue::Number(2.0));
        let err = ct.transform(&[renamed]).unwrap_err();
        match err {
            PipelineError::SchemaMismatch { expected, found } => {
                assert_eq!(expected[0], "age");
                assert_eq!(found[0], "Delivery_person_Age");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn extra_or_missing_columns_are_a_schema_mismatch() {
        let ct = transformer();
        let wide = row(30.0, "Sunny", "Low").with_column("distance", FeatureValue::Number(3.0));
        assert_eq!(wide.len(), 5);
        match ct.transform(&[wide]).unwrap_err() {
            PipelineError::SchemaMismatch { expected, found } => {
                assert_eq!(expected.len(), 4);
                assert_eq!(found.last().map(String::as_str), Some("distance"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let empty = FeatureRow::default();
        assert!(empty.is_empty());
        assert!(matches!(
            ct.transform(&[empty]),
            Err(PipelineError::SchemaMismatch { found, .. }) if found.is_empty()
        ));
    }

    #[test]
    fn text_in_numeric_column_is_a_coercion_error() {
        let ct = transformer();
        let bad = FeatureRow::default()
            .with_column("age", FeatureValue::Text("thirty".into()))
            .with_column("weather", FeatureValue::Text("Sunny".into()))
            .with_column("traffic", FeatureValue::Text("Low".into()))
            .with_column("vehicle_condition", FeatureValue::Number(2.0));
        assert_eq!(
            ct.transform(&[bad]),
            Err(PipelineError::TypeCoercion {
                column: "age".into(),
                value: "thirty".into()
            })
        );

        // numeric text is fine
        let ok = FeatureRow::default()
            .with_column("age", FeatureValue::Text("30".into()))
            .with_column("weather", FeatureValue::Text("Sunny".into()))
            .with_column("traffic", FeatureValue::Text("Low".into()))
            .with_column("vehicle_condition", FeatureValue::Number(2.0));
        assert_eq!(ct.transform(&[ok]).unwrap()[0][0], 0.5);
    }

    #[test]
    fn strict_encoders_reject_unknown_categories() {
        let spec = json!({
            "feature_names_in": ["festival"],
            "transformers": [{
                "name": "nominal",
                "columns": ["festival"],
                "encoder": { "kind": "one_hot", "categories": [["No", "Yes"]], "handle_unknown": "error" }
            }]
        });
        let ct: ColumnTransformer = serde_json::from_value(spec).unwrap();
        let r = FeatureRow::default().with_column("festival", FeatureValue::Text("Maybe".into()));
        assert!(matches!(
            ct.transform(&[r]),
            Err(PipelineError::UnknownCategory { .. })
        ));
    }

    #[test]
    fn standard_scaler_and_zero_ranges() {
        let spec = json!({
            "feature_names_in": ["distance", "ratings"],
            "transformers": [
                { "name": "std", "columns": ["distance"], "encoder": { "kind": "standard", "mean": [10.0], "scale": [2.0] } },
                { "name": "mm", "columns": ["ratings"], "encoder": { "kind": "min_max", "data_min": [5.0], "data_max": [5.0] } }
            ]
        });
        let ct: ColumnTransformer = serde_json::from_value(spec).unwrap();
        let r = FeatureRow::default()
            .with_column("distance", FeatureValue::Number(14.0))
            .with_column("ratings", FeatureValue::Number(5.0));
        assert_eq!(ct.transform(&[r]).unwrap()[0], vec![2.0, 0.0]);
    }

    #[test]
    fn rejects_inconsistent_artifacts() {
        let unknown_column = json!({
            "feature_names_in": ["age"],
            "transformers": [{ "name": "s", "columns": ["ratings"], "encoder": { "kind": "standard", "mean": [0.0], "scale": [1.0] } }]
        });
        let err = ColumnTransformer::from_slice(unknown_column.to_string().as_bytes(), "pre.json")
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Corrupt { .. }));
        assert!(err.to_string().contains("unknown column"));

        let short_params = json!({
            "feature_names_in": ["age", "ratings"],
            "transformers": [{ "name": "s", "columns": ["age", "ratings"], "encoder": { "kind": "standard", "mean": [0.0], "scale": [1.0, 1.0] } }]
        });
        assert!(ColumnTransformer::from_slice(short_params.to_string().as_bytes(), "pre.json").is_err());

        assert!(ColumnTransformer::from_slice(b"not json", "pre.json").is_err());
    }
}
