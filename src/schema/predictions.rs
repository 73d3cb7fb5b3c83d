//! Schema for alliance predictions and the regression coefficient document.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct PredictionsSchema {
    pub features: BTreeMap<String, Feature>,
    /// Alliance-level features built from first-pass predictions.
    #[serde(default)]
    pub joined_features: BTreeMap<String, JoinedFeature>,
    pub predictions: BTreeMap<String, Prediction>,
    #[serde(default)]
    pub joined_predictions: BTreeMap<String, JoinedPrediction>,
    pub actuals: BTreeMap<String, Actual>,
    pub ranking: RankingSpec,
}

impl PredictionsSchema {
    /// Every feature a prediction names must be declared.
    pub fn validate(&self) -> Result<()> {
        for (name, prediction) in &self.predictions {
            for feature in &prediction.features {
                if !self.features.contains_key(feature) {
                    return Err(Error::Config(format!(
                        "prediction {name} uses undeclared feature {feature}"
                    )));
                }
            }
        }
        for (name, joined) in &self.joined_features {
            if !self.predictions.contains_key(&joined.prediction) {
                return Err(Error::Config(format!(
                    "joined feature {name} references unknown prediction {}",
                    joined.prediction
                )));
            }
        }
        for (name, prediction) in &self.joined_predictions {
            for feature in &prediction.features {
                if !self.joined_features.contains_key(feature) {
                    return Err(Error::Config(format!(
                        "joined prediction {name} uses undeclared joined feature {feature}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSource {
    #[default]
    ObjTeam,
    TbaTeam,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub source: FeatureSource,
    #[serde(flatten)]
    pub method: FeatureMethod,
}

/// How member-team values collapse into one alliance value.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum FeatureMethod {
    /// Mean over members.
    Normal { field: String },
    Sum { field: String },
    /// Alliance sum minus the opposing alliance sum.
    Diff { field: String },
    /// Sum of numerators over sum of denominators.
    Rate { numerator: String, denominator: String },
    /// 1 when any member's value is positive.
    Bool { field: String },
    /// 1 when the alliance sum reaches the threshold.
    Threshold { field: String, threshold: f64 },
}

/// Own first-pass prediction minus the opponent's.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinedFeature {
    pub prediction: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Linear,
    Logistic,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    pub model_type: ModelType,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinedPrediction {
    pub model_type: ModelType,
    pub features: Vec<String>,
    /// Blue is `1 - red` instead of its own evaluation.
    #[serde(default)]
    pub complement: bool,
}

/// Actual values pulled from a played match.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "how", rename_all = "snake_case")]
pub enum Actual {
    AllianceScore,
    Breakdown { key: String },
}

/// Which predictions turn into ranking points for a team.
#[derive(Debug, Clone, Deserialize)]
pub struct RankingSpec {
    pub rank_point_predictions: Vec<String>,
    pub score_prediction: String,
    pub win_bonus: f64,
    pub tie_bonus: f64,
}

/// `prediction → feature → coefficient`; the feature `intercept` is a constant term.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Coefficients(pub BTreeMap<String, BTreeMap<String, f64>>);

impl Coefficients {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read coefficients {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            Error::Config(format!("invalid coefficients {}: {e}", path.display()))
        })
    }

    pub fn for_prediction(&self, prediction: &str) -> Result<&BTreeMap<String, f64>> {
        self.0
            .get(prediction)
            .ok_or_else(|| Error::Config(format!("no coefficients for prediction {prediction}")))
    }
}
