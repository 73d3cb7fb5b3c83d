//! Schemas for the consolidated team-in-match records.

use super::ScalarType;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct ObjTimSchema {
    /// Numeric fields merged with the mean/mode/z-score rule.
    pub numeric: BTreeMap<String, NumericField>,
    #[serde(default)]
    pub boolean: Vec<String>,
    /// Categorical fields and their ordered enumerations.
    #[serde(default)]
    pub categorical: BTreeMap<String, Vec<String>>,
    /// Point sections, computed in order once the counts are consolidated.
    #[serde(default)]
    pub points: Vec<PointSection>,
    #[serde(default)]
    pub harmony: Option<HarmonyRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NumericField {
    #[serde(rename = "type")]
    pub kind: ScalarType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PointSection {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ScalarType,
    pub fields: BTreeMap<String, PointWeight>,
    /// Divide the section total by this counter (0 when the counter is 0).
    #[serde(default)]
    pub per: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PointWeight {
    /// Counts multiply, true booleans add, non-sentinel categoricals add.
    Flat(f64),
    /// Per-value weights for a categorical; unlisted values add nothing.
    ByValue(BTreeMap<String, f64>),
}

/// Allied robots sharing `chain_field` while at `level_field == onstage` are harmonized.
#[derive(Debug, Clone, Deserialize)]
pub struct HarmonyRule {
    pub level_field: String,
    pub onstage: String,
    pub chain_field: String,
    /// Chain value that never forms a pair.
    pub no_chain: String,
    pub output: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TbaTimSchema {
    pub fields: Vec<TbaTimField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TbaTimField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ScalarType,
    #[serde(flatten)]
    pub calc: TbaTimCalc,
}

/// Score-breakdown predicates. With `robot_indexed`, the key is suffixed with
/// `Robot<driver station>` (e.g. `autoLine` → `autoLineRobot2`).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "how", rename_all = "snake_case")]
pub enum TbaTimCalc {
    Equals {
        key: String,
        #[serde(default)]
        robot_indexed: bool,
        value: Value,
    },
    OneOf {
        key: String,
        #[serde(default)]
        robot_indexed: bool,
        values: Vec<Value>,
    },
    /// Reads the robot's value, then reports whether `<prefix><value>` is true.
    Lookup {
        key: String,
        prefix: String,
    },
    DriverStation,
    AllianceColor,
}
