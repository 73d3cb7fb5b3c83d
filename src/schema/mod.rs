//! Declarative calculation schemas.
//!
//! Each calculator is driven by one YAML document under the schema directory.
//! Files are deserialized straight into tagged descriptor enums, so a
//! calculator dispatches on `how`/`method` variants instead of looking fields
//! up by name at run time.

pub mod auto;
pub mod consolidation;
pub mod predictions;
pub mod team;
pub mod totals;

pub use auto::{AutoPathsSchema, AutoPimSchema};
pub use consolidation::{ObjTimSchema, TbaTimSchema};
pub use predictions::{Coefficients, PredictionsSchema};
pub use team::{ObjTeamSchema, SimPrecisionSchema};
pub use totals::TotalsSchema;

use crate::error::{Error, Result};
use crate::model::{ActionType, TimelineEvent};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Scalar type a schema declares for a computed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Int,
    Float,
    Bool,
    Str,
}

impl ScalarType {
    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Int => "int",
            ScalarType::Float => "float",
            ScalarType::Bool => "bool",
            ScalarType::Str => "str",
        }
    }

    /// Fails with [`Error::TypeMismatch`] when `value` is not of this type.
    pub fn check(self, field: &str, value: &Value) -> Result<()> {
        let ok = match self {
            ScalarType::Int => value.is_i64() || value.is_u64(),
            ScalarType::Float => value.is_number(),
            ScalarType::Bool => value.is_boolean(),
            ScalarType::Str => value.is_string(),
        };
        if ok {
            Ok(())
        } else {
            Err(Error::type_mismatch(field, self.name(), json_type_name(value)))
        }
    }

    /// Converts a computed number into this type's JSON shape.
    pub fn number(self, field: &str, x: f64) -> Result<Value> {
        match self {
            ScalarType::Int => Ok(Value::from(x.round() as i64)),
            ScalarType::Float => Ok(Value::from(crate::calculations::utility::round2(x))),
            other => Err(Error::type_mismatch(field, other.name(), "number")),
        }
    }
}

pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// Either a single value or a list of values.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: PartialEq> OneOrMany<T> {
    pub fn contains(&self, item: &T) -> bool {
        match self {
            OneOrMany::One(value) => value == item,
            OneOrMany::Many(values) => values.contains(item),
        }
    }
}

/// Conjunction of timeline-event conditions. `time` is an inclusive interval.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub action_type: Option<OneOrMany<ActionType>>,
    #[serde(default)]
    pub in_teleop: Option<bool>,
    #[serde(default)]
    pub time: Option<(i64, i64)>,
}

impl EventFilter {
    pub fn matches(&self, event: &TimelineEvent) -> bool {
        if let Some(kinds) = &self.action_type {
            if !kinds.contains(&event.action_type) {
                return false;
            }
        }
        if let Some(in_teleop) = self.in_teleop {
            if event.in_teleop != in_teleop {
                return false;
            }
        }
        if let Some((lo, hi)) = self.time {
            if event.time < lo.min(hi) || event.time > lo.max(hi) {
                return false;
            }
        }
        true
    }
}

/// Natural keys per collection and the static inputs re-emitted every cycle.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionsSchema {
    pub keys: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub reinsert: Vec<String>,
}

impl CollectionsSchema {
    pub fn key(&self, collection: &str) -> Result<&[String]> {
        self.keys
            .get(collection)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::Config(format!("no natural key declared for {collection}")))
    }
}

/// Every schema the pipeline needs, loaded once at startup.
#[derive(Debug, Clone)]
pub struct SchemaSet {
    pub collections: CollectionsSchema,
    pub totals: TotalsSchema,
    pub obj_tim: ObjTimSchema,
    pub tba_tim: TbaTimSchema,
    pub auto_pim: AutoPimSchema,
    pub auto_paths: AutoPathsSchema,
    pub obj_team: ObjTeamSchema,
    pub sim_precision: SimPrecisionSchema,
    pub predictions: PredictionsSchema,
}

impl SchemaSet {
    pub fn load(dir: &Path) -> Result<Self> {
        let schemas = Self {
            collections: load_yaml(&dir.join("collections.yml"))?,
            totals: load_yaml(&dir.join("unconsolidated_totals.yml"))?,
            obj_tim: load_yaml(&dir.join("obj_tim.yml"))?,
            tba_tim: load_yaml(&dir.join("tba_tim.yml"))?,
            auto_pim: load_yaml(&dir.join("auto_pim.yml"))?,
            auto_paths: load_yaml(&dir.join("auto_paths.yml"))?,
            obj_team: load_yaml(&dir.join("obj_team.yml"))?,
            sim_precision: load_yaml(&dir.join("sim_precision.yml"))?,
            predictions: load_yaml(&dir.join("predictions.yml"))?,
        };
        schemas.predictions.validate()?;
        Ok(schemas)
    }
}

/// Reads and deserializes one YAML schema; any failure is a configuration error.
pub fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    serde_yaml::from_str(&text)
        .map_err(|e| Error::Config(format!("invalid schema {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::schema_dir;
    use serde_json::json;

    #[test]
    fn test_shipped_schemas_load() {
        let schemas = SchemaSet::load(&schema_dir()).unwrap();
        assert!(!schemas.totals.fields.is_empty());
        assert!(schemas.collections.key("obj_tim").is_ok());
        assert!(schemas.collections.reinsert.contains(&"raw_qr".to_string()));
    }

    #[test]
    fn test_shipped_schemas_use_known_action_names() {
        let dir = schema_dir();
        let totals: TotalsSchema = load_yaml(&dir.join("unconsolidated_totals.yml")).unwrap();
        assert_eq!(
            totals.fail_mapping.get(&ActionType::AutoIntakeSpike1),
            Some(&ActionType::AutoIntakeFail)
        );
        assert_eq!(
            totals.fail_mapping.get(&ActionType::AutoIntakeCenter5),
            Some(&ActionType::AutoIntakeFail)
        );

        let auto_pim: AutoPimSchema = load_yaml(&dir.join("auto_pim.yml")).unwrap();
        let intakes = &auto_pim.timeline_fields["intake_position"].valid_actions;
        assert_eq!(intakes[&ActionType::AutoIntakeSpike3], "spike_3");
        assert_eq!(intakes[&ActionType::AutoIntakeCenter1], "center_1");
    }

    #[test]
    fn test_missing_schema_dir_is_config_error() {
        let err = SchemaSet::load(Path::new("/nonexistent/schemas")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_scalar_type_check() {
        assert!(ScalarType::Int.check("x", &json!(3)).is_ok());
        assert!(ScalarType::Int.check("x", &json!(3.5)).is_err());
        assert!(ScalarType::Float.check("x", &json!(3)).is_ok());
        assert!(ScalarType::Bool.check("x", &json!(false)).is_ok());
        let err = ScalarType::Str.check("x", &json!(1)).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_scalar_number_rounding() {
        assert_eq!(ScalarType::Int.number("x", 2.5).unwrap(), json!(3));
        assert_eq!(ScalarType::Int.number("x", -2.5).unwrap(), json!(-3));
        assert_eq!(ScalarType::Float.number("x", 0.666).unwrap(), json!(0.67));
        assert!(ScalarType::Bool.number("x", 1.0).is_err());
    }

    #[test]
    fn test_event_filter() {
        let filter: EventFilter = serde_yaml::from_str(
            "action_type: [score_speaker, score_amp]\nin_teleop: true\ntime: [0, 100]",
        )
        .unwrap();
        let event = TimelineEvent {
            time: 50,
            action_type: ActionType::ScoreAmp,
            in_teleop: true,
        };
        assert!(filter.matches(&event));
        assert!(!filter.matches(&TimelineEvent { time: 101, ..event.clone() }));
        assert!(!filter.matches(&TimelineEvent { in_teleop: false, ..event.clone() }));
        assert!(!filter.matches(&TimelineEvent {
            action_type: ActionType::ScoreTrap,
            ..event
        }));
    }
}
