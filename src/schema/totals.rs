//! Schema for per-scout totals derived from a single observation.

use super::{EventFilter, OneOrMany, ScalarType};
use crate::model::ActionType;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct TotalsSchema {
    /// Observations carrying another version are skipped.
    pub schema_version: u32,
    /// `fail` followed by the key kind rewrites that next event to the value kind.
    #[serde(default)]
    pub fail_mapping: BTreeMap<ActionType, ActionType>,
    /// Computed in order; `sum` fields may reference earlier entries.
    pub fields: Vec<TotalsField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TotalsField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ScalarType,
    #[serde(flatten)]
    pub calc: TotalsCalc,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "how", rename_all = "snake_case")]
pub enum TotalsCalc {
    /// Number of events matching the filter.
    Count {
        #[serde(default)]
        filters: EventFilter,
    },
    /// Sum of previously computed fields.
    Sum { fields: Vec<String> },
    /// Total time between each start and the next end, counting gaps of at least `minimum_time`.
    CycleTime {
        start: ActionType,
        end: OneOrMany<ActionType>,
        #[serde(default)]
        minimum_time: i64,
        /// An unclosed start runs until the end of the match.
        #[serde(default)]
        close_at_end: bool,
    },
    /// Median gap between consecutive matching events.
    MedianCycle {
        #[serde(default)]
        filters: EventFilter,
    },
    /// Teleop cycle estimate from intake→score pairs.
    Expected(ExpectedSpec),
    /// Copied from the observation, by default from the field of the same name.
    Passthrough {
        #[serde(default)]
        source: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedMeasure {
    /// Teleop duration divided by the weighted cycle count.
    CycleTime,
    /// The weighted cycle count itself.
    Cycles,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpectedSpec {
    pub measure: ExpectedMeasure,
    pub score_actions: Vec<ActionType>,
    #[serde(default)]
    pub ferry_actions: Vec<ActionType>,
    pub intake_weights: BTreeMap<ActionType, IntakeWeight>,
    /// Count a teleop that opens with a score (a carried note) as one cycle.
    #[serde(default)]
    pub count_first_score: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct IntakeWeight {
    pub normal: f64,
    pub ferry: f64,
}
