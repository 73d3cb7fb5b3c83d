//! Schemas for autonomous routine reconstruction and path clustering.

use super::ScalarType;
use crate::model::ActionType;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct AutoPimSchema {
    /// Written into every slot the routine did not reach.
    pub sentinel: String,
    /// Slot families, e.g. `score` → `score_1..score_N`.
    pub timeline_fields: BTreeMap<String, SlotField>,
    pub passthroughs: BTreeMap<String, Passthrough>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotField {
    pub max_slots: usize,
    /// Action kind → short name written into the slot.
    pub valid_actions: BTreeMap<ActionType, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassthroughSource {
    ObjTim,
    TbaTim,
}

impl PassthroughSource {
    pub fn collection(self) -> &'static str {
        match self {
            PassthroughSource::ObjTim => "obj_tim",
            PassthroughSource::TbaTim => "tba_tim",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Passthrough {
    pub source: PassthroughSource,
    #[serde(rename = "type")]
    pub kind: ScalarType,
    /// A missing source yields null instead of skipping the record.
    #[serde(default)]
    pub nullable: bool,
}

/// `field → allowed values`. A string value `-name` stands for the candidate
/// record's own value of `name`.
pub type ConditionSet = BTreeMap<String, Vec<Value>>;

#[derive(Debug, Clone, Deserialize)]
pub struct AutoPathsSchema {
    pub group_by: Vec<String>,
    /// Must match pointwise.
    #[serde(default)]
    pub exact: Vec<String>,
    /// Field → value-sets; equivalent when one set holds both values.
    #[serde(default)]
    pub unexact: BTreeMap<String, Vec<Vec<Value>>>,
    #[serde(default)]
    pub max: BTreeMap<String, MaxField>,
    /// Counter → condition sets, all of which must hold to increment.
    #[serde(default)]
    pub increment: BTreeMap<String, Vec<ConditionSet>>,
    /// Candidate fields that inherit the path's value when null.
    #[serde(default)]
    pub backfill: Vec<String>,
    #[serde(default)]
    pub compatibility: BTreeMap<String, Compatibility>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaxField {
    /// Ascending rank; the higher-ranked value wins.
    pub order: Vec<Value>,
    /// Counters zeroed whenever this field is raised.
    #[serde(default)]
    pub resets: Vec<String>,
}

/// Fraction of eligible routines that succeeded, written onto the team document.
#[derive(Debug, Clone, Deserialize)]
pub struct Compatibility {
    #[serde(default)]
    pub eligible: Vec<ConditionSet>,
    pub success: Vec<ConditionSet>,
}
