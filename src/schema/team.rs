//! Schemas for team aggregates and scout precision.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct ObjTeamSchema {
    /// Size of the last-matches window.
    pub lfm_window: usize,
    pub lfm_prefix: String,
    /// Computed in order; weighted sums may reference earlier results.
    pub calculations: Vec<TeamCalculation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamCalculation {
    pub name: String,
    #[serde(flatten)]
    pub calc: TeamCalc,
}

/// Collection a team aggregate reads its per-match records from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    #[default]
    ObjTim,
    TbaTim,
    AutoPim,
    SubjTim,
    SsTim,
}

impl RecordSource {
    pub const ALL: [RecordSource; 5] = [
        RecordSource::ObjTim,
        RecordSource::TbaTim,
        RecordSource::AutoPim,
        RecordSource::SubjTim,
        RecordSource::SsTim,
    ];

    pub fn collection(self) -> &'static str {
        match self {
            RecordSource::ObjTim => "obj_tim",
            RecordSource::TbaTim => "tba_tim",
            RecordSource::AutoPim => "auto_pim",
            RecordSource::SubjTim => "subj_tim",
            RecordSource::SsTim => "ss_tim",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extreme {
    Max,
    Min,
}

/// `field == value`, or `field != not`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RecordFilter {
    Equals { field: String, value: Value },
    Not { field: String, not: Value },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Coefficient {
    Constant(f64),
    /// Name of a team-level value computed earlier.
    Reference(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeightedTerm {
    pub field: String,
    pub coefficient: Coefficient,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "how", rename_all = "snake_case")]
pub enum TeamCalc {
    Average {
        field: String,
        #[serde(default)]
        source: RecordSource,
    },
    StandardDeviation {
        field: String,
        #[serde(default)]
        source: RecordSource,
    },
    Extreme {
        field: String,
        extreme: Extreme,
        #[serde(default)]
        source: RecordSource,
    },
    Median {
        field: String,
        #[serde(default)]
        ignore: Option<f64>,
        #[serde(default)]
        source: RecordSource,
    },
    Mode {
        field: String,
        #[serde(default)]
        source: RecordSource,
    },
    /// Records matching every filter.
    Count {
        #[serde(default)]
        filters: Vec<RecordFilter>,
        #[serde(default)]
        source: RecordSource,
    },
    /// Matches where the objective record and the super-scout record both pass their filters.
    SpecialCount {
        #[serde(default)]
        obj_filters: Vec<RecordFilter>,
        #[serde(default)]
        subj_filters: Vec<RecordFilter>,
    },
    /// Super-scout record count.
    SuperCount {
        #[serde(default)]
        filters: Vec<RecordFilter>,
    },
    /// Stand-strategist record count.
    StandStrategistCount {
        #[serde(default)]
        filters: Vec<RecordFilter>,
    },
    /// Sum of numerator fields over sum of denominator fields, clipped to [0, 1].
    SuccessRate {
        numerator: Vec<String>,
        denominator: Vec<String>,
        #[serde(default)]
        source: RecordSource,
    },
    WeightedSum { terms: Vec<WeightedTerm> },
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimPrecisionSchema {
    /// Field holding the sum of every calculation below.
    pub total_field: String,
    pub calculations: BTreeMap<String, SimCalculation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimCalculation {
    /// Score-breakdown keys summed into the alliance truth.
    pub tba_datapoints: Vec<String>,
    /// Scout count field → weight in the per-robot contribution.
    pub weights: BTreeMap<String, f64>,
}
