//! Fixtures shared by the unit tests.

use crate::calculations::PipelineContext;
use crate::model::Alliance;
use crate::schema::{Coefficients, SchemaSet};
use crate::store::{Document, MemoryStore};
use crate::tba::{StaticMatchData, TbaMatch};
use serde_json::{Value, json};
use std::path::PathBuf;

pub(crate) fn schema_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("schemas")
}

pub(crate) fn schemas() -> SchemaSet {
    SchemaSet::load(&schema_dir()).unwrap()
}

pub(crate) fn coefficients() -> Coefficients {
    Coefficients::load(
        &PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data/regression_coefficients.json"),
    )
    .unwrap()
}

pub(crate) fn store(schemas: &SchemaSet) -> MemoryStore {
    MemoryStore::new().with_keys(schemas.collections.keys.clone())
}

pub(crate) fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

pub(crate) fn context<'a>(
    store: &'a MemoryStore,
    match_data: &'a StaticMatchData,
    schemas: &'a SchemaSet,
    coefficients: &'a Coefficients,
) -> PipelineContext<'a> {
    PipelineContext {
        store,
        match_data,
        schemas,
        coefficients,
        teams: None,
    }
}

/// A qualification match; `breakdown` is applied to both alliances when given.
pub(crate) fn qual_match(
    number: i64,
    red: [&str; 3],
    blue: [&str; 3],
    breakdown: Option<(Value, Value)>,
) -> TbaMatch {
    let keys = |teams: [&str; 3]| teams.iter().map(|t| format!("frc{t}")).collect::<Vec<_>>();
    let (red_score, blue_score) = match &breakdown {
        Some((r, b)) => (
            r.get("totalPoints").and_then(Value::as_i64).unwrap_or(0),
            b.get("totalPoints").and_then(Value::as_i64).unwrap_or(0),
        ),
        None => (-1, -1),
    };
    let winner = match red_score.cmp(&blue_score) {
        _ if breakdown.is_none() => "",
        std::cmp::Ordering::Greater => Alliance::Red.as_str(),
        std::cmp::Ordering::Less => Alliance::Blue.as_str(),
        std::cmp::Ordering::Equal => "",
    };
    serde_json::from_value(json!({
        "key": format!("2024caav_qm{number}"),
        "comp_level": "qm",
        "match_number": number,
        "alliances": {
            "red": {"team_keys": keys(red), "score": red_score},
            "blue": {"team_keys": keys(blue), "score": blue_score}
        },
        "winning_alliance": winner,
        "score_breakdown": breakdown.map(|(r, b)| json!({"red": r, "blue": b}))
    }))
    .unwrap()
}

/// One scout's observation with the given timeline entries `(time, action, in_teleop)`.
pub(crate) fn observation(
    scout: &str,
    match_number: i64,
    team: &str,
    is_red: bool,
    timeline: &[(i64, &str, bool)],
) -> Document {
    let timeline: Vec<Value> = timeline
        .iter()
        .map(|(time, action, in_teleop)| {
            json!({"time": time, "action_type": action, "in_teleop": in_teleop})
        })
        .collect();
    doc(json!({
        "schema_version": 1,
        "scout_name": scout,
        "match_number": match_number,
        "team_number": team,
        "alliance_color_is_red": is_red,
        "start_position": "1",
        "has_preload": true,
        "stage_level": "N",
        "stage_chain": "N",
        "parked": false,
        "timeline": timeline,
    }))
}
