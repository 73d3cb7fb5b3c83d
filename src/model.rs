//! Domain types shared by the calculators: timeline events, action kinds and
//! typed accessors over loosely-typed store documents.

use crate::store::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of actions a scout can record on a timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ToTeleop,
    StartIncap,
    EndIncap,
    Fail,
    ScoreSpeaker,
    ScoreAmp,
    ScoreTrap,
    ScoreFailSpeaker,
    ScoreFailAmp,
    ScoreFailTrap,
    Ferry,
    Drop,
    IntakeCenter,
    IntakeFar,
    IntakeAmp,
    IntakePoach,
    IntakeOther,
    #[serde(rename = "auto_intake_spike_1")]
    AutoIntakeSpike1,
    #[serde(rename = "auto_intake_spike_2")]
    AutoIntakeSpike2,
    #[serde(rename = "auto_intake_spike_3")]
    AutoIntakeSpike3,
    #[serde(rename = "auto_intake_center_1")]
    AutoIntakeCenter1,
    #[serde(rename = "auto_intake_center_2")]
    AutoIntakeCenter2,
    #[serde(rename = "auto_intake_center_3")]
    AutoIntakeCenter3,
    #[serde(rename = "auto_intake_center_4")]
    AutoIntakeCenter4,
    #[serde(rename = "auto_intake_center_5")]
    AutoIntakeCenter5,
    AutoIntakeOther,
    AutoIntakeFail,
}

/// One action on a scout's timeline. `time` counts seconds remaining, so a
/// larger value happened earlier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub time: i64,
    pub action_type: ActionType,
    #[serde(default)]
    pub in_teleop: bool,
}

/// Parses the `timeline` array of an observation and sorts it into play order.
pub fn parse_timeline(doc: &Document) -> serde_json::Result<Vec<TimelineEvent>> {
    let mut timeline: Vec<TimelineEvent> = match doc.get("timeline") {
        Some(value) => serde_json::from_value(value.clone())?,
        None => Vec::new(),
    };
    timeline.sort_by(|a, b| b.time.cmp(&a.time));
    Ok(timeline)
}

/// Alliance side of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Alliance {
    Red,
    Blue,
}

impl Alliance {
    pub const BOTH: [Alliance; 2] = [Alliance::Red, Alliance::Blue];

    pub fn as_str(self) -> &'static str {
        match self {
            Alliance::Red => "red",
            Alliance::Blue => "blue",
        }
    }

    pub fn is_red(self) -> bool {
        self == Alliance::Red
    }

    pub fn opponent(self) -> Alliance {
        match self {
            Alliance::Red => Alliance::Blue,
            Alliance::Blue => Alliance::Red,
        }
    }
}

pub fn get_f64(doc: &Document, field: &str) -> Option<f64> {
    value_as_f64(doc.get(field)?)
}

/// Numeric view of a JSON value; booleans count as 1/0.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

pub fn get_i64(doc: &Document, field: &str) -> Option<i64> {
    match doc.get(field)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn get_str<'a>(doc: &'a Document, field: &str) -> Option<&'a str> {
    doc.get(field)?.as_str()
}

pub fn get_bool(doc: &Document, field: &str) -> Option<bool> {
    doc.get(field)?.as_bool()
}

pub fn match_number(doc: &Document) -> Option<i64> {
    get_i64(doc, "match_number")
}

/// Team numbers are stored as strings without the `frc` prefix.
pub fn team_number(doc: &Document) -> Option<String> {
    match doc.get("team_number")? {
        Value::String(s) => Some(strip_team_key(s).to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Every form a team number takes in collaborator-written documents:
/// `"254"`, `"frc254"` and `254`.
pub fn team_spellings(team: &str) -> Vec<Value> {
    let mut spellings = vec![Value::from(team), Value::from(format!("frc{team}"))];
    if let Ok(number) = team.parse::<i64>() {
        spellings.push(Value::from(number));
    }
    spellings
}

pub fn scout_name(doc: &Document) -> Option<String> {
    get_str(doc, "scout_name").map(str::to_string)
}

pub fn strip_team_key(key: &str) -> &str {
    key.strip_prefix("frc").unwrap_or(key)
}
