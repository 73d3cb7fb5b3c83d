//! Per-robot facts taken from the match-data service's score breakdowns.

use super::base::{Calculator, PipelineContext, write_output};
use crate::error::Result;
use crate::model::Alliance;
use crate::schema::consolidation::{TbaTimCalc, TbaTimSchema};
use crate::store::{Document, values_equal};
use crate::tba::TbaMatch;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

pub const OUTPUT: &str = "tba_tim";

/// Re-reads every played qualification match each cycle; the store drops
/// unchanged upserts, so only new or corrected breakdowns produce changes.
#[derive(Default)]
pub struct TbaTim;

impl TbaTim {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Calculator for TbaTim {
    fn name(&self) -> &'static str {
        "tba_tim"
    }

    fn output_collections(&self) -> &[&'static str] {
        &[OUTPUT]
    }

    fn reset(&mut self) {}

    async fn run(&mut self, ctx: &PipelineContext<'_>) -> Result<()> {
        let Some(matches) = ctx.match_data.event_matches().await else {
            warn!("No match data available, skipping");
            return Ok(());
        };
        let key_fields = ctx.schemas.collections.key(OUTPUT)?;

        let mut written = 0;
        for m in matches.iter().filter(|m| m.is_qualification() && m.has_breakdown()) {
            for doc in calculate_match(m, &ctx.schemas.tba_tim)? {
                if write_output(ctx.store, OUTPUT, key_fields, doc).await? {
                    written += 1;
                }
            }
        }
        info!(matches = matches.len(), written, "Updated match-data team records");
        Ok(())
    }
}

/// One record per robot of a match carrying a score breakdown.
pub fn calculate_match(m: &TbaMatch, schema: &TbaTimSchema) -> Result<Vec<Document>> {
    let mut docs = Vec::new();
    for alliance in Alliance::BOTH {
        let Some(breakdown) = m.breakdown(alliance) else {
            warn!(match_key = %m.key, alliance = alliance.as_str(), "Alliance breakdown missing");
            continue;
        };
        for (index, team) in m.teams(alliance).into_iter().enumerate() {
            let station = index + 1;
            let mut doc = Document::new();
            doc.insert("match_number".into(), Value::from(m.match_number));
            doc.insert("team_number".into(), Value::from(team));
            for field in &schema.fields {
                let value = evaluate(&field.calc, breakdown, alliance, station);
                field.kind.check(&field.name, &value)?;
                doc.insert(field.name.clone(), value);
            }
            docs.push(doc);
        }
    }
    Ok(docs)
}

fn breakdown_key(key: &str, robot_indexed: bool, station: usize) -> String {
    if robot_indexed {
        format!("{key}Robot{station}")
    } else {
        key.to_string()
    }
}

fn evaluate(calc: &TbaTimCalc, breakdown: &Document, alliance: Alliance, station: usize) -> Value {
    match calc {
        TbaTimCalc::Equals {
            key,
            robot_indexed,
            value,
        } => {
            let actual = breakdown.get(&breakdown_key(key, *robot_indexed, station));
            Value::Bool(actual.is_some_and(|a| values_equal(a, value)))
        }
        TbaTimCalc::OneOf {
            key,
            robot_indexed,
            values,
        } => {
            let actual = breakdown.get(&breakdown_key(key, *robot_indexed, station));
            Value::Bool(actual.is_some_and(|a| values.iter().any(|v| values_equal(a, v))))
        }
        TbaTimCalc::Lookup { key, prefix } => {
            let looked_up = breakdown
                .get(&breakdown_key(key, true, station))
                .and_then(Value::as_str)
                .and_then(|v| breakdown.get(&format!("{prefix}{v}")))
                .and_then(Value::as_bool);
            Value::Bool(looked_up.unwrap_or(false))
        }
        TbaTimCalc::DriverStation => Value::from(station),
        TbaTimCalc::AllianceColor => Value::Bool(alliance.is_red()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentStore, Filter};
    use crate::tba::StaticMatchData;
    use crate::test_support::{coefficients, context, qual_match, schemas, store};
    use serde_json::json;

    #[test]
    fn test_breakdown_predicates() {
        let schemas = schemas();
        let m = qual_match(3, ["1", "2", "3"], ["4", "5", "6"], Some(breakdowns()));
        let docs = calculate_match(&m, &schemas.tba_tim).unwrap();
        assert_eq!(docs.len(), 6);

        let team2 = &docs[1];
        assert_eq!(team2["team_number"], json!("2"));
        assert_eq!(team2["leave"], json!(false));
        assert_eq!(team2["onstage"], json!(true));
        assert_eq!(team2["spotlight"], json!(true));
        assert_eq!(team2["driver_station"], json!(2));
        assert_eq!(team2["alliance_color_is_red"], json!(true));

        let team1 = &docs[0];
        assert_eq!(team1["leave"], json!(true));
        assert_eq!(team1["tba_parked"], json!(true));
        assert_eq!(team1["spotlight"], json!(false));

        assert_eq!(docs[3]["alliance_color_is_red"], json!(false));
    }

    #[tokio::test]
    async fn test_run_skips_unplayed_and_missing_data() {
        let schemas = schemas();
        let coefficients = coefficients();
        let store = store(&schemas);

        let offline = StaticMatchData::new();
        let ctx = context(&store, &offline, &schemas, &coefficients);
        TbaTim::new().run(&ctx).await.unwrap();
        assert!(store.find(OUTPUT, &Filter::all()).await.unwrap().is_empty());

        let offline = StaticMatchData::new().with_matches(vec![
            qual_match(1, ["1", "2", "3"], ["4", "5", "6"], Some(breakdowns())),
            qual_match(2, ["1", "2", "3"], ["4", "5", "6"], None),
        ]);
        let ctx = context(&store, &offline, &schemas, &coefficients);
        TbaTim::new().run(&ctx).await.unwrap();
        let docs = store.find(OUTPUT, &Filter::all()).await.unwrap();
        assert_eq!(docs.len(), 6);
        assert!(docs.iter().all(|d| d["match_number"] == json!(1)));
    }

    fn breakdowns() -> (Value, Value) {
        let red = json!({
            "totalPoints": 40,
            "autoLineRobot1": "Yes",
            "autoLineRobot2": "No",
            "autoLineRobot3": "Yes",
            "endGameRobot1": "Parked",
            "endGameRobot2": "StageLeft",
            "endGameRobot3": "None",
            "micStageLeft": true,
            "micCenterStage": false,
            "micStageRight": false
        });
        let blue = json!({
            "totalPoints": 30,
            "autoLineRobot1": "No",
            "autoLineRobot2": "No",
            "autoLineRobot3": "No",
            "endGameRobot1": "None",
            "endGameRobot2": "None",
            "endGameRobot3": "None"
        });
        (red, blue)
    }
}
