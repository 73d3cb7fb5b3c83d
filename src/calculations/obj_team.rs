//! Team-level aggregates over every consolidated record of a team, and again
//! over its last few matches.

use super::base::{BaseCalculator, Calculator, PipelineContext, write_output};
use super::utility::{avg, median, modes, round2, stddev};
use crate::error::Result;
use crate::model::{self, value_as_f64};
use crate::schema::team::{
    Coefficient, Extreme, ObjTeamSchema, RecordFilter, RecordSource, TeamCalc,
};
use crate::store::{Document, Filter, values_equal};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

pub const OUTPUT: &str = "obj_team";

/// A team's per-match records, by source collection.
#[derive(Debug, Clone, Default)]
pub struct TeamRecords {
    sources: HashMap<RecordSource, Vec<Document>>,
}

impl TeamRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: RecordSource, records: Vec<Document>) -> Self {
        self.sources.insert(source, records);
        self
    }

    pub fn get(&self, source: RecordSource) -> &[Document] {
        self.sources.get(&source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Match numbers of the last `window` consolidated records.
    fn last_matches(&self, window: usize) -> BTreeSet<i64> {
        let played: BTreeSet<i64> = self
            .get(RecordSource::ObjTim)
            .iter()
            .filter_map(model::match_number)
            .collect();
        played.into_iter().rev().take(window).collect()
    }

    /// The same records restricted to the given matches.
    fn restricted(&self, matches: &BTreeSet<i64>) -> Self {
        let sources = self
            .sources
            .iter()
            .map(|(source, records)| {
                let kept = records
                    .iter()
                    .filter(|r| model::match_number(r).is_some_and(|m| matches.contains(&m)))
                    .cloned()
                    .collect();
                (*source, kept)
            })
            .collect();
        Self { sources }
    }
}

pub struct ObjTeam {
    base: BaseCalculator,
}

impl ObjTeam {
    pub fn new() -> Self {
        let watched: Vec<&'static str> = RecordSource::ALL.iter().map(|s| s.collection()).collect();
        Self {
            base: BaseCalculator::new(&watched),
        }
    }
}

impl Default for ObjTeam {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Calculator for ObjTeam {
    fn name(&self) -> &'static str {
        "obj_team"
    }

    fn output_collections(&self) -> &[&'static str] {
        &[OUTPUT]
    }

    fn reset(&mut self) {
        self.base.reset();
    }

    async fn run(&mut self, ctx: &PipelineContext<'_>) -> Result<()> {
        let batch = self.base.entries_since_last(ctx.store).await?;
        if !batch.full && batch.is_empty() {
            return Ok(());
        }
        let teams: BTreeSet<String> = if batch.full {
            ctx.store
                .find(RecordSource::ObjTim.collection(), &Filter::all())
                .await?
                .iter()
                .filter_map(model::team_number)
                .collect()
        } else {
            batch.affected(model::team_number)
        };
        let key_fields = ctx.schemas.collections.key(OUTPUT)?;

        let mut written = 0;
        for team in &teams {
            let filter = Filter::all().is_in("team_number", model::team_spellings(team));
            let mut records = TeamRecords::new();
            for source in RecordSource::ALL {
                records = records.with(source, ctx.store.find(source.collection(), &filter).await?);
            }
            if records.get(RecordSource::ObjTim).is_empty() {
                debug!(team_number = %team, "No consolidated records, removing team");
                ctx.store.delete_many(OUTPUT, &filter).await?;
                continue;
            }
            let doc = calculate_team(team, &records, &ctx.schemas.obj_team);
            if write_output(ctx.store, OUTPUT, key_fields, doc).await? {
                written += 1;
            }
        }
        info!(teams = teams.len(), written, "Updated team aggregates");
        self.base.commit(&batch);
        Ok(())
    }
}

/// All calculations over every record, then over the last-matches window.
pub fn calculate_team(team: &str, records: &TeamRecords, schema: &ObjTeamSchema) -> Document {
    let mut doc = Document::new();
    doc.insert("team_number".into(), Value::from(team));
    calculate_into(&mut doc, records, schema, "");
    let recent = records.restricted(&records.last_matches(schema.lfm_window));
    calculate_into(&mut doc, &recent, schema, &schema.lfm_prefix);
    doc
}

fn calculate_into(doc: &mut Document, records: &TeamRecords, schema: &ObjTeamSchema, prefix: &str) {
    for calculation in &schema.calculations {
        let value = evaluate(&calculation.calc, records, doc, prefix);
        doc.insert(format!("{prefix}{}", calculation.name), value);
    }
}

fn numbers(records: &[Document], field: &str) -> Vec<f64> {
    records
        .iter()
        .filter_map(|r| r.get(field).and_then(value_as_f64))
        .collect()
}

fn passes(record: &Document, filters: &[RecordFilter]) -> bool {
    filters.iter().all(|filter| match filter {
        RecordFilter::Equals { field, value } => {
            record.get(field).is_some_and(|v| values_equal(v, value))
        }
        RecordFilter::Not { field, not } => record.get(field).is_some_and(|v| !values_equal(v, not)),
    })
}

fn evaluate(calc: &TeamCalc, records: &TeamRecords, so_far: &Document, prefix: &str) -> Value {
    match calc {
        TeamCalc::Average { field, source } => {
            Value::from(round2(avg(&numbers(records.get(*source), field), None, 0.0)))
        }
        TeamCalc::StandardDeviation { field, source } => {
            let values = numbers(records.get(*source), field);
            let mean = avg(&values, None, 0.0);
            Value::from(round2(stddev(&values, mean)))
        }
        TeamCalc::Extreme {
            field,
            extreme,
            source,
        } => {
            let values = numbers(records.get(*source), field);
            let picked = match extreme {
                Extreme::Max => values.iter().copied().reduce(f64::max),
                Extreme::Min => values.iter().copied().reduce(f64::min),
            };
            picked.map_or(Value::Null, Value::from)
        }
        TeamCalc::Median {
            field,
            ignore,
            source,
        } => Value::from(round2(median(&numbers(records.get(*source), field), *ignore))),
        TeamCalc::Mode { field, source } => {
            let values: Vec<Value> = records
                .get(*source)
                .iter()
                .filter_map(|r| r.get(field))
                .filter(|v| !v.is_null())
                .cloned()
                .collect();
            Value::Array(modes(&values))
        }
        TeamCalc::Count { filters, source } => {
            let count = records.get(*source).iter().filter(|r| passes(r, filters)).count();
            Value::from(count)
        }
        TeamCalc::SpecialCount {
            obj_filters,
            subj_filters,
        } => {
            let subjective = records.get(RecordSource::SubjTim);
            let count = records
                .get(RecordSource::ObjTim)
                .iter()
                .filter(|obj| passes(obj, obj_filters))
                .filter(|obj| {
                    let match_number = model::match_number(obj);
                    subjective
                        .iter()
                        .any(|s| model::match_number(s) == match_number && passes(s, subj_filters))
                })
                .count();
            Value::from(count)
        }
        TeamCalc::SuperCount { filters } => {
            let count = records.get(RecordSource::SubjTim).iter().filter(|r| passes(r, filters)).count();
            Value::from(count)
        }
        TeamCalc::StandStrategistCount { filters } => {
            let count = records.get(RecordSource::SsTim).iter().filter(|r| passes(r, filters)).count();
            Value::from(count)
        }
        TeamCalc::SuccessRate {
            numerator,
            denominator,
            source,
        } => {
            let sum = |fields: &[String]| -> f64 {
                fields
                    .iter()
                    .map(|f| numbers(records.get(*source), f).iter().sum::<f64>())
                    .sum()
            };
            let (num, den) = (sum(numerator), sum(denominator));
            let rate = if den == 0.0 { 0.0 } else { (num / den).clamp(0.0, 1.0) };
            Value::from(round2(rate))
        }
        TeamCalc::WeightedSum { terms } => {
            let lookup = |name: &str| -> f64 {
                so_far
                    .get(&format!("{prefix}{name}"))
                    .or_else(|| so_far.get(name))
                    .and_then(value_as_f64)
                    .unwrap_or(0.0)
            };
            let total: f64 = terms
                .iter()
                .map(|term| {
                    let weight = match &term.coefficient {
                        Coefficient::Constant(c) => *c,
                        Coefficient::Reference(name) => lookup(name),
                    };
                    weight * lookup(&term.field)
                })
                .sum();
            Value::from(round2(total))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentStore;
    use crate::tba::StaticMatchData;
    use crate::test_support::{coefficients, context, doc, schemas, store};
    use serde_json::json;

    #[test]
    fn test_averages_and_lfm_window() {
        let schemas = schemas();
        let records = TeamRecords::new().with(
            RecordSource::ObjTim,
            (1..=6).map(|m| tim(m, json!({"tele_speaker": m, "total_points": 10 * m}))).collect(),
        );
        let team = calculate_team("254", &records, &schemas.obj_team);
        assert_eq!(team["tele_avg_speaker"], json!(3.5));
        // matches 3..=6
        assert_eq!(team["lfm_tele_avg_speaker"], json!(4.5));
        assert_eq!(team["max_total_points"], json!(60.0));
        assert_eq!(team["lfm_min_total_points"], json!(30.0));
        assert_eq!(team["matches_played"], json!(6));
        assert_eq!(team["lfm_matches_played"], json!(4));
    }

    #[test]
    fn test_success_rate_bounds() {
        let schemas = schemas();
        let records = TeamRecords::new().with(
            RecordSource::ObjTim,
            vec![
                tim(1, json!({"tele_speaker": 3, "auto_speaker": 1, "tele_failed_speaker": 1, "auto_failed_speaker": 0})),
                tim(2, json!({"tele_speaker": 0, "auto_speaker": 0})),
            ],
        );
        let team = calculate_team("254", &records, &schemas.obj_team);
        assert_eq!(team["speaker_success_rate"], json!(0.8));
        // no attempts at all
        assert_eq!(team["amp_success_rate"], json!(0.0));
        assert_eq!(team["trap_success_rate"], json!(0.0));
    }

    #[test]
    fn test_median_mode_and_counts() {
        let schemas = schemas();
        let records = TeamRecords::new()
            .with(
                RecordSource::ObjTim,
                vec![
                    tim(1, json!({"median_cycle_time": 0, "incap_time": 0, "start_position": "1", "harmonized": true, "tele_total_pieces": 4})),
                    tim(2, json!({"median_cycle_time": 12, "incap_time": 5, "start_position": "2", "harmonized": false, "tele_total_pieces": 0})),
                    tim(3, json!({"median_cycle_time": 20, "incap_time": 7, "start_position": "2", "tele_total_pieces": 3})),
                ],
            )
            .with(
                RecordSource::SubjTim,
                vec![
                    tim(1, json!({"was_defended": true, "played_defense": true, "driver_ability": 3})),
                    tim(2, json!({"was_defended": true, "driver_ability": 1})),
                ],
            )
            .with(RecordSource::TbaTim, vec![tim(1, json!({"leave": true})), tim(2, json!({"leave": false}))])
            .with(RecordSource::SsTim, vec![tim(1, json!({"broke_down": false}))]);
        let team = calculate_team("254", &records, &schemas.obj_team);
        assert_eq!(team["median_cycle_time"], json!(16.0));
        assert_eq!(team["mode_start_position"], json!(["2"]));
        assert_eq!(team["harmony_count"], json!(1));
        assert_eq!(team["incap_matches"], json!(2));
        assert_eq!(team["leave_count"], json!(1));
        // match 1 scored while defended; match 2 was defended but scored nothing
        assert_eq!(team["defended_scoring_matches"], json!(1));
        assert_eq!(team["super_matches"], json!(2));
        assert_eq!(team["defense_matches"], json!(1));
        assert_eq!(team["stand_strategist_broke_matches"], json!(0));
        assert_eq!(team["avg_driver_ability"], json!(2.0));
    }

    #[test]
    fn test_weighted_sums_use_earlier_results() {
        let schemas = schemas();
        let records = TeamRecords::new().with(
            RecordSource::ObjTim,
            vec![tim(1, json!({"auto_speaker": 2, "tele_speaker": 4, "tele_failed_speaker": 4}))],
        );
        let team = calculate_team("254", &records, &schemas.obj_team);
        // 5 * 2 + 2 * 4
        assert_eq!(team["expected_speaker_points"], json!(18.0));
        // 4 * (6 / 10)
        assert_eq!(team["adjusted_speaker_notes"], json!(2.4));
        assert_eq!(team["lfm_adjusted_speaker_notes"], json!(2.4));
    }

    #[tokio::test]
    async fn test_run_keeps_compatibility_columns() {
        let schemas = schemas();
        let coefficients = coefficients();
        let store = store(&schemas);
        let offline = StaticMatchData::new();
        store
            .insert_many("obj_tim", vec![tim(1, json!({"tele_speaker": 2}))])
            .await
            .unwrap();
        let ctx = context(&store, &offline, &schemas, &coefficients);
        let mut calc = ObjTeam::new();
        calc.run(&ctx).await.unwrap();

        let mut fields = Document::new();
        fields.insert("center_compatibility".into(), json!(0.5));
        store
            .update_fields(OUTPUT, &Filter::all().eq("team_number", "254"), fields)
            .await
            .unwrap();
        store
            .insert_many("obj_tim", vec![tim(2, json!({"tele_speaker": 4}))])
            .await
            .unwrap();
        calc.run(&ctx).await.unwrap();

        let teams = store.find(OUTPUT, &Filter::all()).await.unwrap();
        assert_eq!(teams.len(), 1);
        assert_eq!(teams[0]["tele_avg_speaker"], json!(3.0));
        assert_eq!(teams[0]["center_compatibility"], json!(0.5));
    }

    fn tim(match_number: i64, fields: Value) -> Document {
        let mut record = doc(json!({"match_number": match_number, "team_number": "254"}));
        record.extend(doc(fields));
        record
    }
}
