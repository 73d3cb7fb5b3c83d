//! Consolidation of every scout's totals for a robot in a match into one
//! authoritative team-in-match record.

use super::base::{BaseCalculator, Calculator, PipelineContext, write_output};
use super::unconsolidated_totals::OUTPUT as TOTALS;
use super::utility::{consolidate_bools, consolidate_categorical, consolidate_nums};
use crate::error::{Error, Result};
use crate::model::{self, get_bool, value_as_f64};
use crate::schema::ScalarType;
use crate::schema::consolidation::{HarmonyRule, ObjTimSchema, PointSection, PointWeight};
use crate::store::{Document, Filter};
use crate::tba::TbaMatch;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

pub const OUTPUT: &str = "obj_tim";

/// Categorical values that never score.
const POINTLESS_VALUES: [&str; 2] = ["N", "F"];

/// `(match_number, team_number)`
pub type TimKey = (i64, String);

pub fn tim_key(doc: &Document) -> Option<TimKey> {
    Some((model::match_number(doc)?, model::team_number(doc)?))
}

pub fn tim_filter((match_number, team): &TimKey) -> Filter {
    Filter::all()
        .eq("match_number", *match_number)
        .is_in("team_number", model::team_spellings(team))
}

pub struct ObjTim {
    base: BaseCalculator,
}

impl ObjTim {
    pub fn new() -> Self {
        Self {
            base: BaseCalculator::new(&[TOTALS]),
        }
    }
}

impl Default for ObjTim {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Calculator for ObjTim {
    fn name(&self) -> &'static str {
        "obj_tim"
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
        let keys: BTreeSet<TimKey> = if batch.full {
            ctx.store
                .find(TOTALS, &Filter::all())
                .await?
                .iter()
                .filter_map(tim_key)
                .collect()
        } else {
            batch.affected(tim_key)
        };
        let schedule = ctx.match_data.event_matches().await;
        if schedule.is_none() {
            debug!("No match data, consolidating without roster check");
        }
        let key_fields = ctx.schemas.collections.key(OUTPUT)?;

        let mut written = 0;
        for key in &keys {
            let filter = tim_filter(key);
            let records = ctx.store.find(TOTALS, &filter).await?;
            if records.is_empty() {
                warn!(match_number = key.0, team_number = %key.1, "No observations left to consolidate");
                ctx.store.delete_many(OUTPUT, &filter).await?;
                continue;
            }
            if let Some(matches) = &schedule {
                if !on_roster(matches, key) {
                    warn!(match_number = key.0, team_number = %key.1, "Team not on match roster, discarding");
                    ctx.store.delete_many(OUTPUT, &filter).await?;
                    continue;
                }
            }
            let doc = consolidate(&records, &ctx.schemas.obj_tim)?;
            if write_output(ctx.store, OUTPUT, key_fields, doc).await? {
                written += 1;
            }
        }

        if let Some(rule) = &ctx.schemas.obj_tim.harmony {
            let match_numbers: BTreeSet<i64> = keys.iter().map(|(m, _)| *m).collect();
            for match_number in match_numbers {
                let tims = ctx
                    .store
                    .find(OUTPUT, &Filter::all().eq("match_number", match_number))
                    .await?;
                for (team, harmonized) in calculate_harmony(&tims, rule) {
                    let mut fields = Document::new();
                    fields.insert(rule.output.clone(), Value::Bool(harmonized));
                    ctx.store
                        .update_fields(OUTPUT, &tim_filter(&(match_number, team)), fields)
                        .await?;
                }
            }
        }

        if let Some(matches) = &schedule {
            check_coverage(ctx, matches).await?;
        }
        info!(records = keys.len(), written, "Consolidated team-in-match records");
        self.base.commit(&batch);
        Ok(())
    }
}

/// A match missing from the schedule cannot be checked and passes.
fn on_roster(matches: &[TbaMatch], (match_number, team): &TimKey) -> bool {
    matches
        .iter()
        .find(|m| m.is_qualification() && m.match_number == *match_number)
        .is_none_or(|m| m.position_of(team).is_some())
}

/// Logs a missing-input warning for every played, scheduled robot without a record.
async fn check_coverage(ctx: &PipelineContext<'_>, matches: &[TbaMatch]) -> Result<()> {
    let present: BTreeSet<TimKey> = ctx
        .store
        .find(OUTPUT, &Filter::all())
        .await?
        .iter()
        .filter_map(tim_key)
        .collect();
    let mut missing = 0;
    for m in matches.iter().filter(|m| m.is_qualification() && m.has_breakdown()) {
        for alliance in model::Alliance::BOTH {
            for team in m.teams(alliance) {
                if ctx.teams.is_some_and(|teams| !teams.contains(&team)) {
                    continue;
                }
                let key = (m.match_number, team);
                if !present.contains(&key) {
                    let err = Error::MissingInput(format!(
                        "no consolidated record for team {} in match {}",
                        key.1, key.0
                    ));
                    warn!(match_number = key.0, team_number = %key.1, error = %err, "Coverage gap");
                    missing += 1;
                }
            }
        }
    }
    if missing > 0 {
        debug!(missing, "Coverage check finished");
    }
    Ok(())
}

/// Merges the totals of every scout who watched one robot in one match.
pub fn consolidate(records: &[Document], schema: &ObjTimSchema) -> Result<Document> {
    let mut doc = Document::new();
    if let Some(first) = records.first() {
        for field in ["match_number", "team_number"] {
            if let Some(value) = first.get(field) {
                doc.insert(field.to_string(), value.clone());
            }
        }
    }
    let sides: Vec<bool> = records
        .iter()
        .filter_map(|r| get_bool(r, "alliance_color_is_red"))
        .collect();
    if !sides.is_empty() {
        doc.insert("alliance_color_is_red".into(), Value::Bool(consolidate_bools(&sides)));
    }
    doc.insert("confidence_ranking".into(), Value::from(records.len()));

    for (field, spec) in &schema.numeric {
        let values: Vec<f64> = records
            .iter()
            .filter_map(|r| r.get(field).and_then(value_as_f64))
            .collect();
        if values.is_empty() {
            continue;
        }
        let merged = consolidate_nums(&values, spec.kind == ScalarType::Float);
        doc.insert(field.clone(), spec.kind.number(field, merged)?);
    }

    for field in &schema.boolean {
        let values: Vec<bool> = records.iter().filter_map(|r| get_bool(r, field)).collect();
        if !values.is_empty() {
            doc.insert(field.clone(), Value::Bool(consolidate_bools(&values)));
        }
    }

    for (field, enumeration) in &schema.categorical {
        let values: Vec<String> = records
            .iter()
            .filter_map(|r| match r.get(field)? {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect();
        if values.is_empty() {
            continue;
        }
        if let Some(merged) = consolidate_categorical(field, &values, enumeration) {
            doc.insert(field.clone(), Value::from(merged));
        }
    }

    for section in &schema.points {
        let points = section_points(&doc, section);
        doc.insert(section.name.clone(), section.kind.number(&section.name, points)?);
    }
    Ok(doc)
}

fn section_points(doc: &Document, section: &PointSection) -> f64 {
    let total: f64 = section
        .fields
        .iter()
        .map(|(field, weight)| match (doc.get(field), weight) {
            (Some(Value::Number(n)), PointWeight::Flat(w)) => n.as_f64().unwrap_or(0.0) * w,
            (Some(Value::Bool(true)), PointWeight::Flat(w)) => *w,
            (Some(Value::String(s)), PointWeight::Flat(w)) => {
                if POINTLESS_VALUES.contains(&s.as_str()) { 0.0 } else { *w }
            }
            (Some(Value::String(s)), PointWeight::ByValue(weights)) => {
                weights.get(s).copied().unwrap_or(0.0)
            }
            _ => 0.0,
        })
        .sum();
    match &section.per {
        None => total,
        Some(counters) => {
            let divisor: f64 = counters
                .iter()
                .filter_map(|c| doc.get(c).and_then(value_as_f64))
                .sum();
            if divisor == 0.0 { 0.0 } else { total / divisor }
        }
    }
}

/// Harmony flag for every record of one match. An alliance with any record
/// lacking the stage fields gets no pairs.
pub fn calculate_harmony(tims: &[Document], rule: &HarmonyRule) -> Vec<(String, bool)> {
    let mut alliances: BTreeMap<bool, Vec<&Document>> = BTreeMap::new();
    for tim in tims {
        if let Some(is_red) = get_bool(tim, "alliance_color_is_red") {
            alliances.entry(is_red).or_default().push(tim);
        }
    }

    let mut flags = Vec::new();
    for members in alliances.values() {
        let stages: Option<Vec<(&str, &str)>> = members
            .iter()
            .map(|t| {
                Some((
                    model::get_str(t, &rule.level_field)?,
                    model::get_str(t, &rule.chain_field)?,
                ))
            })
            .collect();
        let mut chain_counts: BTreeMap<&str, usize> = BTreeMap::new();
        if let Some(stages) = &stages {
            for (level, chain) in stages {
                if *level == rule.onstage && *chain != rule.no_chain {
                    *chain_counts.entry(*chain).or_default() += 1;
                }
            }
        }
        for (i, tim) in members.iter().enumerate() {
            let Some(team) = model::team_number(tim) else {
                continue;
            };
            let harmonized = stages.as_ref().is_some_and(|stages| {
                let (level, chain) = stages[i];
                level == rule.onstage && chain_counts.get(chain).is_some_and(|n| *n >= 2)
            });
            flags.push((team, harmonized));
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentStore;
    use crate::tba::StaticMatchData;
    use crate::test_support::{coefficients, context, doc, qual_match, schemas, store};
    use serde_json::json;

    #[test]
    fn test_tim_filter_matches_every_team_spelling() {
        let key = (4, "254".to_string());
        let filter = tim_filter(&key);
        assert!(filter.matches(&doc(json!({"match_number": 4, "team_number": "254"}))));
        assert!(filter.matches(&doc(json!({"match_number": 4, "team_number": 254}))));
        assert!(filter.matches(&doc(json!({"match_number": 4, "team_number": "frc254"}))));
        assert!(!filter.matches(&doc(json!({"match_number": 4, "team_number": "2540"}))));
        assert!(!filter.matches(&doc(json!({"match_number": 5, "team_number": 254}))));
    }

    #[test]
    fn test_three_scouts_mode_recursion() {
        let schemas = schemas();
        let records = vec![
            totals("A", json!({"auto_speaker": 2})),
            totals("B", json!({"auto_speaker": 0})),
            totals("C", json!({"auto_speaker": 0})),
        ];
        let tim = consolidate(&records, &schemas.obj_tim).unwrap();
        assert_eq!(tim["auto_speaker"], json!(0));
        assert_eq!(tim["confidence_ranking"], json!(3));
    }

    #[test]
    fn test_identical_records_round_trip() {
        let schemas = schemas();
        let fields = json!({
            "auto_speaker": 3, "tele_amp": 4, "expected_cycle_time": 12.5,
            "start_position": "2", "stage_level": "O", "parked": true
        });
        let records = vec![totals("A", fields.clone()), totals("B", fields.clone()), totals("C", fields)];
        let tim = consolidate(&records, &schemas.obj_tim).unwrap();
        assert_eq!(tim["auto_speaker"], json!(3));
        assert_eq!(tim["tele_amp"], json!(4));
        assert_eq!(tim["expected_cycle_time"], json!(12.5));
        assert_eq!(tim["start_position"], json!("2"));
        assert_eq!(tim["stage_level"], json!("O"));
        assert_eq!(tim["parked"], json!(true));
    }

    #[test]
    fn test_point_sections() {
        let schemas = schemas();
        let records = vec![totals(
            "A",
            json!({"auto_speaker": 2, "auto_amp": 1, "tele_speaker": 3, "tele_amp": 1,
                   "tele_trap": 0, "parked": false, "stage_level": "O"}),
        )];
        let tim = consolidate(&records, &schemas.obj_tim).unwrap();
        assert_eq!(tim["auto_total_points"], json!(12));
        // 3*2 + 1*1 + onstage 3
        assert_eq!(tim["tele_total_points"], json!(10));
        assert_eq!(tim["total_points"], json!(22));
        // 7 note points over 4 notes
        assert_eq!(tim["tele_points_per_note"], json!(1.75));
    }

    #[test]
    fn test_harmony_pairs_same_chain() {
        let schemas = schemas();
        let rule = schemas.obj_tim.harmony.as_ref().unwrap();
        let tims = vec![
            stage("1", true, "O", "L"),
            stage("2", true, "O", "L"),
            stage("3", true, "O", "C"),
            stage("4", false, "O", "N"),
            stage("5", false, "O", "N"),
        ];
        let flags: BTreeMap<String, bool> = calculate_harmony(&tims, rule).into_iter().collect();
        assert!(flags["1"]);
        assert!(flags["2"]);
        assert!(!flags["3"]);
        assert!(!flags["4"]);
        assert!(!flags["5"]);
    }

    #[test]
    fn test_harmony_with_incomplete_alliance() {
        let schemas = schemas();
        let rule = schemas.obj_tim.harmony.as_ref().unwrap();
        let mut incomplete = stage("3", true, "O", "L");
        incomplete.remove("stage_chain");
        let tims = vec![stage("1", true, "O", "L"), stage("2", true, "O", "L"), incomplete];
        assert!(calculate_harmony(&tims, rule).iter().all(|(_, h)| !h));
    }

    #[tokio::test]
    async fn test_run_discards_off_roster_teams() {
        let schemas = schemas();
        let coefficients = coefficients();
        let store = store(&schemas);
        store
            .insert_many(
                TOTALS,
                vec![
                    totals("A", json!({"team_number": "1", "auto_speaker": 1})),
                    totals("B", json!({"team_number": "1", "auto_speaker": 1})),
                    totals("C", json!({"team_number": "99", "auto_speaker": 1})),
                ],
            )
            .await
            .unwrap();
        let offline = StaticMatchData::new().with_matches(vec![qual_match(
            1,
            ["1", "2", "3"],
            ["4", "5", "6"],
            None,
        )]);
        let ctx = context(&store, &offline, &schemas, &coefficients);
        ObjTim::new().run(&ctx).await.unwrap();

        let tims = store.find(OUTPUT, &Filter::all()).await.unwrap();
        assert_eq!(tims.len(), 1);
        assert_eq!(tims[0]["team_number"], json!("1"));
        assert_eq!(tims[0]["confidence_ranking"], json!(2));
        assert_eq!(tims[0]["harmonized"], json!(false));
    }

    #[tokio::test]
    async fn test_run_deletes_when_observations_vanish() {
        let schemas = schemas();
        let coefficients = coefficients();
        let store = store(&schemas);
        let offline = StaticMatchData::new();
        store
            .insert_many(TOTALS, vec![totals("A", json!({"auto_speaker": 1}))])
            .await
            .unwrap();
        let ctx = context(&store, &offline, &schemas, &coefficients);
        let mut calc = ObjTim::new();
        calc.run(&ctx).await.unwrap();
        assert_eq!(store.find(OUTPUT, &Filter::all()).await.unwrap().len(), 1);

        store.delete_many(TOTALS, &Filter::all()).await.unwrap();
        calc.run(&ctx).await.unwrap();
        assert!(store.find(OUTPUT, &Filter::all()).await.unwrap().is_empty());
    }

    fn totals(scout: &str, fields: Value) -> Document {
        let mut record = doc(json!({
            "scout_name": scout,
            "match_number": 1,
            "team_number": "1",
            "alliance_color_is_red": true,
        }));
        record.extend(doc(fields));
        record
    }

    fn stage(team: &str, is_red: bool, level: &str, chain: &str) -> Document {
        doc(json!({
            "match_number": 1,
            "team_number": team,
            "alliance_color_is_red": is_red,
            "stage_level": level,
            "stage_chain": chain,
        }))
    }
}
