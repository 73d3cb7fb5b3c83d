//! Per-scout totals: one flat record of counts, sums, times and passthroughs
//! for every scout observation.

use super::base::{BaseCalculator, Calculator, PipelineContext, write_output};
use super::timeline;
use crate::error::Result;
use crate::model::{self, get_i64, parse_timeline};
use crate::schema::totals::{TotalsCalc, TotalsSchema};
use crate::schema::ScalarType;
use crate::store::{Document, Filter};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Number, Value};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

pub const INPUT: &str = "unconsolidated_obj_tim";
pub const OUTPUT: &str = "unconsolidated_totals";

/// `(scout_name, match_number, team_number)`
pub type ScoutKey = (String, i64, String);

pub fn scout_key(doc: &Document) -> Option<ScoutKey> {
    Some((
        model::scout_name(doc)?,
        model::match_number(doc)?,
        model::team_number(doc)?,
    ))
}

fn key_filter((scout, match_number, team): &ScoutKey) -> Filter {
    Filter::all()
        .eq("scout_name", scout.as_str())
        .eq("match_number", *match_number)
        .is_in("team_number", model::team_spellings(team))
}

pub struct UnconsolidatedTotals {
    base: BaseCalculator,
}

impl UnconsolidatedTotals {
    pub fn new() -> Self {
        Self {
            base: BaseCalculator::new(&[INPUT]),
        }
    }
}

impl Default for UnconsolidatedTotals {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Calculator for UnconsolidatedTotals {
    fn name(&self) -> &'static str {
        "unconsolidated_totals"
    }

    fn output_collections(&self) -> &[&'static str] {
        &[OUTPUT]
    }

    fn reset(&mut self) {
        self.base.reset();
    }

    async fn run(&mut self, ctx: &PipelineContext<'_>) -> Result<()> {
        let batch = self.base.entries_since_last(ctx.store).await?;
        let keys = if batch.full {
            ctx.store
                .find(INPUT, &Filter::all())
                .await?
                .iter()
                .filter_map(scout_key)
                .collect()
        } else {
            batch.affected(scout_key)
        };
        let key_fields = ctx.schemas.collections.key(OUTPUT)?;

        let mut written = 0;
        for key in &keys {
            let filter = key_filter(key);
            let observations = ctx.store.find(INPUT, &filter).await?;
            let Some(observation) = observations.first() else {
                let removed = ctx.store.delete_many(OUTPUT, &filter).await?;
                debug!(scout = %key.0, match_number = key.1, team_number = %key.2, removed, "Observation gone");
                continue;
            };
            let Some(totals) = calculate_totals(observation, &ctx.schemas.totals)? else {
                continue;
            };
            if write_output(ctx.store, OUTPUT, key_fields, totals).await? {
                written += 1;
            }
        }
        info!(observations = keys.len(), written, "Updated unconsolidated totals");
        self.base.commit(&batch);
        Ok(())
    }
}

/// Computes the totals record for one observation. Returns `Ok(None)` when the
/// observation is skipped (wrong schema version or unreadable timeline).
pub fn calculate_totals(observation: &Document, schema: &TotalsSchema) -> Result<Option<Document>> {
    if let Some(version) = get_i64(observation, "schema_version") {
        if version != i64::from(schema.schema_version) {
            warn!(
                version,
                expected = schema.schema_version,
                scout = ?model::scout_name(observation),
                match_number = ?model::match_number(observation),
                "Skipping observation with mismatched schema version"
            );
            return Ok(None);
        }
    }

    let mut events = match parse_timeline(observation) {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, scout = ?model::scout_name(observation), "Unreadable timeline");
            return Ok(None);
        }
    };
    timeline::annotate_fails(&mut events, &schema.fail_mapping);

    let mut totals = Document::new();
    for field in ["scout_name", "match_number", "team_number", "alliance_color_is_red"] {
        if let Some(value) = observation.get(field) {
            totals.insert(field.to_string(), value.clone());
        }
    }
    if let Some(team) = model::team_number(observation) {
        totals.insert("team_number".into(), Value::from(team));
    }

    for field in &schema.fields {
        let value = match &field.calc {
            TotalsCalc::Count { filters } => {
                field.kind.number(&field.name, timeline::count(&events, filters) as f64)?
            }
            TotalsCalc::Sum { fields } => {
                let sum: f64 = fields
                    .iter()
                    .filter_map(|f| totals.get(f).and_then(model::value_as_f64))
                    .sum();
                field.kind.number(&field.name, sum)?
            }
            TotalsCalc::CycleTime {
                start,
                end,
                minimum_time,
                close_at_end,
            } => {
                let total = timeline::cycle_time(&events, *start, end, *minimum_time, *close_at_end);
                field.kind.number(&field.name, total as f64)?
            }
            TotalsCalc::MedianCycle { filters } => {
                field.kind.number(&field.name, timeline::median_cycle(&events, filters) as f64)?
            }
            TotalsCalc::Expected(spec) => {
                field.kind.number(&field.name, timeline::expected(&events, spec))?
            }
            TotalsCalc::Passthrough { source } => {
                let source = source.as_deref().unwrap_or(&field.name);
                match observation.get(source) {
                    Some(value) => value.clone(),
                    None => {
                        warn!(field = %field.name, source, "Observation lacks passthrough field");
                        continue;
                    }
                }
            }
        };
        field.kind.check(&field.name, &value)?;
        totals.insert(field.name.clone(), value);
    }

    if let Some(Value::Object(overrides)) = observation.get("override") {
        apply_overrides(&mut totals, overrides, schema);
    }
    Ok(Some(totals))
}

/// A parsed override value.
#[derive(Debug, Clone, PartialEq)]
pub enum Override {
    Replace(Value),
    Add(Value),
    Sub(Value),
}

fn override_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"^(\+=|-=)?(-?\d+(\.\d+)?|".*"|true|false)$"#).ok())
        .as_ref()
}

impl Override {
    /// Strings are parsed with the override grammar; anything else replaces outright.
    pub fn parse(raw: &Value) -> Self {
        let Value::String(text) = raw else {
            return Override::Replace(raw.clone());
        };
        let Some(caps) = override_pattern().and_then(|re| re.captures(text)) else {
            return Override::Replace(raw.clone());
        };
        let literal = caps.get(2).map_or("", |m| m.as_str());
        let value = if caps.get(3).is_some() {
            literal
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map_or(Value::Null, Value::Number)
        } else if let Ok(int) = literal.parse::<i64>() {
            Value::from(int)
        } else if let Some(quoted) = literal.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
            Value::from(quoted)
        } else {
            Value::Bool(literal == "true")
        };
        match caps.get(1).map(|m| m.as_str()) {
            Some("+=") => Override::Add(value),
            Some("-=") => Override::Sub(value),
            _ => Override::Replace(value),
        }
    }

    fn apply(&self, current: &Value) -> Option<Value> {
        let combine = |delta: &Value, sign: f64| -> Option<Value> {
            match (current.as_i64(), delta.as_i64()) {
                (Some(a), Some(b)) => Some(Value::from(a + b * sign as i64)),
                _ => {
                    let sum = current.as_f64()? + sign * delta.as_f64()?;
                    Number::from_f64(sum).map(Value::Number)
                }
            }
        };
        match self {
            Override::Replace(value) => Some(value.clone()),
            Override::Add(delta) => combine(delta, 1.0),
            Override::Sub(delta) => combine(delta, -1.0),
        }
    }
}

fn apply_overrides(totals: &mut Document, overrides: &Document, schema: &TotalsSchema) {
    for (field, raw) in overrides {
        let Some(current) = totals.get(field) else {
            warn!(field, "Override for unknown field");
            continue;
        };
        let Some(updated) = Override::parse(raw).apply(current) else {
            warn!(field, value = %raw, "Override not applicable to current value");
            continue;
        };
        let declared: Option<ScalarType> = schema
            .fields
            .iter()
            .find(|f| &f.name == field)
            .map(|f| f.kind);
        if let Some(kind) = declared {
            if let Err(e) = kind.check(field, &updated) {
                warn!(field, error = %e, "Ignoring override of the wrong type");
                continue;
            }
        }
        totals.insert(field.clone(), updated);
    }
}
