//! Reconstruction of each robot's autonomous routine from its scouts' timelines.

use super::base::{BaseCalculator, Calculator, PipelineContext, write_output};
use super::obj_tim::{self, TimKey, tim_filter, tim_key};
use super::sim_precision::OUTPUT as SIM_PRECISION;
use super::tba_tim::OUTPUT as TBA_TIM;
use super::timeline::annotate_fails;
use crate::error::{Error, Result};
use crate::model::{self, ActionType, TimelineEvent, get_f64, parse_timeline};
use crate::schema::auto::AutoPimSchema;
use crate::schema::totals::TotalsSchema;
use crate::store::{Document, Filter};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

pub const INPUT: &str = "unconsolidated_obj_tim";
pub const OUTPUT: &str = "auto_pim";

/// One scout's autonomous events in play order.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoTimeline {
    pub scout_name: String,
    pub events: Vec<TimelineEvent>,
}

pub struct AutoPim {
    base: BaseCalculator,
}

impl AutoPim {
    pub fn new() -> Self {
        Self {
            base: BaseCalculator::new(&[INPUT, obj_tim::OUTPUT, TBA_TIM, SIM_PRECISION]),
        }
    }
}

impl Default for AutoPim {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Calculator for AutoPim {
    fn name(&self) -> &'static str {
        "auto_pim"
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
        let mut keys: BTreeSet<TimKey> = if batch.full {
            ctx.store
                .find(INPUT, &Filter::all())
                .await?
                .iter()
                .filter_map(tim_key)
                .collect()
        } else {
            batch.affected(tim_key)
        };
        // sim precision records name a scout's robot; their whole match may re-select
        let rescored = batch.affected_in(SIM_PRECISION, model::match_number);
        for match_number in rescored {
            let observed = ctx
                .store
                .find(INPUT, &Filter::all().eq("match_number", match_number))
                .await?;
            keys.extend(observed.iter().filter_map(tim_key));
        }
        let key_fields = ctx.schemas.collections.key(OUTPUT)?;

        let mut written = 0;
        for key in &keys {
            match build_auto_pim(ctx, key).await {
                Ok(Some(doc)) => {
                    if write_output(ctx.store, OUTPUT, key_fields, doc).await? {
                        written += 1;
                    }
                }
                Ok(None) => {
                    ctx.store.delete_many(OUTPUT, &tim_filter(key)).await?;
                }
                Err(Error::MissingInput(reason)) => {
                    warn!(match_number = key.0, team_number = %key.1, %reason, "Skipping autonomous record");
                }
                Err(e) => return Err(e),
            }
        }
        info!(records = keys.len(), written, "Updated autonomous records");
        self.base.commit(&batch);
        Ok(())
    }
}

/// `Ok(None)` when no observation remains for the robot.
async fn build_auto_pim(ctx: &PipelineContext<'_>, key: &TimKey) -> Result<Option<Document>> {
    let filter = tim_filter(key);
    let observations = ctx.store.find(INPUT, &filter).await?;
    if observations.is_empty() {
        return Ok(None);
    }
    let timelines = auto_timelines(&observations, &ctx.schemas.totals);
    let precision = scout_precisions(ctx, key.0, &ctx.schemas.sim_precision.total_field).await?;
    let Some(chosen) = select_timeline(&timelines, &precision) else {
        return Err(Error::MissingInput("no readable autonomous timeline".into()));
    };

    let schema = &ctx.schemas.auto_pim;
    let mut doc = Document::new();
    doc.insert("match_number".into(), Value::from(key.0));
    doc.insert("team_number".into(), Value::from(key.1.clone()));
    doc.insert("scout_name".into(), Value::from(chosen.scout_name.clone()));
    doc.insert(
        "auto_timeline".into(),
        serde_json::to_value(&chosen.events)?,
    );
    doc.extend(project_slots(&chosen.events, schema));

    for (field, passthrough) in &schema.passthroughs {
        let collection = passthrough.source.collection();
        let source = ctx.store.find(collection, &filter).await?;
        let value = source.first().and_then(|d| d.get(field)).cloned();
        let value = match (value, passthrough.nullable) {
            (Some(value), _) => value,
            (None, true) => Value::Null,
            (None, false) => {
                return Err(Error::MissingInput(format!("{collection} lacks {field}")));
            }
        };
        if !value.is_null() {
            passthrough.kind.check(field, &value)?;
        }
        doc.insert(field.clone(), value);
    }
    Ok(Some(doc))
}

/// Absolute total sim precision per scout for one match.
async fn scout_precisions(
    ctx: &PipelineContext<'_>,
    match_number: i64,
    total_field: &str,
) -> Result<BTreeMap<String, f64>> {
    let records = ctx
        .store
        .find(SIM_PRECISION, &Filter::all().eq("match_number", match_number))
        .await?;
    Ok(records
        .iter()
        .filter_map(|r| Some((model::scout_name(r)?, get_f64(r, total_field)?.abs())))
        .collect())
}

/// Autonomous sub-timeline of every observation, with failures annotated.
pub fn auto_timelines(observations: &[Document], totals: &TotalsSchema) -> Vec<AutoTimeline> {
    observations
        .iter()
        .filter_map(|obs| {
            let scout_name = model::scout_name(obs)?;
            let mut events = match parse_timeline(obs) {
                Ok(events) => events,
                Err(e) => {
                    warn!(scout = %scout_name, error = %e, "Unreadable timeline");
                    return None;
                }
            };
            annotate_fails(&mut events, &totals.fail_mapping);
            events.retain(|e| !e.in_teleop && e.action_type != ActionType::ToTeleop);
            Some(AutoTimeline { scout_name, events })
        })
        .collect()
}

/// A strict majority sharing one length wins outright; otherwise the scout
/// with the smallest absolute sim precision for the match is trusted.
pub fn select_timeline<'a>(
    timelines: &'a [AutoTimeline],
    precision: &BTreeMap<String, f64>,
) -> Option<&'a AutoTimeline> {
    let mut by_length: BTreeMap<usize, usize> = BTreeMap::new();
    for timeline in timelines {
        *by_length.entry(timeline.events.len()).or_default() += 1;
    }
    if let Some((&length, _)) = by_length.iter().find(|(_, count)| **count * 2 > timelines.len()) {
        return timelines.iter().find(|t| t.events.len() == length);
    }

    let best = timelines
        .iter()
        .filter_map(|t| precision.get(&t.scout_name).map(|p| (t, *p)))
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(t, _)| t);
    if best.is_none() {
        debug!("No sim precision for any scout, using the first timeline");
    }
    best.or_else(|| timelines.first())
}

/// Writes `<field>_<n>` for every slot family, walking events in play order.
pub fn project_slots(events: &[TimelineEvent], schema: &AutoPimSchema) -> Document {
    let mut slots = Document::new();
    for (field, spec) in &schema.timeline_fields {
        let names: Vec<&String> = events
            .iter()
            .filter_map(|e| spec.valid_actions.get(&e.action_type))
            .take(spec.max_slots)
            .collect();
        for slot in 1..=spec.max_slots {
            let value = names
                .get(slot - 1)
                .map_or_else(|| schema.sentinel.clone(), |name| (*name).clone());
            slots.insert(format!("{field}_{slot}"), Value::from(value));
        }
    }
    slots
}
