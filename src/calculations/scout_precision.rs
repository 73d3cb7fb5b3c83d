//! Ranks scouts by the magnitude of their sim-precision errors.

use super::base::{BaseCalculator, Calculator, PipelineContext, write_output};
use super::sim_precision::OUTPUT as SIM_PRECISION;
use super::utility::{mean, round2};
use crate::error::Result;
use crate::model::{self, value_as_f64};
use crate::schema::SimPrecisionSchema;
use crate::store::{Document, Filter};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

pub const OUTPUT: &str = "scout_precision";
pub const RANK_FIELD: &str = "scout_precision_rank";

pub struct ScoutPrecision {
    base: BaseCalculator,
}

impl ScoutPrecision {
    pub fn new() -> Self {
        Self {
            base: BaseCalculator::new(&[SIM_PRECISION]),
        }
    }
}

impl Default for ScoutPrecision {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Calculator for ScoutPrecision {
    fn name(&self) -> &'static str {
        "scout_precision"
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
        // ranks are relative, so every scout is recomputed
        let records = ctx.store.find(SIM_PRECISION, &Filter::all()).await?;
        let docs = calculate_scouts(&records, &ctx.schemas.sim_precision);
        let key_fields = ctx.schemas.collections.key(OUTPUT)?;

        let exported: BTreeSet<String> = docs.iter().filter_map(model::scout_name).collect();
        let mut removed = 0;
        for existing in ctx.store.find(OUTPUT, &Filter::all()).await? {
            if let Some(scout) = model::scout_name(&existing).filter(|s| !exported.contains(s)) {
                removed += ctx
                    .store
                    .delete_many(OUTPUT, &Filter::all().eq("scout_name", scout.as_str()))
                    .await?;
            }
        }
        let mut written = 0;
        for doc in docs {
            if write_output(ctx.store, OUTPUT, key_fields, doc).await? {
                written += 1;
            }
        }
        info!(scouts = exported.len(), written, removed, "Updated scout precision");
        self.base.commit(&batch);
        Ok(())
    }
}

/// One ranked document per scout with at least one sim-precision entry.
///
/// Each declared calculation and the total are averaged in absolute value.
/// Ranks are dense and ascending by the total's magnitude.
pub fn calculate_scouts(records: &[Document], schema: &SimPrecisionSchema) -> Vec<Document> {
    let mut by_scout: BTreeMap<String, Vec<&Document>> = BTreeMap::new();
    for record in records {
        if let Some(scout) = model::scout_name(record) {
            by_scout.entry(scout).or_default().push(record);
        }
    }

    let fields: Vec<&String> = std::iter::once(&schema.total_field)
        .chain(schema.calculations.keys())
        .collect();
    let mut docs: Vec<(f64, Document)> = Vec::new();
    for (scout, entries) in by_scout {
        let magnitude = |field: &str| -> Option<f64> {
            let values: Vec<f64> = entries
                .iter()
                .filter_map(|e| e.get(field).and_then(value_as_f64))
                .map(f64::abs)
                .collect();
            (!values.is_empty()).then(|| round2(mean(&values)))
        };
        let Some(total) = magnitude(&schema.total_field) else {
            continue;
        };
        let mut doc = Document::new();
        doc.insert("scout_name".into(), Value::from(scout));
        for field in &fields {
            if let Some(value) = magnitude(field) {
                doc.insert((*field).clone(), Value::from(value));
            }
        }
        docs.push((total, doc));
    }

    docs.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut rank = 0;
    let mut previous: Option<f64> = None;
    docs.into_iter()
        .map(|(total, mut doc)| {
            if previous != Some(total) {
                rank += 1;
                previous = Some(total);
            }
            doc.insert(RANK_FIELD.into(), Value::from(rank));
            doc
        })
        .collect()
}
