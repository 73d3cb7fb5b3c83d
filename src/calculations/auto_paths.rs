//! Clustering of autonomous routines into numbered paths per team and start
//! position, plus the team-level compatibility fractions derived from them.
//!
//! A team's paths are rebuilt from all of its routines, in match order,
//! whenever one of them changes. Path numbers are therefore dense and follow
//! first occurrence.

use super::auto_pim::OUTPUT as AUTO_PIM;
use super::base::{BaseCalculator, Calculator, PipelineContext, write_output};
use super::obj_tim::tim_filter;
use crate::error::Result;
use crate::model;
use crate::schema::auto::{AutoPathsSchema, ConditionSet};
use crate::store::{Document, Filter, values_equal};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{info, warn};

pub const OUTPUT: &str = "auto_paths";
pub const OBJ_TEAM: &str = "obj_team";

/// Paths built for one team, plus the path each routine joined.
#[derive(Debug, Default)]
pub struct TeamPaths {
    pub paths: Vec<Document>,
    /// `(match_number, path index)` for every classified routine.
    pub assignments: Vec<(i64, usize)>,
}

pub struct AutoPaths {
    base: BaseCalculator,
}

impl AutoPaths {
    pub fn new() -> Self {
        Self {
            base: BaseCalculator::new(&[AUTO_PIM]),
        }
    }
}

impl Default for AutoPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Calculator for AutoPaths {
    fn name(&self) -> &'static str {
        "auto_paths"
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
                .find(AUTO_PIM, &Filter::all())
                .await?
                .iter()
                .filter_map(model::team_number)
                .collect()
        } else {
            batch.affected(model::team_number)
        };
        let schema = &ctx.schemas.auto_paths;
        let key_fields = ctx.schemas.collections.key(OUTPUT)?;

        let mut total_paths = 0;
        for team in &teams {
            let team_filter = Filter::all().eq("team_number", team.as_str());
            let mut pims = ctx.store.find(AUTO_PIM, &team_filter).await?;
            pims.sort_by_key(|p| model::match_number(p).unwrap_or(i64::MAX));
            let built = build_paths(&pims, schema);

            let mut kept = Vec::new();
            for path in &built.paths {
                kept.push(path_id(path));
                write_output(ctx.store, OUTPUT, key_fields, path.clone()).await?;
            }
            for existing in ctx.store.find(OUTPUT, &team_filter).await? {
                let id = path_id(&existing);
                if !kept.contains(&id) {
                    let stale = team_filter
                        .clone()
                        .eq("start_position", id.0.clone())
                        .eq("path_number", id.1.clone());
                    ctx.store.delete_many(OUTPUT, &stale).await?;
                }
            }

            for (match_number, index) in &built.assignments {
                let path = &built.paths[*index];
                let mut stamp = Document::new();
                for field in ["path_number", "match_numbers"] {
                    if let Some(value) = path.get(field) {
                        stamp.insert(field.to_string(), value.clone());
                    }
                }
                ctx.store
                    .update_fields(AUTO_PIM, &tim_filter(&(*match_number, team.clone())), stamp)
                    .await?;
            }

            let fractions = compatibility(&pims, schema);
            if !fractions.is_empty() {
                let updated = ctx.store.update_fields(OBJ_TEAM, &team_filter, fractions).await?;
                if updated == 0 {
                    warn!(team_number = %team, "No team record for compatibility fractions");
                }
            }
            total_paths += built.paths.len();
        }
        info!(teams = teams.len(), paths = total_paths, "Updated autonomous paths");
        self.base.commit(&batch);
        Ok(())
    }
}

fn path_id(path: &Document) -> (Value, Value) {
    (
        path.get("start_position").cloned().unwrap_or(Value::Null),
        path.get("path_number").cloned().unwrap_or(Value::Null),
    )
}

/// Classifies one team's routines, in the given order, into paths.
pub fn build_paths(pims: &[Document], schema: &AutoPathsSchema) -> TeamPaths {
    let mut built = TeamPaths::default();
    for pim in pims {
        let Some(match_number) = model::match_number(pim) else {
            continue;
        };
        if schema.group_by.iter().any(|f| pim.get(f).is_none_or(Value::is_null)) {
            warn!(match_number, "Routine lacks grouping fields, not clustered");
            continue;
        }
        let same_group = |path: &Document| {
            schema
                .group_by
                .iter()
                .all(|f| field_equal(path, pim, f))
        };
        let found = built
            .paths
            .iter()
            .position(|path| same_group(path) && is_same_path(pim, path, schema));
        let index = match found {
            Some(index) => {
                update_path(&mut built.paths[index], pim, schema);
                index
            }
            None => {
                let number = built.paths.iter().filter(|p| same_group(*p)).count() + 1;
                built.paths.push(new_path(pim, number, schema));
                built.paths.len() - 1
            }
        };
        built.assignments.push((match_number, index));
    }
    built
}

fn field(doc: &Document, name: &str) -> Value {
    doc.get(name).cloned().unwrap_or(Value::Null)
}

fn field_equal(a: &Document, b: &Document, name: &str) -> bool {
    values_equal(&field(a, name), &field(b, name))
}

/// Exact fields match pointwise; each unexact field needs one value-set
/// holding both the routine's and the path's value.
pub fn is_same_path(pim: &Document, path: &Document, schema: &AutoPathsSchema) -> bool {
    let exact = schema.exact.iter().all(|f| field_equal(pim, path, f));
    exact
        && schema.unexact.iter().all(|(name, sets)| {
            let (ours, theirs) = (field(pim, name), field(path, name));
            sets.iter().any(|set| {
                set.iter().any(|v| values_equal(v, &ours)) && set.iter().any(|v| values_equal(v, &theirs))
            })
        })
}

/// Every condition set holds against `target`; `-name` values resolve in `candidate`.
fn conditions_hold(sets: &[ConditionSet], target: &Document, candidate: &Document) -> bool {
    sets.iter().all(|set| {
        set.iter().all(|(name, allowed)| {
            let actual = field(target, name);
            allowed.iter().any(|v| {
                let resolved = match v.as_str().and_then(|s| s.strip_prefix('-')) {
                    Some(reference) => field(candidate, reference),
                    None => v.clone(),
                };
                values_equal(&actual, &resolved)
            })
        })
    })
}

fn new_path(pim: &Document, number: usize, schema: &AutoPathsSchema) -> Document {
    let mut path = Document::new();
    let carried = schema
        .group_by
        .iter()
        .chain(&schema.exact)
        .chain(schema.unexact.keys())
        .chain(schema.max.keys())
        .chain(&schema.backfill);
    for name in carried {
        path.insert(name.clone(), field(pim, name));
    }
    path.insert("path_number".into(), Value::from(number));
    for (counter, sets) in &schema.increment {
        let start = u64::from(conditions_hold(sets, &path, pim));
        path.insert(counter.clone(), Value::from(start));
    }
    if let Some(match_number) = model::match_number(pim) {
        path.insert("match_numbers".into(), Value::Array(vec![Value::from(match_number)]));
    }
    path.insert("matches_ran".into(), Value::from(1));
    path
}

fn rank(order: &[Value], value: &Value) -> Option<usize> {
    order.iter().position(|v| values_equal(v, value))
}

fn update_path(path: &mut Document, pim: &Document, schema: &AutoPathsSchema) {
    for name in &schema.exact {
        path.insert(name.clone(), field(pim, name));
    }
    for (name, max) in &schema.max {
        let ours = field(pim, name);
        if rank(&max.order, &ours) > rank(&max.order, &field(path, name)) {
            path.insert(name.clone(), ours);
            for counter in &max.resets {
                path.insert(counter.clone(), Value::from(0));
            }
        }
    }
    for (counter, sets) in &schema.increment {
        if conditions_hold(sets, path, pim) {
            let count = path.get(counter).and_then(Value::as_u64).unwrap_or(0);
            path.insert(counter.clone(), Value::from(count + 1));
        }
    }
    for name in &schema.backfill {
        let ours = field(pim, name);
        if !ours.is_null() {
            path.insert(name.clone(), ours);
        }
    }

    let mut match_numbers = path
        .get("match_numbers")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if let Some(match_number) = model::match_number(pim) {
        match_numbers.push(Value::from(match_number));
    }
    path.insert("matches_ran".into(), Value::from(match_numbers.len()));
    path.insert("match_numbers".into(), Value::Array(match_numbers));
}

/// Fraction of eligible routines meeting each success rule, 0 with none eligible.
pub fn compatibility(pims: &[Document], schema: &AutoPathsSchema) -> Document {
    let mut fractions = Document::new();
    for (name, rule) in &schema.compatibility {
        let eligible: Vec<&Document> = pims
            .iter()
            .filter(|p| conditions_hold(&rule.eligible, p, p))
            .collect();
        let successes = eligible
            .iter()
            .filter(|p| conditions_hold(&rule.success, p, p))
            .count();
        let fraction = if eligible.is_empty() {
            0.0
        } else {
            successes as f64 / eligible.len() as f64
        };
        fractions.insert(name.clone(), Value::from(super::utility::round2(fraction)));
    }
    fractions
}
