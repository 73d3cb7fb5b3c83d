//! Per-scout, per-match error against the match-data service's breakdown.
//!
//! For one alliance every combination of one scout per robot is scored as
//! `truth - Σ contributions`. A scout's alliance-average error is the mean over
//! the combinations containing them; their sim precision is the mean, over
//! those same combinations, of the partners' average error minus the
//! combination's own error.

use super::base::{BaseCalculator, Calculator, PipelineContext, write_output};
use super::unconsolidated_totals::OUTPUT as TOTALS;
use super::utility::{mean, round2};
use crate::error::Result;
use crate::model::{self, Alliance, get_f64};
use crate::schema::team::{SimCalculation, SimPrecisionSchema};
use crate::store::{Document, Filter};
use crate::tba::TbaMatch;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

pub const OUTPUT: &str = "sim_precision";

/// Errors of one scout within one alliance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoutError {
    pub alliance_error: f64,
    pub sim_precision: f64,
}

pub struct SimPrecision {
    base: BaseCalculator,
    /// Matches whose breakdown has already been folded in.
    scored: BTreeSet<i64>,
}

impl SimPrecision {
    pub fn new() -> Self {
        Self {
            base: BaseCalculator::new(&[TOTALS]),
            scored: BTreeSet::new(),
        }
    }
}

impl Default for SimPrecision {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Calculator for SimPrecision {
    fn name(&self) -> &'static str {
        "sim_precision"
    }

    fn output_collections(&self) -> &[&'static str] {
        &[OUTPUT]
    }

    fn reset(&mut self) {
        self.base.reset();
        self.scored.clear();
    }

    async fn run(&mut self, ctx: &PipelineContext<'_>) -> Result<()> {
        let batch = self.base.entries_since_last(ctx.store).await?;
        let Some(matches) = ctx.match_data.event_matches().await else {
            warn!("No match data available, skipping");
            return Ok(());
        };
        let changed = batch.affected(model::match_number);
        let key_fields = ctx.schemas.collections.key(OUTPUT)?;

        let mut written = 0;
        let mut scored = BTreeSet::new();
        for m in matches.iter().filter(|m| m.is_qualification() && m.has_breakdown()) {
            scored.insert(m.match_number);
            let stale = batch.full
                || changed.contains(&m.match_number)
                || !self.scored.contains(&m.match_number);
            if !stale {
                continue;
            }
            let totals = ctx
                .store
                .find(TOTALS, &Filter::all().eq("match_number", m.match_number))
                .await?;
            let docs = calculate_match(m, &totals, &ctx.schemas.sim_precision);

            let current: BTreeSet<String> = docs.iter().filter_map(model::scout_name).collect();
            for existing in ctx
                .store
                .find(OUTPUT, &Filter::all().eq("match_number", m.match_number))
                .await?
            {
                if let Some(scout) = model::scout_name(&existing).filter(|s| !current.contains(s)) {
                    let filter = Filter::all()
                        .eq("scout_name", scout.as_str())
                        .eq("match_number", m.match_number);
                    ctx.store.delete_many(OUTPUT, &filter).await?;
                }
            }
            for doc in docs {
                if write_output(ctx.store, OUTPUT, key_fields, doc).await? {
                    written += 1;
                }
            }
        }
        info!(matches = scored.len(), written, "Updated sim precision");
        self.scored = scored;
        self.base.commit(&batch);
        Ok(())
    }
}

/// Sim-precision records for every scout of one played match.
pub fn calculate_match(m: &TbaMatch, totals: &[Document], schema: &SimPrecisionSchema) -> Vec<Document> {
    let mut docs = Vec::new();
    for alliance in Alliance::BOTH {
        let Some(breakdown) = m.breakdown(alliance) else {
            continue;
        };
        let robots: Vec<Vec<&Document>> = m
            .teams(alliance)
            .iter()
            .map(|team| {
                totals
                    .iter()
                    .filter(|t| model::team_number(t).as_deref() == Some(team.as_str()))
                    .collect()
            })
            .collect();
        if robots.is_empty() || robots.iter().any(Vec::is_empty) {
            debug!(
                match_number = m.match_number,
                alliance = alliance.as_str(),
                "Alliance not fully scouted"
            );
            continue;
        }

        let mut per_scout: BTreeMap<String, Document> = BTreeMap::new();
        for (name, calc) in &schema.calculations {
            let truth = tba_total(breakdown, calc);
            let contributions: Vec<Vec<(String, f64)>> = robots
                .iter()
                .map(|records| {
                    records
                        .iter()
                        .filter_map(|r| Some((model::scout_name(r)?, contribution(r, calc))))
                        .collect()
                })
                .collect();
            for (scout, error) in alliance_errors(&contributions, truth) {
                per_scout
                    .entry(scout)
                    .or_default()
                    .insert(name.clone(), Value::from(round2(error.sim_precision)));
            }
        }

        for (scout, mut doc) in per_scout {
            let total: f64 = schema
                .calculations
                .keys()
                .filter_map(|name| doc.get(name).and_then(Value::as_f64))
                .sum();
            doc.insert(schema.total_field.clone(), Value::from(round2(total)));
            let team = robots
                .iter()
                .flatten()
                .find(|r| model::scout_name(r).as_deref() == Some(scout.as_str()))
                .and_then(|r| model::team_number(r));
            doc.insert("scout_name".into(), Value::from(scout));
            doc.insert("match_number".into(), Value::from(m.match_number));
            if let Some(team) = team {
                doc.insert("team_number".into(), Value::from(team));
            }
            doc.insert("alliance_color_is_red".into(), Value::Bool(alliance.is_red()));
            docs.push(doc);
        }
    }
    docs
}

fn tba_total(breakdown: &Document, calc: &SimCalculation) -> f64 {
    calc.tba_datapoints
        .iter()
        .filter_map(|key| get_f64(breakdown, key))
        .sum()
}

fn contribution(record: &Document, calc: &SimCalculation) -> f64 {
    calc.weights
        .iter()
        .map(|(field, weight)| weight * get_f64(record, field).unwrap_or(0.0))
        .sum()
}

/// Scores every one-scout-per-robot combination of an alliance against `truth`.
/// `robots[r]` lists `(scout, contribution)` for robot `r`.
pub fn alliance_errors(robots: &[Vec<(String, f64)>], truth: f64) -> BTreeMap<String, ScoutError> {
    // each combination picks one index per robot
    let mut combos: Vec<Vec<usize>> = vec![Vec::new()];
    for scouts in robots {
        combos = combos
            .into_iter()
            .flat_map(|combo| {
                (0..scouts.len()).map(move |i| {
                    let mut next = combo.clone();
                    next.push(i);
                    next
                })
            })
            .collect();
    }
    let errors: Vec<f64> = combos
        .iter()
        .map(|combo| {
            let sum: f64 = combo
                .iter()
                .enumerate()
                .map(|(robot, &i)| robots[robot][i].1)
                .sum();
            truth - sum
        })
        .collect();

    let containing = |robot: usize, i: usize| {
        combos
            .iter()
            .zip(&errors)
            .filter(move |(combo, _)| combo[robot] == i)
    };
    let average: Vec<Vec<f64>> = robots
        .iter()
        .enumerate()
        .map(|(robot, scouts)| {
            (0..scouts.len())
                .map(|i| mean(&containing(robot, i).map(|(_, e)| *e).collect::<Vec<_>>()))
                .collect()
        })
        .collect();

    let mut result = BTreeMap::new();
    for (robot, scouts) in robots.iter().enumerate() {
        for (i, (scout, _)) in scouts.iter().enumerate() {
            let differences: Vec<f64> = containing(robot, i)
                .map(|(combo, error)| {
                    let partners: Vec<f64> = combo
                        .iter()
                        .enumerate()
                        .filter(|(other, _)| *other != robot)
                        .map(|(other, &j)| average[other][j])
                        .collect();
                    mean(&partners) - error
                })
                .collect();
            result.insert(
                scout.clone(),
                ScoutError {
                    alliance_error: average[robot][i],
                    sim_precision: mean(&differences),
                },
            );
        }
    }
    result
}
