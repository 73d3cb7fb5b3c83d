//! Predicted ranking-point averages and rank per team.

use super::base::{Calculator, PipelineContext, remove_stale, write_output};
use super::predicted_aim::{OUTPUT as PREDICTED_AIM, predicted_rank_points};
use super::utility::round2;
use crate::error::Result;
use crate::model::{self, Alliance, get_bool};
use crate::schema::PredictionsSchema;
use crate::store::{Document, Filter};
use crate::tba::{EventRankings, TbaMatch};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub const OUTPUT: &str = "predicted_team";

#[derive(Debug, Default)]
pub struct PredictedTeam;

impl PredictedTeam {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Calculator for PredictedTeam {
    fn name(&self) -> &'static str {
        "predicted_team"
    }

    fn output_collections(&self) -> &[&'static str] {
        &[OUTPUT]
    }

    fn reset(&mut self) {}

    async fn run(&mut self, ctx: &PipelineContext<'_>) -> Result<()> {
        let Some(matches) = ctx.match_data.event_matches().await else {
            warn!("No match data available, skipping team predictions");
            return Ok(());
        };
        let rankings = ctx.match_data.event_rankings().await;
        let aims: BTreeMap<(i64, bool), Document> = ctx
            .store
            .find(PREDICTED_AIM, &Filter::all())
            .await?
            .into_iter()
            .filter_map(|doc| {
                let key = (model::match_number(&doc)?, get_bool(&doc, "alliance_color_is_red")?);
                Some((key, doc))
            })
            .collect();

        let mut docs = calculate_teams(
            &matches,
            &aims,
            rankings.as_ref(),
            &ctx.schemas.predictions,
        );
        if let Some(roster) = roster(ctx).await {
            docs.retain(|doc| model::team_number(doc).is_some_and(|t| roster.contains(&t)));
        }
        let key_fields = ctx.schemas.collections.key(OUTPUT)?;
        let mut written = 0;
        for doc in docs.iter().cloned() {
            if write_output(ctx.store, OUTPUT, key_fields, doc).await? {
                written += 1;
            }
        }
        let removed = remove_stale(ctx.store, OUTPUT, key_fields, &docs).await?;
        info!(teams = docs.len(), written, removed, "Updated team predictions");
        Ok(())
    }
}

/// Teams to predict: the operator's teams list, else the event's team list.
async fn roster(ctx: &PipelineContext<'_>) -> Option<Vec<String>> {
    if let Some(teams) = ctx.teams {
        return Some(teams.to_vec());
    }
    let keys = ctx.match_data.event_teams().await?;
    Some(
        keys.iter()
            .map(|k| model::strip_team_key(k).to_string())
            .collect(),
    )
}

/// Predicted ranking points per team over its scheduled qualification
/// matches, ranked by descending average. Teams that have played every
/// scheduled match keep their current rank.
pub fn calculate_teams(
    matches: &[TbaMatch],
    aims: &BTreeMap<(i64, bool), Document>,
    rankings: Option<&EventRankings>,
    schema: &PredictionsSchema,
) -> Vec<Document> {
    // team -> (scheduled matches, predicted rps)
    let mut totals: BTreeMap<String, (i64, f64)> = BTreeMap::new();
    for m in matches.iter().filter(|m| m.is_qualification()) {
        for alliance in Alliance::BOTH {
            let own = aims.get(&(m.match_number, alliance.is_red()));
            let opponent = aims.get(&(m.match_number, alliance.opponent().is_red()));
            let rps = match own {
                Some(own) => predicted_rank_points(own, opponent, schema),
                None => {
                    debug!(
                        match_number = m.match_number,
                        alliance = alliance.as_str(),
                        "No alliance prediction"
                    );
                    0.0
                }
            };
            for team in m.teams(alliance) {
                let entry = totals.entry(team).or_default();
                entry.0 += 1;
                entry.1 += rps;
            }
        }
    }

    let current: BTreeMap<&str, _> = rankings
        .map(|r| r.rankings.iter().map(|rank| (rank.team_number(), rank)).collect())
        .unwrap_or_default();

    let mut ranked: Vec<(String, i64, f64)> = totals
        .into_iter()
        .map(|(team, (scheduled, rps))| (team, scheduled, rps / scheduled as f64))
        .collect();
    ranked.sort_by(|a, b| b.2.total_cmp(&a.2).then_with(|| a.0.cmp(&b.0)));

    ranked
        .into_iter()
        .enumerate()
        .map(|(index, (team, scheduled, average))| {
            let mut doc = Document::new();
            let mut rank = index as i64 + 1;
            if let Some(current) = current.get(team.as_str()) {
                if current.matches_played == scheduled {
                    rank = current.rank;
                }
                doc.insert("current_rank".into(), Value::from(current.rank));
                doc.insert("current_rps".into(), Value::from(round2(current.total_rps())));
                doc.insert("current_avg_rps".into(), Value::from(round2(current.average_rps())));
                doc.insert("matches_played".into(), Value::from(current.matches_played));
            }
            doc.insert("team_number".into(), Value::from(team));
            doc.insert("scheduled_matches".into(), Value::from(scheduled));
            doc.insert("predicted_rps".into(), Value::from(round2(average * scheduled as f64)));
            doc.insert("predicted_avg_rps".into(), Value::from(round2(average)));
            doc.insert("predicted_rank".into(), Value::from(rank));
            doc
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentStore;
    use crate::tba::{Ranking, StaticMatchData};
    use crate::test_support::{coefficients, context, doc, qual_match, schemas, store};
    use serde_json::json;

    #[test]
    fn test_average_and_rank() {
        let schemas = schemas();
        let matches = vec![
            qual_match(1, ["1", "2", "3"], ["4", "5", "6"], None),
            qual_match(2, ["1", "4", "5"], ["2", "3", "6"], None),
        ];
        let mut aims = BTreeMap::new();
        aims.insert((1, true), aim(60.0, 1.0));
        aims.insert((1, false), aim(30.0, 0.0));
        aims.insert((2, true), aim(40.0, 0.5));
        aims.insert((2, false), aim(40.0, 0.0));

        let docs = calculate_teams(&matches, &aims, None, &schemas.predictions);
        let by_team: BTreeMap<String, &Document> =
            docs.iter().map(|d| (model::team_number(d).unwrap(), d)).collect();
        // match 1 win (2 + 1), match 2 tie (1 + 0.5)
        assert_eq!(by_team["1"]["predicted_rps"], json!(4.5));
        assert_eq!(by_team["1"]["predicted_avg_rps"], json!(2.25));
        assert_eq!(by_team["1"]["predicted_rank"], json!(1));
        // match 1 loss, match 2 tie
        assert_eq!(by_team["6"]["predicted_avg_rps"], json!(0.5));
        assert_eq!(by_team["6"]["scheduled_matches"], json!(2));
        assert_eq!(docs.last().map(|d| d["team_number"].clone()), Some(json!("6")));
    }

    #[test]
    fn test_finished_teams_keep_current_rank() {
        let schemas = schemas();
        let matches = vec![qual_match(1, ["1", "2", "3"], ["4", "5", "6"], None)];
        let mut aims = BTreeMap::new();
        aims.insert((1, true), aim(60.0, 0.0));
        aims.insert((1, false), aim(30.0, 0.0));
        let rankings = EventRankings {
            rankings: vec![ranking("1", 5, 1), ranking("4", 1, 0)],
        };
        let docs = calculate_teams(&matches, &aims, Some(&rankings), &schemas.predictions);
        let find = |team: &str| docs.iter().find(|d| d["team_number"] == json!(team)).unwrap();
        assert_eq!(find("1")["predicted_rank"], json!(5));
        assert_eq!(find("1")["current_rank"], json!(5));
        // still has a match to play
        assert_eq!(find("4")["predicted_rank"], json!(4));
    }

    #[tokio::test]
    async fn test_run_respects_teams_list() {
        let schemas = schemas();
        let coefficients = coefficients();
        let store = store(&schemas);
        let offline = StaticMatchData::new()
            .with_matches(vec![qual_match(1, ["1", "2", "3"], ["4", "5", "6"], None)]);
        let teams = vec!["1".to_string(), "4".to_string()];
        let mut ctx = context(&store, &offline, &schemas, &coefficients);
        ctx.teams = Some(teams.as_slice());
        let mut calc = PredictedTeam::new();
        calc.run(&ctx).await.unwrap();
        let docs = store.find(OUTPUT, &Filter::all()).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| d["predicted_rps"] == json!(0.0)));
    }

    #[tokio::test]
    async fn test_teams_leaving_the_event_are_removed() {
        let schemas = schemas();
        let coefficients = coefficients();
        let store = store(&schemas);
        let schedule = vec![qual_match(1, ["1", "2", "3"], ["4", "5", "6"], None)];
        let all: Vec<String> = (1..=6).map(|t| format!("frc{t}")).collect();
        let offline = StaticMatchData::new()
            .with_matches(schedule.clone())
            .with_teams(all.clone());
        let ctx = context(&store, &offline, &schemas, &coefficients);
        let mut calc = PredictedTeam::new();
        calc.run(&ctx).await.unwrap();
        assert_eq!(store.find(OUTPUT, &Filter::all()).await.unwrap().len(), 6);

        let withdrawn = StaticMatchData::new()
            .with_matches(schedule)
            .with_teams(all[..5].to_vec());
        let ctx = context(&store, &withdrawn, &schemas, &coefficients);
        calc.run(&ctx).await.unwrap();
        let docs = store.find(OUTPUT, &Filter::all()).await.unwrap();
        assert_eq!(docs.len(), 5);
        assert!(docs.iter().all(|d| d["team_number"] != json!("6")));
    }

    fn aim(score: f64, melody: f64) -> Document {
        doc(json!({"predicted_score": score, "melody_rp_chance": melody, "ensemble_rp_chance": 0.0}))
    }

    fn ranking(team: &str, rank: i64, played: i64) -> Ranking {
        Ranking {
            team_key: format!("frc{team}"),
            rank,
            matches_played: played,
            sort_orders: vec![2.0],
            extra_stats: vec![],
        }
    }
}
