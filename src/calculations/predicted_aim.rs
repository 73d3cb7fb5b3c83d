//! Alliance-in-match predictions from team aggregates and the regression
//! coefficients, reconciled against played matches, plus playoff alliances.

use super::base::{Calculator, PipelineContext, remove_stale, write_output};
use super::obj_team::OUTPUT as OBJ_TEAM;
use super::utility::{mean, round2};
use crate::error::{Error, Result};
use crate::model::{self, Alliance, get_f64, value_as_f64};
use crate::schema::predictions::{
    Actual, FeatureMethod, FeatureSource, ModelType, PredictionsSchema,
};
use crate::schema::Coefficients;
use crate::store::{Document, Filter};
use crate::tba::{EventOprs, EventRankings, PlayoffAlliance, TbaMatch};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

pub const OUTPUT: &str = "predicted_aim";
pub const ALLIANCES_OUTPUT: &str = "predicted_alliances";

type Values = BTreeMap<String, f64>;

/// Per-team documents a feature can read from.
#[derive(Debug, Clone, Default)]
pub struct FeatureSources {
    pub obj_team: BTreeMap<String, Document>,
    pub tba_team: BTreeMap<String, Document>,
}

impl FeatureSources {
    fn get(&self, source: FeatureSource, team: &str) -> Option<&Document> {
        match source {
            FeatureSource::ObjTeam => self.obj_team.get(team),
            FeatureSource::TbaTeam => self.tba_team.get(team),
        }
    }
}

/// Per-team view of the match-data service's OPRs and rankings.
pub fn tba_team_view(
    oprs: Option<&EventOprs>,
    rankings: Option<&EventRankings>,
) -> BTreeMap<String, Document> {
    let mut view: BTreeMap<String, Document> = BTreeMap::new();
    if let Some(oprs) = oprs {
        for (field, values) in [("opr", &oprs.oprs), ("dpr", &oprs.dprs), ("ccwm", &oprs.ccwms)] {
            for (team_key, value) in values {
                let team = model::strip_team_key(team_key).to_string();
                view.entry(team).or_default().insert(field.into(), Value::from(*value));
            }
        }
    }
    if let Some(rankings) = rankings {
        for ranking in &rankings.rankings {
            let doc = view.entry(ranking.team_number().to_string()).or_default();
            doc.insert("rank".into(), Value::from(ranking.rank));
            doc.insert("matches_played".into(), Value::from(ranking.matches_played));
            doc.insert("average_rps".into(), Value::from(ranking.average_rps()));
        }
    }
    view
}

/// Runs every cycle: the schedule and results come from the match-data service.
#[derive(Debug, Default)]
pub struct PredictedAim;

impl PredictedAim {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Calculator for PredictedAim {
    fn name(&self) -> &'static str {
        "predicted_aim"
    }

    fn output_collections(&self) -> &[&'static str] {
        &[OUTPUT, ALLIANCES_OUTPUT]
    }

    fn reset(&mut self) {}

    async fn run(&mut self, ctx: &PipelineContext<'_>) -> Result<()> {
        let Some(matches) = ctx.match_data.event_matches().await else {
            warn!("No match data available, skipping predictions");
            return Ok(());
        };
        let oprs = ctx.match_data.event_oprs().await;
        let rankings = ctx.match_data.event_rankings().await;
        let sources = FeatureSources {
            obj_team: ctx
                .store
                .find(OBJ_TEAM, &Filter::all())
                .await?
                .into_iter()
                .filter_map(|doc| Some((model::team_number(&doc)?, doc)))
                .collect(),
            tba_team: tba_team_view(oprs.as_ref(), rankings.as_ref()),
        };
        let schema = &ctx.schemas.predictions;

        let mut docs = Vec::new();
        for m in matches.iter().filter(|m| m.is_qualification()) {
            docs.extend(predict_match(m, &sources, schema, ctx.coefficients)?);
        }
        let key_fields = ctx.schemas.collections.key(OUTPUT)?;
        let removed = remove_stale(ctx.store, OUTPUT, key_fields, &docs).await?;
        let mut written = 0;
        for doc in docs.iter().cloned() {
            if write_output(ctx.store, OUTPUT, key_fields, doc).await? {
                written += 1;
            }
        }
        info!(alliances = docs.len(), written, removed, "Updated alliance predictions");

        let Some(alliances) = ctx.match_data.event_alliances().await else {
            return Ok(());
        };
        let playoff = predict_playoff_alliances(&alliances, &sources, schema, ctx.coefficients)?;
        let key_fields = ctx.schemas.collections.key(ALLIANCES_OUTPUT)?;
        let removed = remove_stale(ctx.store, ALLIANCES_OUTPUT, key_fields, &playoff).await?;
        let mut written = 0;
        for doc in playoff.iter().cloned() {
            if write_output(ctx.store, ALLIANCES_OUTPUT, key_fields, doc).await? {
                written += 1;
            }
        }
        info!(alliances = playoff.len(), written, removed, "Updated playoff alliance predictions");
        Ok(())
    }
}

/// Both alliance documents of one qualification match, or none when either
/// alliance is missing a member's feature source.
pub fn predict_match(
    m: &TbaMatch,
    sources: &FeatureSources,
    schema: &PredictionsSchema,
    coefficients: &Coefficients,
) -> Result<Vec<Document>> {
    let mut base: BTreeMap<Alliance, Values> = BTreeMap::new();
    for alliance in Alliance::BOTH {
        let teams = m.teams(alliance);
        match alliance_features(&teams, sources, schema) {
            Ok(values) => {
                base.insert(alliance, values);
            }
            Err(missing) => {
                warn!(
                    match_number = m.match_number,
                    alliance = alliance.as_str(),
                    %missing,
                    "Missing feature source, skipping match prediction"
                );
                return Ok(Vec::new());
            }
        }
    }

    // diff features need both sides
    let mut features: BTreeMap<Alliance, Values> = BTreeMap::new();
    for alliance in Alliance::BOTH {
        let mut values = base[&alliance].clone();
        let opponent = &base[&alliance.opponent()];
        for (name, feature) in &schema.features {
            if matches!(feature.method, FeatureMethod::Diff { .. }) {
                let own = values.get(name).copied().unwrap_or(0.0);
                values.insert(name.clone(), own - opponent.get(name).copied().unwrap_or(0.0));
            }
        }
        features.insert(alliance, values);
    }

    let mut predictions: BTreeMap<Alliance, Values> = BTreeMap::new();
    for alliance in Alliance::BOTH {
        let mut values = Values::new();
        for (name, prediction) in &schema.predictions {
            let value = evaluate(
                name,
                prediction.model_type,
                &prediction.features,
                &features[&alliance],
                coefficients,
            )?;
            if let Some(value) = value {
                values.insert(name.clone(), value);
            }
        }
        predictions.insert(alliance, values);
    }

    let mut joined: BTreeMap<Alliance, Values> = BTreeMap::new();
    for alliance in Alliance::BOTH {
        let own = &predictions[&alliance];
        let opponent = &predictions[&alliance.opponent()];
        let values = schema
            .joined_features
            .iter()
            .filter_map(|(name, jf)| {
                Some((name.clone(), own.get(&jf.prediction)? - opponent.get(&jf.prediction)?))
            })
            .collect();
        joined.insert(alliance, values);
    }
    for (name, prediction) in &schema.joined_predictions {
        let red = evaluate(name, prediction.model_type, &prediction.features, &joined[&Alliance::Red], coefficients)?;
        let blue = if prediction.complement {
            red.map(|p| 1.0 - p)
        } else {
            evaluate(name, prediction.model_type, &prediction.features, &joined[&Alliance::Blue], coefficients)?
        };
        for (alliance, value) in [(Alliance::Red, red), (Alliance::Blue, blue)] {
            if let (Some(value), Some(values)) = (value, predictions.get_mut(&alliance)) {
                values.insert(name.clone(), value);
            }
        }
    }

    let mut docs = Vec::new();
    for alliance in Alliance::BOTH {
        let mut doc = Document::new();
        doc.insert("match_number".into(), Value::from(m.match_number));
        doc.insert("alliance_color_is_red".into(), Value::Bool(alliance.is_red()));
        doc.insert("team_numbers".into(), Value::from(m.teams(alliance)));
        for side in Alliance::BOTH {
            let suffix = side.as_str();
            for (name, value) in features[&side].iter().chain(&joined[&side]) {
                doc.insert(format!("{name}_{suffix}"), Value::from(round2(*value)));
            }
        }
        for (name, value) in &predictions[&alliance] {
            doc.insert(name.clone(), Value::from(round2(*value)));
        }
        insert_actuals(&mut doc, m, alliance, schema);
        docs.push(doc);
    }
    Ok(docs)
}

fn insert_actuals(doc: &mut Document, m: &TbaMatch, alliance: Alliance, schema: &PredictionsSchema) {
    let breakdown = m.breakdown(alliance);
    for (name, actual) in &schema.actuals {
        let value = breakdown.and_then(|b| match actual {
            Actual::AllianceScore => m.score(alliance).map(|s| s as f64),
            Actual::Breakdown { key } => get_f64(b, key),
        });
        doc.insert(name.clone(), Value::from(value.unwrap_or(0.0)));
    }
    doc.insert("has_actual_data".into(), Value::Bool(breakdown.is_some()));
    let won = breakdown.is_some() && m.winning_alliance == alliance.as_str();
    doc.insert("won_match".into(), Value::Bool(won));
}

/// Collapses member-team values into alliance features. Diff features hold
/// the alliance's own sum until the opponent is known.
/// Returns the first member lacking a feature source.
fn alliance_features(
    teams: &[String],
    sources: &FeatureSources,
    schema: &PredictionsSchema,
) -> std::result::Result<Values, String> {
    if teams.is_empty() {
        return Err("alliance has no teams".into());
    }
    let mut values = Values::new();
    for (name, feature) in &schema.features {
        let mut members = Vec::with_capacity(teams.len());
        for team in teams {
            let doc = sources
                .get(feature.source, team)
                .ok_or_else(|| format!("{team} has no {:?} record", feature.source))?;
            members.push(doc);
        }
        let field = |field: &str| -> Vec<f64> {
            members.iter().map(|d| get_f64(d, field).unwrap_or(0.0)).collect()
        };
        let value = match &feature.method {
            FeatureMethod::Normal { field: f } => mean(&field(f)),
            FeatureMethod::Sum { field: f } | FeatureMethod::Diff { field: f } => field(f).iter().sum(),
            FeatureMethod::Rate {
                numerator,
                denominator,
            } => {
                let den: f64 = field(denominator).iter().sum();
                if den == 0.0 {
                    0.0
                } else {
                    field(numerator).iter().sum::<f64>() / den
                }
            }
            FeatureMethod::Bool { field: f } => {
                if field(f).iter().any(|v| *v > 0.0) { 1.0 } else { 0.0 }
            }
            FeatureMethod::Threshold {
                field: f,
                threshold,
            } => {
                if field(f).iter().sum::<f64>() >= *threshold { 1.0 } else { 0.0 }
            }
        };
        values.insert(name.clone(), value);
    }
    Ok(values)
}

/// `Σ wᵢ·xᵢ + intercept`, through the logistic function when declared.
/// `None` when one of the features has no value.
pub fn evaluate(
    prediction: &str,
    model_type: ModelType,
    features: &[String],
    values: &Values,
    coefficients: &Coefficients,
) -> Result<Option<f64>> {
    let weights = coefficients.for_prediction(prediction)?;
    let mut z = weights.get("intercept").copied().unwrap_or(0.0);
    for feature in features {
        let Some(x) = values.get(feature) else {
            return Ok(None);
        };
        let w = weights.get(feature).ok_or_else(|| {
            Error::Config(format!("no coefficient for {feature} in prediction {prediction}"))
        })?;
        z += w * x;
    }
    Ok(Some(match model_type {
        ModelType::Linear => z,
        ModelType::Logistic => 1.0 / (1.0 + (-z).exp()),
    }))
}

/// Every three-robot lineup of a playoff alliance: the captain with the first
/// two picks, plus the backup combinations when a fourth robot is listed.
pub fn lineups(picks: &[String]) -> Vec<Vec<String>> {
    match picks {
        [captain, first, second, third, ..] => vec![
            vec![captain.clone(), first.clone(), second.clone()],
            vec![captain.clone(), first.clone(), third.clone()],
            vec![captain.clone(), second.clone(), third.clone()],
        ],
        [_, _, _] => vec![picks.to_vec()],
        _ => Vec::new(),
    }
}

/// Playoff alliances have no fixed opponent: diff and joined values are left out.
pub fn predict_playoff_alliances(
    alliances: &[PlayoffAlliance],
    sources: &FeatureSources,
    schema: &PredictionsSchema,
    coefficients: &Coefficients,
) -> Result<Vec<Document>> {
    let mut docs = Vec::new();
    for (index, alliance) in alliances.iter().enumerate() {
        let alliance_num = index as i64 + 1;
        let picks: Vec<String> = alliance
            .picks
            .iter()
            .map(|k| model::strip_team_key(k).to_string())
            .collect();
        for lineup in lineups(&picks) {
            let mut features = match alliance_features(&lineup, sources, schema) {
                Ok(values) => values,
                Err(missing) => {
                    warn!(alliance_num, %missing, "Missing feature source, skipping playoff alliance");
                    continue;
                }
            };
            features.retain(|name, _| {
                !schema
                    .features
                    .get(name)
                    .is_some_and(|f| matches!(f.method, FeatureMethod::Diff { .. }))
            });
            let mut doc = Document::new();
            doc.insert("alliance_num".into(), Value::from(alliance_num));
            doc.insert("picks".into(), Value::from(lineup));
            for (name, value) in &features {
                doc.insert(name.clone(), Value::from(round2(*value)));
            }
            for (name, prediction) in &schema.predictions {
                let value = evaluate(name, prediction.model_type, &prediction.features, &features, coefficients)?;
                if let Some(value) = value {
                    doc.insert(name.clone(), Value::from(round2(value)));
                }
            }
            docs.push(doc);
        }
    }
    Ok(docs)
}

/// Predicted ranking points an alliance earns from one of its predictions.
pub fn predicted_rank_points(own: &Document, opponent: Option<&Document>, schema: &PredictionsSchema) -> f64 {
    let ranking = &schema.ranking;
    let bonus_rps: f64 = ranking
        .rank_point_predictions
        .iter()
        .filter_map(|name| own.get(name).and_then(value_as_f64))
        .sum();
    let score = |doc: &Document| get_f64(doc, &ranking.score_prediction);
    let result_rps = match (score(own), opponent.and_then(score)) {
        (Some(ours), Some(theirs)) if ours > theirs => ranking.win_bonus,
        (Some(ours), Some(theirs)) if ours == theirs => ranking.tie_bonus,
        _ => 0.0,
    };
    bonus_rps + result_rps
}
