//! Trait and types for the external match-data service.

use crate::model::{Alliance, strip_team_key};
use crate::store::Document;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One alliance as listed on a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TbaAlliance {
    pub team_keys: Vec<String>,
    /// `-1` until the match is played.
    #[serde(default = "unplayed")]
    pub score: i64,
}

fn unplayed() -> i64 {
    -1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TbaMatch {
    pub key: String,
    pub comp_level: String,
    pub match_number: i64,
    #[serde(default)]
    pub set_number: i64,
    pub alliances: BTreeMap<String, TbaAlliance>,
    #[serde(default)]
    pub winning_alliance: String,
    #[serde(default)]
    pub score_breakdown: Option<BTreeMap<String, Document>>,
}

impl TbaMatch {
    pub fn is_qualification(&self) -> bool {
        self.comp_level == "qm"
    }

    /// Team numbers of one alliance, `frc` stripped, in driver-station order.
    pub fn teams(&self, alliance: Alliance) -> Vec<String> {
        self.alliances
            .get(alliance.as_str())
            .map(|a| {
                a.team_keys
                    .iter()
                    .map(|k| strip_team_key(k).to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Alliance the team played on, with its 1-based driver station.
    pub fn position_of(&self, team: &str) -> Option<(Alliance, usize)> {
        Alliance::BOTH.into_iter().find_map(|alliance| {
            self.teams(alliance)
                .iter()
                .position(|t| t == team)
                .map(|i| (alliance, i + 1))
        })
    }

    pub fn breakdown(&self, alliance: Alliance) -> Option<&Document> {
        self.score_breakdown.as_ref()?.get(alliance.as_str())
    }

    pub fn has_breakdown(&self) -> bool {
        self.score_breakdown.is_some()
    }

    pub fn score(&self, alliance: Alliance) -> Option<i64> {
        self.alliances
            .get(alliance.as_str())
            .map(|a| a.score)
            .filter(|s| *s >= 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub team_key: String,
    pub rank: i64,
    #[serde(default)]
    pub matches_played: i64,
    #[serde(default)]
    pub sort_orders: Vec<f64>,
    #[serde(default)]
    pub extra_stats: Vec<f64>,
}

impl Ranking {
    pub fn team_number(&self) -> &str {
        strip_team_key(&self.team_key)
    }

    /// Average ranking points (first sort order).
    pub fn average_rps(&self) -> f64 {
        self.sort_orders.first().copied().unwrap_or(0.0)
    }

    /// Total ranking points, derived from the average when not listed.
    pub fn total_rps(&self) -> f64 {
        self.extra_stats
            .first()
            .copied()
            .unwrap_or_else(|| self.average_rps() * self.matches_played as f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventRankings {
    pub rankings: Vec<Ranking>,
}

/// A playoff alliance: captain first, then picks in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayoffAlliance {
    #[serde(default)]
    pub name: Option<String>,
    pub picks: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventOprs {
    #[serde(default)]
    pub oprs: BTreeMap<String, f64>,
    #[serde(default)]
    pub dprs: BTreeMap<String, f64>,
    #[serde(default)]
    pub ccwms: BTreeMap<String, f64>,
}

/// Read-only access to one event on the match-data service.
///
/// A `None` means the service had no data or could not be reached; callers
/// skip the dependent unit of work and try again next cycle.
#[async_trait]
pub trait MatchDataApi: Send + Sync {
    async fn event_matches(&self) -> Option<Vec<TbaMatch>>;

    async fn event_teams(&self) -> Option<Vec<String>>;

    async fn event_rankings(&self) -> Option<EventRankings>;

    async fn event_alliances(&self) -> Option<Vec<PlayoffAlliance>>;

    async fn event_oprs(&self) -> Option<EventOprs>;
}
