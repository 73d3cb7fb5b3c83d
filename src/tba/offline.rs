use super::api::{EventOprs, EventRankings, MatchDataApi, PlayoffAlliance, TbaMatch};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::debug;

/// Match data served from memory, optionally loaded from a directory of JSON
/// files (`matches.json`, `teams.json`, `rankings.json`, `alliances.json`,
/// `oprs.json`). Absent files behave like an empty response from the service.
#[derive(Debug, Clone, Default)]
pub struct StaticMatchData {
    matches: Option<Vec<TbaMatch>>,
    teams: Option<Vec<String>>,
    rankings: Option<EventRankings>,
    alliances: Option<Vec<PlayoffAlliance>>,
    oprs: Option<EventOprs>,
}

impl StaticMatchData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_dir(dir: &Path) -> Result<Self> {
        Ok(Self {
            matches: read_optional(&dir.join("matches.json"))?,
            teams: read_optional(&dir.join("teams.json"))?,
            rankings: read_optional(&dir.join("rankings.json"))?,
            alliances: read_optional(&dir.join("alliances.json"))?,
            oprs: read_optional(&dir.join("oprs.json"))?,
        })
    }

    pub fn with_matches(mut self, matches: Vec<TbaMatch>) -> Self {
        self.matches = Some(matches);
        self
    }

    pub fn with_teams(mut self, teams: Vec<String>) -> Self {
        self.teams = Some(teams);
        self
    }

    pub fn with_rankings(mut self, rankings: EventRankings) -> Self {
        self.rankings = Some(rankings);
        self
    }

    pub fn with_alliances(mut self, alliances: Vec<PlayoffAlliance>) -> Self {
        self.alliances = Some(alliances);
        self
    }

    pub fn with_oprs(mut self, oprs: EventOprs) -> Self {
        self.oprs = Some(oprs);
        self
    }
}

fn read_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        debug!(path = %path.display(), "Offline match-data file absent");
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| Error::Config(format!("invalid match data {}: {e}", path.display())))
}

#[async_trait]
impl MatchDataApi for StaticMatchData {
    async fn event_matches(&self) -> Option<Vec<TbaMatch>> {
        self.matches.clone()
    }

    async fn event_teams(&self) -> Option<Vec<String>> {
        self.teams.clone()
    }

    async fn event_rankings(&self) -> Option<EventRankings> {
        self.rankings.clone()
    }

    async fn event_alliances(&self) -> Option<Vec<PlayoffAlliance>> {
        self.alliances.clone()
    }

    async fn event_oprs(&self) -> Option<EventOprs> {
        self.oprs.clone()
    }
}
