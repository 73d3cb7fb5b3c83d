//! External match-data service: the read-only API the calculators consume,
//! an HTTP client with an ETag cache, and a static source for offline runs.

pub mod api;
mod client;
mod offline;

pub use api::{
    EventOprs, EventRankings, MatchDataApi, PlayoffAlliance, Ranking, TbaAlliance,
    TbaMatch,
};
pub use client::TbaClient;
pub use offline::StaticMatchData;
