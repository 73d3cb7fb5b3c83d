//! The calculators, in pipeline order, and the machinery they share.

pub mod auto_paths;
pub mod auto_pim;
pub mod base;
pub mod obj_team;
pub mod obj_tim;
pub mod predicted_aim;
pub mod predicted_team;
pub mod reinsert;
pub mod scout_precision;
pub mod sim_precision;
pub mod tba_tim;
pub mod timeline;
pub mod unconsolidated_totals;
pub mod utility;

pub use base::{BaseCalculator, Calculator, ChangeBatch, PipelineContext};

/// Every calculator in the order a cycle runs them. AutoPaths runs after
/// ObjTeam so its compatibility columns land on existing team rows.
pub fn default_pipeline() -> Vec<Box<dyn Calculator>> {
    vec![
        Box::new(unconsolidated_totals::UnconsolidatedTotals::new()),
        Box::new(tba_tim::TbaTim::new()),
        Box::new(sim_precision::SimPrecision::new()),
        Box::new(obj_tim::ObjTim::new()),
        Box::new(auto_pim::AutoPim::new()),
        Box::new(obj_team::ObjTeam::new()),
        Box::new(auto_paths::AutoPaths::new()),
        Box::new(scout_precision::ScoutPrecision::new()),
        Box::new(predicted_aim::PredictedAim::new()),
        Box::new(predicted_team::PredictedTeam::new()),
        Box::new(reinsert::Reinsert::new()),
    ]
}
