//! Runs the calculators once per cycle in their fixed order.

use crate::calculations::{Calculator, PipelineContext};
use crate::error::Result;
use crate::output::{Outcome, TimingRecord, append_record};
use crate::store::{DocumentStore, Filter};
use chrono::Utc;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{Instrument, error, info, info_span, warn};

/// What happened to each calculator in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub outcomes: Vec<(&'static str, Outcome)>,
}

impl CycleReport {
    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == Outcome::Skipped)
            .count()
    }
}

pub struct Orchestrator {
    calculators: Vec<Box<dyn Calculator>>,
    cycle: u64,
    timings: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(calculators: Vec<Box<dyn Calculator>>) -> Self {
        Self {
            calculators,
            cycle: 0,
            timings: None,
        }
    }

    /// Appends one CSV row per calculator run to `path`.
    pub fn with_timings(mut self, path: Option<PathBuf>) -> Self {
        self.timings = path;
        self
    }

    pub fn calculator_names(&self) -> Vec<&'static str> {
        self.calculators.iter().map(|c| c.name()).collect()
    }

    /// Deletes every output collection and forgets every calculator's
    /// position in the change log, so the next cycle regenerates everything.
    pub async fn rebuild(&mut self, store: &dyn DocumentStore) -> Result<()> {
        for calculator in &mut self.calculators {
            for collection in calculator.output_collections() {
                let removed = store.delete_many(collection, &Filter::all()).await?;
                info!(collection, removed, "Cleared output collection");
            }
            calculator.reset();
        }
        Ok(())
    }

    /// Runs every calculator once.
    ///
    /// A fatal error stops the cycle and is returned. Any other error is
    /// logged, the calculator keeps its change-log position, and the cycle
    /// moves on to the next calculator.
    pub async fn run_cycle(&mut self, ctx: &PipelineContext<'_>) -> Result<CycleReport> {
        self.cycle += 1;
        let cycle = self.cycle;
        let mut outcomes = Vec::with_capacity(self.calculators.len());

        for calculator in &mut self.calculators {
            let name = calculator.name();
            let span = info_span!("calculator", name, cycle);
            let started_at = Utc::now();
            let timer = Instant::now();
            let result = calculator.run(ctx).instrument(span).await;
            let elapsed_ms = timer.elapsed().as_millis() as u64;

            let outcome = match &result {
                Ok(()) => {
                    info!(calculator = name, elapsed_ms, "Calculator finished");
                    Outcome::Ok
                }
                Err(e) if e.is_fatal() => {
                    error!(calculator = name, elapsed_ms, error = ?e, "Fatal error, aborting cycle");
                    Outcome::Aborted
                }
                Err(e) => {
                    warn!(calculator = name, elapsed_ms, error = %e, "Calculator skipped");
                    Outcome::Skipped
                }
            };

            if let Some(path) = &self.timings {
                let record = TimingRecord {
                    cycle,
                    calculator: name.to_string(),
                    started_at,
                    elapsed_ms,
                    outcome,
                };
                if let Err(e) = append_record(path, &record) {
                    warn!(path = %path.display(), error = %e, "Could not append timing record");
                }
            }

            outcomes.push((name, outcome));
            if outcome == Outcome::Aborted {
                result?;
            }
        }
        Ok(CycleReport { cycle, outcomes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::tba::StaticMatchData;
    use crate::test_support::{coefficients, context, doc, schemas, store};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Records its runs; fails once with the preset error.
    struct Stub {
        name: &'static str,
        fail: Option<Error>,
        runs: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Calculator for Stub {
        fn name(&self) -> &'static str {
            self.name
        }

        fn output_collections(&self) -> &[&'static str] {
            &["obj_tim"]
        }

        fn reset(&mut self) {}

        async fn run(&mut self, _ctx: &PipelineContext<'_>) -> Result<()> {
            self.runs.lock().unwrap().push(self.name);
            match self.fail.take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    fn stub(
        name: &'static str,
        fail: Option<Error>,
        runs: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Box<dyn Calculator> {
        Box::new(Stub {
            name,
            fail,
            runs: Arc::clone(runs),
        })
    }

    #[tokio::test]
    async fn test_non_fatal_errors_are_swallowed() {
        let schemas = schemas();
        let coefficients = coefficients();
        let store = store(&schemas);
        let offline = StaticMatchData::new();
        let ctx = context(&store, &offline, &schemas, &coefficients);
        let runs = Arc::new(Mutex::new(Vec::new()));
        let mut orchestrator = Orchestrator::new(vec![
            stub("first", Some(Error::MissingInput("x".into())), &runs),
            stub("second", None, &runs),
        ]);

        let report = orchestrator.run_cycle(&ctx).await.unwrap();
        assert_eq!(report.cycle, 1);
        assert_eq!(
            report.outcomes,
            vec![("first", Outcome::Skipped), ("second", Outcome::Ok)]
        );
        assert_eq!(report.skipped(), 1);
        assert_eq!(*runs.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_cycle() {
        let schemas = schemas();
        let coefficients = coefficients();
        let store = store(&schemas);
        let offline = StaticMatchData::new();
        let ctx = context(&store, &offline, &schemas, &coefficients);
        let runs = Arc::new(Mutex::new(Vec::new()));
        let mut orchestrator = Orchestrator::new(vec![
            stub("first", Some(Error::type_mismatch("auto_speaker", "int", "str")), &runs),
            stub("second", None, &runs),
        ]);

        let err = orchestrator.run_cycle(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        assert_eq!(*runs.lock().unwrap(), vec!["first"]);
    }

    #[tokio::test]
    async fn test_rebuild_clears_outputs() {
        let schemas = schemas();
        let store = store(&schemas);
        store
            .insert_many("obj_tim", vec![doc(json!({"match_number": 1, "team_number": "254"}))])
            .await
            .unwrap();
        let runs = Arc::new(Mutex::new(Vec::new()));
        let mut orchestrator = Orchestrator::new(vec![stub("only", None, &runs)]);
        orchestrator.rebuild(&store).await.unwrap();
        assert!(store.find("obj_tim", &Filter::all()).await.unwrap().is_empty());
        assert_eq!(orchestrator.calculator_names(), vec!["only"]);
    }

    #[tokio::test]
    async fn test_timing_ledger_rows() {
        let schemas = schemas();
        let coefficients = coefficients();
        let store = store(&schemas);
        let offline = StaticMatchData::new();
        let ctx = context(&store, &offline, &schemas, &coefficients);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timings.csv");
        let runs = Arc::new(Mutex::new(Vec::new()));
        let mut orchestrator = Orchestrator::new(vec![stub("a", None, &runs), stub("b", None, &runs)])
            .with_timings(Some(path.clone()));

        orchestrator.run_cycle(&ctx).await.unwrap();
        orchestrator.run_cycle(&ctx).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 5);
        assert!(content.lines().last().unwrap().starts_with("2,b,"));
    }
}
