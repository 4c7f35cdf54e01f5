//! Pipeline State Machine
//!
//! Runs `Load → Transform → Train → Predict` one step at a time. A step only
//! starts once every artifact it consumes exists and holds at least one row,
//! and the run halts at the first failing step.

use crate::PipelineError;
use async_trait::async_trait;
use metrics::{counter, histogram};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// One stage of the pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PipelineStep {
    Load,
    Transform,
    Train,
    Predict,
}

impl PipelineStep {
    pub const ALL: [PipelineStep; 4] = [
        PipelineStep::Load,
        PipelineStep::Transform,
        PipelineStep::Train,
        PipelineStep::Predict,
    ];

    /// 1-based position as accepted by `--step`
    pub fn number(self) -> u8 {
        match self {
            PipelineStep::Load => 1,
            PipelineStep::Transform => 2,
            PipelineStep::Train => 3,
            PipelineStep::Predict => 4,
        }
    }

    pub fn from_number(number: u8) -> Option<Self> {
        Self::ALL.get(usize::from(number).checked_sub(1)?).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            PipelineStep::Load => "load",
            PipelineStep::Transform => "transform",
            PipelineStep::Train => "train",
            PipelineStep::Predict => "predict",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            PipelineStep::Load => "Load bank transactions",
            PipelineStep::Transform => "Transform bank features",
            PipelineStep::Train => "Train fraud detection model",
            PipelineStep::Predict => "Score transactions and store predictions",
        }
    }

    /// Artifacts that must exist and be non-empty before the step runs
    pub fn inputs(self) -> &'static [Artifact] {
        match self {
            PipelineStep::Load => &[],
            PipelineStep::Transform => &[Artifact::RawTransactions],
            PipelineStep::Train => &[Artifact::FeatureTable],
            PipelineStep::Predict => &[Artifact::ModelArtifact, Artifact::FeatureTable],
        }
    }

    pub fn output(self) -> Artifact {
        match self {
            PipelineStep::Load => Artifact::RawTransactions,
            PipelineStep::Transform => Artifact::FeatureTable,
            PipelineStep::Train => Artifact::ModelArtifact,
            PipelineStep::Predict => Artifact::Predictions,
        }
    }

    fn index(self) -> usize {
        usize::from(self.number() - 1)
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({})", self.number(), self.name())
    }
}

/// Data handed from one step to the next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    RawTransactions,
    FeatureTable,
    ModelArtifact,
    Predictions,
}

impl Artifact {
    pub fn as_str(self) -> &'static str {
        match self {
            Artifact::RawTransactions => "raw transactions",
            Artifact::FeatureTable => "feature table",
            Artifact::ModelArtifact => "model artifact",
            Artifact::Predictions => "predictions",
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `--step` argument: a single step or the whole pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSelector {
    One(PipelineStep),
    All,
}

impl StepSelector {
    pub fn steps(self) -> Vec<PipelineStep> {
        match self {
            StepSelector::One(step) => vec![step],
            StepSelector::All => PipelineStep::ALL.to_vec(),
        }
    }
}

impl FromStr for StepSelector {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(StepSelector::All);
        }
        s.parse::<u8>()
            .ok()
            .and_then(PipelineStep::from_number)
            .map(StepSelector::One)
            .ok_or_else(|| PipelineError::InvalidStep(s.to_string()))
    }
}

/// Row counts reported by a stage implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageOutcome {
    pub rows_processed: u64,
    pub rows_skipped: u64,
}

/// Result of a completed step
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub step: PipelineStep,
    pub rows_processed: u64,
    pub rows_skipped: u64,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum StepState {
    #[default]
    Pending,
    Running,
    Completed(StepReport),
    Failed(String),
}

/// Executes the work behind each step and inspects the artifacts between them
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Row count of an artifact; zero when it does not exist
    async fn artifact_rows(&self, artifact: Artifact) -> Result<u64, PipelineError>;

    async fn execute(&self, step: PipelineStep) -> Result<StageOutcome, PipelineError>;
}

/// Drives a [`StageRunner`] through the pipeline steps
pub struct Orchestrator<R> {
    runner: R,
    states: [StepState; 4],
}

impl<R: StageRunner> Orchestrator<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            states: Default::default(),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn state(&self, step: PipelineStep) -> &StepState {
        &self.states[step.index()]
    }

    /// Run the selected steps in order, stopping at the first failure
    pub async fn run(&mut self, selector: StepSelector) -> Result<Vec<StepReport>, PipelineError> {
        self.states = Default::default();
        let steps = selector.steps();
        info!(steps = steps.len(), "Starting fraud detection pipeline");
        let started = Instant::now();

        let mut reports = Vec::with_capacity(steps.len());
        for step in steps {
            reports.push(self.run_step(step).await?);
        }

        info!(
            steps = reports.len(),
            elapsed_s = started.elapsed().as_secs_f64(),
            "Pipeline completed"
        );
        Ok(reports)
    }

    /// Run one step after checking its declared inputs
    pub async fn run_step(&mut self, step: PipelineStep) -> Result<StepReport, PipelineError> {
        self.states[step.index()] = StepState::Running;
        info!(step = step.number(), name = step.name(), "Starting {}", step.description());
        let started = Instant::now();

        let outcome = match self.check_inputs(step).await {
            Ok(()) => self.runner.execute(step).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(outcome) => {
                let report = StepReport {
                    step,
                    rows_processed: outcome.rows_processed,
                    rows_skipped: outcome.rows_skipped,
                    duration: started.elapsed(),
                };
                counter!("pipeline_rows_processed", "step" => step.name())
                    .increment(report.rows_processed);
                counter!("pipeline_rows_skipped", "step" => step.name())
                    .increment(report.rows_skipped);
                histogram!("pipeline_step_duration_seconds", "step" => step.name())
                    .record(report.duration.as_secs_f64());
                info!(
                    step = step.number(),
                    name = step.name(),
                    rows = report.rows_processed,
                    skipped = report.rows_skipped,
                    elapsed_s = report.duration.as_secs_f64(),
                    "Completed {}",
                    step.description()
                );
                self.states[step.index()] = StepState::Completed(report.clone());
                Ok(report)
            }
            Err(e) => {
                error!(step = step.number(), name = step.name(), error = %e, "Step failed");
                self.states[step.index()] = StepState::Failed(e.to_string());
                Err(match e {
                    PipelineError::MissingArtifact { .. } | PipelineError::Step { .. } => e,
                    source => PipelineError::Step {
                        step,
                        source: Box::new(source),
                    },
                })
            }
        }
    }

    async fn check_inputs(&self, step: PipelineStep) -> Result<(), PipelineError> {
        for &artifact in step.inputs() {
            if self.runner.artifact_rows(artifact).await? == 0 {
                return Err(PipelineError::MissingArtifact { step, artifact });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Produces a fixed row count per step and records what ran
    #[derive(Default)]
    struct FakeRunner {
        rows: Mutex<HashMap<Artifact, u64>>,
        executed: Mutex<Vec<PipelineStep>>,
        fail_on: Option<PipelineStep>,
    }

    #[async_trait]
    impl StageRunner for FakeRunner {
        async fn artifact_rows(&self, artifact: Artifact) -> Result<u64, PipelineError> {
            Ok(self.rows.lock().unwrap().get(&artifact).copied().unwrap_or(0))
        }

        async fn execute(&self, step: PipelineStep) -> Result<StageOutcome, PipelineError> {
            self.executed.lock().unwrap().push(step);
            if self.fail_on == Some(step) {
                return Err(PipelineError::InvalidStep("boom".to_string()));
            }
            self.rows.lock().unwrap().insert(step.output(), 10);
            Ok(StageOutcome {
                rows_processed: 10,
                rows_skipped: u64::from(step == PipelineStep::Transform),
            })
        }
    }

    #[test]
    fn test_selector_parsing() {
        assert_eq!("all".parse::<StepSelector>().unwrap(), StepSelector::All);
        assert_eq!("ALL".parse::<StepSelector>().unwrap(), StepSelector::All);
        assert_eq!(
            "3".parse::<StepSelector>().unwrap(),
            StepSelector::One(PipelineStep::Train)
        );
        for bad in ["0", "5", "-1", "train", ""] {
            assert!(matches!(
                bad.parse::<StepSelector>(),
                Err(PipelineError::InvalidStep(_))
            ));
        }
    }

    #[test]
    fn test_step_numbering() {
        for step in PipelineStep::ALL {
            assert_eq!(PipelineStep::from_number(step.number()), Some(step));
        }
        assert_eq!(PipelineStep::Predict.to_string(), "step 4 (predict)");
    }

    #[tokio::test]
    async fn test_full_run() {
        let mut orchestrator = Orchestrator::new(FakeRunner::default());
        let reports = orchestrator.run(StepSelector::All).await.unwrap();

        assert_eq!(
            reports.iter().map(|r| r.step).collect::<Vec<_>>(),
            PipelineStep::ALL.to_vec()
        );
        assert_eq!(reports[1].rows_skipped, 1);
        for step in PipelineStep::ALL {
            assert!(matches!(orchestrator.state(step), StepState::Completed(_)));
        }
    }

    #[tokio::test]
    async fn test_missing_upstream_artifact_halts() {
        let mut orchestrator = Orchestrator::new(FakeRunner::default());
        let err = orchestrator
            .run(StepSelector::One(PipelineStep::Train))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::MissingArtifact {
                step: PipelineStep::Train,
                artifact: Artifact::FeatureTable
            }
        ));
        assert!(orchestrator.runner().executed.lock().unwrap().is_empty());
        assert!(matches!(
            orchestrator.state(PipelineStep::Train),
            StepState::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_predict_needs_model_and_features() {
        let runner = FakeRunner::default();
        runner.rows.lock().unwrap().insert(Artifact::FeatureTable, 5);
        let mut orchestrator = Orchestrator::new(runner);

        let err = orchestrator.run_step(PipelineStep::Predict).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingArtifact {
                artifact: Artifact::ModelArtifact,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failure_stops_later_steps() {
        let runner = FakeRunner {
            fail_on: Some(PipelineStep::Transform),
            ..Default::default()
        };
        let mut orchestrator = Orchestrator::new(runner);
        let err = orchestrator.run(StepSelector::All).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Step {
                step: PipelineStep::Transform,
                ..
            }
        ));
        assert_eq!(err.to_string(), "step 2 (transform) failed");
        let cause = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(cause.as_deref(), Some("Invalid step \"boom\": expected 1-4 or 'all'"));

        assert_eq!(
            *orchestrator.runner().executed.lock().unwrap(),
            vec![PipelineStep::Load, PipelineStep::Transform]
        );
        assert!(matches!(
            orchestrator.state(PipelineStep::Load),
            StepState::Completed(_)
        ));
        assert!(matches!(
            orchestrator.state(PipelineStep::Transform),
            StepState::Failed(_)
        ));
        assert_eq!(*orchestrator.state(PipelineStep::Train), StepState::Pending);
        assert_eq!(*orchestrator.state(PipelineStep::Predict), StepState::Pending);
    }
}
