//! Pipeline と PipelineRun
//!
//! # 学習ポイント
//! - Builder パターン + 起動時検証（Fail-fast 設計）
//! - 状態遷移はメソッド経由（フィールドを直接書き換えない）

use std::collections::HashSet;
use std::sync::Arc;

use super::errors::BuildError;
use super::ids::RunId;
use super::outcome::{RunOutcome, StageFailure};
use super::stage::{Stage, StageInputs};

/// A validated, fixed, ordered list of stages.
///
/// Stage order is fixed here; nothing can reorder it later.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// PipelineBuilder はパイプラインを構築
///
/// # 使用例
/// ```ignore
/// let pipeline = Pipeline::builder("neb")
///     .stage(load_init)
///     .stage(run_neb)
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - 空のパイプラインは BuildError::Empty
/// - stage 名の重複は BuildError::DuplicateStage
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.stages.extend(stages);
        self
    }

    pub fn build(self) -> Result<Pipeline, BuildError> {
        if self.stages.is_empty() {
            return Err(BuildError::Empty);
        }
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name()) {
                return Err(BuildError::DuplicateStage(stage.name().to_string()));
            }
        }
        Ok(Pipeline {
            name: self.name,
            stages: self.stages,
        })
    }
}

/// One execution attempt over a pipeline.
///
/// Owned by the controller until handed to a supervisor, then owned by the
/// supervisor until the Terminal event. Terminal once `outcome != Pending`;
/// a finished run is never re-run.
#[derive(Debug)]
pub struct PipelineRun {
    id: RunId,
    pipeline: Pipeline,
    inputs: Arc<StageInputs>,
    current_index: usize,
    outcome: RunOutcome,
    failure: Option<StageFailure>,
}

impl PipelineRun {
    pub fn new(id: RunId, pipeline: Pipeline, inputs: StageInputs) -> Self {
        Self {
            id,
            pipeline,
            inputs: Arc::new(inputs),
            current_index: 0,
            outcome: RunOutcome::Pending,
            failure: None,
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn inputs(&self) -> &Arc<StageInputs> {
        &self.inputs
    }

    /// Index of the stage being (or about to be) driven.
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_stage(&self) -> Option<&Stage> {
        if self.is_terminal() {
            return None;
        }
        self.pipeline.stages.get(self.current_index)
    }

    /// Number of stages that reported success.
    pub fn stages_completed(&self) -> usize {
        self.current_index
    }

    pub fn outcome(&self) -> RunOutcome {
        self.outcome
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        self.failure.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_terminal()
    }

    /// Record that the current stage finished and move to the next one.
    ///
    /// Once every stage has advanced, the run becomes `Completed`.
    pub fn advance(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.current_index += 1;
        if self.current_index >= self.pipeline.len() {
            self.outcome = RunOutcome::Completed;
        }
    }

    pub fn mark_cancelled(&mut self) {
        if !self.is_terminal() {
            self.outcome = RunOutcome::Cancelled;
        }
    }

    pub fn mark_failed(&mut self, failure: StageFailure) {
        if !self.is_terminal() {
            self.outcome = RunOutcome::Failed;
            self.failure = Some(failure);
        }
    }
}
