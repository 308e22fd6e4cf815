//! Controller - プロジェクトの状態を単独で所有する
//!
//! # 所有権
//! - ProjectState は controller だけが書き換える
//! - supervisor には StageInputs のスナップショットを渡し、結果はイベントで受け取る
//! - イベントは `next_event()` を呼んだコンテキストで 1 件ずつ適用される
//!
//! 表示用のタイマーは `snapshot()` で不変のコピーを読むだけです。

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::app::supervisor::{RunHandle, RunReport, Supervisor};
use crate::domain::{
    ControllerError, Pipeline, PipelineEvent, PipelineRun, RunId, RunOutcome, StageFailure,
    StageRole,
};
use crate::impls::{EventReceiver, event_channel};
use crate::ports::{IdGenerator, LogSink};
use crate::project::Project;

/// Bookkeeping the controller derives from supervisor events.
#[derive(Debug, Clone, Default)]
pub struct ProjectState {
    current_stage: Option<String>,
    ticks: u64,
    completed_stages: Vec<String>,
    last_outcome: Option<RunOutcome>,
    last_failure: Option<StageFailure>,
}

impl ProjectState {
    fn start(&mut self, first_stage: Option<String>) {
        *self = Self {
            current_stage: first_stage,
            ..Self::default()
        };
    }

    fn apply(&mut self, event: &PipelineEvent, next_stage: impl FnOnce(&str) -> Option<String>) {
        match event {
            PipelineEvent::Tick { stage } => {
                if self.current_stage.as_deref() != Some(stage) {
                    self.current_stage = Some(stage.clone());
                    self.ticks = 0;
                }
                self.ticks += 1;
            }
            PipelineEvent::StageComplete { stage } => {
                self.completed_stages.push(stage.clone());
                self.current_stage = next_stage(stage);
                self.ticks = 0;
            }
            PipelineEvent::Terminal { outcome, failure } => {
                self.current_stage = None;
                self.ticks = 0;
                self.last_outcome = Some(*outcome);
                self.last_failure = failure.clone();
            }
        }
    }
}

/// Immutable copy of the controller state for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub run_id: Option<RunId>,
    pub running: bool,
    pub cancel_requested: bool,
    pub current_stage: Option<String>,
    pub current_label: Option<String>,
    pub ticks: u64,
    pub completed_stages: Vec<String>,
    pub total_stages: usize,
    pub last_outcome: Option<RunOutcome>,
    pub last_failure: Option<StageFailure>,
}

struct StageInfo {
    name: String,
    role: StageRole,
    label: String,
}

struct ActiveRun {
    handle: RunHandle,
    events: EventReceiver,
    stages: Vec<StageInfo>,
    /// Set once the event stream is done and only the join remains.
    ending: Option<Option<PipelineEvent>>,
}

impl ActiveRun {
    fn info(&self, name: &str) -> Option<&StageInfo> {
        self.stages.iter().find(|s| s.name == name)
    }

    fn next_after(&self, name: &str) -> Option<String> {
        let pos = self.stages.iter().position(|s| s.name == name)?;
        self.stages.get(pos + 1).map(|s| s.name.clone())
    }
}

pub struct Controller {
    project: Project,
    supervisor: Supervisor,
    ids: Arc<dyn IdGenerator>,
    log: Arc<dyn LogSink>,
    state: ProjectState,
    active: Option<ActiveRun>,
    last_report: Option<RunReport>,
}

impl Controller {
    pub fn new(
        project: Project,
        supervisor: Supervisor,
        ids: Arc<dyn IdGenerator>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            project,
            supervisor,
            ids,
            log,
            state: ProjectState::default(),
            active: None,
            last_report: None,
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Mutable project access, refused while a run is active.
    pub fn project_mut(&mut self) -> Result<&mut Project, ControllerError> {
        if let Some(active) = &self.active {
            return Err(ControllerError::RunActive(active.handle.run_id().to_string()));
        }
        Ok(&mut self.project)
    }

    /// Persist the project settings. Independent of any active run.
    pub fn save(&self) -> Result<(), ControllerError> {
        Ok(self.project.save()?)
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Snapshot the project inputs, build a run, and hand it to a supervisor.
    pub fn launch(&mut self, pipeline: Pipeline) -> Result<RunId, ControllerError> {
        self.launch_with_vars(pipeline, std::iter::empty::<(String, String)>())
    }

    /// Like `launch`, with extra `{placeholder}` variables for this run only.
    pub fn launch_with_vars<I, K, V>(
        &mut self,
        pipeline: Pipeline,
        vars: I,
    ) -> Result<RunId, ControllerError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if let Some(active) = &self.active {
            return Err(ControllerError::RunActive(active.handle.run_id().to_string()));
        }

        let inputs = vars
            .into_iter()
            .fold(self.project.stage_inputs()?, |inputs, (k, v)| {
                inputs.with_var(k, v)
            });
        let stages: Vec<StageInfo> = pipeline
            .stages()
            .iter()
            .map(|s| StageInfo {
                name: s.name().to_string(),
                role: s.role(),
                label: s.label(),
            })
            .collect();

        let run_id = self.ids.generate_run_id();
        let run = PipelineRun::new(run_id, pipeline, inputs);
        let (sink, events) = event_channel(self.supervisor.config().event_buffer);

        self.state.start(stages.first().map(|s| s.name.clone()));
        self.last_report = None;
        let handle = self.supervisor.spawn(run, Arc::new(sink));
        info!(run_id = %run_id, stages = stages.len(), "run launched");

        self.active = Some(ActiveRun {
            handle,
            events,
            stages,
            ending: None,
        });
        Ok(run_id)
    }

    /// Forward a cancellation request to the active run; returns immediately.
    pub fn request_cancel(&self) -> Result<(), ControllerError> {
        let active = self.active.as_ref().ok_or(ControllerError::NoActiveRun)?;
        if !active.handle.cancel_requested() {
            self.log.log("Cancellation requested");
        }
        active.handle.request_cancel();
        Ok(())
    }

    /// Wait for the next notification and apply it.
    ///
    /// Returns `None` when no run is active. After the Terminal event the
    /// supervisor is joined and the slot is free for the next launch. If the
    /// Terminal notification was lost, one is rebuilt from the run report.
    ///
    /// Cancel-safe: a call dropped while joining resumes the join next time.
    pub async fn next_event(&mut self) -> Option<PipelineEvent> {
        let active = self.active.as_mut()?;
        if active.ending.is_none() {
            match active.events.recv().await {
                Some(event) => {
                    self.state.apply(&event, |stage| active.next_after(stage));
                    debug!(?event, "event applied");
                    if !event.is_terminal() {
                        return Some(event);
                    }
                    active.ending = Some(Some(event));
                }
                // every sender is gone without a Terminal; the report has the outcome
                None => active.ending = Some(None),
            }
        }

        let report = active.handle.wait().await;
        let terminal = self.active.take()?.ending.flatten();
        let event = match terminal {
            Some(event) => event,
            None => {
                let event = PipelineEvent::Terminal {
                    outcome: report.outcome,
                    failure: report.failure.clone(),
                };
                self.state.apply(&event, |_| None);
                event
            }
        };
        self.finish(report);
        Some(event)
    }

    fn finish(&mut self, report: RunReport) {
        if report.undelivered_notifications > 0 {
            self.log.log(&format!(
                "{} progress notifications were lost",
                report.undelivered_notifications
            ));
        }
        info!(
            run_id = %report.run_id,
            outcome = %report.outcome,
            undelivered = report.undelivered_notifications,
            "run joined"
        );
        self.last_report = Some(report);
    }

    /// Report of the most recently finished run.
    pub fn last_report(&self) -> Option<&RunReport> {
        self.last_report.as_ref()
    }

    pub fn state(&self) -> &ProjectState {
        &self.state
    }

    pub fn current_stage_name(&self) -> Option<&str> {
        self.state.current_stage.as_deref()
    }

    /// Calculation log of the stage that is running now, if it has one.
    pub fn current_log_file(&self) -> Option<PathBuf> {
        let active = self.active.as_ref()?;
        let info = active.info(self.current_stage_name()?)?;
        info.role.log_file(self.project.layout())
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let current_label = self
            .active
            .as_ref()
            .zip(self.current_stage_name())
            .and_then(|(active, name)| active.info(name))
            .map(|info| info.label.clone());

        StatusSnapshot {
            run_id: self.active.as_ref().map(|a| a.handle.run_id()),
            running: self.active.is_some(),
            cancel_requested: self
                .active
                .as_ref()
                .is_some_and(|a| a.handle.cancel_requested()),
            current_stage: self.state.current_stage.clone(),
            current_label,
            ticks: self.state.ticks,
            completed_stages: self.state.completed_stages.clone(),
            total_stages: self.active.as_ref().map_or(0, |a| a.stages.len()),
            last_outcome: self.state.last_outcome,
            last_failure: self.state.last_failure.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::supervisor::SupervisorConfig;
    use crate::domain::{JobStatus, Stage, StageError, StageInputs};
    use crate::impls::BufferLogSink;
    use crate::ports::{SystemClock, UlidGenerator};
    use crate::testing::{ScriptedJob, counted_sync, pollable_stage, sync_stage};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn controller(dir: &std::path::Path, poll_ms: u64) -> (Controller, Arc<BufferLogSink>) {
        let project = Project::create(dir, "p").unwrap();
        let log = Arc::new(BufferLogSink::new());
        let config = SupervisorConfig::default().with_poll_interval(Duration::from_millis(poll_ms));
        let supervisor = Supervisor::new(config, Arc::new(SystemClock), log.clone());
        let ids = Arc::new(UlidGenerator::new(SystemClock));
        (Controller::new(project, supervisor, ids, log.clone()), log)
    }

    async fn drain(controller: &mut Controller) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Some(event) = controller.next_event().await {
            events.push(event);
        }
        events
    }

    fn neb_pipeline(neb_polls: usize) -> Pipeline {
        let calls = Arc::new(AtomicUsize::new(0));
        Pipeline::builder("neb")
            .stage(counted_sync("load_init", &calls))
            .stage(Stage::pollable(
                "neb_1",
                StageRole::Neb { iteration: 1 },
                move |_: &StageInputs| -> Result<Box<dyn crate::ports::JobHandle>, StageError> {
                    Ok(Box::new(ScriptedJob::new(neb_polls, JobStatus::Finished)))
                },
            ))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn applies_events_and_frees_the_slot() {
        let dir = tempfile::tempdir().unwrap();
        let (mut controller, _log) = controller(dir.path(), 1);

        let run_id = controller.launch(neb_pipeline(2)).unwrap();
        assert_eq!(controller.snapshot().run_id, Some(run_id));
        assert_eq!(controller.current_stage_name(), Some("load_init"));

        let events = drain(&mut controller).await;

        assert_eq!(events.len(), 5);
        assert!(!controller.is_running());
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.completed_stages, vec!["load_init", "neb_1"]);
        assert_eq!(snapshot.last_outcome, Some(RunOutcome::Completed));
        assert!(snapshot.current_stage.is_none());
        assert_eq!(controller.last_report().unwrap().run_id, run_id);
    }

    #[tokio::test]
    async fn dropped_waits_resume_without_losing_the_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let (mut controller, _log) = controller(dir.path(), 1);
        controller.launch(neb_pipeline(3)).unwrap();

        let mut events = Vec::new();
        loop {
            match tokio::time::timeout(Duration::from_micros(50), controller.next_event()).await {
                Ok(Some(event)) => events.push(event),
                Ok(None) => break,
                Err(_) => continue,
            }
        }

        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(
            controller.last_report().unwrap().outcome,
            RunOutcome::Completed
        );
    }

    #[tokio::test]
    async fn second_launch_is_rejected_while_active() {
        let dir = tempfile::tempdir().unwrap();
        let (mut controller, _log) = controller(dir.path(), 1);

        controller.launch(neb_pipeline(1)).unwrap();
        let err = controller.launch(neb_pipeline(1)).unwrap_err();
        assert!(matches!(err, ControllerError::RunActive(_)));
        assert!(controller.project_mut().is_err());

        drain(&mut controller).await;
        controller.launch(neb_pipeline(1)).unwrap();
        drain(&mut controller).await;
        assert!(controller.project_mut().is_ok());
    }

    #[tokio::test]
    async fn run_vars_reach_the_stages() {
        let dir = tempfile::tempdir().unwrap();
        let (mut controller, _log) = controller(dir.path(), 1);
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_in_stage = Arc::clone(&seen);
        let pipeline = Pipeline::builder("p")
            .stage(sync_stage("load_init", move |inputs| {
                *seen_in_stage.lock().unwrap() = inputs.substitute("{init_input}").ok();
                Ok(())
            }))
            .build()
            .unwrap();

        controller
            .launch_with_vars(pipeline, [("init_input", "reactant.xyz")])
            .unwrap();
        drain(&mut controller).await;

        assert_eq!(seen.lock().unwrap().as_deref(), Some("reactant.xyz"));
    }

    #[tokio::test]
    async fn cancel_without_run_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _log) = controller(dir.path(), 1);
        assert!(matches!(
            controller.request_cancel(),
            Err(ControllerError::NoActiveRun)
        ));
    }

    #[tokio::test]
    async fn tracks_current_stage_and_log_file_while_polling() {
        let dir = tempfile::tempdir().unwrap();
        let (mut controller, log) = controller(dir.path(), 10_000);

        controller.launch(neb_pipeline(usize::MAX)).unwrap();
        loop {
            let event = controller.next_event().await.unwrap();
            if matches!(event, PipelineEvent::Tick { .. }) {
                break;
            }
        }

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.current_stage.as_deref(), Some("neb_1"));
        assert_eq!(
            snapshot.current_label.as_deref(),
            Some("Running NEB (iteration 1)")
        );
        assert_eq!(snapshot.ticks, 1);
        assert_eq!(
            controller.current_log_file(),
            Some(dir.path().join("p_neb_path_1.log"))
        );

        controller.request_cancel().unwrap();
        drain(&mut controller).await;

        assert_eq!(controller.snapshot().last_outcome, Some(RunOutcome::Cancelled));
        assert!(log.contains("Cancellation requested"));
        assert!(controller.current_log_file().is_none());
    }

    #[tokio::test]
    async fn failure_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let (mut controller, _log) = controller(dir.path(), 1);
        let pipeline = Pipeline::builder("p")
            .stage(sync_stage("interpolate", |inputs| {
                inputs.require("init_traj").map(|_| ())
            }))
            .stage(pollable_stage("neb_1", || {
                ScriptedJob::new(0, JobStatus::Finished)
            }))
            .build()
            .unwrap();

        controller.launch(pipeline).unwrap();
        let events = drain(&mut controller).await;

        assert_eq!(events.len(), 1);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.last_outcome, Some(RunOutcome::Failed));
        assert!(matches!(
            snapshot.last_failure,
            Some(StageFailure::StartError { ref stage, ref message })
                if stage == "interpolate" && message.contains("init_traj")
        ));
    }

    #[tokio::test]
    async fn lost_terminal_is_rebuilt_from_the_report() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::create(dir.path(), "p").unwrap();
        let log = Arc::new(BufferLogSink::new());
        // one slot: the Terminal cannot fit while the first event is unread
        let config = SupervisorConfig {
            event_buffer: 1,
            terminate_grace_polls: 0,
            ..SupervisorConfig::default()
        };
        let supervisor = Supervisor::new(config, Arc::new(SystemClock), log.clone());
        let ids = Arc::new(UlidGenerator::new(SystemClock));
        let mut controller = Controller::new(project, supervisor, ids, log.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::builder("p")
            .stage(counted_sync("a", &calls))
            .stage(counted_sync("b", &calls))
            .build()
            .unwrap();

        controller.launch(pipeline).unwrap();
        // let the run finish before reading anything
        while !controller.active.as_ref().unwrap().handle.is_finished() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let events = drain(&mut controller).await;

        assert!(matches!(
            events.last(),
            Some(PipelineEvent::Terminal { outcome: RunOutcome::Completed, .. })
        ));
        assert_eq!(controller.last_report().unwrap().undelivered_notifications, 2);
        assert!(log.contains("notifications were lost"));
    }
}
