//! Supervisor - PipelineRun を終了まで駆動する
//!
//! # フロー
//! 1. stage の開始前にキャンセルを確認
//! 2. Synchronous stage: blocking pool で実行（途中でキャンセルできない）
//! 3. Pollable stage: JobHandle を poll_interval ごとに確認し、Tick を通知
//!    - キャンセルされたら terminate() を一度だけ呼び、以降の stage は開始しない
//!    - Finished なら StageComplete、Failed なら run 全体が Failed
//! 4. Terminal を必ず一度だけ通知して終了
//!
//! # 設計
//! - Supervisor と controller は状態を共有しない。通知は ObserverSink のみ
//! - poll 間の sleep はキャンセルで起こされる
//! - stage の失敗やパニックは Terminal(Failed) に変換され、タスク境界を越えない

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::domain::{
    CancelRequest, CancelSignal, JobStatus, PipelineEvent, PipelineRun, RunId, RunOutcome,
    SinkError, Stage, StageError, StageFailure, StageInputs, StageKind, cancel_pair,
};
use crate::impls::thread_job::panic_error;
use crate::ports::{Clock, JobHandle, LogSink, ObserverSink};

/// Supervisor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Sleep between two status checks of a pollable job.
    pub poll_interval: Duration,

    /// Status checks allowed after `terminate()` before logging a liveness defect.
    pub terminate_grace_polls: u32,

    /// Optional upper bound on how long one pollable stage may run.
    pub stage_deadline: Option<Duration>,

    /// Consecutive sink failures that escalate the log level to `error`.
    pub sink_failure_threshold: u32,

    /// Capacity of the event channel the controller creates.
    pub event_buffer: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            terminate_grace_polls: 10,
            stage_deadline: None,
            sink_failure_threshold: 3,
            event_buffer: 256,
        }
    }
}

impl SupervisorConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_stage_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.stage_deadline = deadline;
        self
    }

    pub fn with_terminate_grace_polls(mut self, polls: u32) -> Self {
        self.terminate_grace_polls = polls;
        self
    }

    /// Interval used while waiting for a terminated job to settle.
    fn grace_interval(&self) -> Duration {
        (self.poll_interval / 10).max(Duration::from_millis(10))
    }
}

/// Final account of one run, returned by `RunHandle::join`.
///
/// Available even when the Terminal notification itself was lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub outcome: RunOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
    pub stages_completed: usize,
    pub undelivered_notifications: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Starts supervisors for pipeline runs.
pub struct Supervisor {
    config: SupervisorConfig,
    clock: Arc<dyn Clock>,
    log: Arc<dyn LogSink>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, clock: Arc<dyn Clock>, log: Arc<dyn LogSink>) -> Self {
        Self { config, clock, log }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Hand `run` over to a new supervisor task and return immediately.
    ///
    /// The run is owned by the task until it ends; the caller only keeps
    /// the handle.
    pub fn spawn(&self, run: PipelineRun, sink: Arc<dyn ObserverSink>) -> RunHandle {
        let (cancel, signal) = cancel_pair();
        let run_id = run.id();
        let started_at = self.clock.now();

        let driver = Driver {
            config: self.config.clone(),
            log: Arc::clone(&self.log),
            sink: Arc::clone(&sink),
            cancel: signal,
            undelivered: 0,
            consecutive_failures: 0,
        };
        let span = info_span!("pipeline_run", run_id = %run_id, pipeline = %run.pipeline().name());
        let inner = tokio::spawn(driver.drive(run).instrument(span));

        let clock = Arc::clone(&self.clock);
        let log = Arc::clone(&self.log);
        let join = tokio::spawn(async move {
            let (outcome, failure, stages_completed, undelivered) = match inner.await {
                Ok(done) => (done.outcome, done.failure, done.stages_completed, done.undelivered),
                Err(e) => {
                    // the run never reached its own Terminal; report it here
                    let message = join_error(e).to_string();
                    error!(run_id = %run_id, error = %message, "supervisor task aborted");
                    log.log(&format!("Pipeline aborted: {message}"));
                    let failure = StageFailure::StartError {
                        stage: "supervisor".to_string(),
                        message,
                    };
                    let delivered = sink.deliver(PipelineEvent::failed(failure.clone()));
                    let undelivered = u32::from(delivered.is_err());
                    (RunOutcome::Failed, Some(failure), 0, undelivered)
                }
            };
            RunReport {
                run_id,
                outcome,
                failure,
                stages_completed,
                undelivered_notifications: undelivered,
                started_at,
                finished_at: clock.now(),
            }
        });

        RunHandle {
            run_id,
            cancel,
            join,
            clock: Arc::clone(&self.clock),
            started_at,
        }
    }
}

/// Controller-side handle of a running supervisor.
pub struct RunHandle {
    run_id: RunId,
    cancel: CancelRequest,
    join: JoinHandle<RunReport>,
    clock: Arc<dyn Clock>,
    started_at: DateTime<Utc>,
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Raise the cancellation flag; returns immediately.
    pub fn request_cancel(&self) {
        self.cancel.request();
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.is_requested()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run to end.
    pub async fn join(mut self) -> RunReport {
        self.wait().await
    }

    /// Like `join`, but borrowable so an interrupted wait can be resumed.
    /// Must not be called again once it has returned.
    pub async fn wait(&mut self) -> RunReport {
        match (&mut self.join).await {
            Ok(report) => report,
            Err(e) => {
                // the guard task itself was aborted
                RunReport {
                    run_id: self.run_id,
                    outcome: RunOutcome::Failed,
                    failure: Some(StageFailure::StartError {
                        stage: "supervisor".to_string(),
                        message: join_error(e).to_string(),
                    }),
                    stages_completed: 0,
                    undelivered_notifications: 0,
                    started_at: self.started_at,
                    finished_at: self.clock.now(),
                }
            }
        }
    }
}

fn join_error(e: JoinError) -> StageError {
    if e.is_panic() {
        panic_error(e.into_panic().as_ref())
    } else {
        StageError::Other(e.to_string())
    }
}

enum StageEnd {
    Completed,
    Cancelled,
    Failed(StageFailure),
}

struct Finished {
    outcome: RunOutcome,
    failure: Option<StageFailure>,
    stages_completed: usize,
    undelivered: u32,
}

struct Driver {
    config: SupervisorConfig,
    log: Arc<dyn LogSink>,
    sink: Arc<dyn ObserverSink>,
    cancel: CancelSignal,
    undelivered: u32,
    consecutive_failures: u32,
}

impl Driver {
    async fn drive(mut self, mut run: PipelineRun) -> Finished {
        info!(stages = run.pipeline().len(), "run started");
        self.log
            .log(&format!("Pipeline '{}' started", run.pipeline().name()));

        while let Some(stage) = run.current_stage().cloned() {
            if self.cancel.is_requested() {
                run.mark_cancelled();
                break;
            }

            let inputs = Arc::clone(run.inputs());
            match self.drive_stage(&stage, inputs).await {
                StageEnd::Completed => {
                    self.log.log(&format!("{} finished", stage.label()));
                    self.notify(PipelineEvent::stage_complete(stage.name()));
                    run.advance();
                }
                StageEnd::Cancelled => run.mark_cancelled(),
                StageEnd::Failed(failure) => {
                    warn!(stage = stage.name(), %failure, "stage failed");
                    self.log.log(&format!("Error: {failure}"));
                    run.mark_failed(failure);
                }
            }
        }

        match run.outcome() {
            RunOutcome::Completed => self.log.log("Pipeline completed"),
            RunOutcome::Cancelled => self.log.log("Pipeline cancelled"),
            _ => {}
        }
        info!(
            outcome = %run.outcome(),
            stages_completed = run.stages_completed(),
            "run finished"
        );

        let terminal = PipelineEvent::Terminal {
            outcome: run.outcome(),
            failure: run.failure().cloned(),
        };
        self.notify_terminal(terminal).await;

        Finished {
            outcome: run.outcome(),
            failure: run.failure().cloned(),
            stages_completed: run.stages_completed(),
            undelivered: self.undelivered,
        }
    }

    async fn drive_stage(&mut self, stage: &Stage, inputs: Arc<StageInputs>) -> StageEnd {
        info!(stage = stage.name(), pollable = stage.is_pollable(), "stage started");
        self.log.log(&format!("{} started", stage.label()));

        match stage.kind() {
            StageKind::Synchronous(work) => {
                let work = Arc::clone(work);
                let result = tokio::task::spawn_blocking(move || work.run(&inputs))
                    .await
                    .unwrap_or_else(|e| Err(join_error(e)));
                match result {
                    Ok(()) => StageEnd::Completed,
                    Err(e) => StageEnd::Failed(StageFailure::StartError {
                        stage: stage.name().to_string(),
                        message: e.to_string(),
                    }),
                }
            }
            StageKind::Pollable(work) => match work.start(&inputs).await {
                Ok(handle) => self.poll_job(stage, handle).await,
                Err(e) => StageEnd::Failed(StageFailure::StartError {
                    stage: stage.name().to_string(),
                    message: e.to_string(),
                }),
            },
        }
    }

    async fn poll_job(&mut self, stage: &Stage, handle: Box<dyn JobHandle>) -> StageEnd {
        let job_id = handle.id();
        let started = Instant::now();
        debug!(stage = stage.name(), %job_id, "polling job");

        let status = loop {
            let status = handle.status();
            if !status.is_pending() {
                break status;
            }

            if self.cancel.is_requested() {
                info!(stage = stage.name(), %job_id, "cancellation requested, terminating job");
                handle.terminate();
                self.await_termination(stage, handle.as_ref()).await;
                return StageEnd::Cancelled;
            }

            if let Some(deadline) = self.config.stage_deadline {
                let elapsed = started.elapsed();
                if elapsed >= deadline {
                    warn!(stage = stage.name(), %job_id, ?elapsed, "stage deadline exceeded");
                    handle.terminate();
                    self.await_termination(stage, handle.as_ref()).await;
                    return StageEnd::Failed(StageFailure::DeadlineExceeded {
                        stage: stage.name().to_string(),
                        elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    });
                }
            }

            self.notify(PipelineEvent::tick(stage.name()));

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = self.cancel.cancelled() => {}
            }
        };

        match status {
            JobStatus::Finished => StageEnd::Completed,
            _ => StageEnd::Failed(StageFailure::JobFailed {
                stage: stage.name().to_string(),
                reason: handle.failure_reason(),
            }),
        }
    }

    /// Give a terminated job a bounded number of polls to leave `Running`.
    async fn await_termination(&self, stage: &Stage, handle: &dyn JobHandle) {
        for _ in 0..self.config.terminate_grace_polls {
            if !handle.status().is_pending() {
                return;
            }
            tokio::time::sleep(self.config.grace_interval()).await;
        }
        if handle.status().is_pending() {
            warn!(
                stage = stage.name(),
                job_id = %handle.id(),
                polls = self.config.terminate_grace_polls,
                "job still running after terminate"
            );
        }
    }

    fn notify(&mut self, event: PipelineEvent) {
        match self.sink.deliver(event) {
            Ok(()) => self.consecutive_failures = 0,
            Err(e) => self.record_sink_failure(&e),
        }
    }

    fn record_sink_failure(&mut self, err: &SinkError) {
        self.undelivered += 1;
        self.consecutive_failures += 1;
        if self.consecutive_failures == self.config.sink_failure_threshold {
            error!(
                error = %err,
                consecutive = self.consecutive_failures,
                "observer sink keeps rejecting notifications"
            );
            self.log
                .log(&format!("Warning: progress notifications are being lost ({err})"));
        } else {
            warn!(error = %err, "notification dropped");
        }
    }

    /// The Terminal event is retried while the channel is merely full.
    async fn notify_terminal(&mut self, event: PipelineEvent) {
        let mut attempts = 0;
        loop {
            match self.sink.deliver(event.clone()) {
                Ok(()) => return,
                Err(SinkError::Full) if attempts < self.config.terminate_grace_polls => {
                    attempts += 1;
                    tokio::time::sleep(self.config.grace_interval()).await;
                }
                Err(e) => {
                    self.record_sink_failure(&e);
                    return;
                }
            }
        }
    }
}
