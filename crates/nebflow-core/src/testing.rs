//! テスト用のダブル
//!
//! - `ScriptedJob`: N 回 Running を返したあと、決められた終了状態を返す
//! - `RecordingSink`: 受け取ったイベントを順に記録する
//! - stage を作るヘルパー

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ulid::Ulid;

use crate::domain::{
    JobId, JobStatus, PipelineEvent, SinkError, Stage, StageError, StageInputs, StageRole,
};
use crate::ports::{JobHandle, ObserverSink};

/// Counters shared between a `ScriptedJob` and the test that inspects it.
#[derive(Debug, Clone, Default)]
pub(crate) struct JobProbe {
    status_calls: Arc<AtomicUsize>,
    terminate_calls: Arc<AtomicUsize>,
}

impl JobProbe {
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn terminate_calls(&self) -> usize {
        self.terminate_calls.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub(crate) struct ScriptedJob {
    id: JobId,
    running_polls: usize,
    end: JobStatus,
    ignores_terminate: bool,
    killed: AtomicBool,
    probe: JobProbe,
}

impl ScriptedJob {
    /// Reports `Running` for `running_polls` calls, then `end` forever.
    pub fn new(running_polls: usize, end: JobStatus) -> Self {
        Self {
            id: JobId::from_ulid(Ulid::new()),
            running_polls,
            end,
            ignores_terminate: false,
            killed: AtomicBool::new(false),
            probe: JobProbe::default(),
        }
    }

    pub fn with_probe(mut self, probe: &JobProbe) -> Self {
        self.probe = probe.clone();
        self
    }

    /// Keeps reporting `Running` after `terminate()`.
    pub fn ignoring_terminate(mut self) -> Self {
        self.ignores_terminate = true;
        self
    }

    fn terminated(&self) -> bool {
        !self.ignores_terminate && self.killed.load(Ordering::SeqCst)
    }
}

impl JobHandle for ScriptedJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn status(&self) -> JobStatus {
        let n = self.probe.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.killed.load(Ordering::SeqCst) {
            return if self.ignores_terminate {
                JobStatus::Running
            } else {
                JobStatus::Failed
            };
        }
        if n < self.running_polls {
            JobStatus::Running
        } else {
            self.end
        }
    }

    /// Only takes effect while the script still reports `Running`.
    fn terminate(&self) {
        self.probe.terminate_calls.fetch_add(1, Ordering::SeqCst);
        if self.probe.status_calls() <= self.running_polls {
            self.killed.store(true, Ordering::SeqCst);
        }
    }

    fn failure_reason(&self) -> Option<String> {
        if self.terminated() {
            Some("terminated".to_string())
        } else if self.end == JobStatus::Failed {
            Some("scripted failure".to_string())
        } else {
            None
        }
    }
}

/// Records every delivered event; can be switched to reject deliveries.
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<PipelineEvent>>,
    reject: Mutex<Option<SinkError>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rejecting(err: SinkError) -> Arc<Self> {
        let sink = Self::default();
        *sink.reject.lock().unwrap() = Some(err);
        Arc::new(sink)
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn terminal_count(&self) -> usize {
        self.events().iter().filter(|e| e.is_terminal()).count()
    }
}

impl ObserverSink for RecordingSink {
    fn deliver(&self, event: PipelineEvent) -> Result<(), SinkError> {
        if let Some(err) = self.reject.lock().unwrap().clone() {
            return Err(err);
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

pub(crate) fn sync_stage<F>(name: &str, work: F) -> Stage
where
    F: Fn(&StageInputs) -> Result<(), StageError> + Send + Sync + 'static,
{
    Stage::synchronous(name, StageRole::Custom, work)
}

/// Synchronous stage that succeeds and counts its invocations.
pub(crate) fn counted_sync(name: &str, calls: &Arc<AtomicUsize>) -> Stage {
    let calls = Arc::clone(calls);
    sync_stage(name, move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

pub(crate) fn pollable_stage<F>(name: &str, make_job: F) -> Stage
where
    F: Fn() -> ScriptedJob + Send + Sync + 'static,
{
    Stage::pollable(
        name,
        StageRole::Custom,
        move |_: &StageInputs| -> Result<Box<dyn JobHandle>, StageError> {
            Ok(Box::new(make_job()))
        },
    )
}

pub(crate) fn stage_names(events: &[PipelineEvent]) -> Vec<String> {
    events
        .iter()
        .map(|e| match e {
            PipelineEvent::Tick { stage } => format!("tick:{stage}"),
            PipelineEvent::StageComplete { stage } => format!("done:{stage}"),
            PipelineEvent::Terminal { outcome, .. } => format!("terminal:{outcome}"),
        })
        .collect()
}
