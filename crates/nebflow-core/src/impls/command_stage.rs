//! Command stages - 外部プログラムを stage として実行する
//!
//! # 二つの実行方法
//! - **CommandStage**（SyncWork）: 終了まで待つ。短い前処理・変換向け
//! - **SpawnedCommandStage**（PollableWork）: spawn して ProcessJob を返す
//!
//! 引数とログファイル名の `{placeholder}` は StageInputs から置換します（`{{` `}}` はそのままの波括弧）。
//! unix では子プロセスを新しいプロセスグループの先頭として起動します。
//! `requires` の artifact が無ければ開始前に MissingPrerequisite で失敗し、
//! `skip_if_exists` の artifact が既にあれば何もせず完了扱いにします。

use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::process_job::ProcessJob;
use crate::domain::{JobId, JobStatus, StageError, StageInputs};
use crate::ports::{IdGenerator, JobHandle, PollableWork, SyncWork};

/// Description of one external program invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    log_file: Option<String>,
    requires: Vec<String>,
    skip_if_exists: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Defaults to the inputs' work directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// stdout/stderr go to this file (template, relative to the working dir).
    pub fn log_file(mut self, template: impl Into<String>) -> Self {
        self.log_file = Some(template.into());
        self
    }

    pub fn requires(mut self, key: impl Into<String>) -> Self {
        self.requires.push(key.into());
        self
    }

    pub fn skip_if_exists(mut self, key: impl Into<String>) -> Self {
        self.skip_if_exists = Some(key.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// True when the `skip_if_exists` artifact is already on disk.
    pub fn is_satisfied(&self, inputs: &StageInputs) -> bool {
        self.skip_if_exists
            .as_deref()
            .and_then(|key| inputs.artifact(key))
            .is_some_and(|path| path.exists())
    }

    /// Check prerequisites and build the process command.
    pub fn prepare(&self, inputs: &StageInputs) -> Result<std::process::Command, StageError> {
        for key in &self.requires {
            inputs.require(key)?;
        }

        let working_dir = self
            .working_dir
            .clone()
            .unwrap_or_else(|| inputs.work_dir().to_path_buf());

        let mut cmd = std::process::Command::new(&self.program);
        for arg in &self.args {
            cmd.arg(inputs.substitute(arg)?);
        }
        cmd.current_dir(&working_dir).envs(&self.env).stdin(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // the child leads a new process group
            cmd.process_group(0);
        }

        match &self.log_file {
            Some(template) => {
                let path = working_dir.join(inputs.substitute(template)?);
                let out = File::create(&path)?;
                let err = out.try_clone()?;
                cmd.stdout(out).stderr(err);
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }
        Ok(cmd)
    }

    fn spawn_error(&self, source: std::io::Error) -> StageError {
        StageError::Spawn {
            program: self.program.clone(),
            source,
        }
    }
}

/// Runs the command to completion inside the blocking call.
#[derive(Debug, Clone)]
pub struct CommandStage {
    spec: CommandSpec,
}

impl CommandStage {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

impl SyncWork for CommandStage {
    fn run(&self, inputs: &StageInputs) -> Result<(), StageError> {
        if self.spec.is_satisfied(inputs) {
            info!(program = %self.spec.program, "output already present, skipping");
            return Ok(());
        }
        let mut cmd = self.spec.prepare(inputs)?;
        debug!(program = %self.spec.program, "running command");
        let status = cmd.status().map_err(|e| self.spec.spawn_error(e))?;
        if !status.success() {
            return Err(StageError::ExitStatus {
                program: self.spec.program.clone(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

/// Spawns the command and hands back a `ProcessJob` to poll.
pub struct SpawnedCommandStage {
    spec: CommandSpec,
    ids: Arc<dyn IdGenerator>,
}

impl SpawnedCommandStage {
    pub fn new(spec: CommandSpec, ids: Arc<dyn IdGenerator>) -> Self {
        Self { spec, ids }
    }
}

#[async_trait]
impl PollableWork for SpawnedCommandStage {
    async fn start(&self, inputs: &StageInputs) -> Result<Box<dyn JobHandle>, StageError> {
        let id = self.ids.generate_job_id();
        if self.spec.is_satisfied(inputs) {
            info!(job_id = %id, program = %self.spec.program, "output already present, skipping");
            return Ok(Box::new(FinishedJob::new(id)));
        }

        let mut cmd = tokio::process::Command::from(self.spec.prepare(inputs)?);
        cmd.kill_on_drop(true);
        let child = cmd.spawn().map_err(|e| self.spec.spawn_error(e))?;
        info!(job_id = %id, program = %self.spec.program, pid = ?child.id(), "job started");
        Ok(Box::new(ProcessJob::new(id, self.spec.program.clone(), child)))
    }
}

/// A handle whose work was already done before it started.
#[derive(Debug, Clone, Copy)]
pub struct FinishedJob {
    id: JobId,
}

impl FinishedJob {
    pub fn new(id: JobId) -> Self {
        Self { id }
    }
}

impl JobHandle for FinishedJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn status(&self) -> JobStatus {
        JobStatus::Finished
    }

    fn terminate(&self) {}
}
