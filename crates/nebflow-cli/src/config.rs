//! Pipeline plan (TOML)
//!
//! ```toml
//! poll_interval_ms = 2000
//! stage_deadline_secs = 86400
//!
//! [[stage]]
//! name = "interpolate"
//! role = "interpolate"
//! program = "python"
//! args = ["interpolate.py", "{init_traj}", "{final_traj}", "{initial_path_traj}"]
//! requires = ["init_traj", "final_traj"]
//!
//! [[stage]]
//! name = "neb"
//! role = "neb"
//! mode = "pollable"
//! program = "python"
//! args = ["neb.py", "{prev_neb_traj}", "{neb_traj}"]
//! log_file = "{project}_neb_driver.out"
//! ```
//!
//! Literal braces are doubled: `awk '{{print $1}}'`, `${{HOME}}`.

use crate::error::{CliError, Result};
use nebflow_core::app::SupervisorConfig;
use nebflow_core::domain::{Pipeline, Stage, StageRole};
use nebflow_core::impls::{CommandSpec, CommandStage, SpawnedCommandStage};
use nebflow_core::ports::IdGenerator;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_terminate_grace_polls() -> u32 {
    10
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct PlanFile {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub stage_deadline_secs: Option<u64>,
    #[serde(default = "default_terminate_grace_polls")]
    pub terminate_grace_polls: u32,
    #[serde(default, rename = "stage")]
    pub stages: Vec<StagePlan>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct StagePlan {
    pub name: String,
    #[serde(default)]
    pub role: RoleSpec,
    #[serde(default)]
    pub mode: StageMode,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub skip_if_exists: Option<String>,
    #[serde(default)]
    pub log_file: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoleSpec {
    OptimizeInitial,
    SinglePointInitial,
    OptimizeFinal,
    SinglePointFinal,
    Interpolate,
    InitialGuess,
    /// Takes the project's next NEB iteration number.
    Neb,
    #[default]
    Custom,
}

impl RoleSpec {
    fn to_role(self, neb_iteration: u32) -> StageRole {
        match self {
            RoleSpec::OptimizeInitial => StageRole::OptimizeInitial,
            RoleSpec::SinglePointInitial => StageRole::SinglePointInitial,
            RoleSpec::OptimizeFinal => StageRole::OptimizeFinal,
            RoleSpec::SinglePointFinal => StageRole::SinglePointFinal,
            RoleSpec::Interpolate => StageRole::Interpolate,
            RoleSpec::InitialGuess => StageRole::InitialGuess,
            RoleSpec::Neb => StageRole::Neb {
                iteration: neb_iteration,
            },
            RoleSpec::Custom => StageRole::Custom,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageMode {
    #[default]
    Synchronous,
    Pollable,
}

impl PlanFile {
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading pipeline plan from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        let plan: Self = toml::from_str(&text).map_err(|source| CliError::PlanParsing {
            path: path.to_path_buf(),
            source,
        })?;
        plan.validate()?;
        Ok(plan)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(CliError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.stages.is_empty() {
            return Err(CliError::Config(
                "the plan has no [[stage]] entries".to_string(),
            ));
        }
        if let Some(stage) = self.stages.iter().find(|s| s.program.trim().is_empty()) {
            return Err(CliError::Config(format!(
                "stage '{}' has an empty program",
                stage.name
            )));
        }
        Ok(())
    }

    pub fn supervisor_config(&self, poll_override_ms: Option<u64>) -> SupervisorConfig {
        let poll_ms = poll_override_ms
            .filter(|ms| *ms > 0)
            .unwrap_or(self.poll_interval_ms);
        SupervisorConfig::default()
            .with_poll_interval(Duration::from_millis(poll_ms))
            .with_stage_deadline(self.stage_deadline_secs.map(Duration::from_secs))
            .with_terminate_grace_polls(self.terminate_grace_polls)
    }

    pub fn build_pipeline(
        &self,
        name: &str,
        neb_iteration: u32,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Pipeline> {
        let stages = self
            .stages
            .iter()
            .map(|plan| plan.to_stage(neb_iteration, Arc::clone(&ids)));
        Pipeline::builder(name)
            .stages(stages)
            .build()
            .map_err(|e| CliError::Config(e.to_string()))
    }
}

impl StagePlan {
    fn spec(&self) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.program).args(self.args.iter().cloned());
        for (key, value) in &self.env {
            spec = spec.env(key, value);
        }
        for key in &self.requires {
            spec = spec.requires(key);
        }
        if let Some(key) = &self.skip_if_exists {
            spec = spec.skip_if_exists(key);
        }
        if let Some(template) = &self.log_file {
            spec = spec.log_file(template);
        }
        spec
    }

    fn to_stage(&self, neb_iteration: u32, ids: Arc<dyn IdGenerator>) -> Stage {
        let role = self.role.to_role(neb_iteration);
        match self.mode {
            StageMode::Synchronous => {
                Stage::synchronous(&self.name, role, CommandStage::new(self.spec()))
            }
            StageMode::Pollable => {
                Stage::pollable(&self.name, role, SpawnedCommandStage::new(self.spec(), ids))
            }
        }
    }
}
