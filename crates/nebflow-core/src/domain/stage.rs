//! Stage - パイプラインの 1 単位
//!
//! stage の種類（同期 / ポーリング）と役割（何の計算か）は
//! どちらも enum で表します。名前の文字列を解析して分岐することはしません。

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::errors::StageError;
use crate::ports::{PollableWork, SyncWork};

/// What a stage computes. Drives display text and log-file lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageRole {
    OptimizeInitial,
    SinglePointInitial,
    OptimizeFinal,
    SinglePointFinal,
    Interpolate,
    InitialGuess,
    Neb { iteration: u32 },
    Custom,
}

impl StageRole {
    /// Display text for progress output.
    pub fn label(&self) -> String {
        match self {
            StageRole::OptimizeInitial => "Optimizing initial structure".to_string(),
            StageRole::SinglePointInitial => "Evaluating initial structure".to_string(),
            StageRole::OptimizeFinal => "Optimizing final structure".to_string(),
            StageRole::SinglePointFinal => "Evaluating final structure".to_string(),
            StageRole::Interpolate => "Interpolating initial path".to_string(),
            StageRole::InitialGuess => "Preparing initial guess".to_string(),
            StageRole::Neb { iteration } => format!("Running NEB (iteration {iteration})"),
            StageRole::Custom => "Running".to_string(),
        }
    }
}

/// How the supervisor drives a stage.
#[derive(Clone)]
pub enum StageKind {
    /// Runs to completion inside one blocking call; not interruptible.
    Synchronous(Arc<dyn SyncWork>),

    /// Returns a `JobHandle` immediately; polled until terminal.
    Pollable(Arc<dyn PollableWork>),
}

impl fmt::Debug for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Synchronous(_) => f.write_str("Synchronous"),
            StageKind::Pollable(_) => f.write_str("Pollable"),
        }
    }
}

/// A named unit of pipeline work.
#[derive(Debug, Clone)]
pub struct Stage {
    name: String,
    role: StageRole,
    kind: StageKind,
}

impl Stage {
    pub fn synchronous(name: impl Into<String>, role: StageRole, work: impl SyncWork) -> Self {
        Self {
            name: name.into(),
            role,
            kind: StageKind::Synchronous(Arc::new(work)),
        }
    }

    pub fn pollable(name: impl Into<String>, role: StageRole, work: impl PollableWork) -> Self {
        Self {
            name: name.into(),
            role,
            kind: StageKind::Pollable(Arc::new(work)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> StageRole {
        self.role
    }

    pub fn kind(&self) -> &StageKind {
        &self.kind
    }

    pub fn is_pollable(&self) -> bool {
        matches!(self.kind, StageKind::Pollable(_))
    }

    /// Display text; custom stages fall back to their name.
    pub fn label(&self) -> String {
        match self.role {
            StageRole::Custom => self.name.clone(),
            role => role.label(),
        }
    }
}

/// Immutable snapshot of everything stages may read.
///
/// Built by the controller before a run starts and shared read-only with
/// the supervisor. Stages never write back through it.
#[derive(Debug, Clone, Default)]
pub struct StageInputs {
    work_dir: PathBuf,
    artifacts: BTreeMap<String, PathBuf>,
    vars: BTreeMap<String, String>,
}

impl StageInputs {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            artifacts: BTreeMap::new(),
            vars: BTreeMap::new(),
        }
    }

    pub fn with_artifact(mut self, key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.artifacts.insert(key.into(), path.into());
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn artifact(&self, key: &str) -> Option<&Path> {
        self.artifacts.get(key).map(PathBuf::as_path)
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Path of an artifact that must already exist on disk.
    pub fn require(&self, key: &str) -> Result<&Path, StageError> {
        let path = self
            .artifact(key)
            .ok_or_else(|| StageError::Invalid(format!("unknown artifact key '{key}'")))?;
        if !path.exists() {
            return Err(StageError::MissingPrerequisite {
                key: key.to_string(),
                path: path.to_path_buf(),
            });
        }
        Ok(path)
    }

    /// Replace `{key}` tokens with variables, artifact paths, or `{work_dir}`.
    ///
    /// `{{` and `}}` stand for literal braces. Unknown tokens and unmatched
    /// braces are an error rather than being passed through.
    pub fn substitute(&self, template: &str) -> Result<String, StageError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(pos) = rest.find(['{', '}']) {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if let Some(after) = tail.strip_prefix("{{") {
                out.push('{');
                rest = after;
            } else if let Some(after) = tail.strip_prefix("}}") {
                out.push('}');
                rest = after;
            } else if tail.starts_with('}') {
                return Err(StageError::Invalid(format!(
                    "unmatched '}}' in '{template}' (write '}}}}' for a literal brace)"
                )));
            } else {
                let after = &tail[1..];
                let close = after.find('}').ok_or_else(|| {
                    StageError::Invalid(format!("unclosed placeholder in '{template}'"))
                })?;
                out.push_str(&self.resolve(&after[..close])?);
                rest = &after[close + 1..];
            }
        }
        out.push_str(rest);
        Ok(out)
    }

    fn resolve(&self, key: &str) -> Result<String, StageError> {
        if key == "work_dir" {
            return Ok(self.work_dir.display().to_string());
        }
        if let Some(value) = self.vars.get(key) {
            return Ok(value.clone());
        }
        if let Some(path) = self.artifacts.get(key) {
            return Ok(path.display().to_string());
        }
        Err(StageError::Invalid(format!(
            "unknown placeholder '{{{key}}}' (write '{{{{' and '}}}}' for literal braces)"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> StageInputs {
        StageInputs::new("/work")
            .with_artifact("init_traj", "/work/p_init.traj")
            .with_var("project", "p")
    }

    #[test]
    fn substitute_replaces_known_placeholders() {
        let s = inputs()
            .substitute("--in {init_traj} --name {project} --dir {work_dir}")
            .unwrap();
        assert_eq!(s, "--in /work/p_init.traj --name p --dir /work");
    }

    #[test]
    fn substitute_rejects_unknown_placeholder() {
        let err = inputs().substitute("{nope}").unwrap_err();
        assert!(matches!(err, StageError::Invalid(msg) if msg.contains("nope")));
    }

    #[test]
    fn substitute_rejects_unclosed_placeholder() {
        assert!(inputs().substitute("x {init_traj").is_err());
    }

    #[test]
    fn doubled_braces_are_literal() {
        let s = inputs()
            .substitute("awk '{{print $1}}' {init_traj}")
            .unwrap();
        assert_eq!(s, "awk '{print $1}' /work/p_init.traj");
    }

    #[test]
    fn shell_parameter_expansion_survives_escaping() {
        let s = inputs()
            .substitute("cd ${{HOME}} && python -c 'd={{}}' {project}")
            .unwrap();
        assert_eq!(s, "cd ${HOME} && python -c 'd={}' p");
    }

    #[test]
    fn bare_shell_braces_are_rejected_with_a_hint() {
        let err = inputs().substitute("echo ${HOME}").unwrap_err();
        assert!(matches!(err, StageError::Invalid(msg) if msg.contains("{HOME}") && msg.contains("{{")));
    }

    #[test]
    fn stray_closing_brace_is_rejected() {
        assert!(inputs().substitute("x } y").is_err());
    }

    #[test]
    fn require_reports_missing_file() {
        let err = inputs().require("init_traj").unwrap_err();
        assert!(matches!(err, StageError::MissingPrerequisite { key, .. } if key == "init_traj"));
    }

    #[test]
    fn require_accepts_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.traj");
        std::fs::write(&file, b"").unwrap();
        let inputs = StageInputs::new(dir.path()).with_artifact("a", &file);
        assert_eq!(inputs.require("a").unwrap(), file.as_path());
    }

    #[test]
    fn custom_stage_label_is_its_name() {
        let stage = Stage::synchronous(
            "convert",
            StageRole::Custom,
            |_: &StageInputs| -> Result<(), StageError> { Ok(()) },
        );
        assert_eq!(stage.label(), "convert");
        assert!(!stage.is_pollable());

        let neb = StageRole::Neb { iteration: 3 };
        assert_eq!(neb.label(), "Running NEB (iteration 3)");
    }
}
