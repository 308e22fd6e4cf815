//! Project - 設定ファイルと成果物の置き場所
//!
//! controller が所有するプロジェクトの状態です。supervisor には
//! `stage_inputs()` で作った不変のスナップショットだけを渡します。

pub mod layout;
pub mod settings;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::domain::StageInputs;

pub use self::layout::ProjectLayout;
pub use self::settings::{
    CalculatorType, InterpolationMethod, NebMethod, NebOptimizer, ProjectSettings, Solvation,
    XtbGfn,
};

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid project file {}: {source}", path.display())]
    Settings {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid settings: {0}")]
    Invalid(String),

    #[error("not a project file: {}", .0.display())]
    InvalidPath(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Project {
    layout: ProjectLayout,
    settings: ProjectSettings,
}

impl Project {
    /// Open `<dir>/<name>.json`; the directory and file stem name the project.
    pub fn open(json_file: &Path) -> Result<Self, ProjectError> {
        let absolute = if json_file.is_absolute() {
            json_file.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|source| ProjectError::Io {
                    path: json_file.to_path_buf(),
                    source,
                })?
                .join(json_file)
        };
        let name = absolute
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ProjectError::InvalidPath(absolute.clone()))?
            .to_string();
        let work_dir = absolute
            .parent()
            .ok_or_else(|| ProjectError::InvalidPath(absolute.clone()))?
            .to_path_buf();

        let settings = ProjectSettings::load(&absolute)?;
        Ok(Self {
            layout: ProjectLayout::new(work_dir, name),
            settings,
        })
    }

    /// Create a project with default settings and write its file.
    pub fn create(dir: &Path, name: &str) -> Result<Self, ProjectError> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(ProjectError::Invalid(format!("bad project name '{name}'")));
        }
        std::fs::create_dir_all(dir).map_err(|source| ProjectError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let project = Self {
            layout: ProjectLayout::new(dir, name),
            settings: ProjectSettings::default(),
        };
        project.save()?;
        info!(project = name, dir = %dir.display(), "project created");
        Ok(project)
    }

    pub fn save(&self) -> Result<(), ProjectError> {
        self.settings.save(&self.layout.settings_file())
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn settings(&self) -> &ProjectSettings {
        &self.settings
    }

    pub fn name(&self) -> &str {
        self.layout.project_name()
    }

    /// Iteration number the next NEB run will write.
    pub fn next_neb_iteration(&self) -> Result<u32, ProjectError> {
        let current = self
            .layout
            .current_final_neb_number()
            .map_err(|source| ProjectError::Io {
                path: self.layout.work_dir().to_path_buf(),
                source,
            })?;
        Ok(current + 1)
    }

    /// Artifact key → path, used for `{placeholder}`s and existence checks.
    ///
    /// `prev_neb_traj` is the path the next NEB iteration starts from: the
    /// latest NEB trajectory, or the interpolated path before the first one.
    pub fn artifacts(&self) -> Result<BTreeMap<String, PathBuf>, ProjectError> {
        let l = &self.layout;
        let next = self.next_neb_iteration()?;
        let prev = if next > 1 {
            l.neb_path_traj_file(next - 1)
        } else {
            l.initial_path_traj_file()
        };

        let entries = [
            ("settings", l.settings_file()),
            ("init_traj", l.init_traj_file()),
            ("init_xyz", l.init_xyz_file()),
            ("init_log", l.init_log_file()),
            ("final_traj", l.final_traj_file()),
            ("final_xyz", l.final_xyz_file()),
            ("final_log", l.final_log_file()),
            ("initial_path_traj", l.initial_path_traj_file()),
            ("initial_path_xyz", l.initial_path_xyz_file()),
            ("prev_neb_traj", prev),
            ("neb_traj", l.neb_path_traj_file(next)),
            ("neb_xyz", l.neb_path_xyz_file(next)),
            ("neb_optimized_xyz", l.neb_path_optimized_xyz_file(next)),
            ("neb_log", l.neb_path_log_file(next)),
            ("g16_dir", l.g16_dir()),
        ];
        Ok(entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect())
    }

    /// Immutable snapshot handed to a pipeline run.
    ///
    /// Every setting becomes a variable (`{neb_fmax}`, `{xtb_gfn}`, ...);
    /// unset optional settings are left out.
    pub fn stage_inputs(&self) -> Result<StageInputs, ProjectError> {
        let mut inputs = StageInputs::new(self.layout.work_dir())
            .with_var("project", self.name())
            .with_var("neb_iteration", self.next_neb_iteration()?.to_string())
            .with_var("num_nodes", self.settings.num_nodes().to_string());

        let value = serde_json::to_value(&self.settings).map_err(|source| {
            ProjectError::Settings {
                path: self.layout.settings_file(),
                source,
            }
        })?;
        if let serde_json::Value::Object(fields) = value {
            for (key, value) in fields {
                let text = match value {
                    serde_json::Value::Null => continue,
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                inputs = inputs.with_var(key, text);
            }
        }

        for (key, path) in self.artifacts()? {
            inputs = inputs.with_artifact(key, path);
        }
        Ok(inputs)
    }
}
