//! ProjectLayout - 計算結果ファイルの命名規則
//!
//! すべての成果物は作業ディレクトリ直下に `<project>_<kind>.<ext>` の形で置かれます。
//! NEB は反復ごとに `<project>_neb_path_<n>.*` が増えていきます。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::StageRole;

const G16_DIR: &str = "g16data";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    work_dir: PathBuf,
    project_name: String,
}

impl ProjectLayout {
    pub fn new(work_dir: impl Into<PathBuf>, project_name: impl Into<String>) -> Self {
        Self {
            work_dir: work_dir.into(),
            project_name: project_name.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    fn file(&self, suffix: &str) -> PathBuf {
        self.work_dir.join(format!("{}_{suffix}", self.project_name))
    }

    pub fn settings_file(&self) -> PathBuf {
        self.work_dir.join(format!("{}.json", self.project_name))
    }

    pub fn init_traj_file(&self) -> PathBuf {
        self.file("init.traj")
    }

    pub fn init_xyz_file(&self) -> PathBuf {
        self.file("init.xyz")
    }

    pub fn init_log_file(&self) -> PathBuf {
        self.file("init.log")
    }

    pub fn final_traj_file(&self) -> PathBuf {
        self.file("final.traj")
    }

    pub fn final_xyz_file(&self) -> PathBuf {
        self.file("final.xyz")
    }

    pub fn final_log_file(&self) -> PathBuf {
        self.file("final.log")
    }

    pub fn initial_path_traj_file(&self) -> PathBuf {
        self.file("initial_path.traj")
    }

    pub fn initial_path_xyz_file(&self) -> PathBuf {
        self.file("initial_path.xyz")
    }

    pub fn neb_path_traj_file(&self, n: u32) -> PathBuf {
        self.file(&format!("neb_path_{n}.traj"))
    }

    pub fn neb_path_xyz_file(&self, n: u32) -> PathBuf {
        self.file(&format!("neb_path_{n}.xyz"))
    }

    pub fn neb_path_optimized_xyz_file(&self, n: u32) -> PathBuf {
        self.file(&format!("neb_path_optimized_{n}.xyz"))
    }

    pub fn neb_path_log_file(&self, n: u32) -> PathBuf {
        self.file(&format!("neb_path_{n}.log"))
    }

    pub fn g16_dir(&self) -> PathBuf {
        self.work_dir.join(G16_DIR)
    }

    /// Iteration number encoded in a `<project>_neb_path_<n>.traj` file name.
    fn neb_number(&self, path: &Path) -> Option<u32> {
        let name = path.file_name()?.to_str()?;
        let prefix = format!("{}_neb_path_", self.project_name);
        name.strip_prefix(&prefix)?
            .strip_suffix(".traj")?
            .parse()
            .ok()
    }

    /// All NEB trajectories sorted by iteration number.
    pub fn neb_traj_files(&self) -> io::Result<Vec<(u32, PathBuf)>> {
        let entries = match fs::read_dir(&self.work_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if let Some(n) = self.neb_number(&path) {
                files.push((n, path));
            }
        }
        files.sort_by_key(|(n, _)| *n);
        Ok(files)
    }

    /// Latest NEB iteration on disk; 0 if there is none.
    pub fn current_final_neb_number(&self) -> io::Result<u32> {
        Ok(self
            .neb_traj_files()?
            .last()
            .map(|(n, _)| *n)
            .unwrap_or(0))
    }

    /// Calculation log a controller may tail while `role` runs.
    pub fn log_file_for(&self, role: StageRole) -> Option<PathBuf> {
        match role {
            StageRole::OptimizeInitial | StageRole::SinglePointInitial => {
                Some(self.init_log_file())
            }
            StageRole::OptimizeFinal | StageRole::SinglePointFinal => Some(self.final_log_file()),
            StageRole::Neb { iteration } => Some(self.neb_path_log_file(iteration)),
            StageRole::Interpolate | StageRole::InitialGuess | StageRole::Custom => None,
        }
    }

    /// Remove every computed artifact and the g16 scratch directory.
    ///
    /// Files that do not exist are skipped. The settings file is kept.
    pub fn clear_all_results(&self) -> io::Result<usize> {
        let mut targets = vec![
            self.init_traj_file(),
            self.init_xyz_file(),
            self.init_log_file(),
            self.final_traj_file(),
            self.final_xyz_file(),
            self.final_log_file(),
            self.initial_path_traj_file(),
            self.initial_path_xyz_file(),
        ];
        for n in 1..=self.current_final_neb_number()? {
            targets.push(self.neb_path_traj_file(n));
            targets.push(self.neb_path_xyz_file(n));
            targets.push(self.neb_path_log_file(n));
            targets.push(self.neb_path_optimized_xyz_file(n));
        }

        let mut removed = 0;
        for path in targets {
            if remove_file(&path)? {
                removed += 1;
            }
        }
        match fs::remove_dir_all(self.g16_dir()) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        debug!(project = %self.project_name, removed, "results cleared");
        Ok(removed)
    }
}

impl StageRole {
    pub fn log_file(&self, layout: &ProjectLayout) -> Option<PathBuf> {
        layout.log_file_for(*self)
    }
}

fn remove_file(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
