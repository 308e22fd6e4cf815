use crate::cli::ProjectArgs;
use crate::error::Result;
use nebflow_core::project::Project;
use std::fmt::Write;

/// Text listing of which results exist.
pub fn render(project: &Project) -> Result<String> {
    let layout = project.layout();
    let mut out = String::new();
    let _ = writeln!(out, "Project: {} ({})", project.name(), layout.work_dir().display());

    let fixed = [
        ("initial structure", layout.init_traj_file()),
        ("final structure", layout.final_traj_file()),
        ("initial path", layout.initial_path_traj_file()),
    ];
    for (label, path) in fixed {
        let mark = if path.exists() { "x" } else { " " };
        let _ = writeln!(out, "  [{mark}] {label:<18} {}", path.display());
    }

    let neb = layout.neb_traj_files()?;
    match neb.last() {
        Some((latest, _)) => {
            let _ = writeln!(out, "  NEB iterations: {} (latest {latest})", neb.len());
        }
        None => {
            let _ = writeln!(out, "  NEB iterations: none");
        }
    }
    Ok(out)
}

pub fn run(args: ProjectArgs) -> Result<()> {
    let project = Project::open(&args.project)?;
    print!("{}", render(&project)?);
    Ok(())
}
