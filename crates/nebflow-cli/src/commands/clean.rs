use crate::cli::ProjectArgs;
use crate::error::Result;
use nebflow_core::project::Project;
use tracing::info;

pub fn run(args: ProjectArgs) -> Result<()> {
    let project = Project::open(&args.project)?;
    let removed = project.layout().clear_all_results()?;
    info!("Removed {removed} result entries for '{}'", project.name());
    println!("Removed {removed} result file(s) of project '{}'", project.name());
    Ok(())
}
