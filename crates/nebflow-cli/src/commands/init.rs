use crate::cli::InitArgs;
use crate::error::Result;
use nebflow_core::project::Project;
use tracing::info;

pub fn run(args: InitArgs) -> Result<()> {
    let project = Project::create(&args.dir, &args.name)?;
    let path = project.layout().settings_file();
    info!("Project file written to {}", path.display());
    println!("Created {}", path.display());
    Ok(())
}
