use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "nebflow - run multi-stage NEB calculation pipelines with progress reporting and cancellation."
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output and the progress display
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a project file with default settings.
    Init(InitArgs),
    /// Run a pipeline plan against a project.
    Run(RunArgs),
    /// Show which results of a project exist.
    Status(ProjectArgs),
    /// Remove every computed result of a project (the project file is kept).
    Clean(ProjectArgs),
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory the project lives in; created if missing.
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Project name; results are written as <NAME>_*.
    #[arg(short, long, value_name = "NAME")]
    pub name: String,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the project file (<name>.json).
    #[arg(value_name = "PROJECT")]
    pub project: PathBuf,

    /// Pipeline plan in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub plan: PathBuf,

    /// Initial structure, available to stages as {init_input}.
    #[arg(long = "init", value_name = "PATH")]
    pub init_structure: Option<PathBuf>,

    /// Final structure, available to stages as {final_input}.
    #[arg(long = "final", value_name = "PATH")]
    pub final_structure: Option<PathBuf>,

    /// Override the plan's poll interval in milliseconds.
    #[arg(long, value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ProjectArgs {
    /// Path to the project file (<name>.json).
    #[arg(value_name = "PROJECT")]
    pub project: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_accepts_structures_and_global_flags() {
        let cli = Cli::try_parse_from([
            "nebflow", "run", "p.json", "--plan", "plan.toml", "--init", "r.xyz", "--final",
            "p.xyz", "-vv",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.plan, PathBuf::from("plan.toml"));
        assert_eq!(args.init_structure, Some(PathBuf::from("r.xyz")));
        assert!(!args.json);
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["nebflow", "-q", "-v", "status", "p.json"]).is_err());
    }

    #[test]
    fn run_requires_a_plan() {
        assert!(Cli::try_parse_from(["nebflow", "run", "p.json"]).is_err());
    }
}
