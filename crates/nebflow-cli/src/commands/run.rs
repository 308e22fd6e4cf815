use crate::cli::RunArgs;
use crate::config::PlanFile;
use crate::error::{CliError, Result};
use crate::progress::RunProgress;
use nebflow_core::app::{Controller, RunReport, Supervisor};
use nebflow_core::domain::{ControllerError, PipelineEvent, RunOutcome};
use nebflow_core::ports::{Clock, IdGenerator, LogSink, SystemClock, UlidGenerator};
use nebflow_core::project::Project;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const STATUS_REFRESH: Duration = Duration::from_millis(250);

pub async fn run(args: RunArgs, quiet: bool) -> Result<()> {
    let project = Project::open(&args.project)?;
    let plan = PlanFile::load(&args.plan)?;
    let vars = structure_vars(&args)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(SystemClock));
    let pipeline = plan.build_pipeline(
        project.name(),
        project.next_neb_iteration()?,
        Arc::clone(&ids),
    )?;

    let progress = RunProgress::new(pipeline.len(), !quiet);
    let log: Arc<dyn LogSink> = Arc::new(progress.log_sink());
    let supervisor = Supervisor::new(
        plan.supervisor_config(args.poll_interval_ms),
        clock,
        Arc::clone(&log),
    );
    let mut controller = Controller::new(project, supervisor, ids, log);

    let run_id = controller.launch_with_vars(pipeline, vars)?;
    info!("Run {run_id} launched");

    let report = drive(&mut controller, &progress).await;
    progress.finish();
    let report = report?;

    if args.json {
        let json = serde_json::to_string_pretty(&report).map_err(std::io::Error::from)?;
        println!("{json}");
    } else if !quiet {
        println!(
            "Pipeline {} ({} of {} stages completed)",
            report.outcome,
            report.stages_completed,
            plan.stages.len()
        );
    }

    match report.outcome {
        RunOutcome::Completed => Ok(()),
        outcome => Err(CliError::Run {
            outcome,
            detail: report.failure.as_ref().map(ToString::to_string),
        }),
    }
}

/// `{init_input}` / `{final_input}` from the command line.
fn structure_vars(args: &RunArgs) -> Result<Vec<(String, String)>> {
    let mut vars = Vec::new();
    let given = [
        ("init_input", args.init_structure.as_deref()),
        ("final_input", args.final_structure.as_deref()),
    ];
    for (key, path) in given {
        if let Some(path) = path {
            vars.push((key.to_string(), absolute(path)?));
        }
    }
    Ok(vars)
}

fn absolute(path: &Path) -> Result<String> {
    let path = std::fs::canonicalize(path).map_err(|e| {
        CliError::Argument(format!("cannot read structure '{}': {e}", path.display()))
    })?;
    Ok(path.display().to_string())
}

/// Apply events until the run ends, refreshing the display on its own timer.
async fn drive(controller: &mut Controller, progress: &RunProgress) -> Result<RunReport> {
    let mut refresh = tokio::time::interval(STATUS_REFRESH);
    refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = controller.next_event() => match event {
                Some(PipelineEvent::Terminal { outcome, .. }) => {
                    debug!("Terminal event received: {outcome}");
                    progress.update(&controller.snapshot());
                }
                Some(_) => progress.update(&controller.snapshot()),
                None => break,
            },
            _ = refresh.tick() => progress.update(&controller.snapshot()),
            signal = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl-C: {e}");
                    continue;
                }
                progress.line("Interrupted, cancelling the pipeline...");
                match controller.request_cancel() {
                    Ok(()) | Err(ControllerError::NoActiveRun) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    controller
        .last_report()
        .cloned()
        .ok_or_else(|| CliError::Config("the run ended without a report".to_string()))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn setup(plan: &str) -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::create(dir.path(), "p").unwrap();
        let plan_path = dir.path().join("plan.toml");
        std::fs::write(&plan_path, plan).unwrap();
        (dir, project.layout().settings_file(), plan_path)
    }

    fn args(project: PathBuf, plan: PathBuf) -> RunArgs {
        RunArgs {
            project,
            plan,
            init_structure: None,
            final_structure: None,
            poll_interval_ms: None,
            json: false,
        }
    }

    #[tokio::test]
    async fn runs_a_plan_to_completion() {
        let (dir, project, plan) = setup(
            r#"
poll_interval_ms = 10

[[stage]]
name = "load_init"
role = "optimize_initial"
program = "sh"
args = ["-c", "cp {init_input} {init_traj}"]

[[stage]]
name = "neb"
role = "neb"
mode = "pollable"
program = "sh"
args = ["-c", "sleep 0.05 && cp {init_traj} {neb_traj}"]
requires = ["init_traj"]
"#,
        );
        let structure = dir.path().join("reactant.xyz");
        std::fs::write(&structure, b"3\n\n").unwrap();

        let mut run_args = args(project, plan);
        run_args.init_structure = Some(structure);
        run(run_args, true).await.unwrap();

        assert!(dir.path().join("p_init.traj").exists());
        assert!(dir.path().join("p_neb_path_1.traj").exists());
    }

    #[tokio::test]
    async fn failing_stage_is_an_error() {
        let (_dir, project, plan) = setup(
            r#"
poll_interval_ms = 10

[[stage]]
name = "interpolate"
program = "sh"
args = ["-c", "exit 3"]

[[stage]]
name = "never"
program = "true"
"#,
        );

        let err = run(args(project, plan), true).await.unwrap_err();

        assert!(matches!(
            err,
            CliError::Run {
                outcome: RunOutcome::Failed,
                detail: Some(_)
            }
        ));
    }

    #[test]
    fn missing_structure_is_an_argument_error() {
        let mut run_args = args(PathBuf::from("p.json"), PathBuf::from("plan.toml"));
        run_args.final_structure = Some(PathBuf::from("/nonexistent/product.xyz"));
        assert!(matches!(
            structure_vars(&run_args),
            Err(CliError::Argument(_))
        ));
    }
}
