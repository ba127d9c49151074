//! Sluice CLI - streaming geodata pipelines

mod args;
mod config;
mod errors;
mod logging;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use config::Config;
use rhi_sluice_core::{Pipeline, PipelineError, TaskRegistry, TaskSpec, Workflow, detect_format};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Streaming geodata pipelines", long_about = None)]
struct Cli {
    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet output (only errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to config file (default: ~/.config/sluice/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline to completion
    Run {
        /// Workflow file (YAML, TOML, or JSON)
        #[arg(long)]
        workflow: Option<PathBuf>,
        /// Tasks as --<task-type> [default] [key=value ...]
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        tasks: Vec<String>,
    },

    /// Instantiate and connect a pipeline without running it
    Check {
        /// Workflow file (YAML, TOML, or JSON)
        #[arg(long)]
        workflow: Option<PathBuf>,
        /// Print the resolved task list in this format (yaml, toml, json)
        #[arg(long)]
        emit: Option<String>,
        /// Tasks as --<task-type> [default] [key=value ...]
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        tasks: Vec<String>,
    },

    /// List available tasks
    List,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Generate man page
    Manpage,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config, config_error) = match Config::load(cli.config.as_deref()) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    let verbose = cli.verbose || config.defaults.verbose;
    let quiet = cli.quiet || config.defaults.quiet;
    logging::init(logging::level(
        verbose,
        quiet,
        config.defaults.log_level.as_deref(),
    ));
    if let Some(e) = config_error {
        warn!(error = %e, "ignoring config file");
    }

    let mut registry = TaskRegistry::new();
    rhi_sluice_tasks::register_all(&mut registry);

    match dispatch(cli.command, &config, Arc::new(registry)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn dispatch(command: Commands, config: &Config, registry: Arc<TaskRegistry>) -> Result<()> {
    match command {
        Commands::Run { workflow, tasks } => cmd_run(config, registry, workflow.as_deref(), &tasks),
        Commands::Check {
            workflow,
            emit,
            tasks,
        } => cmd_check(config, registry, workflow.as_deref(), emit.as_deref(), &tasks),
        Commands::List => cmd_list(&registry),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "sluice", &mut std::io::stdout());
            Ok(())
        }
        Commands::Manpage => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            man.render(&mut std::io::stdout())?;
            Ok(())
        }
    }
}

/// Log every cause; one line per failed task for aggregated failures.
fn report(err: &anyhow::Error) {
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::TasksFailed(failures)) => {
            for failure in failures {
                error!(task = %failure.task_id, "{}", failure.error);
            }
            error!("{} task(s) failed", failures.len());
        }
        _ => error!("{:#}", err),
    }
}

/// Task specs from a workflow file or from the command line, with configured
/// defaults merged in.
fn load_specs(
    config: &Config,
    registry: &TaskRegistry,
    workflow: Option<&Path>,
    tasks: &[String],
) -> Result<Vec<TaskSpec>> {
    let mut specs = match (workflow, tasks.is_empty()) {
        (Some(_), false) => bail!("Give either --workflow or task arguments, not both"),
        (None, true) => bail!("No tasks given. Use --workflow <FILE> or --<task-type> arguments"),
        (Some(path), true) => read_workflow(path)?.tasks,
        (None, false) => args::parse_task_args(tasks)?,
    };
    config.apply_task_defaults(&mut specs, registry);
    Ok(specs)
}

fn read_workflow(path: &Path) -> Result<Workflow> {
    let data = std::fs::read(path).map_err(|e| anyhow::anyhow!(errors::file_read_error(path, &e)))?;
    Workflow::from_bytes(&data, Some(&path.to_string_lossy()))
        .with_context(|| format!("Invalid workflow file '{}'", path.display()))
}

fn cmd_run(
    config: &Config,
    registry: Arc<TaskRegistry>,
    workflow: Option<&Path>,
    tasks: &[String],
) -> Result<()> {
    let specs = load_specs(config, &registry, workflow, tasks)?;

    let mut pipeline = Pipeline::new(registry);
    pipeline.prepare(&specs)?;
    pipeline.execute()?;
    pipeline.await_completion()?;

    info!(tasks = specs.len(), "done");
    Ok(())
}

fn cmd_check(
    config: &Config,
    registry: Arc<TaskRegistry>,
    workflow: Option<&Path>,
    emit: Option<&str>,
    tasks: &[String],
) -> Result<()> {
    let specs = load_specs(config, &registry, workflow, tasks)?;

    let mut pipeline = Pipeline::new(registry);
    pipeline.prepare(&specs)?;

    if let Some(format) = emit {
        let format = detect_format(&format!("workflow.{}", format))
            .with_context(|| format!("Unknown workflow format '{}'", format))?;
        let workflow = Workflow { tasks: specs };
        let bytes = workflow.to_bytes(format)?;
        print!("{}", String::from_utf8_lossy(&bytes));
        return Ok(());
    }

    println!("Tasks:");
    for id in pipeline.task_ids() {
        println!("  {}", id);
    }
    println!();
    println!("Bindings:");
    for binding in pipeline.bindings() {
        println!("  {}", binding);
    }
    println!();
    println!(
        "OK: {} tasks, {} bindings",
        pipeline.task_ids().count(),
        pipeline.bindings().len()
    );
    Ok(())
}

fn cmd_list(registry: &TaskRegistry) -> Result<()> {
    println!("Available tasks:\n");

    for task in registry.describe() {
        if task.aliases.is_empty() {
            println!("  {}", task.name);
        } else {
            println!("  {} ({})", task.name, task.aliases.join(", "));
        }
        if !task.description.is_empty() {
            println!("    {}", task.description);
        }
        if !task.ports.is_empty() {
            println!("    ports: {}", task.ports);
        }
        println!();
    }

    println!("Total: {} tasks", registry.len());
    Ok(())
}
