use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use mimi::agent::AgentSet;
use mimi::backend::OllamaBackend;
use mimi::config::Config;
use mimi::orchestration::{Journal, JsonlSink, LogSink, NullSink, Runner};
use mimi::project::{Project, ValidatedProject};
use mimi::Result;

/// mimi - run a project's agents over its task graph
#[derive(Parser, Debug)]
#[command(name = "mimi")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    MIMI_DEBUG=1         Enable debug logging (alternative to --debug)\n    OLLAMA_BASE_URL      Inference server URL\n    OLLAMA_TEMPERATURE   Default sampling temperature\n    OLLAMA_TIMEOUT       Backend request timeout in seconds")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.mimi/mimi.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Validate and execute a project
    Run {
        /// Project file (.toml or .json)
        project: PathBuf,

        /// Initial input as JSON; anything unparseable is passed as a string
        #[arg(short, long)]
        input: Option<String>,

        /// Maximum agent calls in flight per wave
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Per agent call timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Stop scheduling after the first task failure
        #[arg(long)]
        stop_on_failure: bool,

        /// Also write the run result to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Append execution log entries to this file as JSON lines
        #[arg(long)]
        journal: Option<PathBuf>,
    },

    /// Validate a project and print its execution plan
    Validate {
        /// Project file (.toml or .json)
        project: PathBuf,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    mimi::log::init_with_debug(cli.debug);

    match execute(cli.command) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("Error: {}", e);
            ExitCode::from(2)
        }
    }
}

fn execute(command: Command) -> Result<ExitCode> {
    match command {
        Command::Run {
            project,
            input,
            max_concurrency,
            timeout,
            stop_on_failure,
            output,
            journal,
        } => {
            let mut config = Config::load()?;
            if let Some(n) = max_concurrency {
                config.max_concurrency = n;
            }
            if let Some(secs) = timeout {
                config.task_timeout_secs = secs;
            }
            config.stop_on_failure |= stop_on_failure;
            run_project(&project, input, &config, output.as_deref(), journal)
        }
        Command::Validate { project } => {
            let validated = load_validated(&project)?;
            print_plan(&validated);
            Ok(ExitCode::SUCCESS)
        }
        Command::Config => {
            let config = Config::load()?;
            println!("# {}", Config::config_path()?.display());
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_validated(path: &Path) -> Result<ValidatedProject> {
    Ok(Project::load(path)?.validate()?)
}

fn parse_input(raw: Option<String>, project: &ValidatedProject) -> Value {
    match raw {
        Some(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        None if !project.description().is_empty() => {
            Value::String(project.description().to_string())
        }
        None => Value::Null,
    }
}

fn run_project(
    path: &Path,
    input: Option<String>,
    config: &Config,
    output: Option<&Path>,
    journal_path: Option<PathBuf>,
) -> Result<ExitCode> {
    let project = load_validated(path)?;
    let initial_input = parse_input(input, &project);

    let backend = Arc::new(OllamaBackend::from_config(&config.backend)?);
    let agents = AgentSet::from_project(&project, backend);
    let sink: Arc<dyn LogSink> = match journal_path {
        Some(path) => Arc::new(JsonlSink::new(path)),
        None => Arc::new(NullSink),
    };
    let cancel = CancellationToken::new();
    let runner = Runner::for_project(&project, agents, config.runner_config())
        .with_journal(Journal::new(sink))
        .with_cancellation(cancel.clone());

    info!(
        project = project.name(),
        tasks = project.graph().len(),
        waves = project.graph().wave_count(),
        "starting run"
    );

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing current wave");
                eprintln!("Interrupted: finishing the current wave, skipping the rest");
                cancel.cancel();
            }
        });
        runner.run(initial_input).await
    });
    rt.shutdown_timeout(Duration::from_millis(100));

    let rendered = serde_json::to_string_pretty(&result)?;
    println!("{}", rendered);
    if let Some(path) = output {
        std::fs::write(path, &rendered)?;
    }

    for (task, problem) in result.problems() {
        eprintln!("  {}: {}", task, problem);
    }
    if let Some(halt) = &result.halt {
        eprintln!("Halted by '{}': {}", halt.task, halt.message);
    }
    eprintln!("Run {}: {}", result.run_id, result.status);

    Ok(if result.is_completed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_plan(project: &ValidatedProject) {
    let graph = project.graph();
    println!(
        "Project '{}': {} tasks, {} waves",
        project.name(),
        graph.len(),
        graph.wave_count()
    );
    for (generation, wave) in graph.waves().iter().enumerate() {
        println!("  Wave {}:", generation);
        for def in wave {
            let input = def.input_key.as_deref().unwrap_or("-");
            println!(
                "    {} [{}] {} -> {}",
                def.name, def.agent, input, def.output_key
            );
        }
    }
}
