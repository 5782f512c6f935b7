use crate::config::{Config, SchedulingMode};
use crate::interpreter::{
    CommandEffect, CommandError, CommandHost, Engine, ExecutionOutcome, Program, ScriptScope,
    SourceProgram, Statement, Val,
};
use crate::scheduler;
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Cadence - a resumable script execution engine", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a program file (JSON)
    Run {
        /// Program to run
        program: PathBuf,

        /// Scheduling mode: blocking or cooperative
        #[arg(short = 'm', long = "mode")]
        mode: Option<String>,

        /// Only run statements on lines FIRST:LAST
        #[arg(long = "lines")]
        lines: Option<String>,

        /// Suppress completion messages and history
        #[arg(short = 'q', long = "quiet")]
        quiet: bool,
    },

    /// Assemble and validate a program file without running it
    Check {
        /// Program to check
        program: PathBuf,
    },

    /// Print the effective configuration
    Config,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            program,
            mode,
            lines,
            quiet,
        } => {
            let mode = mode
                .map(|m| m.parse::<SchedulingMode>())
                .transpose()?;
            let config = Config::builder()
                .config_path(cli.config)
                .mode(mode)
                .quiet(quiet.then_some(true))
                .build()?;
            init_tracing(&config);

            let lines = lines.as_deref().map(parse_lines).transpose()?;
            let program = load_program(&program)?;
            run_program(config, program, lines).await
        }

        Commands::Check { program } => {
            let config = Config::builder().config_path(cli.config).build()?;
            init_tracing(&config);

            let program = load_program(&program)?;
            println!(
                "{}: {} statements, {} functions",
                program.name(),
                program.len(),
                program.functions().len()
            );
            Ok(())
        }

        Commands::Config => {
            let config = Config::builder().config_path(cli.config).build()?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// Install the global subscriber; `RUST_LOG` wins over `logging.filter`
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    // A subscriber may already be installed by an embedding host
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Read and assemble a JSON program file
pub fn load_program(path: &Path) -> Result<Arc<Program>> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read program file: {}", path.display()))?;
    let source: SourceProgram = serde_json::from_str(&source)
        .with_context(|| format!("Failed to parse program file: {}", path.display()))?;
    let program = source
        .assemble()
        .with_context(|| format!("Invalid program: {}", path.display()))?;
    Ok(Arc::new(program))
}

/// `FIRST:LAST`
fn parse_lines(range: &str) -> Result<(u32, u32)> {
    let (first, last) = range
        .split_once(':')
        .ok_or_else(|| anyhow!("Line range must look like FIRST:LAST, got '{}'", range))?;
    let first = first.trim().parse().context("Invalid first line")?;
    let last = last.trim().parse().context("Invalid last line")?;
    if first > last {
        bail!("Line range {}:{} is empty", first, last);
    }
    Ok((first, last))
}

async fn run_program(config: Config, program: Arc<Program>, lines: Option<(u32, u32)>) -> Result<()> {
    let mode = config.engine.mode;
    let engine = Engine::new(config, Arc::new(ConsoleHost));

    let stopper = engine.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping script");
            stopper.request_stop();
        }
    });

    let start = move |engine: &Engine| match lines {
        Some((first, last)) => engine.run_lines(program, first, last),
        None => engine.run(program),
    };
    let outcome = match mode {
        SchedulingMode::Cooperative => {
            let first = start(&engine);
            scheduler::drive(&engine, first).await
        }
        SchedulingMode::Blocking => {
            let worker = engine.clone();
            tokio::task::spawn_blocking(move || start(&worker))
                .await
                .context("Script worker panicked")?
        }
    };
    interrupt.abort();

    match outcome {
        ExecutionOutcome::Completed(Val::Null) => Ok(()),
        ExecutionOutcome::Completed(value) => {
            println!("{}", value);
            Ok(())
        }
        ExecutionOutcome::Stopped => {
            eprintln!("Script stopped");
            Ok(())
        }
        ExecutionOutcome::Error(report) => Err(anyhow!("{}", report)),
        // Only a parked context is left suspended; the CLI cannot resume it
        ExecutionOutcome::Suspended(suspended) => Err(anyhow!(
            "Script left suspended ({})",
            suspended.reason
        )),
    }
}

/* ===================== Console Host ===================== */

/// Host for the command line: `echo` and `print` write to stdout
#[derive(Debug, Default)]
pub struct ConsoleHost;

impl CommandHost for ConsoleHost {
    fn dispatch(
        &self,
        command: &str,
        statement: &Statement,
        scope: &mut dyn ScriptScope,
    ) -> Result<CommandEffect, CommandError> {
        match command {
            "echo" | "print" => {
                let args = statement.args();
                let text = if args.is_empty() {
                    String::new()
                } else {
                    scope.evaluate(args)?.to_string()
                };
                println!("{}", text);
                Ok(CommandEffect::Continue)
            }
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }

    fn report(&self, message: &str) {
        eprintln!("{}", message);
    }
}
