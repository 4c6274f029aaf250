//! Plan-driven infrastructure change executor.
//!
//! Walks a JSON plan step by step, asking an external decision oracle what to
//! do before every tool dispatch. Command execution happens on a pty so
//! interactive programs (password prompts included) work; the operator's
//! terminal is bridged to the child for the duration of each command.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use conductor::engine::PlanStepEngine;
use conductor::exit_codes;
use conductor::io::config::{EngineConfig, load_config, write_config};
use conductor::io::git::Git;
use conductor::io::human::ConsoleHuman;
use conductor::io::interactive::{CommandRequest, CommandRunner, InteractiveRunner};
use conductor::io::oracle::ExternalProcessOracle;
use conductor::io::plan_store::load_plan;
use conductor::io::run_log::{RunLogger, new_run_id};
use conductor::io::tools::ToolPalette;
use conductor::logging;

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Oracle-guided executor for infrastructure change plans"
)]
struct Cli {
    /// Working directory for the run.
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `.conductor/config.toml` if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Check a plan file against the schema without running it.
    Validate {
        #[arg(long)]
        plan: PathBuf,
    },
    /// Execute a plan to completion.
    Run {
        #[arg(long)]
        plan: PathBuf,
    },
    /// Run one command on a pty with the inactivity timeout, as the engine
    /// would.
    Exec {
        /// Inactivity timeout override in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Command line, run via `/bin/sh -c`.
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("resolve root {}", cli.root.display()))?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Validate { plan } => cmd_validate(&plan),
        Command::Run { plan } => cmd_run(&root, &plan),
        Command::Exec {
            timeout_secs,
            command,
        } => cmd_exec(&root, timeout_secs, &command),
    }
}

fn config_path(root: &Path) -> PathBuf {
    root.join(".conductor").join("config.toml")
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let path = config_path(root);
    if path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(&path, &EngineConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_validate(plan_path: &Path) -> Result<i32> {
    let plan = load_plan(plan_path)?;
    println!("plan ok: {} steps", plan.len());
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, plan_path: &Path) -> Result<i32> {
    let config = load_config(&config_path(root))?;
    let plan = load_plan(plan_path)?;

    let runner = InteractiveRunner::new(
        root.to_path_buf(),
        config.poll_interval(),
        config.output_limit_bytes,
    );
    let oracle = ExternalProcessOracle::new(
        config.oracle.command.clone(),
        root.to_path_buf(),
        config.oracle_timeout(),
        config.output_limit_bytes,
    );
    let human = ConsoleHuman;
    let git = Git::new(root, config.git_timeout());
    let palette = ToolPalette::new(
        &runner,
        &oracle,
        &oracle,
        &human,
        &oracle,
        &git,
        root,
        config.command_timeout(),
    );

    let logger = RunLogger::create(root, &new_run_id())?;
    println!("run {} (logs in {})", logger.run_id(), logger.dir().display());

    let mut engine = PlanStepEngine::new(&plan, &oracle, &palette, &config, root, Some(&logger));
    engine.run()?;

    let exec = engine.execution();
    println!(
        "completed {} of {} steps ({} oracle consultations)",
        exec.completed_steps.len(),
        plan.len(),
        exec.total_attempts
    );
    Ok(exit_codes::OK)
}

fn cmd_exec(root: &Path, timeout_secs: Option<u64>, command: &[String]) -> Result<i32> {
    let config = load_config(&config_path(root))?;
    let timeout = timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.command_timeout());
    let runner = InteractiveRunner::new(
        root.to_path_buf(),
        config.poll_interval(),
        config.output_limit_bytes,
    );
    let transcript = runner.run(&CommandRequest {
        command: command.join(" "),
        workdir: None,
        timeout,
    })?;
    if transcript.timed_out {
        eprintln!("command killed after {}s of inactivity", timeout.as_secs());
        return Ok(exit_codes::TIMED_OUT);
    }
    Ok(transcript.exit_code.unwrap_or(exit_codes::INVALID))
}
