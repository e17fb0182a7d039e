//! Argument parsing and top-level dispatch. Trimmed to the surface SPEC_FULL.md
//! names (`list`, `run`, `daemon`, `emit`, `verify`) from the teacher's much
//! larger `Cli`/`GlobalOpts` shape, kept in the same derive style.

use clap::{ArgAction, Parser, Subcommand};

use crate::logging::{self, Verbosity};

/// A CLI for running declarative, AI-assisted workflows.
#[derive(Parser, Debug)]
#[command(
    name = "workflow",
    version,
    about,
    disable_help_subcommand = true,
    arg_required_else_help = true,
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Default)]
struct GlobalOpts {
    /// Increase stderr verbosity (`-v` = info, `-vv` = debug)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Silence progress output; only errors remain
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Enable debug logging (alias for -vv)
    #[arg(short = 'd', long, global = true)]
    debug: bool,

    /// Root directory holding `definitions/`, `permissions/`, `logs/`, etc.
    /// Defaults to `./workflows`.
    #[arg(short = 'C', long = "config-file", global = true)]
    root: Option<String>,

    /// Command used to invoke the configured LLM, e.g. `claude -p`.
    /// Overrides `WORKFLOW_LLM_COMMAND`.
    #[arg(long = "llm-command", global = true)]
    llm_command: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List workflow definitions available under the workflows root.
    List,

    /// Run a named workflow to completion (or to its first pause/failure).
    Run {
        name: String,

        /// Seed or override a declared variable, `key=value`.
        #[arg(long = "var", value_name = "KEY=VALUE")]
        var: Vec<String>,

        /// Execute the permission/budget/step pipeline without dispatching steps.
        #[arg(long)]
        dry_run: bool,

        /// Resume a paused or crashed run from its last checkpoint.
        #[arg(long)]
        resume: Option<String>,
    },

    /// Manage the trigger daemon (cron/watch/event polling loop).
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },

    /// Emit an event for the daemon's event bus to pick up on its next poll.
    Emit {
        event: String,

        /// Attach a data field to the event, `key=value`.
        #[arg(long = "data", value_name = "KEY=VALUE")]
        data: Vec<String>,
    },

    /// Verify the hash-chain integrity of a run's audit log.
    Verify { run_id: String },
}

#[derive(Subcommand, Debug)]
enum DaemonAction {
    Start,
    Stop,
    Status,
}

fn parse_kv_pairs(pairs: &[String]) -> Result<std::collections::BTreeMap<String, workflow_kernel::value::Value>, String> {
    let mut map = std::collections::BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected `key=value`, got `{pair}`"))?;
        map.insert(key.to_string(), workflow_kernel::value::parse_literal(value));
    }
    Ok(map)
}

fn llm_command(cli_flag: Option<&str>) -> Vec<String> {
    let raw = cli_flag
        .map(str::to_string)
        .or_else(|| std::env::var("WORKFLOW_LLM_COMMAND").ok())
        .unwrap_or_else(|| "true".to_string());
    raw.split_whitespace().map(str::to_string).collect()
}

/// Parses argv, wires up logging, and dispatches to the matching command
/// module. Returns the process exit code rather than calling
/// `std::process::exit` itself so tests can assert on the returned value.
pub async fn run() -> i32 {
    let cli = Cli::parse();

    let verbosity = Verbosity::from_flags(cli.global.quiet, cli.global.verbose, cli.global.debug);
    logging::init(verbosity);

    let root = cli.global.root.as_ref().map(std::path::PathBuf::from);
    let config = match workflow_core::config::EngineConfig::load(root.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("failed to load configuration: {e}");
            return crate::commands::EXIT_VALIDATION_ERROR;
        }
    };
    let command = llm_command(cli.global.llm_command.as_deref());

    match cli.command {
        Commands::List => crate::commands::list::run(&config),
        Commands::Run { name, var, dry_run, resume } => {
            let variables = match parse_kv_pairs(&var) {
                Ok(v) => v,
                Err(e) => {
                    tracing::error!("{e}");
                    return crate::commands::EXIT_VALIDATION_ERROR;
                }
            };
            crate::commands::run::run(&config, &command, &name, variables, dry_run, resume)
        }
        Commands::Daemon { action } => match action {
            DaemonAction::Start => crate::commands::daemon::start(&config, &command).await,
            DaemonAction::Stop => crate::commands::daemon::stop(&config),
            DaemonAction::Status => crate::commands::daemon::status(&config),
        },
        Commands::Emit { event, data } => {
            let data = match parse_kv_pairs(&data) {
                Ok(v) => v,
                Err(e) => {
                    tracing::error!("{e}");
                    return crate::commands::EXIT_VALIDATION_ERROR;
                }
            };
            crate::commands::emit::run(&config, &event, data)
        }
        Commands::Verify { run_id } => crate::commands::verify::run(&config, &run_id),
    }
}
