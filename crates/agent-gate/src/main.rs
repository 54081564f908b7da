//! `agent-gate` command line.
//!
//! Runs the URL filter and script screener against ad-hoc input, printing
//! JSON to stdout. Logs go to stderr.

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use agent_gate_core::{GateConfig, SystemClock};
use agent_gate_security::{AuditLog, SecurityGuard};
use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Actor recorded for checks made from the command line.
const CLI_ACTOR: &str = "cli";

#[derive(Parser, Debug)]
#[command(name = "agent-gate")]
#[command(about = "Screen URLs and scripts against agent-gate rules")]
#[command(version)]
struct Cli {
    /// TOML configuration file (built-in defaults when omitted)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate an outbound URL
    CheckUrl { url: String },

    /// Screen script or command text
    CheckScript { script: String },

    /// Neutralise blocked fragments in script text
    Sanitize { script: String },

    /// Print the effective configuration
    ShowConfig,
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let allowed = run(cli.command, &config)?;
    Ok(if allowed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn load_config(path: Option<&Path>) -> anyhow::Result<GateConfig> {
    match path {
        Some(path) => GateConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(GateConfig::default()),
    }
}

/// Print the command's JSON output and return whether the input passed.
fn run(command: Command, config: &GateConfig) -> anyhow::Result<bool> {
    // The CLI keeps decisions in memory only; `log_path` applies to the
    // long-running gateway.
    let audit = Arc::new(AuditLog::new(&config.security.audit, SystemClock::shared()));
    let guard = SecurityGuard::from_config(&config.security, audit)
        .context("failed to build security rules")?;

    let (output, allowed) = match command {
        Command::CheckUrl { url } => {
            let result = guard.check_url(CLI_ACTOR, &url);
            let allowed = result.allowed;
            (serde_json::to_value(result)?, allowed)
        }
        Command::CheckScript { script } => {
            let verdict = guard.check_script(CLI_ACTOR, &script);
            let allowed = verdict.allowed;
            (serde_json::to_value(verdict)?, allowed)
        }
        Command::Sanitize { script } => {
            let sanitized = guard.sandbox().sanitize_script(&script);
            (json!({ "sanitized": sanitized }), true)
        }
        Command::ShowConfig => (serde_json::to_value(config)?, true),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(allowed)
}
