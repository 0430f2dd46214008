//! Warden CLI
//!
//! Runs simulated inference sessions and inspects configuration.
//!
//! # Usage
//! ```bash
//! warden run [--config warden.toml] [--steps 200] [--seed 7] [--format json] [--verbose]
//! warden check-config warden.toml
//! warden rules
//! warden default-config > warden.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use warden_core::types::Decision;
use warden_core::{IntegrityReport, SessionConfig, SessionKind, VetoRule};
use warden_runtime::{HeuristicPolicy, Session};

mod simulate;

use simulate::Flight;

/// Warden - supervised, alignment-scored drone decisions
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fly a simulated session with the built-in heuristic policy
    Run {
        /// Session configuration (TOML); defaults are used when omitted
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Number of sensor frames to generate
        #[arg(long, default_value = "200")]
        steps: usize,

        /// Seed of the synthetic flight
        #[arg(long, default_value = "7")]
        seed: u64,

        /// Milliseconds between frames
        #[arg(long, default_value = "20")]
        interval_ms: u64,

        /// Fraction of frames carrying a corrupt battery reading
        #[arg(long, default_value = "0.02")]
        glitch_rate: f64,

        /// Label the session as training instead of inference
        #[arg(long)]
        training: bool,

        /// Output format for decisions and the final report
        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Validate a configuration file
    CheckConfig {
        /// Path to the TOML file
        path: PathBuf,
    },

    /// List the veto rule table in default priority order
    Rules,

    /// Print the default configuration as TOML
    DefaultConfig,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            steps,
            seed,
            interval_ms,
            glitch_rate,
            training,
            format,
        } => {
            let config = match config {
                Some(path) => load_config(&path)?,
                None => SessionConfig::default(),
            };
            let kind = if training {
                SessionKind::Training
            } else {
                SessionKind::Inference
            };
            let source = Flight::new(seed)
                .with_glitch_rate(glitch_rate)
                .script(steps, Duration::from_millis(interval_ms));

            let report = run(config, kind, source, format).await?;
            print_report(&report, format)?;
        }
        Commands::CheckConfig { path } => {
            let config = load_config(&path)?;
            config
                .validate()
                .with_context(|| format!("{} is not a valid configuration", path.display()))?;
            println!("{} {}", "✓".green(), path.display());
            println!("   failure limit: {}", config.supervision_policy().failure_limit);
            println!("   veto rules:    {}", config.veto_rules.join(", "));
            println!("   no-fly zones:  {}", config.no_fly_zones.len());
            match config.target_hz {
                Some(hz) => println!("   frame rate:    {hz} Hz"),
                None => println!("   frame rate:    set by the source"),
            }
        }
        Commands::Rules => {
            println!("Veto rule table v{}", warden_core::safety::RULE_TABLE_VERSION);
            for (priority, rule) in VetoRule::DEFAULT_ORDER.iter().enumerate() {
                println!("  {}. {:<20} {}", priority + 1, rule.id().bold(), rule.description());
            }
        }
        Commands::DefaultConfig => {
            print!("{}", SessionConfig::default().to_toml_string()?);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Logs go to stderr so decisions on stdout stay machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> Result<SessionConfig> {
    SessionConfig::from_file(path).with_context(|| format!("failed to load {}", path.display()))
}

async fn run(
    config: SessionConfig,
    kind: SessionKind,
    source: warden_runtime::ScriptedSource,
    format: Format,
) -> Result<IntegrityReport> {
    let mut session = Session::start(
        config,
        kind,
        Arc::new(HeuristicPolicy::new()),
        Box::new(source),
    )?;
    tracing::info!(session = %session.id(), "simulation started");

    while let Some(decision) = session.next_decision().await {
        print_decision(&decision, format)?;
    }

    Ok(session.end().await)
}

fn print_decision(decision: &Decision, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(decision)?),
        Format::Text => {
            let line = decision.to_string();
            if decision.vetoed {
                println!("{}", line.red());
            } else if decision.degraded.is_some() {
                println!("{}", line.yellow());
            } else {
                println!("{}", line);
            }
        }
    }
    Ok(())
}

fn print_report(report: &IntegrityReport, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(report)?),
        Format::Text => {
            println!();
            println!("{}", report);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_round_trips_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let toml = SessionConfig::default().to_toml_string().unwrap();
        file.write_all(toml.as_bytes()).unwrap();

        let loaded = load_config(file.path()).unwrap();
        assert!(loaded.validate().is_ok());
        assert_eq!(loaded.queue_capacity, SessionConfig::default().queue_capacity);
    }

    #[test]
    fn test_load_config_reports_path() {
        let err = load_config(Path::new("/nonexistent/warden.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/warden.toml"));
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::parse_from(["warden", "run", "--steps", "5", "--format", "json", "-v"]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Run { steps, format, .. } => {
                assert_eq!(steps, 5);
                assert!(format == Format::Json);
            }
            _ => panic!("expected run"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_run_accounts_for_every_frame() {
        let config = SessionConfig::default().with_staleness_threshold_ms(60_000);
        let source = Flight::new(5).with_glitch_rate(0.1).script(50, Duration::from_millis(20));

        let report = run(config, SessionKind::Inference, source, Format::Json)
            .await
            .unwrap();
        assert_eq!(report.total_steps, 50);
        assert_eq!(report.drift_count, report.dropped_samples);
    }
}
