mod cmd;
mod input;
mod output;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "trainer",
    about = "Inspect trainer profiles offline: reliability, compatibility and SDK operations",
    version,
    propagate_version = true
)]
struct Cli {
    /// Trainer config file (YAML). Defaults apply when omitted or missing.
    #[arg(long, global = true, env = "TRAINER_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every action of a profile against an exported session
    Reliability {
        /// Flattened profile (JSON)
        #[arg(long)]
        profile: PathBuf,
        /// Attach session snapshot (JSON)
        #[arg(long)]
        session: PathBuf,
        /// External entity catalog (JSON)
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Report whether a profile is ready for promotion
    Compat {
        /// Flattened profile (JSON)
        #[arg(long)]
        profile: PathBuf,
        /// Attach session snapshot (JSON); omit for a detached report
        #[arg(long)]
        session: Option<PathBuf>,
        /// Dependency validation outcome: pass, soft_fail or hard_fail
        #[arg(long)]
        dependency_status: Option<String>,
        /// External entity catalog (JSON)
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// List the SDK v1 operation catalog
    SdkOps,

    /// Inspect the trainer configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Reliability {
            profile,
            session,
            catalog,
        } => cmd::reliability::run(config_path, &profile, &session, catalog.as_deref(), cli.json),
        Commands::Compat {
            profile,
            session,
            dependency_status,
            catalog,
        } => cmd::compat::run(
            config_path,
            &profile,
            session.as_deref(),
            dependency_status.as_deref(),
            catalog.as_deref(),
            cli.json,
        ),
        Commands::SdkOps => cmd::sdk_ops::run(cli.json),
        Commands::Config { subcommand } => cmd::config::run(config_path, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
