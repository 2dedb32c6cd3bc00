//! # applet CLI
//!
//! Runs hosted script apps in a terminal and inspects their UI trees and
//! effects.

mod commands;
mod outline;

use applet_types::Decision;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "applet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "applet.yml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot a script and drive it from stdin
    Run {
        /// Script source file
        script: PathBuf,

        /// Initial argument passed to `init` (JSON)
        #[arg(long)]
        arg: Option<String>,

        /// Answer every permission prompt with this decision
        #[arg(long, value_enum)]
        auto: Option<AutoDecision>,
    },

    /// Render a UI tree file as a text outline
    Render {
        /// JSON file holding a `{type, props, children}` tree
        tree: PathBuf,
    },

    /// Execute one effect and print its result message
    Effect {
        /// JSON file holding the effect record
        effect: PathBuf,

        /// Answer the permission prompt with this decision
        #[arg(long, value_enum)]
        auto: Option<AutoDecision>,
    },
}

#[derive(Copy, Clone, ValueEnum)]
pub enum AutoDecision {
    Deny,
    Once,
    Always,
}

impl From<AutoDecision> for Decision {
    fn from(auto: AutoDecision) -> Self {
        match auto {
            AutoDecision::Deny => Decision::Deny,
            AutoDecision::Once => Decision::AllowOnce,
            AutoDecision::Always => Decision::AllowAlways,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for command output.
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { script, arg, auto } => {
            commands::run_script(&cli.config, &script, arg.as_deref(), auto.map(Decision::from))
                .await
        }
        Commands::Render { tree } => commands::render_tree(&tree),
        Commands::Effect { effect, auto } => {
            commands::run_effect(&cli.config, &effect, auto.map(Decision::from)).await
        }
    }
}
