//! lightwatch: the usage data pipeline's deployment tool.
//!
//! # Usage
//!
//! ```text
//! lightwatch init --stack LightsStack --template home
//! lightwatch synth home
//! lightwatch plan home
//! lightwatch simulate home
//! lightwatch status
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use commands::plan::PlanFormat;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "lightwatch",
    about = "Provision the lightwatch usage data pipeline",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to lightwatch.toml.
    #[arg(long, global = true, default_value = "lightwatch.toml")]
    config: PathBuf,

    /// Directory holding the local state store.
    #[arg(long, global = true, default_value = ".lightwatch")]
    data_dir: PathBuf,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter lightwatch.toml.
    Init {
        /// Stack name.
        #[arg(long, default_value = "LightsStack")]
        stack: String,

        /// Name of the first template.
        #[arg(long, default_value = "home")]
        template: String,

        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },

    /// Assemble a template's resource graph and print it as JSON.
    Synth {
        /// Template name.
        template: String,
    },

    /// Show the creation order and access grants for a template.
    Plan {
        /// Template name.
        template: String,

        /// Output format.
        #[arg(long, value_enum, default_value = "text")]
        format: PlanFormat,
    },

    /// Provision a template against the in-memory engine and run the
    /// bootstrap handler's create event.
    Simulate {
        /// Template name.
        template: String,

        /// Make the initializer fail with this message.
        #[arg(long)]
        fail_bootstrap: Option<String>,
    },

    /// Show recorded deployments and bootstrap records.
    Status {
        /// Only show this template's deployment.
        #[arg(long)]
        template: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lightwatch=info"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }

    match cli.command {
        Commands::Init {
            stack,
            template,
            force,
        } => commands::init::init(&cli.config, &stack, &template, force),
        Commands::Synth { template } => commands::synth::synth(&cli.config, &template),
        Commands::Plan { template, format } => commands::plan::plan(&cli.config, &template, format),
        Commands::Simulate {
            template,
            fail_bootstrap,
        } => {
            commands::simulate::simulate(&cli.config, &cli.data_dir, &template, fail_bootstrap.as_deref()).await
        }
        Commands::Status { template } => commands::status::status(&cli.config, &cli.data_dir, template.as_deref()),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn plan_format_is_parsed() {
        let cli = Cli::try_parse_from(["lightwatch", "plan", "home", "--format", "json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Plan {
                format: PlanFormat::Json,
                ..
            }
        ));

        let cli = Cli::try_parse_from(["lightwatch", "plan", "home"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Plan {
                format: PlanFormat::Text,
                ..
            }
        ));
    }

    #[test]
    fn unknown_plan_format_is_rejected() {
        assert!(Cli::try_parse_from(["lightwatch", "plan", "home", "--format", "yaml"]).is_err());
    }
}
