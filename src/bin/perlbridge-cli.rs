//! Perlbridge CLI - evaluate source in an embedded interpreter
//!
//! Provides subcommands for evaluating expressions and for managing the
//! interpreter configuration file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use perlbridge::config::{load_config, write_config};
use perlbridge::util::to_json;
use perlbridge::{EmbeddedPerl, InterpreterConfig, PerlError, PerlScalar};

#[derive(Parser)]
#[command(name = "perlbridge")]
#[command(about = "Evaluate source in an embedded interpreter", long_about = None)]
struct Cli {
    /// Interpreter configuration file
    #[arg(short, long, default_value = "perlbridge.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate source and print the result
    Eval {
        /// Source text
        source: String,

        /// Context to evaluate in
        #[arg(long, value_enum, default_value = "scalar")]
        context: ContextArg,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

#[derive(Clone, Copy, ValueEnum)]
enum ContextArg {
    Scalar,
    List,
    Void,
}

fn effective_config(path: &Path) -> Result<InterpreterConfig> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(InterpreterConfig::default())
    }
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Eval {
            source,
            context,
            json,
        } => {
            let config = effective_config(&cli.config)?;
            let perl = EmbeddedPerl::with_config(config).map_err(PerlError::into_detached)?;
            let results = match context {
                ContextArg::Scalar => perl.eval::<PerlScalar>(&source).map(|value| vec![value]),
                ContextArg::List => perl.eval_list(&source),
                ContextArg::Void => perl.eval_void(&source).map(|()| Vec::new()),
            }
            .map_err(PerlError::into_detached)?;

            for value in &results {
                if json {
                    let doc = to_json(value.value()).map_err(PerlError::into_detached)?;
                    println!("{}", serde_json::to_string_pretty(&doc)?);
                } else {
                    println!("{value}");
                }
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Init { force } => {
                if cli.config.exists() && !force {
                    return Err(anyhow!(
                        "{:?} already exists; pass --force to overwrite",
                        cli.config
                    ));
                }
                write_config(&cli.config, &InterpreterConfig::default())
                    .with_context(|| format!("Failed to write {:?}", cli.config))?;
                println!("Wrote default configuration to {:?}", cli.config);
            }
            ConfigAction::Show => {
                let config = effective_config(&cli.config)?;
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
        },
    }

    Ok(())
}
