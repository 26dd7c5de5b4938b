#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "skein")]
#[command(author, version, about = "An incremental module bundler with a live dev server", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Bundle the project once and write outputs to the configured directory
    Build {
        /// Path to config file (overrides auto-discovery)
        #[arg(long, short = 'c', value_name = "FILE")]
        config: Option<PathBuf>,

        /// Override the configured output directory
        #[arg(long, short = 'o', value_name = "DIR")]
        out_dir: Option<PathBuf>,
    },

    /// Start the dev server: serve the bundle, watch sources, push updates
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long, short = 'p')]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Path to config file (overrides auto-discovery)
        #[arg(long, short = 'c', value_name = "FILE")]
        config: Option<PathBuf>,

        /// Open the default browser once the server is listening
        #[arg(long)]
        open: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    logging::init(cli.verbose, cli.json);

    match cli.command {
        Commands::Build { config, out_dir } => {
            let action = commands::build::BuildAction {
                cwd,
                config,
                out_dir,
            };
            commands::build::run(action, cli.json)
        }
        Commands::Serve {
            port,
            host,
            config,
            open,
        } => {
            let action = commands::serve::ServeAction {
                cwd,
                port,
                host,
                config,
                open,
            };
            let rt = tokio::runtime::Runtime::new()
                .map_err(|e| miette::miette!("failed to start runtime: {e}"))?;
            rt.block_on(commands::serve::run(action))
        }
    }
}
