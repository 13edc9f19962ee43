// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tkml_cli::commands;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tkml")]
#[command(author = "Maravilla Labs")]
#[command(version)]
#[command(about = "Server-side renderer for TKML documents", long_about = None)]
struct Cli {
    /// Log level: error, warn, info, debug, trace
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve documents over HTTP
    Serve {
        /// Port to run the server on
        #[arg(short, long)]
        port: Option<u16>,
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Document root directory
        #[arg(short, long)]
        root: Option<PathBuf>,
    },
    /// Render one document to stdout
    Render {
        /// Request path of the document (e.g. /docs/)
        path: String,
        /// Print the full HTML page instead of the markup
        #[arg(long)]
        html: bool,
        /// Query parameter as key=value (repeatable)
        #[arg(short = 'q', long = "query")]
        query: Vec<String>,
        /// Document root directory
        #[arg(short, long)]
        root: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with the specified log level
    let filter = EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve { port, host, root } => {
            commands::serve::run(commands::serve::ServeOptions { host, port, root }).await
        }
        Commands::Render { path, html, query, root } => {
            commands::render::run(&path, html, &query, root).await
        }
    }
}
