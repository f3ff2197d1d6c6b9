// SPDX-License-Identifier: Apache-2.0

use std::process::ExitCode;

use clap::Parser;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

use corim_store::cli;

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::Cli::parse();

    let default_filter = if args.trace_sql {
        "warn,corim_store::sql=debug"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let no_color = args.no_color;

    match cli::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if no_color {
                eprintln!("error: {e}");
            } else {
                eprintln!("{} {e}", "error:".red());
            }
            ExitCode::FAILURE
        }
    }
}
