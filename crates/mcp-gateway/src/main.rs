//! mcp-gateway CLI entry point.

#![warn(clippy::all)]

use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = mcp_gateway::cli::Cli::parse();

    if let Err(e) = cli.execute().await {
        let exit_code = mcp_gateway::cli::error::display_error(&e);
        std::process::exit(exit_code);
    }
}
