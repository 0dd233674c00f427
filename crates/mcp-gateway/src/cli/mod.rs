//! CLI entry point for mcp-gateway.
//!
//! Grounded on the teacher's `Cli` (clap v4 derive, stacked `-v` verbosity,
//! tracing-subscriber wiring) with the teacher's multi-format output and
//! colored-output toggles dropped — there is no `inspect`/`generate` report
//! to format, only a single long-running `serve` command.

pub mod args;
pub mod commands;
pub mod error;

use clap::Parser;
use tracing::Level;

use crate::error::GatewayResult;

/// mcp-gateway - aggregation gateway that fronts a fleet of MCP servers behind one endpoint
#[derive(Parser, Debug)]
#[command(name = "mcp-gateway", version, about, author)]
pub struct Cli {
    #[command(subcommand)]
    pub command: commands::Command,

    /// Enable verbose logging (-v, -vv, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Cli {
    pub async fn execute(self) -> GatewayResult<()> {
        self.init_tracing();
        self.command.execute().await
    }

    fn init_tracing(&self) {
        let level = if self.quiet {
            Level::ERROR
        } else {
            match self.verbose {
                0 => Level::INFO,
                1 => Level::DEBUG,
                _ => Level::TRACE,
            }
        };

        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_with_flags() {
        let cli = Cli::try_parse_from(["mcp-gateway", "serve", "--port", "9000"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        let cli = Cli::try_parse_from(["mcp-gateway", "-v", "--quiet", "serve"]);
        assert!(cli.is_err());
    }
}
