//! CLI subcommands. `serve` is the only one the gateway needs — there's no
//! introspection/generation surface like the teacher's `inspect`/`generate`.

pub mod serve;

use clap::Subcommand;

use crate::cli::args::ServeArgs;
use crate::error::GatewayResult;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the aggregation gateway.
    Serve(ServeArgs),
}

impl Command {
    pub async fn execute(self) -> GatewayResult<()> {
        match self {
            Command::Serve(args) => serve::run(args).await,
        }
    }
}
