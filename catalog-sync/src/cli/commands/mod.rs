//! Command handlers

pub mod bulk;
pub mod query;
pub mod sync;

use anyhow::Result;

use super::{Cli, Commands};

/// Dispatch a parsed command line
pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Channels(args) => sync::handler::handle_channels_command(args, config).await,
        Commands::Attributes(args) => sync::handler::handle_attributes_command(args, config).await,
        Commands::Bulk(command) => bulk::handler::handle_bulk_command(command, config).await,
        Commands::Query(args) => query::handler::handle_query_command(args, config).await,
        Commands::Lookup(args) => query::handler::handle_lookup_command(args, config).await,
    }
}
