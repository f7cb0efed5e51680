//! Command-line interface

pub mod commands;
pub mod context;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "catalog-sync",
    version,
    about = "Rate-limited bulk sync of product channels and attributes"
)]
pub struct Cli {
    /// Config file (defaults to <config dir>/catalog-sync/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum Commands {
    /// Publish products to exactly the given sales channels
    Channels(ChannelsArgs),
    /// Write marketplace attributes onto products
    Attributes(AttributesArgs),
    /// Server-side bulk read jobs
    #[command(subcommand)]
    Bulk(BulkCommands),
    /// Run a raw GraphQL document through the rate limiter
    Query(QueryArgs),
    /// Look up a single product
    Lookup(LookupArgs),
}

/// Where product ids come from
#[derive(Args, Debug, Clone)]
pub struct IdSource {
    /// Product ids (numeric or gid), comma separated or repeated
    #[arg(long, value_delimiter = ',')]
    pub ids: Vec<String>,

    /// File with one product id per line
    #[arg(long)]
    pub ids_file: Option<PathBuf>,
}

/// Shared run controls
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Stop dispatching after this many seconds and report what is left as failed
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Print a line per completed batch
    #[arg(long)]
    pub progress: bool,
}

#[derive(Args, Debug)]
pub struct ChannelsArgs {
    #[command(flatten)]
    pub source: IdSource,

    /// Desired channel name; products are unpublished from every other channel
    #[arg(long = "channel")]
    pub channels: Vec<String>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args, Debug)]
pub struct AttributesArgs {
    #[command(flatten)]
    pub source: IdSource,

    #[arg(long)]
    pub category: Option<String>,
    #[arg(long)]
    pub color: Option<String>,
    #[arg(long)]
    pub size: Option<String>,
    #[arg(long)]
    pub gender: Option<String>,
    #[arg(long)]
    pub age_group: Option<String>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum BulkCommands {
    /// Submit a bulk query job
    Submit {
        /// Query document
        query: Option<String>,
        /// Read the query from a file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Show a job's status
    Status { operation_id: String },
    /// Download a completed job's ids, optionally syncing channels on them
    Fetch {
        operation_id: String,
        /// Poll until the job finishes
        #[arg(long)]
        wait: bool,
        /// Seconds between polls with --wait
        #[arg(long, default_value_t = 5)]
        interval: u64,
        /// Desired channel for every fetched product
        #[arg(long = "channel")]
        channels: Vec<String>,
        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// GraphQL document
    pub query: Option<String>,

    /// Read the document from a file
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Variables as a JSON object
    #[arg(long)]
    pub variables: Option<String>,

    /// Transient retry budget for this call
    #[arg(long)]
    pub retries: Option<u32>,

    /// Per-attempt timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Args, Debug)]
pub struct LookupArgs {
    /// Product id (numeric or gid)
    pub id: String,
}
