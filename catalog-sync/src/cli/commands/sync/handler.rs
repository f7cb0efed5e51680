//! Channel and attribute sync handlers

use anyhow::{Context, Result};
use colored::*;
use std::path::Path;

use crate::cli::context::{AppContext, print_outcome, read_ids, run_options};
use crate::cli::{AttributesArgs, ChannelsArgs};
use catalog_sync::api::AttributeFields;
use catalog_sync::sync::{BatchOutcome, SyncRequest};

pub async fn handle_channels_command(args: ChannelsArgs, config: Option<&Path>) -> Result<()> {
    if args.channels.is_empty() {
        anyhow::bail!("At least one --channel is required");
    }

    let request = SyncRequest {
        entity_ids: read_ids(&args.source)?,
        desired_channels: Some(args.channels),
        desired_attributes: None,
    };
    run_request(request, &args.run, config).await
}

pub async fn handle_attributes_command(args: AttributesArgs, config: Option<&Path>) -> Result<()> {
    let fields = AttributeFields {
        category: args.category,
        color: args.color,
        size: args.size,
        gender: args.gender,
        age_group: args.age_group,
    };
    if fields == AttributeFields::default() {
        anyhow::bail!("Provide at least one of --category, --color, --size, --gender or --age-group");
    }

    let request = SyncRequest {
        entity_ids: read_ids(&args.source)?,
        desired_channels: None,
        desired_attributes: Some(fields),
    };
    run_request(request, &args.run, config).await
}

async fn run_request(
    request: SyncRequest,
    run: &crate::cli::RunArgs,
    config: Option<&Path>,
) -> Result<()> {
    let desired = request.desired_state()?;
    let ctx = AppContext::build(config)?;

    eprintln!(
        "Syncing {} product(s) towards {}",
        request.entity_ids.len().to_string().bright_cyan(),
        desired.to_string().bold()
    );

    let outcome = ctx
        .orchestrator
        .run_with(&request.entity_ids, &desired, run_options(run))
        .await
        .context("Sync run failed")?;

    finish(&outcome)
}

/// Print the outcome; a run with failures exits non-zero
pub(crate) fn finish(outcome: &BatchOutcome) -> Result<()> {
    print_outcome(outcome)?;
    if !outcome.is_success() {
        anyhow::bail!("{} product(s) failed", outcome.failed_ids.len());
    }
    Ok(())
}
