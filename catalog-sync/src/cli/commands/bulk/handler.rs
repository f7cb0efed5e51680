//! Bulk job handlers

use anyhow::{Context, Result};
use colored::*;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::cli::BulkCommands;
use crate::cli::commands::sync::handler::finish;
use crate::cli::context::{AppContext, run_options};
use catalog_sync::api::{AsyncOperationHandle, BulkOperationTracker, BulkStatus, ChannelSet};
use catalog_sync::sync::DesiredState;

pub async fn handle_bulk_command(command: BulkCommands, config: Option<&Path>) -> Result<()> {
    let ctx = AppContext::build(config)?;
    let tracker = BulkOperationTracker::new(ctx.client().clone());

    match command {
        BulkCommands::Submit { query, file } => {
            let query = read_document(query, file.as_deref())?;
            let handle = tracker
                .submit(&query)
                .await
                .context("Failed to submit bulk operation")?;
            eprintln!(
                "Submitted bulk operation {}",
                handle.operation_id.bright_green().bold()
            );
            print_handle(&handle)
        }
        BulkCommands::Status { operation_id } => {
            let handle = tracker
                .poll(&AsyncOperationHandle::pending(operation_id))
                .await
                .context("Failed to poll bulk operation")?;
            print_handle(&handle)
        }
        BulkCommands::Fetch {
            operation_id,
            wait,
            interval,
            channels,
            run,
        } => {
            let mut handle = tracker
                .poll(&AsyncOperationHandle::pending(operation_id))
                .await
                .context("Failed to poll bulk operation")?;
            while wait && handle.is_running() {
                log::info!(
                    "Bulk operation {} still running ({} objects)",
                    handle.operation_id,
                    handle.object_count.unwrap_or(0)
                );
                tokio::time::sleep(Duration::from_secs(interval.max(1))).await;
                handle = tracker.poll(&handle).await?;
            }

            match handle.status {
                BulkStatus::Running => anyhow::bail!(
                    "Bulk operation {} is still running; retry later or pass --wait",
                    handle.operation_id
                ),
                BulkStatus::Failed => anyhow::bail!(
                    "Bulk operation {} failed ({})",
                    handle.operation_id,
                    handle.error_code.as_deref().unwrap_or("no error code")
                ),
                BulkStatus::Completed => {}
            }

            if channels.is_empty() {
                let result = tracker
                    .fetch_result(&handle)
                    .await
                    .context("Failed to download bulk result")?;
                if result.truncated {
                    eprintln!("{} result download was cut short", "warning:".yellow());
                }
                println!(
                    "{}",
                    serde_json::to_string_pretty(&result).context("Failed to serialize result")?
                );
                return Ok(());
            }

            let desired = DesiredState::Channels(ChannelSet::new(&channels));
            let outcome = ctx
                .orchestrator
                .run_bulk_result(&tracker, &handle, &desired, run_options(&run))
                .await
                .context("Bulk channel sync failed")?;
            finish(&outcome)
        }
    }
}

fn print_handle(handle: &AsyncOperationHandle) -> Result<()> {
    let status = match handle.status {
        BulkStatus::Running => "running".yellow(),
        BulkStatus::Completed => "completed".green(),
        BulkStatus::Failed => "failed".red(),
    };
    eprintln!("Status: {}", status);
    println!(
        "{}",
        serde_json::to_string_pretty(handle).context("Failed to serialize handle")?
    );
    Ok(())
}

/// A document given inline or in a file, never both
pub(crate) fn read_document(inline: Option<String>, file: Option<&Path>) -> Result<String> {
    let text = match (inline, file) {
        (Some(_), Some(_)) => anyhow::bail!("Cannot specify both a document and --file"),
        (None, None) => anyhow::bail!("Either provide a document or use --file"),
        (Some(text), None) => text,
        (None, Some(path)) => {
            if !path.exists() {
                anyhow::bail!("Document file does not exist: {}", path.display());
            }
            fs::read_to_string(path)
                .with_context(|| format!("Failed to read document file: {}", path.display()))?
        }
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        anyhow::bail!("Document is empty");
    }
    Ok(trimmed.to_string())
}
