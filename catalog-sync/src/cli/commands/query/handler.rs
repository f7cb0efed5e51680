//! Raw query and single-product lookup handlers

use anyhow::{Context, Result};
use colored::*;
use serde_json::{Value, json};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::cli::commands::bulk::handler::read_document;
use crate::cli::context::AppContext;
use crate::cli::{LookupArgs, QueryArgs};
use catalog_sync::api::EntityId;

pub async fn handle_query_command(args: QueryArgs, config: Option<&Path>) -> Result<()> {
    let document = read_document(args.query, args.file.as_deref())?;
    let variables = args
        .variables
        .as_deref()
        .map(parse_variables)
        .transpose()?;

    let ctx = AppContext::build(config)?;
    let start = Instant::now();
    let response = ctx
        .orchestrator
        .execute_request(
            &document,
            variables,
            args.retries,
            args.timeout.map(Duration::from_secs),
        )
        .await
        .context("Failed to execute query")?;

    for error in &response.errors {
        eprintln!("{} {}", "error:".red(), error.message);
    }
    if let Some(headroom) = &response.headroom {
        log::debug!("Headroom after query: {:?}", headroom);
    }
    eprintln!(
        "Execution time: {:.2}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );

    let body = json!({ "data": response.data });
    println!(
        "{}",
        serde_json::to_string_pretty(&body).context("Failed to serialize response")?
    );
    Ok(())
}

pub async fn handle_lookup_command(args: LookupArgs, config: Option<&Path>) -> Result<()> {
    let id = EntityId::product(&args.id)
        .with_context(|| format!("Invalid product id: {}", args.id))?;

    let ctx = AppContext::build(config)?;
    match ctx.client().fetch_entity(&id).await? {
        Some(summary) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("Failed to serialize product")?
            );
            Ok(())
        }
        None => anyhow::bail!("Product {} not found", id.as_str()),
    }
}

fn parse_variables(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).context("--variables is not valid JSON")?;
    if !value.is_object() {
        anyhow::bail!("--variables must be a JSON object");
    }
    Ok(value)
}
