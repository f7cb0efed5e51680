//! Wiring shared by every command

use anyhow::{Context, Result};
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::{IdSource, RunArgs};
use catalog_sync::api::{CommerceClient, HttpTransport, RateLimiter};
use catalog_sync::config::AppConfig;
use catalog_sync::sync::{BatchOutcome, BatchProgress, Orchestrator, RunOptions, SyncResponse};

/// Ready client stack built from the loaded configuration
pub struct AppContext {
    pub orchestrator: Orchestrator,
}

impl AppContext {
    pub fn build(config_path: Option<&Path>) -> Result<Self> {
        let config = AppConfig::load(config_path)?;
        let (shop, token) = config.credentials()?;
        let resilience = config.resilience()?;

        let transport = HttpTransport::new(shop, token, &config.api_version)
            .context("Failed to create HTTP transport")?;
        log::debug!(
            "Using endpoint {} (preset {})",
            transport.endpoint(),
            config.resilience.preset.as_deref().unwrap_or("default")
        );

        let limiter = Arc::new(RateLimiter::new(resilience.rate_limit.clone()));
        let client = CommerceClient::new(Arc::new(transport), limiter, resilience);

        Ok(Self {
            orchestrator: Orchestrator::new(client),
        })
    }

    pub fn client(&self) -> &CommerceClient {
        self.orchestrator.client()
    }
}

/// Collect ids from flags and/or a file, skipping blank lines and `#` comments
pub fn read_ids(source: &IdSource) -> Result<Vec<String>> {
    let mut ids: Vec<String> = source
        .ids
        .iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();

    if let Some(path) = &source.ids_file {
        ids.extend(read_ids_file(path)?);
    }

    if ids.is_empty() {
        anyhow::bail!("No product ids given; use --ids or --ids-file");
    }
    Ok(ids)
}

fn read_ids_file(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        anyhow::bail!("Id file does not exist: {}", path.display());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read id file: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Deadline and progress printing from the shared flags
pub fn run_options(args: &RunArgs) -> RunOptions {
    let mut options = RunOptions::default();
    if let Some(secs) = args.timeout {
        options = options.with_timeout(Duration::from_secs(secs));
    }
    if args.progress {
        options = options.with_progress(|progress: &BatchProgress| {
            eprintln!(
                "{} batch {}/{}: {} processed, {} ok, {} failed (concurrency {})",
                "progress".cyan(),
                progress.batch_number,
                progress.total_batches,
                progress.processed_count,
                progress.success_count.to_string().green(),
                progress.failure_count.to_string().red(),
                progress.max_concurrent
            );
        });
    }
    options
}

/// Print the response JSON on stdout and a colored summary on stderr
pub fn print_outcome(outcome: &BatchOutcome) -> Result<()> {
    let response = SyncResponse::from(outcome);
    println!(
        "{}",
        serde_json::to_string_pretty(&response).context("Failed to serialize response")?
    );

    if outcome.is_success() {
        eprintln!("{} {}", "✓".bright_green().bold(), response.message);
    } else {
        eprintln!("{} {}", "✗".bright_red().bold(), response.message);
        for failure in outcome.failure_breakdown() {
            eprintln!(
                "  {} {} ({})",
                "-".dimmed(),
                failure.message,
                failure.count.to_string().yellow()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_ids_merges_flags_and_file() {
        let path = std::env::temp_dir().join(format!("ids-{}.txt", uuid::Uuid::new_v4()));
        fs::write(&path, "# exported\n3\n\n gid://shopify/Product/4 \n").unwrap();

        let source = IdSource {
            ids: vec!["1".into(), " ".into(), "2".into()],
            ids_file: Some(path.clone()),
        };
        let ids = read_ids(&source).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(ids, vec!["1", "2", "3", "gid://shopify/Product/4"]);
    }

    #[test]
    fn test_read_ids_requires_some() {
        let source = IdSource {
            ids: Vec::new(),
            ids_file: None,
        };
        assert!(read_ids(&source).is_err());

        let missing = IdSource {
            ids: vec!["1".into()],
            ids_file: Some(PathBuf::from("/nonexistent/ids.txt")),
        };
        assert!(read_ids(&missing).is_err());
    }
}
