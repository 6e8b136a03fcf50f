// ABOUTME: Command implementations for the tokenwatch CLI
// ABOUTME: Handles validate, track, tick, show and list against the file token store

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::args::OutputFormat;
use super::config::Config;
use crate::engine::{self, SystemClock};
use crate::parser::{PipelineTemplate, TemplateValidator, TrackedToken, ValidationReport};
use crate::store::{FileTokenStore, TokenStore};
use crate::tasks::{HttpDataSource, StaticDataSource, TaskRegistry, TokenDataSource};

/// Pick the data source: fixtures first, then the configured HTTP API
pub async fn build_data_source(
    config: &Config,
    fixtures: Option<PathBuf>,
) -> Result<Arc<dyn TokenDataSource>> {
    if let Some(path) = fixtures.or_else(|| config.fixtures.clone()) {
        info!("Reading token data from fixtures {}", path.display());
        let source = StaticDataSource::from_file(&path).await?;
        return Ok(Arc::new(source));
    }

    match &config.data_source.base_url {
        Some(base_url) => {
            info!("Reading token data from {}", base_url);
            let source = HttpDataSource::new(
                base_url,
                config.data_source.api_key.clone(),
                config.data_source.timeout(),
            )?;
            Ok(Arc::new(source))
        }
        None => Err(anyhow!(
            "No data source configured: pass --fixtures or set data_source.base_url"
        )),
    }
}

fn print_report(report: &ValidationReport) {
    for error in &report.errors {
        println!("  ✗ {}", error);
    }
    for warning in &report.warnings {
        println!("  ! {}", warning);
    }
}

fn load_validated_template(path: &Path, strict: bool) -> Result<PipelineTemplate> {
    let template = PipelineTemplate::from_file(path)
        .map_err(|e| anyhow!("Failed to parse template {}: {}", path.display(), e))?;

    // Validation only needs kind metadata, never token data.
    let registry = TaskRegistry::new(Arc::new(StaticDataSource::new()));
    let report = TemplateValidator::new(&registry)
        .with_strict_mode(strict)
        .validate(&template);
    print_report(&report);

    if !report.is_valid {
        return Err(anyhow!(
            "Template '{}' has {} error(s)",
            template.name,
            report.errors.len()
        ));
    }
    Ok(template)
}

/// Validate a template file
pub async fn validate_template(
    template_path: PathBuf,
    strict: bool,
    _config: &Config,
) -> Result<()> {
    info!("Validating template: {}", template_path.display());

    let template = load_validated_template(&template_path, strict)?;

    println!("✓ Template '{}' is valid", template.name);
    println!("  Stages: {}", template.pipeline.len());
    println!("  Tasks: {}", template.tasks.len());

    Ok(())
}

/// Start tracking a token and persist its first snapshot
pub async fn track_token(
    template_path: PathBuf,
    chain_id: u64,
    address: String,
    config: &Config,
) -> Result<()> {
    let template = load_validated_template(&template_path, false)?;
    let token = template.instantiate(chain_id, &address, Utc::now());

    let store = FileTokenStore::new(&config.store_dir);
    store.save(&token).await?;

    info!(
        "Tracking token {}:{} as {} with template '{}'",
        chain_id, address, token.uuid, template.name
    );
    println!("{}", token.uuid);
    Ok(())
}

/// Run one tick for a stored token and persist the result
pub async fn tick_token(uuid: Uuid, fixtures: Option<PathBuf>, config: &Config) -> Result<()> {
    let store = FileTokenStore::new(&config.store_dir);
    let token = store.load(uuid).await?;

    if !token.tracking {
        println!("Token {} is no longer tracked ({})", uuid, status_of(&token));
        return Ok(());
    }

    let source = build_data_source(config, fixtures).await?;
    let registry = TaskRegistry::new(source);

    // A failed tick leaves the stored snapshot untouched.
    let next = engine::tick(token, &registry, Arc::new(SystemClock))
        .await
        .with_context(|| format!("Tick failed for token {}", uuid))?;
    store.save(&next).await?;

    if next.aborted {
        warn!("Token {} aborted", uuid);
    }
    print_summary(&next);
    Ok(())
}

/// Print a stored snapshot
pub async fn show_token(uuid: Uuid, format: OutputFormat, config: &Config) -> Result<()> {
    let store = FileTokenStore::new(&config.store_dir);
    let token = store.load(uuid).await?;

    let rendered = match format {
        OutputFormat::Json => token.to_json()?,
        OutputFormat::Yaml => token.to_yaml()?,
    };
    println!("{}", rendered);
    Ok(())
}

/// List every token in the store with its status
pub async fn list_tokens(config: &Config) -> Result<()> {
    let store = FileTokenStore::new(&config.store_dir);
    let uuids = store.list().await?;

    if uuids.is_empty() {
        println!("No tracked tokens in {}", config.store_dir.display());
        return Ok(());
    }

    for uuid in uuids {
        let token = store.load(uuid).await?;
        println!(
            "{}  {}:{}  stage {}/{}  {}",
            token.uuid,
            token.chain_id,
            token.address,
            token.current_stage_index + 1,
            token.pipeline.len(),
            status_of(&token)
        );
    }
    Ok(())
}

fn status_of(token: &TrackedToken) -> &'static str {
    if token.aborted {
        "aborted"
    } else if token.completed {
        "completed"
    } else if token.tracking {
        "tracking"
    } else {
        "stopped"
    }
}

fn print_summary(token: &TrackedToken) {
    println!("Token {} is {}", token.uuid, status_of(token));
    for (index, stage) in token.pipeline.iter().enumerate() {
        let marker = if index == token.current_stage_index { ">" } else { " " };
        let state = stage
            .state
            .map(|state| state.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{} Stage '{}': {}", marker, stage.stage_id, state);
        for task_id in &stage.task_ids {
            if let Some(task) = token.tasks.get(task_id) {
                println!(
                    "    Task '{}': {} (runs: {})",
                    task_id, task.state, task.repetitions.count
                );
            }
        }
    }
    match token.scheduled_execution_time {
        Some(at) => println!("Next tick due at {}", at.to_rfc3339()),
        None => println!("No tick scheduled"),
    }
}
