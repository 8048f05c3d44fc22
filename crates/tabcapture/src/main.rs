//! `tabcap` - CLI for tabcapture
//!
//! This binary inspects, exports and purges the event store written by a
//! capture session.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;

use tabcapture::cli::{Cli, Command, ConfigCommand, ExportCommand, PurgeCommand};
use tabcapture::{init_logging, Config, EventStore, ExportBundle, Storage};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone()).context("failed to load configuration")?;

    match cli.command {
        Command::Export(cmd) => handle_export(&config, &cmd).await,
        Command::Purge(cmd) => handle_purge(&config, &cmd).await,
        Command::Status(cmd) => handle_status(&config, cmd.json),
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn open_storage(config: &Config) -> Result<Storage> {
    let path = config.database_path();
    Storage::open(&path).with_context(|| format!("failed to open store at {}", path.display()))
}

async fn handle_export(config: &Config, cmd: &ExportCommand) -> Result<()> {
    let storage = open_storage(config)?;
    let events = storage.read_all().await?;
    let meta = storage.run_meta().await?;
    let counters = meta.as_ref().map(|m| m.counters).unwrap_or_default();

    let bundle = ExportBundle::new(events, meta.as_ref(), counters);
    let paths = bundle
        .write_to(&cmd.out)
        .with_context(|| format!("failed to write export to {}", cmd.out.display()))?;

    println!("Exported {} events", bundle.events.len());
    println!("  {}", paths.capture.display());
    println!("  {}", paths.stats.display());
    Ok(())
}

async fn handle_purge(config: &Config, cmd: &PurgeCommand) -> Result<()> {
    if !cmd.yes {
        println!("This deletes every captured event and the run metadata.");
        println!("Use --yes to confirm.");
        return Ok(());
    }
    let storage = open_storage(config)?;
    storage.clear().await?;
    println!("Purged {}", storage.path().display());
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> Result<()> {
    let storage = open_storage(config)?;
    let stats = storage.stats()?;
    let meta = storage.get_run_meta()?;

    if json {
        let status = serde_json::json!({
            "database_path": config.database_path(),
            "events": stats.total_events,
            "db_size_bytes": stats.db_size_bytes,
            "run": meta,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("tabcap status");
    println!("-------------");
    println!("Database:      {}", config.database_path().display());
    println!("Events:        {}", stats.total_events);
    println!("Size:          {} bytes", stats.db_size_bytes);
    match meta {
        Some(meta) => {
            println!("Run:           {}", meta.run_id);
            println!("Target:        {}", meta.target_id);
            println!("Started:       {}", meta.started_at.to_rfc3339());
            match meta.stopped_at {
                Some(stopped) => {
                    println!("Stopped:       {}", stopped.to_rfc3339());
                    println!("Duration:      {:.1}s", meta.duration_secs());
                }
                None => println!("Stopped:       (still running)"),
            }
            let c = meta.counters;
            println!(
                "Counters:      http_req={} http_res={} ws_open={} ws_frames={} dropped_bodies={} excluded={}",
                c.http_req, c.http_res, c.ws_open, c.ws_frames, c.dropped_bodies, c.excluded
            );
        }
        None => println!("Run:           none"),
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[storage]");
                println!("  database_path:      {}", config.database_path().display());
                println!();
                println!("[capture]");
                println!("  http_assets:        {}", config.capture.http_assets);
                println!("  analytics:          {}", config.capture.analytics);
                println!("  ws_small_frames:    {}", config.capture.ws_small_frames);
                println!("  request_bodies:     {}", config.capture.request_bodies);
                println!("  response_bodies:    {}", config.capture.response_bodies);
                println!();
                println!("[thresholds]");
                println!("  ws_min_bytes:       {}", config.thresholds.ws_min_bytes);
                println!("  body_cap:           {}", config.thresholds.body_cap);
                println!();
                println!("[host_filters]");
                println!(
                    "  analytics:          {}",
                    config.host_filters.analytics.join(", ")
                );
                println!();
                println!("[buffer]");
                println!("  flush_count:        {}", config.buffer.flush_count);
                println!("  flush_interval_ms:  {}", config.buffer.flush_interval_ms);
                println!("  high_water_mark:    {}", config.buffer.high_water_mark);
                println!();
                println!("[lifecycle]");
                println!("  protocol_version:   {}", config.lifecycle.protocol_version);
                println!("  max_retries:        {}", config.lifecycle.max_retries);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
