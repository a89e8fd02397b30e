use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use walkdir::WalkDir;

use nlq_engine_service::config::Settings;
use nlq_engine_service::engine::NlqEngine;
use nlq_engine_service::history::DEFAULT_HISTORY_LIMIT;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nlq_engine_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting NLQ Engine Service v0.1.0");

    let settings = Settings::from_env()?;
    info!("Configuration loaded:");
    info!("  LLM endpoint: {}", settings.llm_endpoint);
    info!("  Fallback models: {}", settings.fallback_models.join(", "));
    info!("  Data directory: {}", settings.data_dir);

    let engine = Arc::new(NlqEngine::new(&settings)?);

    let mut current_table: Option<String> = None;
    for entry in WalkDir::new(&settings.data_dir)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        let Some(table_name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
        else {
            continue;
        };
        match engine.register_csv_table(&table_name, path).await {
            Ok(schema) => {
                info!(
                    "Registered table {} ({} columns, {} rows)",
                    table_name,
                    schema.columns.len(),
                    schema.row_count
                );
                if current_table.is_none() {
                    current_table = Some(table_name);
                }
            }
            Err(e) => error!("Failed to register {}: {}", path.display(), e),
        }
    }

    if current_table.is_none() {
        warn!(
            "No tables registered; place CSV files under {} and restart",
            settings.data_dir
        );
    }

    println!("Ask a question in plain language, or use \\tables, \\use <table>, \\schema [table], \\sql <statement>, \\history, \\health.");
    if let Some(table) = &current_table {
        println!("Current table: {}", table);
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if let Err(e) = handle_line(&engine, &mut current_table, line).await {
                            error!("{}", e);
                        }
                    }
                    None => break,
                }
            }
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal, gracefully shutting down...");
                break;
            }
        }
    }

    info!("NLQ Engine Service shutdown complete");
    Ok(())
}

async fn handle_line(
    engine: &NlqEngine,
    current_table: &mut Option<String>,
    line: &str,
) -> Result<()> {
    if let Some(rest) = line.strip_prefix('\\') {
        let (command, args) = match rest.split_once(char::is_whitespace) {
            Some((command, args)) => (command, args.trim()),
            None => (rest, ""),
        };
        return run_command(engine, current_table, command, args).await;
    }

    let table = required_table(current_table)?;
    let outcome = engine.ask(&table, line).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run_command(
    engine: &NlqEngine,
    current_table: &mut Option<String>,
    command: &str,
    args: &str,
) -> Result<()> {
    match command {
        "tables" => {
            let tables = engine.list_tables().await?;
            println!("{}", serde_json::to_string_pretty(&tables)?);
        }
        "use" => {
            if args.is_empty() {
                println!("Usage: \\use <table>");
                return Ok(());
            }
            engine.schema(args).await?;
            *current_table = Some(args.to_string());
            println!("Current table: {}", args);
        }
        "schema" => {
            let table = if args.is_empty() {
                required_table(current_table)?
            } else {
                args.to_string()
            };
            println!("{}", engine.schema_summary(&table).await?);
        }
        "sql" => {
            if args.is_empty() {
                println!("Usage: \\sql <statement>");
                return Ok(());
            }
            let table = required_table(current_table)?;
            let output = engine.run_sql(&table, args).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        "history" => {
            let records = engine.history(DEFAULT_HISTORY_LIMIT).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        "health" => {
            let health = engine.health().await;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
        _ => println!("Unknown command: \\{}", command),
    }
    Ok(())
}

fn required_table(current_table: &Option<String>) -> Result<String> {
    current_table
        .clone()
        .ok_or_else(|| anyhow::anyhow!("No table selected. Use \\use <table> first."))
}
