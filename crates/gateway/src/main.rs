//! CQI-9 Portal entry point
//!
//! `cqi9 server` runs the HTTP API; the other subcommands process a
//! single document or install a knowledge dataset from the command line.

use anyhow::Context;
use clap::Parser;
use cqi9_common::{
    analysis::{AnalyzerOptions, ComplianceAnalyzer, FormEvidence},
    config::AppConfig,
    knowledge::KnowledgeStore,
    llm::create_llm_client,
};
use cqi9_gateway::{
    cli::{install_knowledge, Cli, Commands},
    create_router, telemetry, AppState,
};
use cqi9_ingestion::{create_text_extractor, extract_document, FormParser};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(&path.to_string_lossy()),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;

    telemetry::init_tracing(&config.observability);

    match cli.command {
        Commands::Server { host, port } => run_server(config, host, port).await,
        Commands::Process { file } => run_process(&config, &file).await,
        Commands::Analyze { file } => run_analyze(&config, &file).await,
        Commands::InitKg { data_dir } => {
            let (path, stats) = install_knowledge(&data_dir, &config.knowledge.data_dir)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            eprintln!("Knowledge dataset written to {}", path.display());
            Ok(())
        }
    }
}

async fn run_server(mut config: AppConfig, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    info!("Starting CQI-9 Portal v{}", cqi9_common::VERSION);

    telemetry::init_metrics(&config.observability)?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let shutdown_timeout = config.shutdown_timeout();

    let state = AppState::from_config(config).await?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn run_process(config: &AppConfig, file: &Path) -> anyhow::Result<()> {
    let extractor = create_text_extractor(&config.ocr)?;
    let parser = FormParser::new()?;

    let document = extract_document(extractor.as_ref(), &parser, file)
        .await
        .with_context(|| format!("Failed to process {}", file.display()))?;

    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

async fn run_analyze(config: &AppConfig, file: &Path) -> anyhow::Result<()> {
    let extractor = create_text_extractor(&config.ocr)?;
    let parser = FormParser::new()?;
    let document = extract_document(extractor.as_ref(), &parser, file)
        .await
        .with_context(|| format!("Failed to process {}", file.display()))?;

    let knowledge = Arc::new(KnowledgeStore::load(&config.knowledge)?);
    let llm = create_llm_client(&config.llm)?;
    let analyzer = ComplianceAnalyzer::new(llm, knowledge, AnalyzerOptions::from(&config.llm));

    let form = FormEvidence {
        form_id: file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file.display().to_string()),
        form_type: Some(document.parsed.form_type),
        evidence: document.parsed.audit.evidence,
        text: document.extraction.text,
    };

    let report = analyzer.analyze_form(&form).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(grace: std::time::Duration) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }

    // In-flight analyses get a bounded window to finish
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        tracing::warn!(seconds = grace.as_secs(), "Shutdown grace period elapsed, exiting");
        std::process::exit(0);
    });
}
