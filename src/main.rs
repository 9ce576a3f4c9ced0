use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

use mailtriage::classify::{ClassificationPipeline, OpenAiProvider};
use mailtriage::config::Settings;
use mailtriage::feedback::FeedbackStore;
use mailtriage::imap::AccountManager;
use mailtriage::index::{ElasticIndex, EmailIndex};
use mailtriage::notify::Notifier;
use mailtriage::pipeline::IngestPipeline;
use mailtriage::reconcile::Reconciler;
use mailtriage::service::{MailService, NoopSuggester};
use mailtriage::throttle::RateWindow;

#[derive(Parser, Debug)]
#[command(name = "mailtriage-server", about = "Mailbox ingestion and triage core")]
struct Args {
    /// Optional configuration file (TOML); environment variables override it.
    #[arg(long, env = "MAILTRIAGE_CONFIG")]
    config: Option<String>,

    /// Log filter, e.g. "info" or "mailtriage=debug".
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let settings = Settings::new(args.config.as_deref()).unwrap_or_else(|err| {
        eprintln!("Failed to load configuration: {}", err);
        std::process::exit(1);
    });
    let log_level = args.log_level.as_deref().unwrap_or(&settings.log.level);
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    if settings.accounts.is_empty() {
        warn!("No account slots configured; nothing will be ingested");
    }
    if settings.ai.api_key.is_empty() {
        warn!("AI API key is empty; classification will fall back to Spam");
    }

    // Search index, with bounded startup probing. A dead index degrades the
    // projector to no-ops instead of aborting the boot.
    let index: Arc<dyn EmailIndex> = Arc::new(ElasticIndex::connect(&settings.index).await);

    let classifier = Arc::new(ClassificationPipeline::new(
        Arc::new(OpenAiProvider::new(&settings.ai)),
        Arc::new(RateWindow::default()),
    ));
    let notifier = Arc::new(Notifier::new(&settings.notify));
    let pipeline = Arc::new(IngestPipeline::new(
        index.clone(),
        classifier.clone(),
        notifier,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let states = Arc::new(RwLock::new(HashMap::new()));

    let mut account_tasks = Vec::new();
    for account in &settings.accounts {
        info!("Starting account manager for {}", account.id);
        let manager = AccountManager::new(
            account.clone(),
            pipeline.clone(),
            Duration::from_secs(settings.poll_interval_secs),
            states.clone(),
        );
        account_tasks.push(tokio::spawn(manager.run(shutdown_rx.clone())));
    }

    Arc::new(Reconciler::new(index.clone(), classifier.clone())).spawn(shutdown_rx.clone());

    let service = MailService::new(
        index,
        classifier,
        Arc::new(FeedbackStore::new(settings.feedback_log.clone())),
        Arc::new(NoopSuggester),
        states,
    );
    match serde_json::to_string(&service.health().await) {
        Ok(report) => info!("Startup health: {}", report),
        Err(e) => warn!("Could not encode health report: {}", e),
    }

    info!(
        "mailtriage-server running with {} account(s); Ctrl-C to stop",
        settings.accounts.len()
    );
    tokio::signal::ctrl_c().await?;

    info!("Shutdown requested; stopping account managers and jobs");
    if shutdown_tx.send(true).is_err() {
        error!("All shutdown receivers already dropped");
    }
    for task in account_tasks {
        let _ = task.await;
    }
    info!("Shutdown complete");
    Ok(())
}
