//! Inlet - inbound mail ingestion entry point

use anyhow::Result;
use inlet_api::{create_router, AppState};
use inlet_common::config::{Config, LoggingConfig, SmtpDeliveryMode};
use inlet_core::{
    DirectDelivery, DnsMxResolver, InboundDomainService, IngestService, IngestWorker,
    PolicyDirectory, QueuedDelivery, RecipientPolicy, SmtpDelivery, SmtpServer, WorkerOptions,
};
use inlet_storage::{
    create_blob_store, DatabasePool, DomainRepository, DomainStore, InboundDomainConfigRepository,
    InboundDomainConfigStore, InboundEmailRepository, InboundEmailStore, IngestJobRepository,
    IngestJobStore, MemoryStore, RecipientRuleRepository, RecipientRuleStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Repository handles shared by every component
struct Repositories {
    domains: Arc<dyn DomainRepository>,
    configs: Arc<dyn InboundDomainConfigRepository>,
    rules: Arc<dyn RecipientRuleRepository>,
    emails: Arc<dyn InboundEmailRepository>,
    jobs: Arc<dyn IngestJobRepository>,
}

impl Repositories {
    async fn open(config: &Config) -> Result<Self> {
        if config.database.backend == "memory" {
            warn!("Using the in-memory store; nothing survives a restart");
            let store = Arc::new(MemoryStore::new());
            return Ok(Self {
                domains: store.clone(),
                configs: store.clone(),
                rules: store.clone(),
                emails: store.clone(),
                jobs: store,
            });
        }

        let pool = DatabasePool::new(&config.database).await?;
        pool.migrate().await?;

        Ok(Self {
            domains: Arc::new(DomainStore::new(pool.clone())),
            configs: Arc::new(InboundDomainConfigStore::new(pool.clone())),
            rules: Arc::new(RecipientRuleStore::new(pool.clone())),
            emails: Arc::new(InboundEmailStore::new(pool.clone())),
            jobs: Arc::new(IngestJobStore::new(pool)),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_logging(&config.logging);

    info!("Starting Inlet...");

    let repos = Repositories::open(&config).await?;
    let blobs = create_blob_store(&config.storage)?;
    let notifier = inlet_core::notify::from_config(&config.notify)?;

    let policy = RecipientPolicy::new(
        repos.domains.clone(),
        repos.configs.clone(),
        repos.rules.clone(),
    );
    let service = Arc::new(
        IngestService::new(policy.clone(), repos.emails.clone(), blobs).with_notifier(notifier),
    );

    let shutdown = CancellationToken::new();
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    // Ingest workers
    if config.worker.enabled {
        let options = WorkerOptions::from_config(&config.worker);
        let concurrency = config.worker.concurrency.max(1);
        for _ in 0..concurrency {
            let worker = IngestWorker::new(repos.jobs.clone(), service.clone(), options);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                worker.run(shutdown).await;
            }));
        }
        info!(concurrency, "Ingest workers started");
    } else {
        info!("Ingest workers disabled");
    }

    // SMTP front door
    if config.smtp.enabled {
        let delivery: Arc<dyn SmtpDelivery> = match config.smtp.delivery {
            SmtpDeliveryMode::Queue => Arc::new(QueuedDelivery::new(
                repos.jobs.clone(),
                config.worker.max_attempts,
            )),
            SmtpDeliveryMode::Direct => Arc::new(DirectDelivery::new(
                service.clone(),
                config.worker.max_attachment_bytes,
            )),
        };
        let server = SmtpServer::new(
            config.smtp.clone(),
            Arc::new(PolicyDirectory::new(policy.clone())),
            delivery,
        );
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = server.run(shutdown).await {
                error!("SMTP server error: {}", e);
            }
        }));
    } else {
        info!("SMTP server disabled");
    }

    // HTTP API
    if config.api.enabled {
        if config.api.inbound_token().is_none() {
            warn!("api.inbound_token is not set; inbound submissions will be refused");
        }
        let state = AppState::new(repos.jobs.clone(), &config.api, config.worker.max_attempts);
        let app = create_router(state, config.api.max_concurrent_requests);
        let addr = format!("{}:{}", config.api.host, config.api.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("Starting API server on {}", addr);

        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!("API server error: {}", e);
            }
        }));
    } else {
        info!("API server disabled");
    }

    // MX verification sweep
    if config.inbound.mx_recheck_interval_secs > 0 {
        let domains = InboundDomainService::new(
            repos.domains.clone(),
            repos.configs.clone(),
            Arc::new(DnsMxResolver::new()),
            &config.inbound.mx_target,
        );
        let period = Duration::from_secs(config.inbound.mx_recheck_interval_secs);
        let batch = config.inbound.mx_recheck_batch;
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        match domains.verify_pending(batch).await {
                            Ok(0) => {}
                            Ok(checked) => info!(checked, "MX verification sweep finished"),
                            Err(e) => error!("MX verification sweep failed: {}", e),
                        }
                    }
                }
            }
        }));
    }

    info!("Inlet started successfully");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Task ended abnormally: {}", e);
        }
    }

    info!("Inlet shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
