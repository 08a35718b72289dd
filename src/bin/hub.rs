use std::net::SocketAddr;
use std::sync::Arc;

use guardia_monitoring::agent::{AgentIdentity, AgentScheduler};
use guardia_monitoring::analytics::AnalyticsEngine;
use guardia_monitoring::config::Args;
use guardia_monitoring::coordinator::{router as coordinator_router, CoordinatorState};
use tokio::net::TcpListener;
use guardia_monitoring::notifier::{Notifier, SmtpConfig};
use guardia_monitoring::persistence::memory::InMemoryPersistence;
#[cfg(feature = "storage-sqlite")]
use guardia_monitoring::persistence::sqlite::SqlitePersistence;
use guardia_monitoring::persistence::Persistence;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

fn init(debug: bool) {
    let level = if debug { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let filter = filter::Targets::new()
        .with_target("guardia_monitoring", level)
        .with_target("guardia_hub", level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(filter)
        .init();
}

async fn build_persistence(db_path: &str) -> anyhow::Result<Arc<dyn Persistence>> {
    if db_path.is_empty() {
        info!("no database path given, using in-memory persistence");
        return Ok(Arc::new(InMemoryPersistence::new()));
    }

    #[cfg(feature = "storage-sqlite")]
    {
        let backend = SqlitePersistence::new(db_path).await?;
        return Ok(Arc::new(backend));
    }

    #[cfg(not(feature = "storage-sqlite"))]
    {
        warn!("storage-sqlite feature disabled, falling back to in-memory persistence");
        Ok(Arc::new(InMemoryPersistence::new()))
    }
}

fn build_notifier(args: &Args) -> Option<Arc<Notifier>> {
    if !args.smtp_configured() {
        info!("no SMTP configuration given, notifications disabled");
        return None;
    }
    match Notifier::new(SmtpConfig {
        relay: args.smtp.clone(),
        username: (!args.smtp_user.is_empty()).then(|| args.smtp_user.clone()),
        password: (!args.smtp_pass.is_empty()).then(|| args.smtp_pass.clone()),
        sender: args.smtp_sender.clone(),
    }) {
        Ok(notifier) => Some(Arc::new(notifier)),
        Err(err) => {
            error!("failed to initialize SMTP notifier: {err}");
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::load();
    init(args.debug);

    if !args.server && !args.agent {
        info!("neither -server nor -agent enabled, nothing to do");
        return Ok(());
    }

    let persistence = build_persistence(&args.db).await?;
    let notifier = build_notifier(&args);
    let (analytics, results_tx) = AnalyticsEngine::new(persistence.clone(), notifier);
    tokio::spawn(analytics.run());

    if args.server {
        let addr: SocketAddr = args.http.parse()?;
        let state = CoordinatorState {
            persistence: persistence.clone(),
            results_tx: results_tx.clone(),
            global_agent_key: Arc::from(args.agent_key.as_str()),
        };

        // Bind synchronously so a failure here exits the process
        // non-zero instead of silently dying in a background task.
        let listener = TcpListener::bind(addr).await.map_err(|err| {
            error!("failed to bind coordinator listener on {addr}: {err}");
            err
        })?;
        info!("coordinator ingest listening on {addr}");

        let app = coordinator_router(state);
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                error!("coordinator ingest server failed: {err}");
                std::process::exit(1);
            }
        });
    }

    if args.agent {
        let identity = AgentIdentity {
            server_url: args.server_url.clone(),
            name: args.agent_name.clone(),
            location: args.agent_location.clone(),
            only_location: args.only_location,
            access_key: args.agent_key.clone(),
        };
        let scheduler = Arc::new(AgentScheduler::new(identity)?);
        tokio::spawn(async move { scheduler.run().await });
        info!("embedded agent scheduler started");
    }

    info!("press Ctrl+C to shut down");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal, exiting"),
        Err(err) => error!("unable to listen for shutdown signal: {err}"),
    }

    Ok(())
}
