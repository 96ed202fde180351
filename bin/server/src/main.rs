use lead_intake_integration::MondayTracker;
use lead_intake_nats::{NatsContactRepository, NatsNotifier, NatsSessionStore, NatsTransport};
use lead_intake_server::{Adapters, IntakeService, ServerConfig, ServiceError};
use lead_intake_session::{InboundMessages, StartOutcome};
use lead_intake_core::Result;
use rootcause::prelude::ResultExt;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!(nats_url = %config.nats.url, "Loaded configuration");

    let (service, inbound) = build_service(&config)
        .await
        .expect("failed to build service");

    match service.cleanup_stale_sessions().await {
        Ok(cleanup) if !cleanup.deleted.is_empty() => {
            tracing::info!(
                deleted_sessions = cleanup.deleted.len(),
                "Cleaned up stale sessions on startup"
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Failed to clean up stale sessions on startup");
        }
    }

    let workers = service.spawn_workers(inbound);

    let resuming = service.has_stored_session();
    match service.start_session().await {
        StartOutcome::Started(session_id) => {
            tracing::info!(session_id = %session_id, resuming, "Session starting");
        }
        outcome => tracing::warn!(?outcome, "Session did not start"),
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    tracing::info!("Shutting down");
    service.shutdown().await;
    workers.shutdown().await;
}

async fn build_service(
    config: &ServerConfig,
) -> Result<(IntakeService, InboundMessages), ServiceError> {
    let (client, jetstream) = lead_intake_nats::connect(&config.nats)
        .await
        .context(ServiceError::StartupFailed { component: "nats" })?;

    let sessions = NatsSessionStore::open(&jetstream, config.nats.sessions_bucket())
        .await
        .context(ServiceError::StartupFailed {
            component: "session store",
        })?;
    let contacts = NatsContactRepository::open(&jetstream, config.nats.contacts_bucket())
        .await
        .context(ServiceError::StartupFailed {
            component: "contact repository",
        })?;
    let tracker = MondayTracker::new(config.tracker.clone()).context(ServiceError::StartupFailed {
        component: "task tracker",
    })?;

    let adapters = Adapters {
        transport: Arc::new(NatsTransport::new(client.clone(), config.nats.clone())),
        sessions: Arc::new(sessions),
        contacts: Arc::new(contacts),
        tracker: Arc::new(tracker),
        notifier: Arc::new(NatsNotifier::new(client, config.nats.clone())),
    };

    Ok(IntakeService::new(
        adapters,
        config.retry.policy(),
        config.script.script(),
    ))
}
