use std::{convert::Infallible, sync::Arc, time::Duration};

use anyhow::Context;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use sqlx::PgPool;
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use pointsledger_core::UserId;
use pointsledger_events::{Event, EventBus, EventEnvelope, InMemoryEventBus};
use pointsledger_infra::{
    AccountStore, InMemoryAccountStore, LedgerConfig, LedgerEngine, PostgresAccountStore,
};
use pointsledger_points::{ActionCatalog, LoyaltyEvent};

pub const USE_PERSISTENT_STORES_ENV: &str = "USE_PERSISTENT_STORES";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
pub const ACTION_CATALOG_ENV: &str = "POINTS_ACTION_CATALOG";

pub type LoyaltyBus = InMemoryEventBus<EventEnvelope<LoyaltyEvent>>;

/// Engine over a type-erased store so in-memory and Postgres deployments
/// share one handler code path.
pub type Engine = LedgerEngine<Arc<dyn AccountStore>, Arc<LoyaltyBus>>;

/// Shared application state handed to every handler.
pub struct AppServices {
    engine: Engine,
    catalog: ActionCatalog,
    realtime_tx: broadcast::Sender<EventEnvelope<LoyaltyEvent>>,
}

impl AppServices {
    /// Wire an engine over `store`, plus the bus → SSE bridge.
    ///
    /// Must be called inside a Tokio runtime (the bridge runs on the blocking pool).
    pub fn new(store: Arc<dyn AccountStore>, config: LedgerConfig, catalog: ActionCatalog) -> Self {
        let bus: Arc<LoyaltyBus> = Arc::new(InMemoryEventBus::new());
        let (realtime_tx, _realtime_rx) = broadcast::channel(256);

        // Forward committed ledger events to SSE subscribers. The loop ends
        // when the bus (and with it every sender) is dropped.
        let sub = bus.subscribe();
        let forward_tx = realtime_tx.clone();
        tokio::task::spawn_blocking(move || {
            while let Ok(envelope) = sub.recv() {
                tracing::debug!(
                    user_id = %envelope.user_id(),
                    event_type = envelope.payload().event_type(),
                    sequence_number = envelope.sequence_number(),
                    "loyalty event committed"
                );
                // Lossy; no backpressure on the ledger.
                let _ = forward_tx.send(envelope);
            }
        });

        Self {
            engine: LedgerEngine::with_config(store, bus, config),
            catalog,
            realtime_tx,
        }
    }

    pub fn in_memory(config: LedgerConfig, catalog: ActionCatalog) -> Self {
        Self::new(Arc::new(InMemoryAccountStore::new()), config, catalog)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }
}

/// Build services from the process environment.
///
/// `USE_PERSISTENT_STORES=true` selects Postgres (`DATABASE_URL` required);
/// anything else runs fully in memory.
pub async fn build_services() -> anyhow::Result<AppServices> {
    let config = LedgerConfig::from_env();
    let catalog = load_catalog()?;

    let use_persistent = std::env::var(USE_PERSISTENT_STORES_ENV)
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    if !use_persistent {
        tracing::info!("using in-memory account store");
        return Ok(AppServices::in_memory(config, catalog));
    }

    let database_url = std::env::var(DATABASE_URL_ENV).with_context(|| {
        format!("{DATABASE_URL_ENV} must be set when {USE_PERSISTENT_STORES_ENV}=true")
    })?;
    let pool = PgPool::connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    let store = PostgresAccountStore::new(pool);
    store
        .ensure_schema()
        .await
        .context("failed to apply ledger schema")?;
    tracing::info!("using Postgres account store");

    Ok(AppServices::new(Arc::new(store), config, catalog))
}

fn load_catalog() -> anyhow::Result<ActionCatalog> {
    let Ok(path) = std::env::var(ACTION_CATALOG_ENV) else {
        return Ok(ActionCatalog::default());
    };

    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read action catalog {path}"))?;
    let catalog = ActionCatalog::from_json(&json)
        .with_context(|| format!("invalid action catalog {path}"))?;
    tracing::info!(path = %path, actions = catalog.actions().count(), "loaded action catalog");
    Ok(catalog)
}

/// Server-sent events for one member's account stream.
pub fn account_sse_stream(
    services: Arc<AppServices>,
    user_id: UserId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(envelope) if envelope.user_id() == user_id => {
            let data = serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default()
                .event(envelope.payload().event_type())
                .id(envelope.sequence_number().to_string())
                .data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
