//! Chat Controller
//!
//! Stateful WebSocket server for room chat fanout and call signaling.
//!
//! # Servers
//!
//! The Chat Controller runs two servers:
//! - WebSocket server for client chat and signaling (default: 0.0.0.0:4460)
//! - HTTP server for health endpoints (default: 0.0.0.0:8082)
//!
//! # Architecture
//!
//! Uses an actor model hierarchy:
//! - `ChatControllerActor` (singleton): Supervises rooms
//! - `RoomActor` (per room): Owns the room's subscriber set and fanout
//! - `CallActor` (singleton): Owns call sessions and ring timers
//! - `ConnectionActor` (per connection): Handles one WebSocket connection
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Connect to Postgres and ensure the message schema
//! 3. Ensure the search index exists
//! 4. Run the startup search backfill (resumable, optional)
//! 5. Initialize actor system and spawn the search synchronizer
//! 6. Start health HTTP server (liveness, readiness)
//! 7. Start WebSocket server
//! 8. Wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chat_controller::actors::{ActorMetrics, CallActor, ChatControllerActor};
use chat_controller::config::Config;
use chat_controller::mute::MuteRegistry;
use chat_controller::observability::{health_router, HealthState};
use chat_controller::registry::SessionRegistry;
use chat_controller::search::{HttpSearchIndex, SearchIndex, SearchSynchronizer};
use chat_controller::store::{MessageStore, PostgresMessageStore};
use chat_controller::transport::{ws_router, AppState};
use common::secret::ExposeSecret;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Chat Controller");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        ws_bind_address = %config.ws_bind_address,
        health_bind_address = %config.health_bind_address,
        ring_window_seconds = config.ring_window_seconds,
        sync_batch_size = config.sync_batch_size,
        connection_queue_capacity = config.connection_queue_capacity,
        "Configuration loaded successfully"
    );

    // Initialize health state
    let health_state = Arc::new(HealthState::new());

    // Connect to Postgres and ensure the schema
    info!("Connecting to message store...");
    let store = PostgresMessageStore::connect(config.database_url.expose_secret())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to message store");
            e
        })?;
    let store: Arc<dyn MessageStore> = Arc::new(store);
    info!("Message store connection established");

    // Ensure the search index exists. A failure here is logged but not
    // fatal: the sweep will retry and delivery never depends on search.
    info!("Ensuring search index...");
    let index = Arc::new(HttpSearchIndex::new(config.search_url.expose_secret())?);
    if let Err(e) = index.ensure_index().await {
        warn!(error = %e, "Search index creation failed, continuing without it");
    }

    // Initialize actor system
    info!("Initializing actor system...");
    let actor_metrics = ActorMetrics::new();
    let cancel_token = CancellationToken::new();

    // Search synchronizer: startup backfill, then incremental + sweep loop
    let (synchronizer, sync_notifier) = SearchSynchronizer::new(
        Arc::clone(&store),
        index,
        config.sync_batch_size,
        Duration::from_secs(config.sync_sweep_interval_seconds),
        cancel_token.child_token(),
    );

    if config.backfill_on_start {
        match synchronizer.backfill().await {
            Ok(stats) => {
                info!(
                    indexed = stats.indexed,
                    batches = stats.batches,
                    "Startup search backfill complete"
                );
            }
            Err(e) => {
                // The sweep converges later; never block startup on search
                warn!(error = %e, "Startup search backfill failed, sweep will resume it");
            }
        }
    }
    tokio::spawn(synchronizer.run());

    let mutes = Arc::new(MuteRegistry::new());
    let registry = Arc::new(SessionRegistry::new());

    let (controller_handle, _controller_task) = ChatControllerActor::spawn(
        cancel_token.clone(),
        Arc::clone(&store),
        Arc::clone(&mutes),
        sync_notifier.clone(),
        Arc::clone(&actor_metrics),
    );

    let (call_handle, _call_task) = CallActor::spawn(
        controller_handle.child_token(),
        Arc::clone(&registry),
        Duration::from_secs(config.ring_window_seconds),
        Arc::clone(&actor_metrics),
    );
    info!("Actor system initialized");

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let health_app = health_router(Arc::clone(&health_state));

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;
    info!(addr = %health_addr, "Health server bound successfully");

    let health_shutdown_token = cancel_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Start WebSocket server
    let ws_addr: SocketAddr = config.ws_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.ws_bind_address, "Invalid WebSocket bind address");
        format!("Invalid WebSocket bind address: {e}")
    })?;

    let app_state = Arc::new(AppState {
        controller: controller_handle.clone(),
        calls: call_handle,
        registry,
        mutes,
        store,
        sync: sync_notifier,
        metrics: actor_metrics,
        queue_capacity: config.connection_queue_capacity,
        cancel: cancel_token.clone(),
    });
    let ws_app = ws_router(app_state);

    let ws_listener = tokio::net::TcpListener::bind(ws_addr).await.map_err(|e| {
        error!(error = %e, addr = %ws_addr, "Failed to bind WebSocket server");
        format!("Failed to bind WebSocket server to {ws_addr}: {e}")
    })?;
    info!(addr = %ws_addr, "WebSocket server bound successfully");

    let ws_shutdown_token = cancel_token.child_token();
    tokio::spawn(async move {
        info!(addr = %ws_addr, "WebSocket server starting");
        let server = axum::serve(ws_listener, ws_app).with_graceful_shutdown(async move {
            ws_shutdown_token.cancelled().await;
            info!("WebSocket server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "WebSocket server failed");
        }
    });

    health_state.set_ready();
    info!("Chat Controller running - press Ctrl+C to shutdown");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so the fronting layer stops sending traffic
    health_state.set_not_ready();

    // Cancel everything: servers, connections, rooms, calls, synchronizer
    cancel_token.cancel();

    // Give tasks time to shut down
    tokio::time::sleep(Duration::from_secs(2)).await;

    info!("Chat Controller shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
