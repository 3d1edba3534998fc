use orderflow_stream::database::{
    establish_connection_pool, OrderflowRepositoryImpl, RepositoryEventSource,
};
use orderflow_stream::{
    create_router, ApiState, CursorStore, OrderflowPoller, ReplayBuffer, StreamConfig,
    SubscriberRegistry, WsState,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orderflow_stream=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = StreamConfig::from_env();

    // Event store
    let pool = match establish_connection_pool(&config.store.database_url(), config.store.pool_size)
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("❌ Failed to create event store pool: {}", e);
            std::process::exit(1);
        }
    };
    let repository = Arc::new(OrderflowRepositoryImpl::new(move || pool.get_conn()));
    let source = Arc::new(RepositoryEventSource::new(repository, config.fetch_limit));

    // Fan-out core
    let registry = Arc::new(SubscriberRegistry::new());
    let buffers = Arc::new(ReplayBuffer::new(config.buffer_capacity));
    let cursors = Arc::new(CursorStore::new(config.grace_window()));
    let poller = Arc::new(OrderflowPoller::new(
        source,
        registry.clone(),
        buffers.clone(),
        cursors.clone(),
        config.poller_config(),
    ));

    let shutdown = CancellationToken::new();
    let poller_handle = poller.clone().spawn(shutdown.clone());

    let ws_state = Arc::new(WsState {
        registry: registry.clone(),
        buffers: buffers.clone(),
        auth_token: config.auth_token.clone(),
        queue_capacity: config.subscriber_queue_capacity,
        send_timeout: config.send_timeout(),
        heartbeat_interval: config.heartbeat_interval(),
        shutdown: shutdown.clone(),
    });
    let api_state = Arc::new(ApiState {
        registry,
        buffers,
        cursors,
        poller,
    });
    let app = create_router(ws_state, api_state);

    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("❌ Failed to bind {}: {}", config.bind_addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("🚀 Orderflow stream running on http://{}", config.bind_addr);
    tracing::info!("🔌 WebSocket: ws://{}/ws/orderflow/{{coin}}?token=...", config.bind_addr);
    tracing::info!("📊 Stats: http://{}/api/v1/stats", config.bind_addr);
    tracing::info!("📚 Swagger UI: http://{}/swagger-ui", config.bind_addr);
    tracing::info!(
        "   Poll every {}ms, replay {} events/topic, grace window {}s",
        config.poll_interval_ms,
        config.buffer_capacity,
        config.grace_window_secs
    );

    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
    {
        tracing::error!("❌ Server error: {}", e);
    }

    shutdown.cancel();
    if let Err(e) = poller_handle.await {
        tracing::error!("❌ Poller task failed: {}", e);
    }
    tracing::info!("👋 Orderflow stream stopped");
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM
async fn shutdown_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("🛑 Shutdown requested");
    shutdown.cancel();
}
