//! SFU Service
//!
//! WebSocket signaling server and composite recorder in front of a pool of
//! media workers.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing and the Prometheus metrics recorder
//! 3. Start the media worker pool (fails startup if any worker fails)
//! 4. Spawn the room registry actor
//! 5. Build recorder, chat and signaling services
//! 6. Start the HTTP server (`/ws`, REST, health, metrics)
//! 7. Wait for a shutdown signal or a worker death

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sfu_service::actors::RoomRegistryActor;
use sfu_service::config::Config;
use sfu_service::media::{LocalMediaEngine, WebRtcTransportOptions, WorkerPool, WorkerSettings};
use sfu_service::observability::{metrics::init_metrics_recorder, HealthState};
use sfu_service::recording::{
    wait_all_completed, CompositeRecorder, RecorderSettings, STOP_GRACE_PERIOD,
};
use sfu_service::repositories::{InMemoryChatRepository, InMemoryMeetingRepository};
use sfu_service::routes::{build_routes, AppState};
use sfu_service::services::{ChatService, LocalBlobStore, LoggingEventPublisher};
use sfu_service::signaling::SignalingServices;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time given to the HTTP server to drain connections.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    // Initialize tracing
    let json_layer = config
        .log_json
        .then(|| tracing_subscriber::fmt::layer().json());
    let text_layer = (!config.log_json).then(tracing_subscriber::fmt::layer);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sfu_service=debug,tower_http=debug".into()),
        )
        .with(json_layer)
        .with(text_layer)
        .init();

    info!("Starting SFU service");
    info!(
        bind_address = %config.bind_address,
        worker_count = config.worker_count,
        rtc_min_port = config.rtc_min_port,
        rtc_max_port = config.rtc_max_port,
        announced_ip = %config.announced_ip,
        recordings_dir = %config.recordings_dir.display(),
        duplicate_join_policy = %config.duplicate_join_policy,
        "Configuration loaded successfully"
    );

    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    info!("Starting media workers...");
    let workers = WorkerPool::init(
        &LocalMediaEngine::new(),
        config.worker_count,
        WorkerSettings {
            rtc_min_port: config.rtc_min_port,
            rtc_max_port: config.rtc_max_port,
        },
    )
    .await
    .map_err(|e| {
        error!(error = %e, "Failed to start media workers");
        e
    })?;
    let workers = Arc::new(workers);

    let root_token = CancellationToken::new();
    let (registry, registry_task) =
        RoomRegistryActor::spawn(config.duplicate_join_policy, root_token.child_token());

    let recorder = CompositeRecorder::new(
        RecorderSettings::from_config(&config),
        Arc::new(InMemoryMeetingRepository::new()),
        Arc::new(LocalBlobStore::new(
            config.recordings_dir.join("store"),
            config.public_base_url.clone(),
        )),
        Arc::new(LoggingEventPublisher),
    );
    let services = Arc::new(SignalingServices {
        registry,
        workers: Arc::clone(&workers),
        recorder: Arc::new(recorder),
        chat: ChatService::new(
            Arc::new(InMemoryChatRepository::new()),
            config.chat_history_limit,
        ),
        transport_options: WebRtcTransportOptions::announced(config.announced_ip.clone()),
    });
    let app = build_routes(
        Arc::new(AppState {
            services,
            health: Arc::clone(&health_state),
        }),
        prometheus_handle,
    );

    // Bind before spawning to fail fast on bind errors
    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind HTTP server");
        format!("Failed to bind HTTP server to {addr}: {e}")
    })?;

    let server_token = root_token.child_token();
    let server_task = tokio::spawn(async move {
        info!(addr = %addr, "HTTP server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_token.cancelled().await;
            info!("HTTP server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "HTTP server failed");
        }
    });

    health_state.set_ready(workers.len());
    info!("SFU service running - press Ctrl+C to shutdown");

    let worker_failed = tokio::select! {
        () = shutdown_signal() => {
            info!("Shutdown signal received, initiating graceful shutdown...");
            false
        }
        worker_id = workers.worker_died() => {
            error!(worker_id = %worker_id, "Media worker died, exiting");
            true
        }
    };

    health_state.set_not_ready();
    root_token.cancel();

    let pending_recordings = match registry_task.await {
        Ok(pending) => pending,
        Err(e) => {
            warn!(error = %e, "Registry task ended abnormally");
            Vec::new()
        }
    };
    if !pending_recordings.is_empty() {
        info!(
            recordings = pending_recordings.len(),
            "Waiting for recordings to finalize"
        );
        let unfinished = wait_all_completed(pending_recordings, STOP_GRACE_PERIOD).await;
        if unfinished > 0 {
            warn!(unfinished, "Exiting with recordings still finalizing");
        }
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, server_task).await.is_err() {
        warn!("HTTP server did not stop within the grace period");
    }

    if worker_failed {
        std::process::exit(1);
    }

    info!("SFU service shutdown complete");
    Ok(())
}

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
