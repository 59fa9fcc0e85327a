use crate::config::Config;
use crate::config_validator::ConfigValidator;
use crate::engine::{EchoEngine, InferenceEngine, MemoryBudget};
use crate::error::GateError;
use crate::handlers::{
    alerts, cancel_task, generate, get_task, health_check, issue_key, list_keys, profile,
    queue_stats, revoke_key, security_stats, stats, unblock_origin, AppState,
};
use crate::health::{ResourceSampler, SysinfoSampler};
use crate::middleware::{admission_middleware, instrumentation_middleware};
use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the full router. `/health` is public; everything under `/api` passes admission.
pub fn create_app(state: AppState) -> Router {
    let api = Router::new()
        .route("/generate", post(generate))
        .route("/tasks/:id", get(get_task).delete(cancel_task))
        .route("/queue", get(queue_stats))
        .route("/stats", get(stats))
        .route("/alerts", get(alerts))
        .route("/profile", get(profile))
        .route("/admin/keys", get(list_keys).post(issue_key))
        .route("/admin/keys/:key", delete(revoke_key))
        .route("/admin/security", get(security_stats))
        .route("/admin/unblock/:origin", post(unblock_origin))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admission_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            instrumentation_middleware,
        ))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// One maintenance pass: sample health, then drop tasks and samples older than `retention`.
pub fn run_maintenance(state: &AppState, retention: Duration) -> (usize, usize) {
    if let Err(e) = state.health.check() {
        tracing::warn!(error = %e, "Periodic health check failed");
    }
    let tasks_removed = state.scheduler.cleanup(retention);
    let samples_removed = state.health.cleanup(retention);
    tracing::debug!(tasks_removed, samples_removed, "Maintenance pass finished");
    (tasks_removed, samples_removed)
}

fn spawn_maintenance(state: AppState, interval: Duration, retention: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_maintenance(&state, retention);
        }
    })
}

pub struct Server {
    app: Router,
    state: AppState,
    config: Config,
}

impl Server {
    /// Validates the configuration and wires every component with the real
    /// resource sampler and the memory-guarded engine.
    pub fn new(config: Config) -> Result<Self, GateError> {
        ConfigValidator::validate(&config)?;

        let sampler: Arc<dyn ResourceSampler> = Arc::new(SysinfoSampler::new()?);
        let engine: Arc<dyn InferenceEngine> = Arc::new(MemoryBudget::new(
            EchoEngine,
            Arc::clone(&sampler),
            config.memory_limit_mb,
        ));
        let state = AppState::new(&config, sampler, engine);

        Ok(Self::with_state(config, state))
    }

    pub fn with_state(config: Config, state: AppState) -> Self {
        Self {
            app: create_app(state.clone()),
            state,
            config,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves, then
    /// stop the task dispatch loop.
    pub async fn serve<F>(
        self,
        listener: tokio::net::TcpListener,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let Server { app, state, config } = self;

        state.scheduler.start();
        let maintenance = spawn_maintenance(
            state.clone(),
            config.health_sample_interval(),
            config.task_retention(),
        );

        tracing::info!("Codegate server listening on {}", listener.local_addr()?);
        tracing::info!("Health check available at /health");

        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        maintenance.abort();
        state.scheduler.shutdown(config.shutdown_timeout()).await;
        tracing::info!("Codegate server stopped");

        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
