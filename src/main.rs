use anyhow::Context;
use flare_allocator::api::{AppState, create_router};
use flare_allocator::registry::create_registry;
use flare_allocator::retry::ExponentialBackoffPolicy;
use flare_allocator::runtime::{RuntimeConfig, TaskResult};
use flare_allocator::telemetry::init_tracing;
use flare_allocator::{
    AllocationEngine, AllocatorMetrics, Config, ConfigStore, ControlApi, Reconciler,
    ServiceRuntime,
};
use std::sync::Arc;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = Config::resolve_path(std::env::args().nth(1));
    let config = Config::load_from_file(&path)
        .with_context(|| format!("failed to load configuration from {}", path))?;
    init_tracing(&config.log)?;

    info!(
        config = %path,
        registry = ?config.registry.registry_type,
        strategy = %config.allocator.strategy,
        strict_versioning = config.allocator.strict_versioning,
        "Starting flare-allocator"
    );

    let metrics = Arc::new(AllocatorMetrics::new()?);
    let store = Arc::new(ConfigStore::new(config.allocator.default_block_length)?);
    let registry = create_registry(&config.registry)?;
    let engine = Arc::new(
        AllocationEngine::new(store.clone(), config.allocator.strategy)
            .with_metrics(metrics.clone()),
    );
    let control = Arc::new(
        ControlApi::new(store.clone())
            .with_strict_versioning(config.allocator.strict_versioning)
            .with_metrics(metrics.clone()),
    );

    let router = create_router(AppState {
        store: store.clone(),
        engine: engine.clone(),
        control,
        registry: registry.clone(),
        metrics: metrics.clone(),
    });

    let bind_address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;
    info!(address = %bind_address, "Control API listening");

    let mut runtime = ServiceRuntime::new("flare-allocator")
        .with_config(RuntimeConfig::default())
        .add_spawn_with_shutdown("http", move |shutdown_rx| async move {
            let served: TaskResult = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
                .map_err(|e| e.into());
            served
        });

    for service in &config.reconcile.services {
        let reconciler = Reconciler::new(
            service.clone(),
            store.clone(),
            registry.clone(),
            config.reconcile.interval(),
        )
        .with_policy(config.reconcile.hole_policy())
        .with_backoff(ExponentialBackoffPolicy::unbounded(
            config.reconcile.backoff_base(),
            config.reconcile.backoff_max(),
        ))
        .with_metrics(metrics.clone());
        runtime = runtime.add_task(Box::new(reconciler));
    }

    let gc_store = store.clone();
    let gc_engine = engine.clone();
    let gc_interval = config.reconcile.gc_interval();
    runtime = runtime.add_spawn_with_shutdown("gc", move |mut shutdown_rx| async move {
        let mut ticker = tokio::time::interval(gc_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let collected = gc_store.collect_garbage();
                    if !collected.is_empty() {
                        gc_engine.forget(&collected);
                        debug!(services = ?collected, "Garbage collection pass");
                    }
                }
                _ = &mut shutdown_rx => break,
            }
        }
        let stopped: TaskResult = Ok(());
        stopped
    });

    runtime.run().await
}
