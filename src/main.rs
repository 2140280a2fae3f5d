use anyhow::Context;
use ifwarden::internal::{
    api,
    config::load_config,
    daemon::Daemon,
    fsm::memory::InMemoryEngine,
    inventory::{load_inventory, populate},
    manager::{HotplugEvent, Manager},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "ifwarden=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config();

    let mut engine = InMemoryEngine::new();
    let workers = populate(&mut engine, &load_inventory(&config.inventory_path));

    let mut manager = Manager::with_prefix(engine, &config.object_prefix);
    for worker in workers {
        manager.handle_hotplug(HotplugEvent::Added(worker));
    }

    let (daemon, handle) = Daemon::new(manager, config.recheck_interval(), config.event_queue);
    let app = api::create_router(handle);

    // Nothing useful can run without the control socket.
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("cannot listen on {}", config.listen_addr))?;
    tracing::info!("ifwarden manager listening on {}", config.listen_addr);

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("control surface stopped: {}", e);
        }
    });

    let manager = daemon.run(shutdown_signal()).await;
    server.abort();
    manager.shutdown();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("cannot wait for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
