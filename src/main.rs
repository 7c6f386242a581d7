use gemway::kv::SledKv;
use gemway::router::{build_router, AppState};
use gemway::{logger, AppConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // .env is a development convenience; absence is fine
    dotenvy::dotenv().ok();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = logger::init(config.log_file.as_deref(), config.debug_body_log) {
        eprintln!("failed to initialize logger: {}", e);
        std::process::exit(1);
    }

    log::info!(
        "gemway {} starting: {} upstream keys, {} tts backends, upstream {}",
        env!("CARGO_PKG_VERSION"),
        config.api_keys.len(),
        config.backend_services.len(),
        config.base_url
    );

    let kv = match SledKv::open(&config.data_dir.join("gemway-state")) {
        Ok(kv) => Arc::new(kv),
        Err(e) => {
            log::error!("failed to open state database: {}", e);
            std::process::exit(1);
        }
    };

    let listen_addr = config.listen_addr;
    let state = match AppState::new(config, kv) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            log::error!("failed to build application state: {}", e);
            std::process::exit(1);
        }
    };

    let router = build_router(state);
    let listener = match tokio::net::TcpListener::bind(listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("failed to bind {}: {}", listen_addr, e);
            std::process::exit(1);
        }
    };
    log::info!("listening on http://{}", listen_addr);

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        log::error!("server error: {}", e);
        std::process::exit(1);
    }
    log::info!("shut down cleanly");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to install shutdown handler: {}", e);
        return;
    }
    log::info!("shutdown signal received");
}
