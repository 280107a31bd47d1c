use hook_deploy::auth::Authenticator;
use hook_deploy::db::{Queue, init_db};
use hook_deploy::dispatcher::Dispatcher;
use hook_deploy::logging::{FileLogger, setup_logging};
use hook_deploy::worker::ProcessRunner;
use hook_deploy::{AppState, HookConfig, api, load_config};
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";
const DEFAULT_CONFIG_PATH: &str = "hook_config.toml";

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string());
    let config_path =
        std::env::var("HOOK_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    // A missing config must not stop the server; it starts with no tokens and
    // rejects every hook until one is provided.
    let (config, config_error) = match load_config(&config_path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (HookConfig::default(), Some(e)),
    };

    let file_logger = config
        .log_dir
        .clone()
        .map(|dir| FileLogger::new(dir).with_rotation(config.log_rotation.into()));
    let _log_guard = match setup_logging(file_logger.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", e);
            None
        }
    };

    match config_error {
        Some(e) => error!("{}; no tokens configured, all hooks will be rejected", e),
        None => info!("Using config at {:?}", config_path),
    }
    if config.tokens.is_empty() {
        warn!("No branch tokens configured");
    }

    let pool = match init_db(&config.database_path).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    let queue = Queue::new(pool);

    let dispatcher = Dispatcher::new(
        queue.clone(),
        config.worker_settings(),
        Arc::new(ProcessRunner::new(config.command_timeout())),
        config.poll_interval(),
    );
    tokio::spawn(dispatcher.run());

    let state = Arc::new(AppState::new(
        Authenticator::new(config.tokens.clone()),
        queue,
    ));
    let app = api::router(state);

    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", bind_address, e);
            std::process::exit(1);
        }
    };
    info!("Listening on {}", bind_address);

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
