use std::env;

use quotegate_server::ServerBuilder;
use quotegate_server::config::loader::{CONFIG_PATH_VAR, config_path, load_config};
use quotegate_server::observability::init_tracing;

#[tokio::main]
async fn main() {
    // .env is optional
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    let log_level = init_tracing();

    let chosen = config_path(env::args().skip(1), env::var(CONFIG_PATH_VAR).ok());
    let cfg = match load_config(Some(&chosen.path)) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(path = %chosen.path, origin = chosen.origin, error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };
    log_level.apply(&cfg.logging.level);
    tracing::info!(path = %chosen.path, origin = chosen.origin, "configuration loaded");

    let server = match ServerBuilder::new().with_config(cfg).build().await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "server initialization failed");
            std::process::exit(2);
        }
    };

    if let Err(e) = server.run().await {
        tracing::error!(error = %format!("{e:#}"), "server error");
        std::process::exit(1);
    }
}
