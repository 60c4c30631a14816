//! Line-protocol TCP server over a local engine.
//!
//! ```text
//! loam-server [config_file]
//! ```
//!
//! The config file is `key: value` lines (`host`, `port`, `data_dir`,
//! `cache_size`, `max_connections`); without one, defaults serve
//! 127.0.0.1:6410 from `./loamdb-data`.

use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use loamdb::server::{Server, ServerConfig};
use loamdb::{Config, Engine};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let server_config = match std::env::args().nth(1) {
        Some(path) => match ServerConfig::load(Path::new(&path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load config {path}: {e}");
                std::process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };

    let engine_config = Config {
        cache_size: server_config.cache_size,
        ..Config::new(&server_config.data_dir)
    };
    let engine = match Engine::open(engine_config) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            eprintln!("failed to open engine at {}: {e}", server_config.data_dir);
            std::process::exit(1);
        }
    };

    let server = Server::new(server_config, engine);
    if let Err(e) = server.run() {
        eprintln!("server error: {e}");
        std::process::exit(1);
    }
}
