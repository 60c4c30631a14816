//! TCP server (collaborator).
//!
//! A thread-per-connection line-protocol front end. Writes route through
//! [`Engine::put`]/[`Engine::delete`], reads through [`Engine::get`];
//! the server holds no state of its own beyond the listener and a
//! connection counter, and is not part of the storage core.

pub mod protocol;

use std::{
    io::{self, BufRead, BufReader, Write},
    net::{TcpListener, TcpStream},
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use thiserror::Error;
use tracing::{info, warn};

use crate::engine::Engine;
use protocol::{Request, Response};

// ------------------------------------------------------------------------------------------------
// Server configuration
// ------------------------------------------------------------------------------------------------

/// Settings for the server binary, loadable from a `key: value` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    pub cache_size: usize,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6410,
            data_dir: "loamdb-data".to_string(),
            cache_size: 1000,
            max_connections: 128,
        }
    }
}

/// Errors raised while loading a server config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("line {line}: {message}")]
    Invalid { line: usize, message: String },
}

impl ServerConfig {
    /// Loads a `key: value` file. Unknown keys are rejected; `#` starts a
    /// comment; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::default();

        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once(':').ok_or_else(|| ConfigError::Invalid {
                line: line_no + 1,
                message: format!("expected `key: value`, got {raw:?}"),
            })?;
            let (key, value) = (key.trim(), value.trim());

            let bad_value = |message: String| ConfigError::Invalid {
                line: line_no + 1,
                message,
            };
            match key {
                "host" => config.host = value.to_string(),
                "port" => {
                    config.port = value
                        .parse()
                        .map_err(|_| bad_value(format!("invalid port {value:?}")))?
                }
                "data_dir" => config.data_dir = value.to_string(),
                "cache_size" => {
                    config.cache_size = value
                        .parse()
                        .map_err(|_| bad_value(format!("invalid cache_size {value:?}")))?
                }
                "max_connections" => {
                    config.max_connections = value
                        .parse()
                        .map_err(|_| bad_value(format!("invalid max_connections {value:?}")))?
                }
                other => {
                    return Err(ConfigError::Invalid {
                        line: line_no + 1,
                        message: format!("unknown key {other:?}"),
                    })
                }
            }
        }
        Ok(config)
    }
}

// ------------------------------------------------------------------------------------------------
// Server
// ------------------------------------------------------------------------------------------------

/// Accept loop: one thread per connection, bounded by `max_connections`.
pub struct Server {
    config: ServerConfig,
    engine: Arc<Engine>,
}

impl Server {
    pub fn new(config: ServerConfig, engine: Arc<Engine>) -> Self {
        Self { config, engine }
    }

    /// Binds and serves until the listener fails. Blocks the caller.
    pub fn run(&self) -> io::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)?;
        info!(%addr, "server listening");

        let active = Arc::new(AtomicUsize::new(0));
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            if active.load(Ordering::SeqCst) >= self.config.max_connections {
                let mut stream = stream;
                let _ = stream.write_all(Response::Err("server busy".into()).serialize().as_bytes());
                continue;
            }

            active.fetch_add(1, Ordering::SeqCst);
            let engine = Arc::clone(&self.engine);
            let active = Arc::clone(&active);
            thread::spawn(move || {
                if let Err(e) = handle_connection(&engine, stream) {
                    warn!(error = %e, "connection ended with error");
                }
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }
        Ok(())
    }
}

fn handle_connection(engine: &Engine, stream: TcpStream) -> io::Result<()> {
    let peer = stream.peer_addr()?;
    info!(%peer, "client connected");

    let mut writer = stream.try_clone()?;
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = line?;
        let response = match protocol::parse(&line) {
            Err(message) => Response::Err(message),
            Ok(Request::Quit) => {
                writer.write_all(Response::Ok(Some("bye".into())).serialize().as_bytes())?;
                break;
            }
            Ok(request) => dispatch(engine, request),
        };
        writer.write_all(response.serialize().as_bytes())?;
    }

    info!(%peer, "client disconnected");
    Ok(())
}

fn dispatch(engine: &Engine, request: Request) -> Response {
    match request {
        Request::Put { key, value } => {
            if engine.put(key.into_bytes(), value.into_bytes()) {
                Response::Ok(None)
            } else {
                Response::Err("write failed".into())
            }
        }
        Request::Get { key } => match engine.get(key.as_bytes()) {
            Ok(Some(entry)) => Response::Value(String::from_utf8_lossy(&entry.value).into_owned()),
            Ok(None) => Response::Err("not found".into()),
            Err(e) => Response::Err(e.to_string()),
        },
        Request::Delete { key } => {
            if engine.delete(key.into_bytes()) {
                Response::Ok(Some("deleted".into()))
            } else {
                Response::Ok(Some("not found".into()))
            }
        }
        Request::Ping => Response::Pong,
        Request::Status => {
            let stats = engine.stats();
            let tables: usize = stats.levels.iter().map(|(count, _)| count).sum();
            Response::Ok(Some(format!(
                "memtable_bytes={} tables={} levels={} cache_entries={}",
                stats.memtable_bytes,
                tables,
                stats.levels.len(),
                stats.cache_entries
            )))
        }
        Request::Quit => Response::Ok(Some("bye".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::ServerConfig;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# loamdb server").unwrap();
        writeln!(file, "host: 0.0.0.0").unwrap();
        writeln!(file, "port: 7000").unwrap();
        writeln!(file, "data_dir: /var/lib/loamdb  # comment").unwrap();
        file.flush().unwrap();

        let config = ServerConfig::load(file.path()).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 7000);
        assert_eq!(config.data_dir, "/var/lib/loamdb");
        // Untouched keys keep defaults.
        assert_eq!(config.cache_size, ServerConfig::default().cache_size);
    }

    #[test]
    fn test_load_rejects_unknown_keys_and_bad_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "bandwidth: 9000").unwrap();
        file.flush().unwrap();
        assert!(ServerConfig::load(file.path()).is_err());

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "port: not-a-number").unwrap();
        file.flush().unwrap();
        assert!(ServerConfig::load(file.path()).is_err());
    }
}
