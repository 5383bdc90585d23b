//! Configuration management for the transfer server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Directory roots; per-user and per-job directories are created beneath them
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Final uploads and in-flight chunk sessions
    pub uploads_dir: PathBuf,
    /// Conversion outputs and job archives
    pub output_dir: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid SERVER_PORT {value:?}: {source}")]
    InvalidPort {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            storage: StorageConfig {
                uploads_dir: PathBuf::from("./data/uploads"),
                output_dir: PathBuf::from("./data/output"),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let port = match env::var("SERVER_PORT") {
            Ok(value) => value
                .parse()
                .map_err(|source| ConfigError::InvalidPort { value, source })?,
            Err(_) => defaults.server.port,
        };

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port,
            },
            storage: StorageConfig {
                uploads_dir: env::var("UPLOADS_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.uploads_dir),
                output_dir: env::var("OUTPUT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.output_dir),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.storage.uploads_dir, PathBuf::from("./data/uploads"));
        assert_eq!(config.storage.output_dir, PathBuf::from("./data/output"));
    }

    // Env vars are process-wide, so every from_env case runs in one test
    #[test]
    fn test_from_env() {
        env::set_var("SERVER_PORT", "8088");
        env::set_var("UPLOADS_DIR", "/srv/uploads");
        env::remove_var("OUTPUT_DIR");

        let config = Config::from_env().unwrap();
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.storage.uploads_dir, PathBuf::from("/srv/uploads"));
        assert_eq!(config.storage.output_dir, PathBuf::from("./data/output"));

        env::set_var("SERVER_PORT", "not-a-port");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort { ref value, .. } if value == "not-a-port"));

        env::remove_var("SERVER_PORT");
        env::remove_var("UPLOADS_DIR");
    }
}
