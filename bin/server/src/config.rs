//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server,
//! loaded via the `config` crate from environment variables.
//!
//! See [`EngineConfig`](boardflow_flow::EngineConfig) and
//! [`SshConfig`](boardflow_remote::SshConfig) for the nested sections
//! (`ENGINE__*` and `SSH__*`).

use boardflow_flow::EngineConfig;
use boardflow_remote::SshConfig;
use serde::Deserialize;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Flow engine limits.
    #[serde(default)]
    pub engine: EngineConfig,

    /// SSH timeouts.
    #[serde(default)]
    pub ssh: SshConfig,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_source(
            config::Environment::default()
                .separator("__")
                .try_parsing(true),
        )
    }

    fn from_source(
        source: impl config::Source + Send + Sync + 'static,
    ) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn environment(vars: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        config::Environment::default()
            .separator("__")
            .try_parsing(true)
            .source(Some(source))
    }

    #[test]
    fn defaults_apply_when_only_database_is_set() {
        let config = ServerConfig::from_source(environment(&[(
            "DATABASE_URL",
            "postgres://localhost/boardflow",
        )]))
        .expect("config");

        assert_eq!(config.bind_addr, "127.0.0.1:3000");
        assert_eq!(config.engine.max_loop_iterations, 1000);
        assert_eq!(config.ssh.command_timeout_secs, 30);
    }

    #[test]
    fn nested_sections_use_double_underscore() {
        let config = ServerConfig::from_source(environment(&[
            ("DATABASE_URL", "postgres://localhost/boardflow"),
            ("ENGINE__MAX_WALK_DEPTH", "64"),
            ("ENGINE__MAX_LOOP_DELAY_MS", "2500"),
            ("SSH__CONNECT_TIMEOUT_SECS", "3"),
        ]))
        .expect("config");

        assert_eq!(config.engine.max_walk_depth, 64);
        assert_eq!(config.engine.max_loop_delay_ms, 2500);
        assert_eq!(config.ssh.connect_timeout_secs, 3);
    }

    #[test]
    fn missing_database_url_is_an_error() {
        assert!(ServerConfig::from_source(environment(&[])).is_err());
    }
}
