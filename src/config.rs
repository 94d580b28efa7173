//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables**: `SLUICE_USER_AGENT`, `SLUICE_MAX_CONCURRENT`,
//!    `SLUICE_LOG`
//! 2. **Config file**: path via `--config <path>`, or `sluice.toml` in CWD
//! 3. **Compiled defaults**: see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [transfer]
//! user_agent = "sluice/0.1"
//! connect_timeout_ms = 10000
//! timeout_ms = 0                 # 0 = no overall limit
//! max_redirects = 10             # -1 = unlimited, 0 = don't follow
//! verbose = false                # engine chatter to tracing (target sluice::wire)
//! fail_on_error = false          # HTTP >= 400 fails the transfer
//! resolve = ["example.test:443:127.0.0.1"]
//!
//! [engine]
//! max_concurrent = 8
//! poll_timeout_ms = 1000
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::error::Error;
use crate::list::List;
use crate::registry::{Opt, Value};
use crate::transfer::Transfer;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Defaults applied to every transfer the CLI creates.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// `User-Agent` header. Override with `SLUICE_USER_AGENT`.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Connect phase limit in milliseconds (default 10 000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Whole-transfer limit in milliseconds; 0 disables it (default 0).
    #[serde(default)]
    pub timeout_ms: u64,
    /// Redirects to follow; -1 unlimited, 0 none (default 10).
    #[serde(default = "default_max_redirects")]
    pub max_redirects: i64,
    /// Route engine verbose output to tracing (default false).
    #[serde(default)]
    pub verbose: bool,
    /// Treat HTTP status >= 400 as failure (default false).
    #[serde(default)]
    pub fail_on_error: bool,
    /// `host:port:address` overrides, bypassing DNS.
    #[serde(default)]
    pub resolve: Vec<String>,
}

/// Transfer-set settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Transfers in flight at once (default 8). Override with `SLUICE_MAX_CONCURRENT`.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Longest single blocking wait in milliseconds (default 1000).
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `SLUICE_LOG`,
    /// and by `RUST_LOG` at subscriber setup.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_user_agent() -> String {
    format!("sluice/{}", env!("CARGO_PKG_VERSION"))
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_max_redirects() -> i64 {
    10
}
fn default_max_concurrent() -> usize {
    8
}
fn default_poll_timeout_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_ms: default_connect_timeout_ms(),
            timeout_ms: 0,
            max_redirects: default_max_redirects(),
            verbose: false,
            fail_on_error: false,
            resolve: Vec::new(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// The configuration file could not be used.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist. Otherwise `sluice.toml` in the
    /// current directory is used when present, falling back to compiled defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigFileError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new("sluice.toml").exists() => Self::from_file(Path::new("sluice.toml"))?,
            None => Config::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigFileError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Env var overrides, read through `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigFileError> {
        if let Some(agent) = lookup("SLUICE_USER_AGENT") {
            self.transfer.user_agent = agent;
        }
        if let Some(value) = lookup("SLUICE_MAX_CONCURRENT") {
            self.engine.max_concurrent = value
                .trim()
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigFileError::Env {
                    var: "SLUICE_MAX_CONCURRENT",
                    value,
                })?;
        }
        if let Some(level) = lookup("SLUICE_LOG") {
            self.logging.level = level;
        }
        Ok(())
    }
}

impl TransferConfig {
    /// Push these defaults into `transfer` through the option registry.
    pub fn apply(&self, transfer: &mut Transfer) -> Result<(), Error> {
        transfer.set(Opt::UserAgent, self.user_agent.as_str())?;
        transfer.set(
            Opt::ConnectTimeoutMs,
            Value::Integer(i64::try_from(self.connect_timeout_ms).unwrap_or(i64::MAX)),
        )?;
        transfer.set(
            Opt::TimeoutMs,
            Value::Integer(i64::try_from(self.timeout_ms).unwrap_or(i64::MAX)),
        )?;
        transfer.max_redirects(self.max_redirects)?;
        transfer.set(Opt::FailOnError, self.fail_on_error)?;
        if self.verbose {
            transfer.verbose_to_tracing(true)?;
        }
        if !self.resolve.is_empty() {
            transfer.resolve(List::from_items(&self.resolve)?)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.max_concurrent, 8);
        assert_eq!(config.transfer.max_redirects, 10);
        assert!(config.transfer.user_agent.starts_with("sluice/"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nmax_concurrent = 3\n\n[transfer]\nresolve = [\"a.test:80:127.0.0.1\"]").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.engine.max_concurrent, 3);
        assert_eq!(config.engine.poll_timeout_ms, 1000);
        assert_eq!(config.transfer.resolve, vec!["a.test:80:127.0.0.1"]);
        assert_eq!(config.transfer.connect_timeout_ms, 10_000);
    }

    #[test]
    fn test_bad_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine\nmax_concurrent = ").unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigFileError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));

        let missing = Config::load(Some(Path::new("/nonexistent/sluice.toml"))).unwrap_err();
        assert!(matches!(missing, ConfigFileError::Read { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SLUICE_USER_AGENT", "probe/1"),
            ("SLUICE_MAX_CONCURRENT", "2"),
            ("SLUICE_LOG", "debug"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_env(|var| env.get(var).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(config.transfer.user_agent, "probe/1");
        assert_eq!(config.engine.max_concurrent, 2);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_env_rejects_zero_concurrency() {
        let mut config = Config::default();
        let err = config
            .apply_env(|var| (var == "SLUICE_MAX_CONCURRENT").then(|| "0".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigFileError::Env { .. }));
    }

    #[test]
    fn test_apply_to_transfer() {
        let config = TransferConfig {
            verbose: true,
            resolve: vec!["a.test:80:127.0.0.1".into()],
            ..TransferConfig::default()
        };
        let mut t = Transfer::new().unwrap();
        config.apply(&mut t).unwrap();
    }
}
