use crate::error::{BeanloopError, Result};
use dashmap::DashMap;
use std::env;
use std::str::FromStr;
use std::sync::Arc;

/// Configuration service
///
/// A snapshot of the process environment that can be overridden in code
/// before the typed views below are built from it.
#[derive(Clone, Default)]
pub struct ConfigService {
    config: Arc<DashMap<String, String>>,
}

impl ConfigService {
    /// Load every environment variable
    pub fn new() -> Self {
        let service = Self::default();
        for (key, value) in env::vars() {
            service.set(&key, &value);
        }
        service
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key).map(|v| v.clone())
    }

    pub fn set(&self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }

    /// Parse a value, failing if it is present but malformed
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| BeanloopError::InvalidConfig {
                    key: key.to_string(),
                    value,
                }),
            None => Ok(None),
        }
    }

    pub fn get_or<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.get_parsed(key)?.unwrap_or(default))
    }
}

/// Executor behaviour
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Install SIGINT/SIGTERM handlers when the lifecycle starts
    pub handle_signals: bool,
    /// Terminate the process once a signal-triggered shutdown completed
    pub exit_on_signal: bool,
    /// Buffer size of the lifecycle event channel
    pub event_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            handle_signals: true,
            exit_on_signal: true,
            event_capacity: 64,
        }
    }
}

impl ExecutorConfig {
    pub fn from_config(config: &ConfigService) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            handle_signals: config.get_or("BEANLOOP_HANDLE_SIGNALS", defaults.handle_signals)?,
            exit_on_signal: config.get_or("BEANLOOP_EXIT_ON_SIGNAL", defaults.exit_on_signal)?,
            event_capacity: config
                .get_or("BEANLOOP_EVENT_CAPACITY", defaults.event_capacity)?
                .max(1),
        })
    }

    /// No process hooks; the host drives shutdown itself
    pub fn detached() -> Self {
        Self {
            handle_signals: false,
            exit_on_signal: false,
            ..Self::default()
        }
    }
}

/// HTTP application settings
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Bind and serve during the `run` phase
    pub listen: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            listen: true,
        }
    }
}

impl AppConfig {
    pub fn from_config(config: &ConfigService) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            host: config.get("BEANLOOP_HOST").unwrap_or(defaults.host),
            port: config.get_or("BEANLOOP_PORT", defaults.port)?,
            listen: config.get_or("BEANLOOP_LISTEN", defaults.listen)?,
        })
    }
}
