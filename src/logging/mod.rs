use crate::config::ConfigService;
use crate::error::{BeanloopError, Result};
use tracing_subscriber::EnvFilter;

/// Default filter for an `APP_ENV` value
pub fn default_directive(environment: Option<&str>) -> &'static str {
    match environment {
        Some("production") => "info",
        Some("test") => "off",
        _ => "debug",
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise the level follows `APP_ENV`. Fails
/// instead of panicking if a subscriber was already installed.
pub fn init_logging(config: &ConfigService) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(default_directive(config.get("APP_ENV").as_deref()))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| BeanloopError::Logging(e.to_string()))
}
