//! Service configuration: schema, defaults, loading and validation.

pub mod defaults;
pub mod duration_format;
mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ValidationWarning};
pub use loader::{
    ENV_ALERT_INTERVAL_SECS, ENV_CONFIG, ENV_RATE_LIMIT_REQUESTS, ENV_RATE_LIMIT_WINDOW_SECS,
    apply_env_overrides, default_config_paths, find_config_file, load, load_config,
    substitute_env_vars, validate,
};
pub use schema::{
    AlertRuleConfig, AlertingConfig, Config, MetricsConfig, RateLimitConfig, ServerConfig,
};
