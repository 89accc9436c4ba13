//! Configuration loading and validation.
//!
//! Loading flow: locate the file, read it, substitute `${VAR}` references,
//! parse YAML, apply `LEXIGATE_*` environment overrides, validate.
//! A missing file is not an error unless it was requested explicitly; the
//! service then runs on defaults.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use tracing::{info, warn};

use super::defaults::{parse_env_override, parse_env_warn};
use super::error::{ConfigError, ValidationWarning};
use super::schema::Config;
use crate::alerts::builtin;

/// Overrides `rateLimit.requestsPerWindow`.
pub const ENV_RATE_LIMIT_REQUESTS: &str = "LEXIGATE_RATE_LIMIT_REQUESTS";
/// Overrides `rateLimit.windowDuration` (whole seconds).
pub const ENV_RATE_LIMIT_WINDOW_SECS: &str = "LEXIGATE_RATE_LIMIT_WINDOW_SECS";
/// Overrides `alerting.evaluationInterval` (whole seconds).
pub const ENV_ALERT_INTERVAL_SECS: &str = "LEXIGATE_ALERT_INTERVAL_SECS";
/// Path of the config file, checked after the CLI flag.
pub const ENV_CONFIG: &str = "LEXIGATE_CONFIG";

/// Search paths after the CLI flag, in priority order.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(path) = std::env::var(ENV_CONFIG) {
        paths.push(PathBuf::from(path));
    }
    paths.push(PathBuf::from("/etc/lexigate/config.yaml"));
    paths.push(PathBuf::from("./config.yaml"));
    paths
}

/// Find the config file to load.
///
/// An explicit path must exist. Otherwise the first existing default path
/// wins, and `Ok(None)` means "run on defaults".
pub fn find_config_file(explicit_path: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = explicit_path {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        return Err(ConfigError::ConfigFileNotFound {
            searched: vec![path.to_path_buf()],
        });
    }
    Ok(default_config_paths().into_iter().find(|p| p.exists()))
}

/// Read and parse one config file. An empty file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let contents = substitute_env_vars(&contents)?;
    Ok(serde_saphyr::from_str(&contents)?)
}

/// Locate, load, override and validate.
pub fn load(explicit_path: Option<&Path>) -> Result<(Config, Vec<ValidationWarning>), ConfigError> {
    let mut config = match find_config_file(explicit_path)? {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            load_config(&path)?
        }
        None => {
            info!("No configuration file found, using defaults");
            Config::default()
        }
    };
    apply_env_overrides(&mut config);
    let warnings = validate(&config)?;
    for warning in &warnings {
        warn!(%warning, "Configuration warning");
    }
    Ok((config, warnings))
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment
// ─────────────────────────────────────────────────────────────────────────────

// SAFETY: .expect() on LazyLock with a compile-time literal regex pattern,
// covered by test_env_var_pattern_compiles().
static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("BUG: ENV_VAR_PATTERN regex is invalid")
});

/// Substitute `${VAR}` (required) and `${VAR:-default}` references.
pub fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let mut missing = None;
    let result = ENV_VAR_PATTERN.replace_all(content, |caps: &regex::Captures<'_>| {
        let var = &caps[1];
        match (std::env::var(var), caps.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.as_str().to_string(),
            (Err(_), None) => {
                missing.get_or_insert_with(|| var.to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(var) => Err(ConfigError::MissingEnvVar { var }),
        None => Ok(result.into_owned()),
    }
}

/// Apply `LEXIGATE_*` overrides. Unparsable or zero values are ignored with
/// a warning.
pub fn apply_env_overrides(config: &mut Config) {
    let rate_limit = &mut config.rate_limit;
    rate_limit.requests_per_window = parse_env_warn(
        ENV_RATE_LIMIT_REQUESTS,
        rate_limit.requests_per_window,
        |v| *v > 0,
    );

    if let Some(secs) = parse_env_override::<u64>(ENV_RATE_LIMIT_WINDOW_SECS, |v| *v > 0) {
        rate_limit.window_duration = Duration::from_secs(secs);
    }

    if let Some(secs) = parse_env_override::<u64>(ENV_ALERT_INTERVAL_SECS, |v| *v > 0) {
        config.alerting.evaluation_interval = Duration::from_secs(secs);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Validate a configuration, returning non-fatal warnings.
pub fn validate(config: &Config) -> Result<Vec<ValidationWarning>, ConfigError> {
    let rate_limit = &config.rate_limit;
    if rate_limit.requests_per_window == 0 {
        return Err(ConfigError::InvalidRateLimit { value: 0 });
    }
    if rate_limit.window_duration.is_zero() {
        return Err(ConfigError::InvalidWindow);
    }
    if rate_limit.sweep_interval.is_zero() {
        return Err(ConfigError::InvalidInterval {
            field: "rateLimit.sweepInterval",
        });
    }
    if config.metrics.resource_interval.is_zero() {
        return Err(ConfigError::InvalidInterval {
            field: "metrics.resourceInterval",
        });
    }
    if config.alerting.evaluation_interval.is_zero() {
        return Err(ConfigError::InvalidInterval {
            field: "alerting.evaluationInterval",
        });
    }
    if config.metrics.max_series == 0 {
        return Err(ConfigError::InvalidLimit {
            field: "metrics.maxSeries",
        });
    }
    if config.metrics.max_label_values == 0 {
        return Err(ConfigError::InvalidLimit {
            field: "metrics.maxLabelValues",
        });
    }

    let mut warnings = Vec::new();
    for (name, rule) in &config.alerts {
        if let Some(threshold) = rule.threshold {
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(ConfigError::InvalidThreshold {
                    rule: name.clone(),
                    threshold,
                });
            }
        }
        if rule.min_re_notify_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::InvalidInterval {
                field: "alerts.minReNotifyInterval",
            });
        }
        if !builtin::RULE_NAMES.contains(&name.as_str()) {
            warnings.push(ValidationWarning::UnknownAlertRule { name: name.clone() });
        }
    }
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_env_var_pattern_compiles() {
        assert!(ENV_VAR_PATTERN.is_match("${FOO}"));
        assert!(ENV_VAR_PATTERN.is_match("${FOO:-bar}"));
        assert!(!ENV_VAR_PATTERN.is_match("$FOO"));
    }

    #[test]
    #[serial]
    fn test_substitute_env_vars() {
        // SAFETY: Test runs serially via #[serial], env var mutation is isolated
        unsafe { std::env::set_var("LEXIGATE_TEST_WINDOW", "30s") };
        let out = substitute_env_vars("windowDuration: ${LEXIGATE_TEST_WINDOW}").unwrap();
        assert_eq!(out, "windowDuration: 30s");
        // SAFETY: Test runs serially via #[serial], env var mutation is isolated
        unsafe { std::env::remove_var("LEXIGATE_TEST_WINDOW") };

        let out = substitute_env_vars("bind: ${LEXIGATE_TEST_BIND:-0.0.0.0:1}").unwrap();
        assert_eq!(out, "bind: 0.0.0.0:1");
    }

    #[test]
    #[serial]
    fn test_missing_required_env_var() {
        let err = substitute_env_vars("bind: ${LEXIGATE_TEST_UNSET_VAR}").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingEnvVar { ref var } if var == "LEXIGATE_TEST_UNSET_VAR"
        ));
    }

    #[test]
    fn test_empty_file_is_default() {
        let file = write_config("   \n");
        assert_eq!(load_config(file.path()).unwrap(), Config::default());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let err = find_config_file(Some(Path::new("/nonexistent/lexigate.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::ConfigFileNotFound { .. }));
    }

    #[test]
    fn test_invalid_yaml() {
        let file = write_config("rateLimit: [not, a, map");
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut config = Config::default();
        config.rate_limit.window_duration = Duration::ZERO;
        assert!(matches!(validate(&config), Err(ConfigError::InvalidWindow)));
    }

    #[test]
    fn test_validate_rejects_zero_resource_interval() {
        let mut config = Config::default();
        config.metrics.resource_interval = Duration::ZERO;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidInterval {
                field: "metrics.resourceInterval"
            })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_limit() {
        let mut config = Config::default();
        config.rate_limit.requests_per_window = 0;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidRateLimit { value: 0 })
        ));
    }

    #[test]
    fn test_validate_rejects_negative_threshold() {
        let file = write_config("alerts:\n  HighErrorRate:\n    threshold: -1\n");
        let config = load_config(file.path()).unwrap();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_validate_warns_unknown_rule() {
        let file = write_config("alerts:\n  DiskFull:\n    threshold: 0.9\n");
        let config = load_config(file.path()).unwrap();
        let warnings = validate(&config).unwrap();
        assert_eq!(
            warnings,
            vec![ValidationWarning::UnknownAlertRule {
                name: "DiskFull".to_string()
            }]
        );
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        // SAFETY: Test runs serially via #[serial], env var mutation is isolated
        unsafe {
            std::env::set_var(ENV_RATE_LIMIT_REQUESTS, "7");
            std::env::set_var(ENV_RATE_LIMIT_WINDOW_SECS, "5");
            std::env::set_var(ENV_ALERT_INTERVAL_SECS, "never");
        }
        let mut config = Config::default();
        apply_env_overrides(&mut config);
        // SAFETY: Test runs serially via #[serial], env var mutation is isolated
        unsafe {
            std::env::remove_var(ENV_RATE_LIMIT_REQUESTS);
            std::env::remove_var(ENV_RATE_LIMIT_WINDOW_SECS);
            std::env::remove_var(ENV_ALERT_INTERVAL_SECS);
        }

        assert_eq!(config.rate_limit.requests_per_window, 7);
        assert_eq!(config.rate_limit.window_duration, Duration::from_secs(5));
        assert_eq!(config.alerting.evaluation_interval, Duration::from_secs(10));
    }

    #[test]
    #[serial]
    fn test_window_override_replaces_sub_second_window() {
        let mut config = Config::default();
        config.rate_limit.window_duration = Duration::from_millis(1500);
        config.alerting.evaluation_interval = Duration::from_millis(2500);

        // SAFETY: Test runs serially via #[serial], env var mutation is isolated
        unsafe {
            std::env::set_var(ENV_RATE_LIMIT_WINDOW_SECS, "1");
            std::env::set_var(ENV_ALERT_INTERVAL_SECS, "2");
        }
        apply_env_overrides(&mut config);
        // SAFETY: Test runs serially via #[serial], env var mutation is isolated
        unsafe {
            std::env::remove_var(ENV_RATE_LIMIT_WINDOW_SECS);
            std::env::remove_var(ENV_ALERT_INTERVAL_SECS);
        }

        assert_eq!(config.rate_limit.window_duration, Duration::from_secs(1));
        assert_eq!(config.alerting.evaluation_interval, Duration::from_secs(2));
    }

    #[test]
    #[serial]
    fn test_load_explicit_file() {
        let file = write_config("rateLimit:\n  requestsPerWindow: 3\n  windowDuration: 2s\n");
        let (config, warnings) = load(Some(file.path())).unwrap();
        assert_eq!(config.rate_limit.requests_per_window, 3);
        assert_eq!(config.rate_limit.window_duration, Duration::from_secs(2));
        assert!(warnings.is_empty());
    }
}
