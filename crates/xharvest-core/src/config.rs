use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the real environment so tests can drive it with a `HashMap`.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_addr = |var: &str, default: &str| -> Result<SocketAddr, ConfigError> {
        or_default(var, default)
            .parse::<SocketAddr>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_bool = |var: &str, default: &str| -> Result<bool, ConfigError> {
        let raw = or_default(var, default);
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(invalid(var, format!("expected a boolean, got \"{other}\""))),
        }
    };

    let database_url = require("DATABASE_URL")?;
    let env = parse_environment(&or_default("XHARVEST_ENV", "development"))?;

    let bind_addr = parse_addr("XHARVEST_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("XHARVEST_LOG_LEVEL", "info");
    let targets_path = PathBuf::from(or_default("XHARVEST_TARGETS_PATH", "./config/targets.yaml"));
    let export_dir = PathBuf::from(or_default("XHARVEST_EXPORT_DIR", "./output"));
    let api_keys = parse_api_keys(&or_default("XHARVEST_API_KEYS", ""));

    let db_max_connections = parse_u32("XHARVEST_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("XHARVEST_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("XHARVEST_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let base_url = normalize_base_url(&or_default("XHARVEST_BASE_URL", "https://x.com/"));
    let browser_headless = parse_bool("XHARVEST_BROWSER_HEADLESS", "true")?;
    let browser_executable = lookup("XHARVEST_BROWSER_EXECUTABLE")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from);

    let navigation_timeout_secs = parse_u64("XHARVEST_NAVIGATION_TIMEOUT_SECS", "30")?;
    let operation_timeout_secs = parse_u64("XHARVEST_OPERATION_TIMEOUT_SECS", "15")?;
    let login_timeout_secs = parse_u64("XHARVEST_LOGIN_TIMEOUT_SECS", "30")?;
    let login_step_delay_ms = parse_u64("XHARVEST_LOGIN_STEP_DELAY_MS", "2000")?;
    let settle_delay_ms = parse_u64("XHARVEST_SETTLE_DELAY_MS", "5000")?;
    let scroll_delay_ms = parse_u64("XHARVEST_SCROLL_DELAY_MS", "3000")?;
    let max_stalled_scrolls = parse_u32("XHARVEST_MAX_STALLED_SCROLLS", "5")?;
    let max_scroll_passes = parse_u32("XHARVEST_MAX_SCROLL_PASSES", "400")?;
    let max_window_days = parse_u32("XHARVEST_MAX_WINDOW_DAYS", "14")?;

    if max_window_days == 0 {
        return Err(invalid(
            "XHARVEST_MAX_WINDOW_DAYS",
            "must be at least 1".to_string(),
        ));
    }
    if max_stalled_scrolls == 0 {
        return Err(invalid(
            "XHARVEST_MAX_STALLED_SCROLLS",
            "must be at least 1".to_string(),
        ));
    }

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        targets_path,
        export_dir,
        api_keys,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        base_url,
        browser_headless,
        browser_executable,
        navigation_timeout_secs,
        operation_timeout_secs,
        login_timeout_secs,
        login_step_delay_ms,
        settle_delay_ms,
        scroll_delay_ms,
        max_stalled_scrolls,
        max_scroll_passes,
        max_window_days,
    })
}

/// Parse a string into an `Environment` variant.
///
/// # Errors
///
/// Returns `ConfigError::InvalidEnvVar` for anything other than
/// `development`, `test`, or `production`.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "XHARVEST_ENV".to_string(),
            reason: format!("unknown environment \"{other}\""),
        }),
    }
}

fn parse_api_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// Search and status URLs are built by appending paths, so the base always
/// ends with exactly one `/`.
fn normalize_base_url(raw: &str) -> String {
    format!("{}/", raw.trim().trim_end_matches('/'))
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
