use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Process-wide settings read from the environment.
///
/// Harvest timing values are best-effort tuning knobs, not correctness
/// guarantees: a slow network can still outlast `scroll_delay_ms` and end a
/// window early.
#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub targets_path: PathBuf,
    pub export_dir: PathBuf,
    pub api_keys: Vec<String>,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub base_url: String,
    pub browser_headless: bool,
    pub browser_executable: Option<PathBuf>,
    pub navigation_timeout_secs: u64,
    pub operation_timeout_secs: u64,
    pub login_timeout_secs: u64,
    pub login_step_delay_ms: u64,
    pub settle_delay_ms: u64,
    pub scroll_delay_ms: u64,
    pub max_stalled_scrolls: u32,
    pub max_scroll_passes: u32,
    pub max_window_days: u32,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("targets_path", &self.targets_path)
            .field("export_dir", &self.export_dir)
            .field("database_url", &"[redacted]")
            .field("api_keys", &format!("[{} redacted]", self.api_keys.len()))
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("base_url", &self.base_url)
            .field("browser_headless", &self.browser_headless)
            .field("browser_executable", &self.browser_executable)
            .field("navigation_timeout_secs", &self.navigation_timeout_secs)
            .field("operation_timeout_secs", &self.operation_timeout_secs)
            .field("login_timeout_secs", &self.login_timeout_secs)
            .field("login_step_delay_ms", &self.login_step_delay_ms)
            .field("settle_delay_ms", &self.settle_delay_ms)
            .field("scroll_delay_ms", &self.scroll_delay_ms)
            .field("max_stalled_scrolls", &self.max_stalled_scrolls)
            .field("max_scroll_passes", &self.max_scroll_passes)
            .field("max_window_days", &self.max_window_days)
            .finish()
    }
}
