pub mod app_config;
pub mod config;
pub mod export;
pub mod job;
pub mod post;
pub mod session;
pub mod store;
pub mod targets;

use thiserror::Error;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use export::{
    default_export_filename, find_fallback_export, render_export, ExportError, ExportFormat,
};
pub use job::{
    normalize_handle, normalize_handles, DateRange, JobRun, JobStatus, JobTransition, NewJob,
    QueryMode,
};
pub use post::{ExtractedPost, PostMetrics};
pub use session::{OriginStorage, SessionSnapshot, StorageEntry, StoredCookie};
pub use store::{AccountCredentials, JobStore, StoreError};
pub use targets::{is_valid_handle, load_targets, TargetConfig, TargetsFile};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read targets file {path}: {source}")]
    TargetsFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse targets file: {0}")]
    TargetsFileParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),
}
