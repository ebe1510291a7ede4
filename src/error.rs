use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Could not connect to a running instance, {task} failed {failures} times in a row (max: {threshold})")]
    RetriesExceeded {
        task: &'static str,
        failures: u32,
        threshold: u32,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl AppError {
    /// Errors that must terminate the dashboard instead of being retried
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Config(_) | AppError::UnknownNetwork(_) | AppError::RetriesExceeded { .. }
        )
    }
}
