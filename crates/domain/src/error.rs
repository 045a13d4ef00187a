/// Shared error type used across all praxis crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("workflow: {0}")]
    Workflow(String),

    #[error("config: {0}")]
    Config(String),

    #[error("validation rejected {task} output: {message}")]
    Validation { task: String, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for failures worth an immediate retry (connect trouble,
    /// deadline overruns, 5xx-class provider responses).
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(_) | Error::Timeout(_) => true,
            Error::Provider { message, .. } => {
                message.starts_with("HTTP 5") || message.contains("connection")
            }
            _ => false,
        }
    }
}
