use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowdeckError {
    // Execution errors
    #[error("Step execution failed: {element}: {message}")]
    StepExecution { element: String, message: String },

    // Interchange errors
    #[error("Import failed: {0}")]
    Import(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FlowdeckError>;
