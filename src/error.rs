use thiserror::Error;

#[derive(Error, Debug)]
pub enum NlqError {
    #[error("Table not found: {table_name}")]
    TableNotFound { table_name: String },

    #[error("SQL validation failed: {message}")]
    Validation { message: String },

    #[error("Query execution failed: {message}")]
    Execution { message: String },

    #[error("SQL generation failed: {message}")]
    Generation { message: String },

    #[error("Unusable model response: {message}")]
    ResponseParse { message: String },

    #[error("Schema analysis failed: {message}")]
    Analysis { message: String },

    #[error("IO error: {message}")]
    Io { message: String },

    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] datafusion::arrow::error::ArrowError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<std::io::Error> for NlqError {
    fn from(err: std::io::Error) -> Self {
        NlqError::Io {
            message: err.to_string(),
        }
    }
}

impl From<regex::Error> for NlqError {
    fn from(err: regex::Error) -> Self {
        NlqError::Internal {
            message: format!("Invalid pattern: {}", err),
        }
    }
}
