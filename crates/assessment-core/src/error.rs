use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssessmentError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("No structured output found in completion text")]
    NoStructuredOutput,

    #[error("Validation failed for field '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Template error: {0}")]
    Template(String),
}

impl AssessmentError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

pub type PipelineResult<T> = Result<T, AssessmentError>;
