use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("{0}")]
    Api(String),
    #[error("Authentication failed: {0}")]
    Unauthorized(String),
    #[error("Not signed in")]
    NotAuthenticated,
    #[error("{0}")]
    InvalidInput(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    /// True for responses that invalidate the current session outright.
    pub fn is_auth(&self) -> bool {
        matches!(self, AppError::Unauthorized(_))
    }
}
