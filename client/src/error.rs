#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request timed out")]
    Timeout,
}

pub type ClientResult<T> = Result<T, ClientError>;
