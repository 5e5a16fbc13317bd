use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Prepare failed: {0}")]
    Prepare(String),

    #[error("Popup blocked: {0}")]
    PopupBlocked(String),

    #[error("Sign-in timed out after {0} seconds")]
    Timeout(u64),

    #[error("CSRF state validation failed")]
    CsrfValidation,

    #[error("Callback parameters missing: {0}")]
    MissingParameters(String),

    #[error("Token exchange failed: {0}")]
    Exchange(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}
impl Serialize for AuthError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}
pub type AppResult<T> = Result<T, AuthError>;
