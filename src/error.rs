use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    // Phone input errors
    #[error("Invalid phone number. Expected a Russian number like +79XXXXXXXXX")]
    InvalidPhone,
    #[error("Phone number is required")]
    PhoneMissing,

    // Code errors
    #[error("Code is required")]
    CodeMissing,
    #[error("Code not found. Request a new one")]
    CodeNotFound,
    #[error("Code already used. Request a new one")]
    CodeAlreadyUsed,
    #[error("Code expired. Request a new one")]
    CodeExpired,
    #[error("Invalid code. Check the digits and try again")]
    InvalidCode,

    // Auth key errors
    #[error("Auth key not found")]
    KeyNotFound,
    #[error("Auth key already used")]
    KeyAlreadyUsed,
    #[error("Auth key expired")]
    KeyExpired,

    // User errors
    #[error("User not found")]
    UserNotFound,

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Telegram delivery errors
    #[error("Telegram API error: {0}")]
    Telegram(String),

    // Internal errors
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Message safe to show to the web client. Infrastructure faults are
    /// collapsed to a generic message; details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Internal server error. Try again later".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                "Internal server error. Try again later".to_string()
            }
            AppError::Telegram(e) => {
                tracing::error!("Telegram delivery error: {}", e);
                "Could not deliver the Telegram message. Try again".to_string()
            }
            other => other.to_string(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
