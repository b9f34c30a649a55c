//! Application-wide error types.

use thiserror::Error;

use crate::llm::ProviderError;
use crate::platforms::PlatformError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("personality error: {0}")]
    Personality(String),

    #[error("credentials error: {0}")]
    Credentials(String),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("platform error: {0}")]
    Platform(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProviderError> for AppError {
    fn from(e: ProviderError) -> Self {
        AppError::Llm(e.to_string())
    }
}

impl From<PlatformError> for AppError {
    fn from(e: PlatformError) -> Self {
        AppError::Platform(e.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let e = AppError::Config("missing field".into());
        assert!(e.to_string().contains("config error"));
        assert!(e.to_string().contains("missing field"));
    }

    #[test]
    fn credentials_error_display() {
        let e = AppError::Credentials("REDDIT_PASSWORD".into());
        assert!(e.to_string().contains("REDDIT_PASSWORD"));
    }

    #[test]
    fn provider_error_converts() {
        let e: AppError = ProviderError::Request("timeout".into()).into();
        assert!(matches!(e, AppError::Llm(_)));
        assert!(e.to_string().contains("timeout"));
    }

    #[test]
    fn platform_error_converts() {
        let e: AppError = PlatformError::Auth("bad password".into()).into();
        assert!(e.to_string().starts_with("platform error"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let e: AppError = io_err.into();
        assert!(e.to_string().contains("io error"));
        let _: &dyn Error = &e;
    }
}
