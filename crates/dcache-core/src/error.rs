//! Error types for dcache

use thiserror::Error;

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors returned by every backend and by the façade.
///
/// Only genuine absence maps to [`CacheError::NotFound`]. Transport failures
/// keep their source error so callers can inspect it.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache not initialized")]
    NotInitialized,

    #[error("cache already initialized")]
    AlreadyInitialized,

    #[error("cache entry not found")]
    NotFound,

    #[error("lock timeout: {0}")]
    LockTimeout(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl CacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound)
    }

    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, CacheError::LockTimeout(_))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for CacheError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for CacheError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for CacheError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}
