//! Error types for the content server.
//!
//! None of these cross the public API as `Err` values from command handling;
//! the server turns them into [`Event::Error`](super::Event::Error) messages
//! using their `Display` text.

use thiserror::Error;

use crate::cache::CacheError;

/// Errors raised while handling commands.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The named cache is unknown or not in the ready state.
    #[error("Cache {0} is not ready.")]
    CacheNotReady(String),

    /// No origin is registered to satisfy a request.
    #[error("no content origin registered")]
    NoOrigin,

    /// Fetched bytes could not be interpreted as the requested type.
    #[error("failed to decode {resource}: {message}")]
    Decode { resource: String, message: String },

    /// A cache lifecycle operation failed.
    #[error("cache {name}: {source}")]
    Cache {
        name: String,
        #[source]
        source: CacheError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_not_ready_mentions_name() {
        let err = ServerError::CacheNotReady("level01".to_string());
        assert_eq!(err.to_string(), "Cache level01 is not ready.");
    }

    #[test]
    fn test_cache_error_wraps_source() {
        let err = ServerError::Cache {
            name: "game".to_string(),
            source: CacheError::Closed,
        };
        assert!(err.to_string().starts_with("cache game:"));
    }
}
