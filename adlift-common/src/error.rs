//! Common error types for adlift

use thiserror::Error;

/// Common result type for adlift operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared between adlift crates
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}
