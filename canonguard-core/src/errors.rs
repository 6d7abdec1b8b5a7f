//! errors.rs - Custom error types for the canonguard-core library.
//!
//! This module defines a structured error enum for the library, providing
//! specific, actionable error types that can be handled programmatically.
//!
//! License: MIT OR APACHE 2.0

use std::path::PathBuf;
use thiserror::Error;

/// Why a document could not be turned into a [`crate::Fingerprint`].
///
/// Every variant except `Io` means "this file is not a candidate". `Io` is a
/// transient failure: the next notification for the same path retries.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{0}' is not valid UTF-8")]
    Encoding(PathBuf),

    #[error("failed to parse '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("'{path}' is missing required field '{field}'")]
    MissingField { path: PathBuf, field: String },
}

impl ExtractError {
    /// True when the document simply does not qualify, as opposed to an I/O failure.
    pub fn is_not_candidate(&self) -> bool {
        !matches!(self, ExtractError::Io { .. })
    }
}

/// This enum represents all possible error types in the `canonguard-core` library.
///
/// By using `#[non_exhaustive]`, we signal to consumers of this library that
/// new variants may be added in future versions.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GuardError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("template sync failed: {0}")]
    Sync(String),

    #[error("filesystem watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("A critical system error occurred: {0}")]
    AnyhowWrapper(#[from] anyhow::Error),
}

impl GuardError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GuardError::Io { path: path.into(), source }
    }
}
