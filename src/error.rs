//! Error types returned by the store.

use std::{io, path::Path, path::PathBuf};

use thiserror::Error;

use crate::token::TokenKind;

/// Errors raised by [`GameStore`](crate::store::GameStore) operations.
///
/// Store errors are returned to the caller and never retried internally.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The token is malformed or not registered in the expected namespace.
    #[error("'{token}' is not a registered {expected} token")]
    InvalidToken {
        /// The offending token.
        token: String,
        /// The namespace the token was looked up in.
        expected: TokenKind,
    },

    /// The exact same code version was already submitted.
    #[error("code version '{0}' already exists")]
    DuplicateVersion(String),

    /// No game is registered under this token.
    #[error("unknown game '{0}'")]
    UnknownGame(String),

    /// No user is registered under this token.
    #[error("unknown user '{0}'")]
    UnknownUser(String),

    /// No school is registered under this token.
    #[error("unknown school '{0}'")]
    UnknownSchool(String),

    /// No competition is registered under this token.
    #[error("unknown competition '{0}'")]
    UnknownCompetition(String),

    /// Token generation kept colliding with existing tokens.
    #[error("could not allocate a fresh {kind} token after {attempts} attempts")]
    TokenSpaceExhausted {
        /// Namespace that is (nearly) full.
        kind: TokenKind,
        /// Number of draws made.
        attempts: usize,
    },

    /// A bulk replace failed and could not be rolled back. The subtree may be missing.
    #[error("storage inconsistency at {path:?}: {message}")]
    StorageInconsistency {
        /// Canonical path of the subtree being replaced.
        path: PathBuf,
        /// What went wrong, including the rollback failure.
        message: String,
    },

    /// A record exists but its content cannot be interpreted.
    #[error("corrupt record at {path:?}: {message}")]
    Corrupt {
        /// Path of the record.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// Underlying filesystem failure.
    #[error("i/o error on {path:?}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// OS error.
        #[source]
        source: io::Error,
    },

    /// A JSON record could not be encoded or decoded.
    #[error("could not (de)serialize {path:?}: {source}")]
    Codec {
        /// Path of the record.
        path: PathBuf,
        /// Serializer error.
        #[source]
        source: serde_json::Error,
    },
}

/// Result alias used across the store.
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// True for errors that mean the on-disk state may be ambiguous.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::StorageInconsistency { .. })
    }

    pub(crate) fn corrupt(path: &Path, message: impl Into<String>) -> Self {
        StoreError::Corrupt {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

pub(crate) trait IoResultExt<T> {
    /// Attach the path being accessed to an [`io::Error`].
    fn at(self, path: &Path) -> StoreResult<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, path: &Path) -> StoreResult<T> {
        self.map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
