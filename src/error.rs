//! Error types.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::random::SEED_LEN;

/// Errors raised while building the simulator's inputs.
///
/// Nothing in here is produced per request: configurations and seeds are
/// checked once, before they reach the matching engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration file could not be opened or read.
    #[error("opening file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration document is not valid YAML for the schema.
    #[error("decoding YAML: {0}")]
    Decode(#[from] serde_yaml::Error),

    /// A resource failed semantic validation.
    #[error("validating resources[{index}]: {source}")]
    Resource {
        index: usize,
        #[source]
        source: ValidationError,
    },

    /// A glob pattern failed to compile.
    #[error("invalid glob pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A literal seed was not exactly 32 bytes long.
    #[error("seed must be exactly {SEED_LEN} bytes long, got {0}")]
    InvalidSeedLength(usize),
}

impl Error {
    /// The validation failure behind this error, if any.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            Error::Resource { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Semantic problems found in a single resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no effect")]
    NoEffect,

    #[error("min greater than max ({min:?} > {max:?})")]
    MinGreaterMax { min: Duration, max: Duration },

    #[error("invalid HTTP response status code: {0}")]
    InvalidStatusCode(i64),

    #[error("invalid header name: {0:?}")]
    InvalidHeaderName(String),

    #[error("invalid HTTP method: {0:?}")]
    InvalidHttpMethod(String),

    #[error("duplicate {field} glob: {pattern:?}")]
    DuplicateGlob {
        field: &'static str,
        pattern: String,
    },
}

/// Errors reported by [`crate::response::ResponseRecorder`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    #[error("response status already committed")]
    StatusCommitted,
}
