//! Error types for the ingestion loop.
//!
//! Every failure the loop can see falls into one of two camps: recoverable
//! ones that cost at most the current cycle, and fatal ones that stop the loop
//! and get forwarded to the operator alert channel.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No reply from producer within {timeout:?}")]
    TransportTimeout { timeout: Duration },

    /// A signal landed while blocked on the producer
    #[error("Interrupted by a signal during {context}")]
    Interrupted { context: &'static str },

    #[error("Transport failure during {context}")]
    Transport {
        context: &'static str,
        #[source]
        source: zmq::Error,
    },

    #[error("Malformed packet: {0}")]
    Protocol(String),

    #[error("Payload of {floats} floats does not fit a {time_points}x{space_points} matrix")]
    ShapeMismatch {
        floats: usize,
        time_points: usize,
        space_points: usize,
    },

    #[error("Filesystem failure at {path}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not write dataset {path}: {details}")]
    Dataset { path: PathBuf, details: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unexpected failure: {0}")]
    Unexpected(String),
}

impl Error {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub fn dataset(path: impl Into<PathBuf>, details: impl ToString) -> Self {
        Self::Dataset {
            path: path.into(),
            details: details.to_string(),
        }
    }

    /// Recoverable errors cost at most one cycle, everything else stops the loop
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TransportTimeout { .. }
                | Self::Interrupted { .. }
                | Self::Protocol(_)
                | Self::ShapeMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Unexpected(format!("metadata serialization: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_split() {
        let timeout = Error::TransportTimeout {
            timeout: Duration::from_millis(3000),
        };
        assert!(timeout.is_recoverable());
        assert!(Error::Protocol("short header".into()).is_recoverable());
        assert!(Error::Interrupted { context: "receive" }.is_recoverable());
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(!Error::filesystem("/data", io).is_recoverable());
        assert!(!Error::Unexpected("boom".into()).is_recoverable());
    }
}
