//! Error types for meshfusion

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for meshfusion operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),

    #[error("Missing depth maps: {0}")]
    MissingDepthMaps(String),

    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Coarse classification of an [`Error`], used when tallying batch failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Io,
    InvalidMesh,
    MissingDepthMaps,
    DegenerateGeometry,
    Configuration,
    InvalidData,
    UnsupportedFormat,
}

impl Error {
    /// Get the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::InvalidMesh(_) => ErrorKind::InvalidMesh,
            Error::MissingDepthMaps(_) => ErrorKind::MissingDepthMaps,
            Error::DegenerateGeometry(_) => ErrorKind::DegenerateGeometry,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::InvalidData(_) => ErrorKind::InvalidData,
            Error::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
        }
    }

    /// Whether this error must stop the whole batch rather than a single mesh
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }
}

/// Result type alias for meshfusion operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidMesh("mesh has no faces".to_string());
        assert_eq!(format!("{err}"), "Invalid mesh: mesh has no faces");

        let err = Error::Configuration("resolution must be positive".to_string());
        assert!(format!("{err}").contains("resolution"));
    }

    #[test]
    fn test_error_kind_and_fatality() {
        let io = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(io.kind(), ErrorKind::Io);
        assert!(!io.is_fatal());

        let missing = Error::MissingDepthMaps("chair".to_string());
        assert_eq!(missing.kind(), ErrorKind::MissingDepthMaps);
        assert!(!missing.is_fatal());

        assert!(Error::Configuration("n_views".to_string()).is_fatal());
    }
}
