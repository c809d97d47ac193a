//! Error types for I/O operations

use meshfusion_core::Error;
use thiserror::Error;

/// Errors that can occur while parsing or writing mesh files
#[derive(Error, Debug)]
pub enum IoError {
    #[error("Unknown mesh format: {extension}")]
    UnknownFormat { extension: String },

    #[error("Parse error at line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Malformed {format} file: {message}")]
    Malformed { format: &'static str, message: String },

    #[error("Write error: {message}")]
    WriteError { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IoError> for Error {
    fn from(err: IoError) -> Self {
        match err {
            IoError::UnknownFormat { extension } => Error::UnsupportedFormat(extension),
            IoError::Io(io) => Error::Io(io),
            other => Error::InvalidData(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshfusion_core::ErrorKind;

    #[test]
    fn test_conversion_to_core_error() {
        let err: Error = IoError::UnknownFormat { extension: "stl".to_string() }.into();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);

        let err: Error = IoError::ParseError { line: 3, message: "bad float".to_string() }.into();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(err.to_string().contains("line 3"));
    }
}
