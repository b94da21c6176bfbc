//! Error types for the funnel analyzer

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Insufficient sample: {0}")]
    InsufficientSample(String),

    #[error("Conversion {from} -> {to} is undefined: no users reached {from}")]
    DivisionUndefined { from: String, to: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn malformed(line: u64, reason: impl Into<String>) -> Self {
        Error::MalformedInput(format!("line {}: {}", line, reason.into()))
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        let line = err.position().map(|p| p.line()).unwrap_or(0);
        match err.into_kind() {
            csv::ErrorKind::Io(io) => Error::IoError(io),
            csv::ErrorKind::Utf8 { err, .. } => Error::malformed(line, err.to_string()),
            other => Error::CsvError(format!("{:?}", other)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_malformed_input() {
        let err = Error::malformed(12, "expected 4 columns, found 3");
        let msg = err.to_string();
        assert!(msg.contains("line 12"));
        assert!(msg.contains("expected 4 columns"));
    }

    #[test]
    fn test_error_display_insufficient_sample() {
        let err = Error::InsufficientSample("group 246 has no baseline users".to_string());
        assert!(err.to_string().contains("Insufficient sample"));
        assert!(err.to_string().contains("246"));
    }

    #[test]
    fn test_error_display_division_undefined() {
        let err = Error::DivisionUndefined {
            from: "MainScreenAppear".to_string(),
            to: "OffersScreenAppear".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("MainScreenAppear -> OffersScreenAppear"));
        assert!(msg.contains("undefined"));
    }

    #[test]
    fn test_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::IoError(_)));
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::SerializationError(_)));
    }

    #[test]
    fn test_error_from_serde_yaml() {
        let yaml_err = serde_yaml::from_str::<Vec<i32>>("{ a: [").unwrap_err();
        let err: Error = yaml_err.into();
        assert!(matches!(err, Error::SerializationError(_)));
    }

    #[test]
    fn test_error_display_invalid_argument() {
        let err = Error::InvalidArgument("alpha must be in (0, 1)".to_string());
        assert!(err.to_string().contains("Invalid argument"));
    }

    #[test]
    fn test_error_debug_impl() {
        let err = Error::InsufficientSample("x".to_string());
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("InsufficientSample"));
    }
}
