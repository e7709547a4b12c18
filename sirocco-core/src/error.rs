//! Error types for the sirocco system

use thiserror::Error;

/// Core error type for sirocco operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(String),

    /// Helper process errors
    #[error("Helper process error: {0}")]
    Process(String),

    /// Line framing errors (record exceeded the framer capacity)
    #[error("Framing error: {0}")]
    Framing(String),

    /// Invalid input or arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Channel torn down or its transfer slot released
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Shutdown was requested while an operation was still retrying
    #[error("Interrupted by shutdown request")]
    Interrupted,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for sirocco operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();

        match err {
            Error::Io(e) => {
                assert_eq!(e.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_error_display() {
        let err = Error::Serial("port vanished".to_string());
        assert_eq!(format!("{}", err), "Serial port error: port vanished");

        let err = Error::Framing("record too long".to_string());
        assert_eq!(format!("{}", err), "Framing error: record too long");

        let err = Error::Interrupted;
        assert_eq!(format!("{}", err), "Interrupted by shutdown request");
    }
}
