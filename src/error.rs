//! Error types for the currency lookup service.

use tonic::Status;

/// Main error type for the library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A record is missing one of its required fields.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// A lookup request names neither a code nor a number.
    #[error("Invalid lookup request: {0}")]
    InvalidRequest(String),

    /// A CSV row could not be turned into a record.
    #[error("Malformed row {line}: expected 4 columns, found {found}")]
    MalformedRow {
        /// 1-based line number of the offending row.
        line: u64,
        /// Number of columns actually present.
        found: usize,
    },

    /// The CSV reader failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Filesystem access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Password hashing or hash parsing failed.
    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    /// A token could not be signed.
    #[error("Token signing failed: {0}")]
    TokenSigning(String),

    /// A value cannot be carried in gRPC metadata.
    #[error("Invalid metadata value: {0}")]
    InvalidMetadata(String),

    /// Configuration is missing or inconsistent.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The gRPC transport failed to connect or bind.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// Convenience alias for results carrying [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidRecord(_) | Error::InvalidRequest(_) => {
                Status::invalid_argument(err.to_string())
            }
            Error::Transport(_) => Status::unavailable(err.to_string()),
            _ => Status::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use tonic::Code;

    use super::*;

    #[test]
    fn validation_errors_map_to_invalid_argument() {
        let status = Status::from(Error::InvalidRecord("empty name".to_string()));
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(status.message().contains("empty name"));

        let status = Status::from(Error::InvalidRequest("no key".to_string()));
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[test]
    fn service_defects_map_to_internal() {
        let status = Status::from(Error::TokenSigning("bad key".to_string()));
        assert_eq!(status.code(), Code::Internal);
    }
}
