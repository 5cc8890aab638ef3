use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Network error: {0}")]
    NetworkMessage(String),
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("GTFS parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("ZIP error: {0}")]
    ZipError(#[from] zip::result::ZipError),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Protobuf decode error: {0}")]
    ProtobufError(#[from] prost::DecodeError),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
    #[error("Unknown filter field: {0}")]
    UnknownField(String),
}

impl EngineError {
    /// True for the SQLite "database is locked" / busy family of errors that
    /// the purge-and-replace transaction retries instead of failing.
    pub fn is_store_contention(&self) -> bool {
        match self {
            EngineError::DatabaseError(sqlx::Error::Database(db)) => {
                let msg = db.message();
                msg.contains("database is locked") || msg.contains("database table is locked")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_network_message() {
        let err = EngineError::NetworkMessage("connection refused".into());
        assert_eq!(err.to_string(), "Network error: connection refused");
    }

    #[test]
    fn error_display_parse_error() {
        let err = EngineError::ParseError("invalid CSV".into());
        assert_eq!(err.to_string(), "GTFS parse error: invalid CSV");
    }

    #[test]
    fn error_display_unknown_field() {
        let err = EngineError::UnknownField("bogus_column".into());
        assert_eq!(err.to_string(), "Unknown filter field: bogus_column");
    }

    #[test]
    fn error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: EngineError = io_err.into();
        assert!(err.to_string().contains("file not found"));
        assert!(matches!(err, EngineError::IoError(_)));
    }

    #[test]
    fn error_from_prost_decode_error() {
        let bad_bytes: &[u8] = &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F];
        let result = <gtfs_realtime::FeedMessage as prost::Message>::decode(bad_bytes);
        let decode_err = result.unwrap_err();
        let err: EngineError = decode_err.into();
        assert!(matches!(err, EngineError::ProtobufError(_)));
    }

    #[test]
    fn plain_errors_are_not_contention() {
        assert!(!EngineError::ParseError("x".into()).is_store_contention());
        assert!(!EngineError::DatabaseError(sqlx::Error::RowNotFound).is_store_contention());
    }
}
