//! Error types for decoding firehose data.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding frames, blocks and records.
///
/// Every variant describes malformed input from the stream. Callers treat
/// them as per-event failures: the event is skipped, the session continues.
#[derive(Error, Debug)]
pub enum Error {
    /// The bytes are not valid (DAG-)CBOR.
    #[error("CBOR error: {0}")]
    Cbor(String),

    /// The CAR container is structurally invalid.
    #[error("CAR error: {0}")]
    Car(String),

    /// A content identifier could not be parsed.
    #[error("CID error: {0}")]
    Cid(#[from] cid::Error),

    /// A firehose frame has an unexpected shape.
    #[error("frame error: {0}")]
    Frame(String),

    /// I/O error while reading a buffer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON conversion error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl<E: std::fmt::Debug> From<ciborium::de::Error<E>> for Error {
    fn from(err: ciborium::de::Error<E>) -> Self {
        Error::Cbor(format!("{err:?}"))
    }
}

impl<E: std::fmt::Debug> From<ciborium::ser::Error<E>> for Error {
    fn from(err: ciborium::ser::Error<E>) -> Self {
        Error::Cbor(format!("{err:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Error Display formatting tests
    // =========================================================================

    #[test]
    fn test_car_display() {
        let err = Error::Car("truncated section".to_string());
        let msg = err.to_string();
        assert!(msg.contains("CAR error"));
        assert!(msg.contains("truncated section"));
    }

    #[test]
    fn test_frame_display() {
        let err = Error::Frame("missing header op".to_string());
        assert_eq!(err.to_string(), "frame error: missing header op");
    }

    // =========================================================================
    // Error From conversions
    // =========================================================================

    #[test]
    fn test_from_cbor_decode_error() {
        let bytes: &[u8] = &[0xff];
        let cbor_err = ciborium::de::from_reader::<ciborium::Value, _>(bytes).unwrap_err();
        let err: Error = cbor_err.into();
        assert!(matches!(err, Error::Cbor(_)));
    }

    #[test]
    fn test_from_cid_error() {
        let cid_err = cid::Cid::try_from(&[0x01u8][..]).unwrap_err();
        let err: Error = cid_err.into();
        assert!(matches!(err, Error::Cid(_)));
        assert!(err.to_string().contains("CID error"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("eof"));
    }
}
