//! Typed errors for the codec and driver layers.
use thiserror::Error;

/// Frame-level decode failures. All of these are recovered locally by the
/// ingest loop (log + drop); none terminate the driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload too short for declared layout")]
    Truncated,
    #[error("text field is not valid utf-8")]
    BadUtf8,
    #[error("format code is not ascii")]
    BadFormatCode,
}

/// Precondition violations when building outbound payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("device id must be exactly 8 hex chars")]
    BadDeviceId,
    #[error("timestamp exceeds 6-byte limit")]
    TimestampOverflow,
    #[error("length {len} exceeds {max}-value prefix limit")]
    LengthOverflow { len: usize, max: usize },
    #[error("format code must be exactly 3 ascii bytes")]
    BadFormatCode,
}

/// Start-up and lifecycle failures; the only errors that propagate out of the
/// ingest path to the manager's caller.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("no port available in the configured ranges")]
    PortExhausted,
    #[error("socket bind failed: {0}")]
    Bind(#[from] std::io::Error),
    #[error("unknown driver id {0:?}")]
    UnknownDriver(String),
}
