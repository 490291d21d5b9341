use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("table {0} doesn't exist")]
    TableNotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("invalid time layout: {0}")]
    InvalidTimeLayout(String),

    #[error("invalid decimal string presentation: {0}")]
    InvalidDecimalString(String),

    #[error("cannot convert value to decimal")]
    CannotConvertValueToDecimal,

    #[error("cannot convert value to byte slice: {0:?}")]
    CannotConvertToBytes(String),

    #[error("ordering column {0} is missing from the row")]
    MissingOrderingColumn(String),

    #[error("key column {0} is missing from the row")]
    MissingKey(String),

    #[error("unknown operator type: {0}")]
    UnknownOperatorType(String),

    #[error("tracking id has a non-integer type")]
    WrongTrackingIdType,

    #[error("unknown iterator type: {0}")]
    UnknownIteratorType(String),

    #[error("record has no payload")]
    NoPayload,

    #[error("record has no key")]
    NoKey,

    #[error("no initialized iterator")]
    NoInitializedIterator,

    #[error("no record is available; call has_next first")]
    NoNextRecord,

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
