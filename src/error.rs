//! Error types for the storage engine.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// A segment entry's on-disk position didn't match its expected
    /// relative offset, or the segment file is otherwise corrupt.
    #[error("corrupt segment entry: {0}")]
    CorruptEntry(String),

    /// A mutation or operation payload failed to decode.
    #[error("codec error: {0}")]
    Codec(String),

    /// An object was modified by another transaction between the time a
    /// view-state observed it and the time the view tried to commit.
    #[error("Object {container}/{key} has changed during transaction")]
    ConcurrencyConflict { container: String, key: String },

    /// A view-state id was referenced that the manager has no record of.
    #[error("unknown view-state: {0}")]
    UnknownViewState(u32),

    /// A transaction referenced a container that doesn't exist.
    #[error("unknown container: {0}")]
    UnknownContainer(String),

    /// A transaction referenced a variable id that doesn't exist in the
    /// current block.
    #[error("unknown variable: block={block_id} var={var_id}")]
    UnknownVariable { block_id: u32, var_id: u32 },

    /// An accessor path used a `partial` flag, which this engine does not
    /// yet define semantics for.
    #[error("partial object access is not supported")]
    PartialNotSupported,

    /// A `Return` operation referenced something that is neither a literal
    /// value nor a known variable.
    #[error("unknown return object")]
    UnknownReturnObject,

    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error on an object's stored data.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protobuf decode failure on an operation or mutation payload.
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Protobuf encode failure on an operation or mutation payload.
    #[error("encode error: {0}")]
    Encode(#[from] prost::EncodeError),

    /// Anything else, carried as a plain message.
    #[error("{0}")]
    Other(String),
}
