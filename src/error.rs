//! Error types for heif-date-io

use std::io;

/// Result type for heif-date-io operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while parsing, patching or injecting
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read or write would run past the end of the stream
    #[error("Truncated: need {needed} bytes at offset {offset}, only {available} available")]
    Truncated {
        offset: u64,
        needed: u64,
        available: u64,
    },

    /// Write attempted on a stream opened read-only
    #[error("Stream is read-only")]
    ReadOnly,

    /// `reset()` called without a matching `mark()`
    #[error("reset() called with an empty mark stack")]
    UnbalancedReset,

    /// Invalid file format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// A box the operation depends on is absent
    #[error("Required box '{0}' not found")]
    MissingBox(&'static str),

    /// The box found at an offset is not the expected one
    #[error("Expected '{expected}' box at offset {offset}, found '{found}'")]
    BoxTypeMismatch {
        offset: u64,
        expected: String,
        found: String,
    },

    /// A child box extends past its parent
    #[error("Box at offset {offset} (size {size}) overruns parent ending at {parent_end}")]
    BoxOverrun { offset: u64, size: u64, parent_end: u64 },

    /// Item id not present in the table being consulted
    #[error("Item {0} not found")]
    ItemNotFound(u32),

    /// An association references a property that does not exist in ipco
    #[error("Property index {index} out of range (ipco holds {count} properties)")]
    PropertyIndexOutOfRange { index: u16, count: usize },

    /// A new property index does not fit the ipma index width
    #[error("Property index {index} does not fit ipma index width (max {max})")]
    PropertyIndexOverflow { index: usize, max: u16 },

    /// The one-byte association count would overflow
    #[error("Item {item_id} would have {count} associations (max 255)")]
    AssociationCountOverflow { item_id: u32, count: usize },

    /// A rewritten value does not fit its on-disk field
    #[error("Value {value} does not fit {width}-byte field at {position}")]
    FieldOverflow { position: u64, width: u8, value: u64 },

    /// Computed absolute offset lies outside the file
    #[error("Address {offset}+{len} outside file of {file_len} bytes")]
    AddressOutOfBounds { offset: u64, len: u64, file_len: u64 },

    /// Item data would be split by an insertion
    #[error("Extent of item {item_id} at offset {offset} spans an insertion point")]
    ExtentStraddlesInsertion { item_id: u32, offset: u64 },

    /// Feature of the container this crate does not handle
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Re-parse of a rewritten file disagreed with the intended result
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Caller-supplied parameters are unusable
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
