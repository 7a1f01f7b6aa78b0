//! Centralized error handling for popstate.
//!
//! Every failure condition in the crate is reported through [`Error`]; the library
//! never panics on malformed input.
//!
//! ## Error Categories
//!
//! - **Framing** ([`Error::BadMagic`], [`Error::BadHeaderSize`], [`Error::BadHeaderJson`],
//!   [`Error::UnknownVersion`], [`Error::ChunkSizeMismatch`]): raised eagerly while a
//!   file is being opened, before any payload is decoded.
//! - **Payload** ([`Error::CorruptChunk`], [`Error::RecordCountMismatch`]): raised lazily,
//!   the first time the affected chunk is materialized.
//! - **Usage** ([`Error::ProtectedKey`], [`Error::IndexOutOfRange`], [`Error::InvalidRecord`]):
//!   the caller asked for something the container cannot do.
//! - **Codec** ([`Error::UnsupportedCodec`], [`Error::Codec`]).
//! - **I/O** ([`Error::Io`]).
//!
//! None of them are recoverable for the call in progress. A corrupt population file
//! cannot be partially trusted, so there is no silent fallback or retry anywhere.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use popstate::Error;
//!
//! match popstate::read("state-00010.dtk") {
//!     Ok(container) => println!("generation {}", container.version()),
//!     Err(Error::UnknownVersion { version }) => eprintln!("too new: {version}"),
//!     Err(e) => eprintln!("other error: {e}"),
//! }
//! ```

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::compression::Compression;
use crate::format::ChunkLabel;

/// A specialized `Result` type for popstate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The master error enum covering all failure domains in popstate.
///
/// This type is `Clone`; I/O errors are wrapped in an `Arc` for that reason.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Low-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// The first four bytes are not the `IDTK` magic literal.
    #[error("file has incorrect magic number: {found:?}")]
    BadMagic {
        /// What was found instead (lossy UTF-8).
        found: String,
    },

    /// The 12-byte header size field is not a positive decimal integer, or the
    /// stream ended before that many header bytes could be read.
    #[error("invalid header size: {field:?}")]
    BadHeaderSize {
        /// The raw field text, or a description of the shortfall.
        field: String,
    },

    /// The header text could not be parsed, or its fields have the wrong shape.
    #[error("couldn't decode header: {reason}")]
    BadHeaderJson {
        /// Parser message.
        reason: String,
    },

    /// `version` is outside `1..=6`.
    #[error("unknown serialized population file version: {version}")]
    UnknownVersion {
        /// The version found in the header.
        version: i64,
    },

    /// A declared chunk size is not positive, or the stream ended early.
    #[error("{chunk}: declared size {declared}, read {actual} bytes")]
    ChunkSizeMismatch {
        /// Which chunk.
        chunk: ChunkLabel,
        /// Size declared by the header.
        declared: i64,
        /// Bytes actually available.
        actual: u64,
    },

    /// A well-framed chunk failed to decompress or parse.
    #[error("{chunk} is corrupt: {reason}")]
    CorruptChunk {
        /// Which chunk.
        chunk: ChunkLabel,
        /// Decoder message.
        reason: String,
    },

    /// A human collection decoded to a different number of records than declared.
    #[error("{chunk}: declared {declared} records but decoded {actual}")]
    RecordCountMismatch {
        /// Which chunk.
        chunk: ChunkLabel,
        /// Count from the header table.
        declared: u64,
        /// Count found in the payload.
        actual: u64,
    },

    /// The compression scheme is unknown, or support for it was compiled out.
    #[error("unknown/unsupported compression scheme {scheme:?}")]
    UnsupportedCodec {
        /// The scheme name or code as written.
        scheme: String,
    },

    /// A codec rejected its input.
    #[error("{scheme} codec failed: {reason}")]
    Codec {
        /// The codec in use.
        scheme: Compression,
        /// Library message.
        reason: String,
    },

    /// The key is managed by the container and cannot be removed.
    #[error("cannot remove protected key {key:?}")]
    ProtectedKey {
        /// The key.
        key: String,
    },

    /// Record index past the end of a node's record list.
    #[error("index {index} is out of range for {len} records")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Current length.
        len: usize,
    },

    /// A caller-supplied record does not have the shape the container needs.
    #[error("invalid record: {reason}")]
    InvalidRecord {
        /// What is wrong with it.
        reason: String,
    },
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl Error {
    pub(crate) fn header(reason: impl std::fmt::Display) -> Self {
        Self::BadHeaderJson {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_record(reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }
}
