//! Defines the physical binary layout of population state files.
//!
//! # Layout
//! All offsets are sequential, with no alignment padding:
//!
//! ```text
//! [ "IDTK" ] [ header size: 12 ASCII bytes ] [ header text ] [ chunk 0 ] [ chunk 1 ] ...
//! ```
//!
//! The header size is a decimal integer right-justified with leading spaces. Chunk
//! boundaries are implied by the sizes declared in the header; there are no markers.
//! Generation 6 writes every size, count and suid in the header as a 16-digit
//! lowercase hexadecimal string.

use std::fmt;

use serde::Serialize;

use crate::error::{Error, Result};

/// Magic bytes identifying the file format.
pub const MAGIC_BYTES: [u8; 4] = *b"IDTK";

/// Width of the ASCII header size field.
pub const HEADER_SIZE_FIELD_LEN: usize = 12;

/// Width of generation 6 hexadecimal size/count/suid fields.
pub const HEX_FIELD_WIDTH: usize = 16;

/// Newest format generation this crate understands.
pub const MAX_VERSION: i64 = 6;

/// Encodes the header size field: decimal, right aligned in 12 characters.
pub fn encode_header_size(len: usize) -> Result<[u8; HEADER_SIZE_FIELD_LEN]> {
    let text = format!("{len:>width$}", width = HEADER_SIZE_FIELD_LEN);
    text.as_bytes()
        .try_into()
        .map_err(|_| Error::BadHeaderSize { field: text.clone() })
}

/// Decodes the header size field. Anything but a positive integer is rejected.
pub fn decode_header_size(field: &[u8]) -> Result<usize> {
    let text = String::from_utf8_lossy(field);
    let bad = || Error::BadHeaderSize {
        field: text.to_string(),
    };
    let size: i64 = text.trim().parse().map_err(|_| bad())?;
    if size <= 0 {
        return Err(bad());
    }
    usize::try_from(size).map_err(|_| bad())
}

/// Formats `value` as a 16-digit zero-padded lowercase hex string.
pub fn to_hex_field(value: u64) -> String {
    format!("{value:0width$x}", width = HEX_FIELD_WIDTH)
}

/// Parses a generation 6 hex field. `what` names the field for the error message.
pub fn parse_hex_field(text: &str, what: &str) -> Result<u64> {
    u64::from_str_radix(text.trim(), 16)
        .map_err(|e| Error::header(format!("'{what}' value {text:?} is not hexadecimal: {e}")))
}

/// One of the six on-disk format generations.
///
/// * `V1`: a single chunk holding the simulation and every node.
/// * `V2`: a simulation chunk plus one chunk per node, both wrapped in envelopes.
/// * `V3`: as `V2`, with simulation and nodes stored as root objects.
/// * `V4`: as `V3`, header names the codec `compression` instead of `engine`.
/// * `V5`: as `V4`, header carries `emod_info` build provenance.
/// * `V6`: per-chunk codecs and sizes; individual records move into separate
///   human-collection chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum FormatGeneration {
    /// Original single-chunk layout.
    V1,
    /// First chunked layout.
    V2,
    /// Second chunked layout.
    V3,
    /// Metadata update.
    V4,
    /// Build provenance added.
    V5,
    /// Per-chunk compression with paged individual records.
    V6,
}

impl FormatGeneration {
    /// Maps a header `version` value to its generation.
    pub fn from_version(version: i64) -> Result<Self> {
        match version {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            4 => Ok(Self::V4),
            5 => Ok(Self::V5),
            6 => Ok(Self::V6),
            _ => Err(Error::UnknownVersion { version }),
        }
    }

    /// The header `version` value.
    pub fn version(self) -> u32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V3 => 3,
            Self::V4 => 4,
            Self::V5 => 5,
            Self::V6 => 6,
        }
    }

    /// Whether individual records live in separate paged chunks.
    pub fn is_paged(self) -> bool {
        self == Self::V6
    }
}

impl fmt::Display for FormatGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.version())
    }
}

/// The role a chunk plays in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChunkKind {
    /// Generation 1 single chunk holding simulation and nodes together.
    Combined,
    /// Global simulation record.
    Simulation,
    /// One node record.
    Node,
    /// One collection of individual records (generation 6).
    HumanCollection,
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Combined => "combined",
            Self::Simulation => "simulation",
            Self::Node => "node",
            Self::HumanCollection => "human collection",
        })
    }
}

/// Identity of a chunk, carried by every chunk-level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkLabel {
    /// Role of the chunk.
    pub kind: ChunkKind,
    /// Position within its table (node chunks and collections count from 0).
    pub index: usize,
    /// Owning node suid, where the format records one.
    pub suid: Option<u64>,
}

impl ChunkLabel {
    /// Label for a chunk without an owning node.
    pub fn new(kind: ChunkKind, index: usize) -> Self {
        Self {
            kind,
            index,
            suid: None,
        }
    }

    /// Label for a chunk owned by node `suid`.
    pub fn owned(kind: ChunkKind, index: usize, suid: u64) -> Self {
        Self {
            kind,
            index,
            suid: Some(suid),
        }
    }
}

impl fmt::Display for ChunkLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} chunk {}", self.kind, self.index)?;
        if let Some(suid) = self.suid {
            write!(f, " (node suid {suid})")?;
        }
        Ok(())
    }
}
