//! # popstate
//!
//! Reader and writer for serialized population state files: the `IDTK` container an
//! epidemiological simulator uses to checkpoint its global simulation record, every
//! geographic node, and every simulated individual.
//!
//! ## Overview
//!
//! A population file is a framed sequence of independently compressed JSON chunks.
//! Files from national-scale runs hold tens of millions of individual records, so the
//! crate never decodes more than it has to:
//!
//! *   **Lazy Chunks:** Opening a file parses only the header. Each [`chunk::Chunk`]
//!     keeps its compressed bytes until first touched, and drops them once decoded.
//! *   **Paged Records:** In generation 6 a node's individuals are split across
//!     human-collection chunks. [`PagedRecordList`] presents them as one sequence and
//!     keeps a single chunk decoded, stepping between neighbours as indices move.
//! *   **Every Generation:** Versions 1 to 6 are read and written, including the
//!     metadata-wrapped headers of versions 1-3 and the hex tables of version 6.
//! *   **Pluggable Codecs:** `NONE`, `LZ4` (feature `lz4_flex`) and `SNAPPY` (feature
//!     `snap`) behind the [`Compressor`] trait.
//!
//! ## File Format
//!
//! ```text
//! [ "IDTK" ] [ header size: 12 ASCII bytes ] [ header JSON ] [ chunk ] [ chunk ] ...
//! ```
//!
//! See [`format`] for the framing and [`header`] for the per-generation header schemas.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use popstate::Result;
//!
//! fn age_everyone(path: &str) -> Result<()> {
//!     let mut container = popstate::read(path)?;
//!     println!("version {} written by {}", container.version(), container.tool());
//!
//!     let mut nodes = container.nodes()?;
//!     while let Some(node) = nodes.next_node()? {
//!         node.individual_humans()?.try_for_each_mut(|_, human| {
//!             if let Some(age) = human.get_mut("m_age") {
//!                 *age = serde_json::json!(age.as_f64().unwrap_or(0.0) + 365.0);
//!             }
//!             Ok(())
//!         })?;
//!     }
//!
//!     popstate::write(&mut container, path)
//! }
//! ```
//!
//! ## Memory Bound
//!
//! While a caller walks nodes with [`NodeList::next_node`] and stays inside one node's
//! records at a time, at most the simulation chunk, one node chunk and one
//! human-collection chunk are decoded. [`Container::resident_chunks`] reports the
//! current count.
//!
//! ### Safety and Error Handling
//!
//! * **No Unsafe:** the crate forbids `unsafe` code.
//! * **No Panics:** no `unwrap()` or `panic!()` in the library (enforced by clippy lints).
//! * **Comprehensive Errors:** every failure is an [`Error`] variant naming the chunk
//!   involved. Framing errors surface on open, payload errors on first access.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// --- PUBLIC API MODULES ---
pub mod api;
pub mod chunk;
pub mod compression;
pub mod error;
pub mod format;
pub mod header;
pub mod inspector;
pub mod node;
pub mod paged;
pub mod reader;

mod container;

// --- INTERNAL IMPLEMENTATION MODULES (Hidden from Docs) ---
#[doc(hidden)]
pub mod io;

// --- RE-EXPORTS ---

#[cfg(feature = "lz4_flex")]
pub use compression::Lz4Compressor;
#[cfg(feature = "snap")]
pub use compression::SnappyCompressor;
pub use compression::{Compression, Compressor, NoCompression};

pub use api::{read, read_from, write, write_to};
pub use chunk::HumanCollectionChunk;
pub use container::Container;
pub use error::{Error, Result};
pub use format::{ChunkKind, ChunkLabel, FormatGeneration};
pub use header::{EmodInfo, Header};
pub use inspector::{DebugReport, Inspector};
pub use node::{Field, HumanRecords, NodeHandle, NodeList, ResidentChunks};
pub use paged::PagedRecordList;

/// Constants used throughout the library.
pub mod constants {
    /// The default buffer size for file I/O.
    pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

    /// Node key holding the individual records.
    pub const INDIVIDUAL_HUMANS: &str = "individualHumans";

    /// Outer key of a human-collection chunk.
    pub const HUMAN_COLLECTION_KEY: &str = "human_collection";

    /// Unpinned generation 6 chunks shorter than this use LZ4.
    pub const V6_LZ4_LIMIT: u64 = 0x7E00_0000;

    /// Unpinned generation 6 chunks shorter than this (and not LZ4) use SNAPPY.
    pub const V6_SNAPPY_LIMIT: u64 = 0xFFFF_FFFF;
}
