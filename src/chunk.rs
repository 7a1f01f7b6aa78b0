//! Lazily materialized chunks.
//!
//! A [`Chunk`] holds exactly one of two representations:
//!
//! * **Compressed**: the bytes as they sit in the file plus the codec that produced them.
//! * **Decoded**: the parsed record.
//!
//! `materialize` moves from the first to the second, `commit` moves back. The old
//! representation is dropped on every transition, which is what keeps peak memory at
//! roughly one decoded chunk while a caller walks a large population.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compression::{self, Compression, registry};
use crate::constants::HUMAN_COLLECTION_KEY;
use crate::error::{Error, Result};
use crate::format::{ChunkKind, ChunkLabel};

/// A record type that can live inside a chunk.
pub trait Payload: Sized {
    /// Parses decompressed chunk bytes.
    fn decode(bytes: &[u8]) -> std::result::Result<Self, String>;

    /// Serializes the record to uncompressed chunk bytes.
    fn encode(&self) -> Result<Vec<u8>>;
}

impl Payload for Value {
    fn decode(bytes: &[u8]) -> std::result::Result<Self, String> {
        serde_json::from_slice(bytes).map_err(|e| format!("could not parse JSON: {e}"))
    }

    fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::invalid_record(e.to_string()))
    }
}

/// The decoded form of a human-collection chunk: `{"human_collection": [...]}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HumanCollection(pub Vec<Value>);

#[derive(Deserialize)]
struct CollectionOwned {
    human_collection: Vec<Value>,
}

#[derive(Serialize)]
struct CollectionRef<'a> {
    human_collection: &'a [Value],
}

impl Payload for HumanCollection {
    fn decode(bytes: &[u8]) -> std::result::Result<Self, String> {
        serde_json::from_slice::<CollectionOwned>(bytes)
            .map(|c| Self(c.human_collection))
            .map_err(|e| format!("could not parse '{HUMAN_COLLECTION_KEY}' JSON: {e}"))
    }

    fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&CollectionRef {
            human_collection: &self.0,
        })
        .map_err(|e| Error::invalid_record(e.to_string()))
    }
}

/// The two mutually exclusive representations of a chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkState<P> {
    /// Bytes exactly as stored on disk.
    Compressed {
        /// Compressed payload.
        bytes: Vec<u8>,
        /// Codec that produced `bytes`.
        codec: Compression,
    },
    /// The parsed record.
    Decoded(P),
}

/// One independently compressed unit of the file.
#[derive(Debug, Clone)]
pub struct Chunk<P = Value> {
    label: ChunkLabel,
    state: ChunkState<P>,
    pinned: Option<Compression>,
}

impl<P: Payload> Chunk<P> {
    /// Wraps bytes read from disk. Nothing is decoded.
    pub fn from_bytes(label: ChunkLabel, bytes: Vec<u8>, codec: Compression) -> Self {
        Self {
            label,
            state: ChunkState::Compressed { bytes, codec },
            pinned: None,
        }
    }

    /// Wraps a caller-supplied record. It is compressed on the next `commit`.
    pub fn from_record(label: ChunkLabel, record: P) -> Self {
        Self {
            label,
            state: ChunkState::Decoded(record),
            pinned: None,
        }
    }

    /// Fixes the codec used by `commit`. `None` selects by encoded size.
    pub fn pin(&mut self, codec: Option<Compression>) {
        self.pinned = codec;
    }

    /// Builder form of [`Chunk::pin`].
    pub fn pinned(mut self, codec: Option<Compression>) -> Self {
        self.pinned = codec;
        self
    }

    /// Identity used in error messages.
    pub fn label(&self) -> ChunkLabel {
        self.label
    }

    pub(crate) fn set_label(&mut self, label: ChunkLabel) {
        self.label = label;
    }

    /// Current representation.
    pub fn state(&self) -> &ChunkState<P> {
        &self.state
    }

    /// Whether the decoded record is resident.
    pub fn is_materialized(&self) -> bool {
        matches!(self.state, ChunkState::Decoded(_))
    }

    /// Compressed bytes, when committed.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.state {
            ChunkState::Compressed { bytes, .. } => Some(bytes),
            ChunkState::Decoded(_) => None,
        }
    }

    /// Compressed byte size, when committed.
    pub fn size(&self) -> Option<u64> {
        self.bytes().map(|b| b.len() as u64)
    }

    /// Codec of the compressed bytes, when committed.
    pub fn codec(&self) -> Option<Compression> {
        match &self.state {
            ChunkState::Compressed { codec, .. } => Some(*codec),
            ChunkState::Decoded(_) => None,
        }
    }

    /// Decompresses and parses. A no-op when already decoded.
    ///
    /// On failure the chunk keeps its compressed bytes.
    pub fn materialize(&mut self) -> Result<()> {
        self.materialize_checked(|_| Ok(()))
    }

    /// Like [`Chunk::materialize`], with a validation step that runs before the
    /// state changes.
    pub(crate) fn materialize_checked<F>(&mut self, check: F) -> Result<()>
    where
        F: FnOnce(&P) -> Result<()>,
    {
        let ChunkState::Compressed { bytes, codec } = &self.state else {
            return Ok(());
        };

        let label = self.label;
        let record = {
            let raw = registry()
                .get(*codec)?
                .decompress(bytes)
                .map_err(|e| Error::CorruptChunk {
                    chunk: label,
                    reason: e.to_string(),
                })?;
            P::decode(&raw).map_err(|reason| Error::CorruptChunk {
                chunk: label,
                reason,
            })?
        };
        check(&record)?;

        tracing::trace!(chunk = %label, "materialized");
        self.state = ChunkState::Decoded(record);
        Ok(())
    }

    /// Serializes and compresses. A no-op when already compressed.
    pub fn commit(&mut self) -> Result<()> {
        let ChunkState::Decoded(record) = &self.state else {
            return Ok(());
        };

        let encoded = record.encode()?;
        let codec = self
            .pinned
            .unwrap_or_else(|| Compression::select_for_len(encoded.len()));
        let bytes = if codec == Compression::None {
            encoded
        } else {
            compression::compress(&encoded, codec)?
        };

        tracing::trace!(chunk = %self.label, %codec, size = bytes.len(), "committed");
        self.state = ChunkState::Compressed { bytes, codec };
        Ok(())
    }

    /// The decoded record, materializing first if needed.
    pub fn record(&mut self) -> Result<&P> {
        self.materialize()?;
        self.decoded().ok_or_else(|| self.not_decoded())
    }

    /// Mutable decoded record, materializing first if needed.
    pub fn record_mut(&mut self) -> Result<&mut P> {
        self.materialize()?;
        let label = self.label;
        match &mut self.state {
            ChunkState::Decoded(record) => Ok(record),
            ChunkState::Compressed { .. } => Err(Error::CorruptChunk {
                chunk: label,
                reason: "chunk failed to materialize".into(),
            }),
        }
    }

    /// The decoded record, if resident.
    pub fn decoded(&self) -> Option<&P> {
        match &self.state {
            ChunkState::Decoded(record) => Some(record),
            ChunkState::Compressed { .. } => None,
        }
    }

    /// Mutable decoded record, if resident.
    pub fn decoded_mut(&mut self) -> Option<&mut P> {
        match &mut self.state {
            ChunkState::Decoded(record) => Some(record),
            ChunkState::Compressed { .. } => None,
        }
    }

    /// Replaces the contents with `record`, discarding whatever was there.
    pub fn replace(&mut self, record: P) {
        self.state = ChunkState::Decoded(record);
    }

    /// Takes the decoded record out, leaving an empty compressed placeholder.
    pub(crate) fn take(&mut self) -> Result<P> {
        self.materialize()?;
        let codec = self.pinned.unwrap_or(Compression::None);
        match std::mem::replace(
            &mut self.state,
            ChunkState::Compressed {
                bytes: Vec::new(),
                codec,
            },
        ) {
            ChunkState::Decoded(record) => Ok(record),
            other => {
                self.state = other;
                Err(self.not_decoded())
            }
        }
    }

    /// Re-encodes committed bytes with `codec` and pins it for later commits.
    ///
    /// The payload is not parsed, only decompressed and compressed again.
    pub fn recompress(&mut self, codec: Compression) -> Result<()> {
        self.pinned = Some(codec);
        let ChunkState::Compressed { bytes, codec: old } = &self.state else {
            return Ok(());
        };
        if *old == codec {
            return Ok(());
        }

        let label = self.label;
        let raw = compression::decompress(bytes, *old).map_err(|e| Error::CorruptChunk {
            chunk: label,
            reason: e.to_string(),
        })?;
        let bytes = compression::compress(&raw, codec)?;
        self.state = ChunkState::Compressed { bytes, codec };
        Ok(())
    }

    fn not_decoded(&self) -> Error {
        Error::CorruptChunk {
            chunk: self.label,
            reason: "chunk is not materialized".into(),
        }
    }
}

/// A generation 6 chunk holding one collection of individual records.
#[derive(Debug, Clone)]
pub struct HumanCollectionChunk {
    owner: u64,
    declared: u64,
    chunk: Chunk<HumanCollection>,
}

impl HumanCollectionChunk {
    /// Wraps bytes read from disk along with the record count the header declares.
    pub fn from_bytes(
        index: usize,
        owner: u64,
        declared: u64,
        bytes: Vec<u8>,
        codec: Compression,
    ) -> Self {
        Self {
            owner,
            declared,
            chunk: Chunk::from_bytes(
                ChunkLabel::owned(ChunkKind::HumanCollection, index, owner),
                bytes,
                codec,
            ),
        }
    }

    /// A new collection owned by node `owner`.
    pub fn from_records(index: usize, owner: u64, records: Vec<Value>) -> Self {
        Self {
            owner,
            declared: records.len() as u64,
            chunk: Chunk::from_record(
                ChunkLabel::owned(ChunkKind::HumanCollection, index, owner),
                HumanCollection(records),
            ),
        }
    }

    /// Suid of the owning node.
    pub fn owner(&self) -> u64 {
        self.owner
    }

    /// Number of records the collection holds.
    pub fn declared_count(&self) -> u64 {
        self.declared
    }

    /// The underlying chunk.
    pub fn chunk(&self) -> &Chunk<HumanCollection> {
        &self.chunk
    }

    /// See [`Chunk::pin`].
    pub fn pin(&mut self, codec: Option<Compression>) {
        self.chunk.pin(codec);
    }

    /// See [`Chunk::recompress`].
    pub fn recompress(&mut self, codec: Compression) -> Result<()> {
        self.chunk.recompress(codec)
    }

    /// Whether the records are resident.
    pub fn is_materialized(&self) -> bool {
        self.chunk.is_materialized()
    }

    /// Decodes the collection and checks it against the declared count.
    pub fn materialize(&mut self) -> Result<()> {
        let declared = self.declared;
        let label = self.chunk.label();
        self.chunk.materialize_checked(|collection| {
            let actual = collection.0.len() as u64;
            if actual == declared {
                Ok(())
            } else {
                Err(Error::RecordCountMismatch {
                    chunk: label,
                    declared,
                    actual,
                })
            }
        })
    }

    /// Compresses the collection and drops the records.
    pub fn commit(&mut self) -> Result<()> {
        if let Some(collection) = self.chunk.decoded() {
            self.declared = collection.0.len() as u64;
        }
        self.chunk.commit()
    }

    /// Resident records, if materialized.
    pub fn records(&self) -> Option<&[Value]> {
        self.chunk.decoded().map(|c| c.0.as_slice())
    }

    /// Resident records, if materialized. Length changes must go through `push`.
    pub(crate) fn records_mut(&mut self) -> Option<&mut [Value]> {
        self.chunk.decoded_mut().map(|c| c.0.as_mut_slice())
    }

    /// Appends a record to a materialized collection.
    pub(crate) fn push(&mut self, record: Value) -> Result<()> {
        let label = self.chunk.label();
        let collection = self.chunk.decoded_mut().ok_or(Error::CorruptChunk {
            chunk: label,
            reason: "append to a collection that is not materialized".into(),
        })?;
        collection.0.push(record);
        self.declared += 1;
        Ok(())
    }
}

impl fmt::Display for HumanCollectionChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} records]", self.chunk.label(), self.declared)
    }
}
