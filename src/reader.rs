//! The Read-Side Engine.
//!
//! Validates the framing of a population file and slices the chunk region into
//! per-chunk byte buffers. No payload is decompressed or parsed here; that happens
//! lazily when a chunk is first materialized.
//!
//! Reading is strictly sequential, so any [`Read`] works as a source: a file, a
//! network stream, or an in-memory buffer.

use std::io::Read;

use crate::error::{Error, Result};
use crate::format::{ChunkLabel, HEADER_SIZE_FIELD_LEN, MAGIC_BYTES, decode_header_size};
use crate::header::Header;

/// Where the reader is in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// Nothing consumed yet.
    Unopened,
    /// Magic checked, header parsed.
    HeaderRead,
    /// At least one chunk sliced.
    ChunksIndexed,
    /// Every declared chunk sliced and the rest of the stream drained.
    Ready,
}

/// Sequential reader over the framing of a population file.
#[derive(Debug)]
pub struct ChunkReader<R> {
    inner: R,
    state: ReadState,
    offset: u64,
}

impl<R: Read> ChunkReader<R> {
    /// Wraps `inner`, which must be positioned at the magic bytes.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            state: ReadState::Unopened,
            offset: 0,
        }
    }

    /// Current stage.
    pub fn state(&self) -> ReadState {
        self.state
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Checks the magic literal, then reads and parses the header.
    ///
    /// Returns the header and the length of its text.
    pub fn read_header(&mut self) -> Result<(Header, usize)> {
        // 1. Magic
        let mut magic = [0u8; 4];
        let got = self.fill(&mut magic)?;
        if got < magic.len() || magic != MAGIC_BYTES {
            return Err(Error::BadMagic {
                found: String::from_utf8_lossy(&magic[..got]).into_owned(),
            });
        }

        // 2. Header size
        let mut field = [0u8; HEADER_SIZE_FIELD_LEN];
        let got = self.fill(&mut field)?;
        if got < field.len() {
            return Err(Error::BadHeaderSize {
                field: String::from_utf8_lossy(&field[..got]).into_owned(),
            });
        }
        let size = decode_header_size(&field)?;

        // 3. Header text
        let mut text = Vec::new();
        let got = self.take(size as u64, &mut text)?;
        if got < size {
            return Err(Error::BadHeaderSize {
                field: format!("declared {size} header bytes, found {got}"),
            });
        }
        let header = Header::parse(&text)?;

        tracing::debug!(
            generation = %header.generation(),
            header_size = size,
            "header read"
        );
        self.state = ReadState::HeaderRead;
        Ok((header, size))
    }

    /// Reads the next chunk, which the header declares to be `size` bytes.
    pub fn read_chunk(&mut self, label: ChunkLabel, size: u64) -> Result<Vec<u8>> {
        let start = self.offset;
        let mut bytes = Vec::new();
        let got = self.take(size, &mut bytes)?;
        if (got as u64) < size {
            return Err(Error::ChunkSizeMismatch {
                chunk: label,
                declared: i64::try_from(size).unwrap_or(i64::MAX),
                actual: got as u64,
            });
        }

        tracing::trace!(chunk = %label, offset = start, size, "chunk sliced");
        self.state = ReadState::ChunksIndexed;
        Ok(bytes)
    }

    /// Counts whatever follows the last declared chunk. Call once every declared chunk
    /// has been read.
    pub fn trailing_bytes(&mut self) -> Result<u64> {
        let trailing = std::io::copy(&mut self.inner, &mut std::io::sink())?;
        self.offset += trailing;
        self.state = ReadState::Ready;
        Ok(trailing)
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.offset += filled as u64;
        Ok(filled)
    }

    fn take(&mut self, size: u64, out: &mut Vec<u8>) -> Result<usize> {
        let got = (&mut self.inner).take(size).read_to_end(out)?;
        self.offset += got as u64;
        Ok(got)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::format::{ChunkKind, FormatGeneration};

    fn framed(header: &str, body: &[u8]) -> Vec<u8> {
        let mut bytes = MAGIC_BYTES.to_vec();
        bytes.extend_from_slice(format!("{:>12}", header.len()).as_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn reads_header_then_chunks() {
        let bytes = framed(r#"{"version":3,"engine":"NONE","chunksizes":[2,3]}"#, b"{}abc");
        let mut reader = ChunkReader::new(bytes.as_slice());
        let (header, _) = reader.read_header().unwrap();
        assert_eq!(header.generation(), FormatGeneration::V3);
        assert_eq!(reader.state(), ReadState::HeaderRead);

        let label = ChunkLabel::new(ChunkKind::Simulation, 0);
        assert_eq!(reader.read_chunk(label, 2).unwrap(), b"{}");
        assert_eq!(reader.read_chunk(label, 3).unwrap(), b"abc");
        assert_eq!(reader.state(), ReadState::ChunksIndexed);
        assert_eq!(reader.trailing_bytes().unwrap(), 0);
        assert_eq!(reader.state(), ReadState::Ready);
    }

    #[test]
    fn wrong_or_short_magic() {
        let mut reader = ChunkReader::new(&b"IDTX            "[..]);
        assert!(matches!(reader.read_header(), Err(Error::BadMagic { .. })));
        let mut reader = ChunkReader::new(&b"ID"[..]);
        assert!(matches!(reader.read_header(), Err(Error::BadMagic { .. })));
    }

    #[test]
    fn header_shorter_than_declared() {
        let mut bytes = MAGIC_BYTES.to_vec();
        bytes.extend_from_slice(b"         100");
        bytes.extend_from_slice(b"{}");
        let mut reader = ChunkReader::new(bytes.as_slice());
        assert!(matches!(
            reader.read_header(),
            Err(Error::BadHeaderSize { .. })
        ));
    }

    #[test]
    fn short_chunk_reports_sizes() {
        let bytes = framed(r#"{"version":3,"engine":"NONE","chunksizes":[10]}"#, b"{}");
        let mut reader = ChunkReader::new(bytes.as_slice());
        reader.read_header().unwrap();
        let err = reader
            .read_chunk(ChunkLabel::new(ChunkKind::Simulation, 0), 10)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ChunkSizeMismatch {
                declared: 10,
                actual: 2,
                ..
            }
        ));
    }
}
