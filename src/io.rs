//! Low-level I/O operations handling sequential writing.
//!
//! A population file is written front to back in a single pass: magic, header size,
//! header, then every chunk in header order. [`SeqWriter`] tracks the offset so each
//! chunk can be logged with its position.

use std::io::Write;

use crate::error::Result;

/// A writer that appends data and tracks the current offset.
#[derive(Debug)]
pub struct SeqWriter<W: Write> {
    writer: W,
    current_offset: u64,
}

impl<W: Write> SeqWriter<W> {
    /// Wraps `writer`. Offsets count from zero.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            current_offset: 0,
        }
    }

    /// Writes a complete buffer.
    /// Returns the offset where the writing started.
    pub fn write_all(&mut self, buffer: &[u8]) -> Result<u64> {
        let start_offset = self.current_offset;
        self.writer.write_all(buffer)?;
        self.current_offset += buffer.len() as u64;
        Ok(start_offset)
    }

    /// Flushes the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Returns the current position.
    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    /// Unwraps the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn offsets_accumulate() {
        let mut writer = SeqWriter::new(Vec::new());
        assert_eq!(writer.write_all(b"IDTK").unwrap(), 0);
        assert_eq!(writer.write_all(b"         2").unwrap(), 4);
        assert_eq!(writer.current_offset(), 14);
        assert_eq!(writer.into_inner().len(), 14);
    }
}
