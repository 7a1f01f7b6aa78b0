//! Reading and writing whole population files.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::constants::DEFAULT_BUFFER_SIZE;
use crate::container::Container;
use crate::error::{Error, Result};
use crate::format::{MAGIC_BYTES, encode_header_size};
use crate::io::SeqWriter;
use crate::reader::ChunkReader;

/// Opens a population file. Only the header is parsed; chunks stay compressed.
pub fn read<P: AsRef<Path>>(path: P) -> Result<Container> {
    let path = path.as_ref();
    tracing::info!(path = %path.display(), "reading population file");
    let file = File::open(path)?;
    read_from(BufReader::with_capacity(DEFAULT_BUFFER_SIZE, file))
}

/// Reads a population file from any byte stream.
pub fn read_from<R: Read>(source: R) -> Result<Container> {
    let mut reader = ChunkReader::new(source);
    let container = Container::from_reader(&mut reader)?;

    let trailing = reader.trailing_bytes()?;
    if trailing > 0 {
        tracing::warn!(trailing, "ignoring bytes after the last chunk");
    }
    tracing::debug!(
        version = container.version(),
        chunks = container.chunk_count(),
        bytes = reader.offset(),
        "population file opened"
    );
    Ok(container)
}

/// Writes `container` to `path`, replacing any existing file.
///
/// Every decoded chunk is committed first, so nothing stays resident afterwards.
/// The file is staged next to `path` and renamed into place only once it is
/// complete, so a failed write leaves any existing file untouched. Writing back over
/// the file a container was read from is therefore safe.
pub fn write<P: AsRef<Path>>(container: &mut Container, path: P) -> Result<()> {
    let path = path.as_ref();
    tracing::info!(path = %path.display(), version = container.version(), "writing population file");

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(dir)?;
    write_to(
        container,
        BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, staged.as_file_mut()),
    )?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| Error::from(e.error))?;
    Ok(())
}

/// Writes `container` to any byte sink.
pub fn write_to<W: Write>(container: &mut Container, sink: W) -> Result<()> {
    // 1. Commit chunks, then bring the header tables and date up to date.
    container.prepare_write()?;
    let header = container.header().to_text()?;

    // 2. Framing
    let mut writer = SeqWriter::new(sink);
    writer.write_all(&MAGIC_BYTES)?;
    writer.write_all(&encode_header_size(header.len())?)?;
    writer.write_all(header.as_bytes())?;

    // 3. Chunks, in header order
    container.for_each_payload(|label, bytes| {
        let offset = writer.write_all(bytes)?;
        tracing::trace!(chunk = %label, offset, size = bytes.len(), "chunk written");
        Ok(())
    })?;
    writer.flush()?;

    container.set_header_len(header.len());
    tracing::debug!(bytes = writer.current_offset(), "population file written");
    Ok(())
}
