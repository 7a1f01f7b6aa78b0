// src/inspector.rs

//! Tools for inspecting the physical structure of population files.
//! Useful for checking chunk layout and codec choices without decoding payloads.

use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::chunk::{Chunk, HumanCollectionChunk, Payload};
use crate::container::Container;
use crate::error::Result;
use crate::format::{ChunkKind, ChunkLabel};

/// A structural report of a population file.
#[derive(Debug, Serialize)]
pub struct DebugReport {
    /// Total size of the file on disk, when inspected from a path.
    pub file_size: Option<u64>,
    /// Length of the header text.
    pub header_size: Option<usize>,
    /// Format version.
    pub version: u32,
    /// Author provenance.
    pub author: String,
    /// Tool provenance.
    pub tool: String,
    /// Date written.
    pub date: String,
    /// Number of chunks, collections included.
    pub chunk_count: usize,
    /// Compressed size of all chunks.
    pub byte_count: u64,
    /// Chunks in file order. Generation 6 collections hang off their node.
    pub chunks: Vec<ChunkInfo>,
}

/// Metadata for a single chunk.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkInfo {
    /// Role and position.
    pub label: ChunkLabel,
    /// Codec name, `None` while the chunk is decoded.
    pub compression: Option<&'static str>,
    /// Compressed size, `None` while the chunk is decoded.
    pub size: Option<u64>,
    /// Record count of a human collection.
    pub records: Option<u64>,
    /// Whether the chunk is currently decoded.
    pub materialized: bool,
    /// Collections owned by a node.
    pub children: Vec<ChunkInfo>,
}

impl ChunkInfo {
    pub(crate) fn of<P: Payload>(chunk: &Chunk<P>) -> Self {
        Self {
            label: chunk.label(),
            compression: chunk.codec().map(|c| c.name()),
            size: chunk.size(),
            records: None,
            materialized: chunk.is_materialized(),
            children: Vec::new(),
        }
    }

    pub(crate) fn of_collection(collection: &HumanCollectionChunk) -> Self {
        Self {
            records: Some(collection.declared_count()),
            ..Self::of(collection.chunk())
        }
    }

    /// Own size plus the sizes of all children.
    pub fn total_size(&self) -> u64 {
        self.size.unwrap_or(0) + self.children.iter().map(Self::total_size).sum::<u64>()
    }

    fn count(&self) -> usize {
        1 + self.children.iter().map(Self::count).sum::<usize>()
    }

    fn fmt_recursive(&self, f: &mut fmt::Formatter<'_>, prefix: &str, is_last: bool) -> fmt::Result {
        let connector = if is_last { "└── " } else { "├── " };
        let child_prefix = if is_last { "    " } else { "│   " };
        let size = self
            .size
            .map_or_else(|| "-".to_string(), |s| format!("{s}b"));
        let records = self
            .records
            .map(|r| format!(" | Records: {r}"))
            .unwrap_or_default();
        let resident = if self.materialized { " (decoded)" } else { "" };

        writeln!(
            f,
            "{prefix}{connector}[{}] Size: {size} | Algo: {}{records}{resident}",
            self.label,
            self.compression.unwrap_or("-"),
        )?;

        for (i, child) in self.children.iter().enumerate() {
            let is_last_child = i + 1 == self.children.len();
            child.fmt_recursive(f, &format!("{prefix}{child_prefix}"), is_last_child)?;
        }
        Ok(())
    }
}

/// The population file inspector.
#[derive(Debug)]
pub struct Inspector;

impl Inspector {
    /// Opens a file and reports its structure. Nothing is decompressed.
    pub fn inspect<P: AsRef<Path>>(path: P) -> Result<DebugReport> {
        let path = path.as_ref();
        let file_size = std::fs::metadata(path)?.len();
        let container = crate::api::read(path)?;
        Ok(DebugReport {
            file_size: Some(file_size),
            ..Self::report(&container)
        })
    }

    /// Reports the structure of a container already in memory.
    pub fn report(container: &Container) -> DebugReport {
        let chunks = container.describe();
        DebugReport {
            file_size: None,
            header_size: container.header_len(),
            version: container.version(),
            author: container.author().to_string(),
            tool: container.tool().to_string(),
            date: container.date().to_string(),
            chunk_count: chunks.iter().map(ChunkInfo::count).sum(),
            byte_count: chunks.iter().map(ChunkInfo::total_size).sum(),
            chunks,
        }
    }
}

impl DebugReport {
    /// Number of human-collection chunks in the report.
    pub fn collection_count(&self) -> usize {
        fn walk(info: &ChunkInfo) -> usize {
            usize::from(info.label.kind == ChunkKind::HumanCollection)
                + info.children.iter().map(walk).sum::<usize>()
        }
        self.chunks.iter().map(walk).sum()
    }
}

impl fmt::Display for DebugReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== POPULATION FILE REPORT ===")?;
        if let Some(size) = self.file_size {
            writeln!(f, "File Size:      {size}")?;
        }
        if let Some(size) = self.header_size {
            writeln!(f, "Header Size:    {size}")?;
        }
        writeln!(f, "Version:        {}", self.version)?;
        writeln!(f, "Author/Tool:    {} / {}", self.author, self.tool)?;
        writeln!(f, "Date:           {}", self.date)?;
        writeln!(f, "Chunks:         {} ({} bytes)", self.chunk_count, self.byte_count)?;
        writeln!(f, "\n[CHUNK LAYOUT]")?;
        for (i, chunk) in self.chunks.iter().enumerate() {
            chunk.fmt_recursive(f, "", i + 1 == self.chunks.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::format::FormatGeneration;
    use serde_json::json;

    #[test]
    fn report_nests_collections_under_nodes() {
        let mut container = Container::new(FormatGeneration::V6, json!({})).unwrap();
        container
            .push_node(json!({"suid": {"id": 1}, "individualHumans": [{}, {}]}))
            .unwrap();
        container.commit_all().unwrap();

        let report = Inspector::report(&container);
        assert_eq!(report.chunk_count, 3);
        assert_eq!(report.collection_count(), 1);
        assert_eq!(report.chunks[1].children[0].records, Some(2));

        let text = report.to_string();
        assert!(text.contains("human collection chunk 0 (node suid 1)"));
        assert!(text.contains("Records: 2"));
    }
}
