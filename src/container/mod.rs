//! The in-memory container for one population file.
//!
//! A [`Container`] owns the parsed header and every chunk of the file. Chunks stay
//! compressed until touched. Generations 1-5 share one layout ([`legacy`]) because
//! they differ only in envelopes and header keys; generation 6 has its own
//! ([`chunked`]).

mod chunked;
mod legacy;

use std::io::Read;

use serde_json::{Map, Value};

use crate::compression::Compression;
use crate::error::{Error, Result};
use crate::format::{ChunkLabel, FormatGeneration};
use crate::header::{EmodInfo, Header};
use crate::inspector::ChunkInfo;
use crate::node::{NodeList, ResidentChunks};
use crate::reader::ChunkReader;

use chunked::ChunkedLayout;
use legacy::LegacyLayout;

#[derive(Debug)]
enum Layout {
    Legacy(LegacyLayout),
    Chunked(ChunkedLayout),
}

impl FormatGeneration {
    /// Slices the chunk region that follows `header` out of `source`.
    fn read_chunks<R: Read>(self, source: &mut ChunkReader<R>, header: &Header) -> Result<Layout> {
        let layout = match header {
            Header::Legacy(h) => Layout::Legacy(LegacyLayout::read(source, h)?),
            Header::V6(h) => Layout::Chunked(ChunkedLayout::read(source, h)?),
        };
        tracing::debug!(generation = %self, offset = source.offset(), "chunks indexed");
        Ok(layout)
    }
}

/// A population file held in memory with lazily decoded chunks.
#[derive(Debug)]
pub struct Container {
    header: Header,
    layout: Layout,
    header_len: Option<usize>,
}

impl Container {
    /// An empty container of `generation` with `simulation` as the global record.
    pub fn new(generation: FormatGeneration, simulation: Value) -> Result<Self> {
        let header = Header::new(generation);
        let layout = match &header {
            Header::Legacy(h) => Layout::Legacy(LegacyLayout::new(generation, h.compression)),
            Header::V6(_) => Layout::Chunked(ChunkedLayout::new()),
        };
        let mut container = Self {
            header,
            layout,
            header_len: None,
        };
        container.set_simulation(simulation)?;
        Ok(container)
    }

    pub(crate) fn from_reader<R: Read>(source: &mut ChunkReader<R>) -> Result<Self> {
        let (header, header_len) = source.read_header()?;
        let layout = header.generation().read_chunks(source, &header)?;
        Ok(Self {
            header,
            layout,
            header_len: Some(header_len),
        })
    }

    /// The parsed header. Chunk tables reflect the file as last read or written.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Format generation.
    pub fn generation(&self) -> FormatGeneration {
        self.header.generation()
    }

    /// Header `version` value, 1 through 6.
    pub fn version(&self) -> u32 {
        self.generation().version()
    }

    /// Author provenance.
    pub fn author(&self) -> &str {
        self.header.author()
    }

    /// Sets the author written on the next write.
    pub fn set_author(&mut self, author: impl Into<String>) {
        self.header.set_author(author);
    }

    /// Tool provenance.
    pub fn tool(&self) -> &str {
        self.header.tool()
    }

    /// Sets the tool written on the next write.
    pub fn set_tool(&mut self, tool: impl Into<String>) {
        self.header.set_tool(tool);
    }

    /// Date of the last write. Refreshed every time the container is written.
    pub fn date(&self) -> &str {
        self.header.date()
    }

    /// Build provenance (generations 5 and 6).
    pub fn emod_info(&self) -> Option<&EmodInfo> {
        self.header.emod_info()
    }

    /// Length of the header text as read, `None` for a container built in memory.
    pub fn header_len(&self) -> Option<usize> {
        self.header_len
    }

    /// The file-wide codec for generations 1-5, or the pinned codec for generation 6.
    ///
    /// `None` means generation 6 chunks pick their codec by size.
    pub fn compression(&self) -> Option<Compression> {
        match &self.layout {
            Layout::Legacy(l) => Some(l.compression()),
            Layout::Chunked(c) => c.compression(),
        }
    }

    /// Changes the codec of every chunk.
    ///
    /// Committed chunks are re-encoded now; decoded ones pick it up on commit.
    pub fn set_compression(&mut self, codec: Compression) -> Result<()> {
        tracing::debug!(%codec, "changing compression");
        match &mut self.layout {
            Layout::Legacy(l) => l.set_compression(codec),
            Layout::Chunked(c) => c.set_compression(codec),
        }
    }

    /// The global simulation record. Its `nodes` field is managed by the container
    /// and never shown here for generations 1-5.
    pub fn simulation(&mut self) -> Result<&Map<String, Value>> {
        self.simulation_mut().map(|sim| &*sim)
    }

    /// Mutable simulation record.
    pub fn simulation_mut(&mut self) -> Result<&mut Map<String, Value>> {
        match &mut self.layout {
            Layout::Legacy(l) => l.simulation_mut(),
            Layout::Chunked(c) => c.simulation_mut(),
        }
    }

    /// Replaces the simulation record. It must be a JSON object.
    pub fn set_simulation(&mut self, simulation: Value) -> Result<()> {
        let Value::Object(simulation) = simulation else {
            return Err(Error::invalid_record("simulation must be a JSON object"));
        };
        match &mut self.layout {
            Layout::Legacy(l) => l.set_simulation(simulation),
            Layout::Chunked(c) => {
                c.set_simulation(simulation);
                Ok(())
            }
        }
    }

    /// Cursor over the nodes, in file order.
    pub fn nodes(&mut self) -> Result<NodeList<'_>> {
        let nodes = match &mut self.layout {
            Layout::Legacy(l) => l.nodes()?,
            Layout::Chunked(c) => c.nodes(),
        };
        Ok(NodeList::new(nodes))
    }

    /// Number of nodes.
    pub fn node_count(&mut self) -> Result<usize> {
        self.nodes().map(|nodes| nodes.len())
    }

    /// Appends a node record.
    ///
    /// Generations 1, 2 and 6 need `suid.id` on the record. For generation 6 the
    /// record's `individualHumans` array moves into a new human-collection chunk.
    pub fn push_node(&mut self, node: Value) -> Result<()> {
        let Value::Object(node) = node else {
            return Err(Error::invalid_record("node must be a JSON object"));
        };
        match &mut self.layout {
            Layout::Legacy(l) => l.push_node(node),
            Layout::Chunked(c) => c.push_node(node),
        }
    }

    /// How many chunks are decoded right now.
    pub fn resident_chunks(&self) -> ResidentChunks {
        let (simulation, handles) = match &self.layout {
            Layout::Legacy(l) => (l.simulation_resident(), l.handles()),
            Layout::Chunked(c) => (c.simulation_resident(), c.handles()),
        };
        ResidentChunks {
            simulation: usize::from(simulation),
            ..ResidentChunks::of(handles)
        }
    }

    /// Number of chunks the container would write now.
    pub fn chunk_count(&self) -> usize {
        match &self.layout {
            Layout::Legacy(l) => l.chunk_count(),
            Layout::Chunked(c) => c.chunk_count(),
        }
    }

    /// Total compressed size of all committed chunks.
    pub fn byte_count(&self) -> u64 {
        self.describe().iter().map(ChunkInfo::total_size).sum()
    }

    /// Commits every decoded chunk.
    pub fn commit_all(&mut self) -> Result<()> {
        match &mut self.layout {
            Layout::Legacy(l) => l.commit_all(),
            Layout::Chunked(c) => c.commit_all(),
        }
    }

    /// Commits everything and rewrites the header tables and date to match.
    pub(crate) fn prepare_write(&mut self) -> Result<()> {
        self.commit_all()?;
        match (&self.layout, &mut self.header) {
            (Layout::Legacy(l), Header::Legacy(h)) => l.sync_header(h)?,
            (Layout::Chunked(c), Header::V6(h)) => c.sync_header(h)?,
            _ => return Err(Error::header("header does not match the container layout")),
        }
        self.header.stamp_date();
        Ok(())
    }

    /// Visits every committed chunk payload in write order.
    pub(crate) fn for_each_payload<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(ChunkLabel, &[u8]) -> Result<()>,
    {
        match &self.layout {
            Layout::Legacy(l) => l.for_each_payload(f),
            Layout::Chunked(c) => c.for_each_payload(f),
        }
    }

    pub(crate) fn set_header_len(&mut self, len: usize) {
        self.header_len = Some(len);
    }

    /// Chunk summaries in write order, nested by owner for generation 6.
    pub(crate) fn describe(&self) -> Vec<ChunkInfo> {
        match &self.layout {
            Layout::Legacy(l) => l.describe(),
            Layout::Chunked(c) => c.describe(),
        }
    }
}
