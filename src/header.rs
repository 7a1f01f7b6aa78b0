//! The versioned file header.
//!
//! Generations 1-5 share one schema ([`LegacyHeader`]): a global compression scheme
//! and a flat list of chunk sizes. Generation 6 ([`HeaderV6`]) replaces it with three
//! parallel tables describing the simulation chunk, node chunks and human-collection
//! chunks individually. Parsing dispatches on `version`, which defaults to 1 when
//! the header omits it.
//!
//! Keys this crate does not understand are kept and written back unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::compression::Compression;
use crate::error::{Error, Result};
use crate::format::{
    ChunkKind, ChunkLabel, FormatGeneration, parse_hex_field, to_hex_field,
};

/// Build provenance stored by generations 5 and 6.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmodInfo {
    /// Engine major version.
    pub emod_major_version: i64,
    /// Engine minor version.
    pub emod_minor_version: i64,
    /// Engine revision.
    pub emod_revision_number: i64,
    /// Serialized-population major version.
    pub ser_pop_major_version: i64,
    /// Serialized-population minor version.
    pub ser_pop_minor_version: i64,
    /// Serialized-population patch version.
    pub ser_pop_patch_version: i64,
    /// Build date string.
    pub emod_build_date: String,
    /// Who built the engine.
    pub emod_builder_name: String,
    /// Source-control branch, as written.
    pub emod_sccs_branch: Value,
    /// Source-control commit date.
    pub emod_sccs_date: String,
    /// Keys not listed above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for EmodInfo {
    fn default() -> Self {
        Self {
            emod_major_version: 0,
            emod_minor_version: 0,
            emod_revision_number: 0,
            ser_pop_major_version: 0,
            ser_pop_minor_version: 0,
            ser_pop_patch_version: 0,
            emod_build_date: "Mon Jan 1 00:00:00 1970".to_string(),
            emod_builder_name: String::new(),
            emod_sccs_branch: Value::from(0),
            emod_sccs_date: "Mon Jan 1 00:00:00 1970".to_string(),
            extra: Map::new(),
        }
    }
}

/// Current local time in the header's `date` format.
pub fn timestamp() -> String {
    chrono::Local::now()
        .format("%a %b %d %H:%M:%S %Y")
        .to_string()
}

/// A parsed header of any generation.
#[derive(Debug, Clone, PartialEq)]
pub enum Header {
    /// Generations 1-5.
    Legacy(LegacyHeader),
    /// Generation 6.
    V6(HeaderV6),
}

impl Header {
    /// A fresh header for `generation` with default provenance and empty tables.
    pub fn new(generation: FormatGeneration) -> Self {
        match generation {
            FormatGeneration::V6 => Self::V6(HeaderV6::default()),
            legacy => Self::Legacy(LegacyHeader::new(legacy)),
        }
    }

    /// Parses header text.
    pub fn parse(text: &[u8]) -> Result<Self> {
        let root: Value = serde_json::from_slice(text).map_err(Error::header)?;
        let Value::Object(mut object) = root else {
            return Err(Error::header("header is not a JSON object"));
        };

        if let Some(Value::Object(inner)) = object.remove("metadata") {
            object = inner;
        }

        let version = match object.get("version") {
            None => 1,
            Some(v) => v
                .as_i64()
                .ok_or_else(|| Error::header(format!("'version' is not an integer: {v}")))?,
        };
        let generation = FormatGeneration::from_version(version)?;

        if generation.is_paged() {
            HeaderV6::from_object(object).map(Self::V6)
        } else {
            LegacyHeader::from_object(object, generation).map(Self::Legacy)
        }
    }

    /// Serializes the header to its on-disk text.
    pub fn to_text(&self) -> Result<String> {
        let value = match self {
            Self::Legacy(h) => h.to_value()?,
            Self::V6(h) => h.to_value()?,
        };
        serde_json::to_string(&value).map_err(Error::header)
    }

    /// Format generation.
    pub fn generation(&self) -> FormatGeneration {
        match self {
            Self::Legacy(h) => h.generation,
            Self::V6(_) => FormatGeneration::V6,
        }
    }

    /// Author provenance.
    pub fn author(&self) -> &str {
        match self {
            Self::Legacy(h) => &h.author,
            Self::V6(h) => &h.author,
        }
    }

    /// Tool provenance.
    pub fn tool(&self) -> &str {
        match self {
            Self::Legacy(h) => &h.tool,
            Self::V6(h) => &h.tool,
        }
    }

    /// Date the file was last written.
    pub fn date(&self) -> &str {
        match self {
            Self::Legacy(h) => &h.date,
            Self::V6(h) => &h.date,
        }
    }

    /// Sets the author.
    pub fn set_author(&mut self, author: impl Into<String>) {
        match self {
            Self::Legacy(h) => h.author = author.into(),
            Self::V6(h) => h.author = author.into(),
        }
    }

    /// Sets the tool.
    pub fn set_tool(&mut self, tool: impl Into<String>) {
        match self {
            Self::Legacy(h) => h.tool = tool.into(),
            Self::V6(h) => h.tool = tool.into(),
        }
    }

    /// Build provenance, when the generation records it.
    pub fn emod_info(&self) -> Option<&EmodInfo> {
        match self {
            Self::Legacy(h) => h.emod_info.as_ref(),
            Self::V6(h) => Some(&h.emod_info),
        }
    }

    pub(crate) fn stamp_date(&mut self) {
        let now = timestamp();
        match self {
            Self::Legacy(h) => h.date = now,
            Self::V6(h) => h.date = now,
        }
    }
}

// --- Generations 1-5 ---

#[derive(Deserialize)]
struct LegacyRaw {
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    bytecount: Option<i64>,
    #[serde(default)]
    chunksizes: Vec<i64>,
    #[serde(default)]
    compressed: Option<bool>,
    #[serde(default)]
    engine: Option<String>,
    #[serde(default)]
    compression: Option<String>,
    #[serde(default)]
    emod_info: Option<EmodInfo>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Header for generations 1-5.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyHeader {
    /// Generation, never `V6`.
    pub generation: FormatGeneration,
    /// Author provenance.
    pub author: String,
    /// Date written.
    pub date: String,
    /// Tool provenance.
    pub tool: String,
    /// Scheme applied to every chunk.
    pub compression: Compression,
    /// Byte size of each chunk; index 0 is the simulation (or combined) chunk.
    pub chunk_sizes: Vec<u64>,
    /// Build provenance (generation 5).
    pub emod_info: Option<EmodInfo>,
    extra: Map<String, Value>,
}

impl LegacyHeader {
    /// Defaults for a new legacy file.
    pub fn new(generation: FormatGeneration) -> Self {
        Self {
            generation,
            author: "unknown".to_string(),
            date: timestamp(),
            tool: env!("CARGO_PKG_NAME").to_string(),
            compression: Compression::Lz4,
            chunk_sizes: Vec::new(),
            emod_info: (generation == FormatGeneration::V5).then(EmodInfo::default),
            extra: Map::new(),
        }
    }

    fn from_object(mut object: Map<String, Value>, generation: FormatGeneration) -> Result<Self> {
        // Recomputed on write.
        object.remove("version");
        object.remove("chunkcount");
        let raw: LegacyRaw = serde_json::from_value(Value::Object(object)).map_err(Error::header)?;

        let compression = match generation {
            FormatGeneration::V1 => match raw.engine.as_deref() {
                Some(engine) => Compression::from_name(engine)?,
                None if raw.compressed.unwrap_or(false) => Compression::Snappy,
                None => Compression::None,
            },
            FormatGeneration::V2 | FormatGeneration::V3 => {
                Compression::from_name(raw.engine.as_deref().unwrap_or("NONE"))?
            }
            _ => Compression::from_name(
                raw.compression
                    .as_deref()
                    .or(raw.engine.as_deref())
                    .unwrap_or("NONE"),
            )?,
        };

        let declared = if generation == FormatGeneration::V1 {
            vec![raw.bytecount.unwrap_or(0)]
        } else {
            raw.chunksizes
        };
        if declared.is_empty() {
            return Err(Error::ChunkSizeMismatch {
                chunk: ChunkLabel::new(ChunkKind::Simulation, 0),
                declared: 0,
                actual: 0,
            });
        }
        let chunk_sizes = declared
            .iter()
            .enumerate()
            .map(|(index, &size)| {
                u64::try_from(size)
                    .ok()
                    .filter(|&s| s > 0)
                    .ok_or_else(|| Error::ChunkSizeMismatch {
                        chunk: legacy_label(generation, index),
                        declared: size,
                        actual: 0,
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let emod_info = raw.emod_info.or_else(|| {
            (generation == FormatGeneration::V5).then(EmodInfo::default)
        });

        Ok(Self {
            generation,
            author: raw.author.unwrap_or_default(),
            date: raw.date.unwrap_or_default(),
            tool: raw.tool.unwrap_or_default(),
            compression,
            chunk_sizes,
            emod_info,
            extra: raw.extra,
        })
    }

    /// Sum of all chunk sizes.
    pub fn byte_count(&self) -> u64 {
        self.chunk_sizes.iter().fold(0, |sum, size| sum.saturating_add(*size))
    }

    fn to_value(&self) -> Result<Value> {
        let mut map = self.extra.clone();
        map.insert("author".into(), Value::from(self.author.clone()));
        map.insert("date".into(), Value::from(self.date.clone()));
        map.insert("tool".into(), Value::from(self.tool.clone()));
        map.insert("version".into(), Value::from(self.generation.version()));
        map.insert("bytecount".into(), Value::from(self.byte_count()));
        map.insert("chunkcount".into(), Value::from(self.chunk_sizes.len()));
        map.insert("chunksizes".into(), Value::from(self.chunk_sizes.clone()));
        map.insert(
            "compressed".into(),
            Value::from(self.compression != Compression::None),
        );
        let codec_key = if self.generation <= FormatGeneration::V3 {
            "engine"
        } else {
            "compression"
        };
        map.insert(codec_key.into(), Value::from(self.compression.name()));
        if let Some(info) = &self.emod_info {
            map.insert(
                "emod_info".into(),
                serde_json::to_value(info).map_err(Error::header)?,
            );
        }

        if self.generation <= FormatGeneration::V3 {
            let mut wrapper = Map::new();
            wrapper.insert("metadata".into(), Value::Object(map));
            Ok(Value::Object(wrapper))
        } else {
            Ok(Value::Object(map))
        }
    }
}

fn legacy_label(generation: FormatGeneration, index: usize) -> ChunkLabel {
    match (generation, index) {
        (FormatGeneration::V1, _) => ChunkLabel::new(ChunkKind::Combined, 0),
        (_, 0) => ChunkLabel::new(ChunkKind::Simulation, 0),
        (_, i) => ChunkLabel::new(ChunkKind::Node, i - 1),
    }
}

// --- Generation 6 ---

#[derive(Serialize, Deserialize)]
struct V6Raw {
    #[serde(default)]
    author: String,
    #[serde(default)]
    tool: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    emod_info: EmodInfo,
    #[serde(default)]
    sim_compression: String,
    #[serde(default)]
    sim_chunk_size: String,
    #[serde(default)]
    node_suids: Vec<String>,
    #[serde(default)]
    node_compressions: Vec<String>,
    #[serde(default)]
    node_chunk_sizes: Vec<String>,
    #[serde(default)]
    human_compressions: Vec<String>,
    #[serde(default)]
    human_node_suids: Vec<String>,
    #[serde(default)]
    human_num_humans: Vec<String>,
    #[serde(default)]
    human_chunk_sizes: Vec<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Location of the simulation chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimEntry {
    /// Codec.
    pub compression: Compression,
    /// Byte size.
    pub size: u64,
}

/// One row of the node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeEntry {
    /// External node id.
    pub suid: u64,
    /// Codec.
    pub compression: Compression,
    /// Byte size.
    pub size: u64,
}

/// One row of the human-collection table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanEntry {
    /// Suid of the owning node.
    pub owner: u64,
    /// Number of records in the collection.
    pub records: u64,
    /// Codec.
    pub compression: Compression,
    /// Byte size.
    pub size: u64,
}

/// Header for generation 6.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderV6 {
    /// Author provenance.
    pub author: String,
    /// Tool provenance.
    pub tool: String,
    /// Date written.
    pub date: String,
    /// Build provenance.
    pub emod_info: EmodInfo,
    /// Simulation chunk.
    pub simulation: SimEntry,
    /// Node chunks, in file order.
    pub nodes: Vec<NodeEntry>,
    /// Human-collection chunks, in file order.
    pub humans: Vec<HumanEntry>,
    extra: Map<String, Value>,
}

impl Default for HeaderV6 {
    fn default() -> Self {
        Self {
            author: "IDM".to_string(),
            tool: "DTK".to_string(),
            date: timestamp(),
            emod_info: EmodInfo::default(),
            simulation: SimEntry {
                compression: Compression::None,
                size: 0,
            },
            nodes: Vec::new(),
            humans: Vec::new(),
            extra: Map::new(),
        }
    }
}

fn positive_size(text: &str, what: &str, chunk: ChunkLabel) -> Result<u64> {
    let size = parse_hex_field(text, what)?;
    if size == 0 {
        return Err(Error::ChunkSizeMismatch {
            chunk,
            declared: 0,
            actual: 0,
        });
    }
    Ok(size)
}

fn same_len(table: &str, len: usize, expected: usize) -> Result<()> {
    if len == expected {
        Ok(())
    } else {
        Err(Error::header(format!(
            "'{table}' has {len} entries, expected {expected}"
        )))
    }
}

impl HeaderV6 {
    fn from_object(mut object: Map<String, Value>) -> Result<Self> {
        object.remove("version");
        let raw: V6Raw = serde_json::from_value(Value::Object(object)).map_err(Error::header)?;

        let simulation = SimEntry {
            compression: Compression::from_code(&raw.sim_compression)?,
            size: positive_size(
                &raw.sim_chunk_size,
                "sim_chunk_size",
                ChunkLabel::new(ChunkKind::Simulation, 0),
            )?,
        };

        let node_count = raw.node_chunk_sizes.len();
        same_len("node_suids", raw.node_suids.len(), node_count)?;
        same_len("node_compressions", raw.node_compressions.len(), node_count)?;
        let nodes = (0..node_count)
            .map(|i| {
                let suid = parse_hex_field(&raw.node_suids[i], "node_suids")?;
                Ok(NodeEntry {
                    suid,
                    compression: Compression::from_code(&raw.node_compressions[i])?,
                    size: positive_size(
                        &raw.node_chunk_sizes[i],
                        "node_chunk_sizes",
                        ChunkLabel::owned(ChunkKind::Node, i, suid),
                    )?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let human_count = raw.human_chunk_sizes.len();
        same_len("human_compressions", raw.human_compressions.len(), human_count)?;
        same_len("human_node_suids", raw.human_node_suids.len(), human_count)?;
        same_len("human_num_humans", raw.human_num_humans.len(), human_count)?;
        let humans = (0..human_count)
            .map(|i| {
                let owner = parse_hex_field(&raw.human_node_suids[i], "human_node_suids")?;
                Ok(HumanEntry {
                    owner,
                    records: parse_hex_field(&raw.human_num_humans[i], "human_num_humans")?,
                    compression: Compression::from_code(&raw.human_compressions[i])?,
                    size: positive_size(
                        &raw.human_chunk_sizes[i],
                        "human_chunk_sizes",
                        ChunkLabel::owned(ChunkKind::HumanCollection, i, owner),
                    )?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            author: raw.author,
            tool: raw.tool,
            date: raw.date,
            emod_info: raw.emod_info,
            simulation,
            nodes,
            humans,
            extra: raw.extra,
        })
    }

    fn to_value(&self) -> Result<Value> {
        let raw = V6Raw {
            author: self.author.clone(),
            tool: self.tool.clone(),
            date: self.date.clone(),
            emod_info: self.emod_info.clone(),
            sim_compression: self.simulation.compression.code().to_string(),
            sim_chunk_size: to_hex_field(self.simulation.size),
            node_suids: self.nodes.iter().map(|n| to_hex_field(n.suid)).collect(),
            node_compressions: self
                .nodes
                .iter()
                .map(|n| n.compression.code().to_string())
                .collect(),
            node_chunk_sizes: self.nodes.iter().map(|n| to_hex_field(n.size)).collect(),
            human_compressions: self
                .humans
                .iter()
                .map(|h| h.compression.code().to_string())
                .collect(),
            human_node_suids: self.humans.iter().map(|h| to_hex_field(h.owner)).collect(),
            human_num_humans: self.humans.iter().map(|h| to_hex_field(h.records)).collect(),
            human_chunk_sizes: self.humans.iter().map(|h| to_hex_field(h.size)).collect(),
            extra: self.extra.clone(),
        };
        let mut value = serde_json::to_value(raw).map_err(Error::header)?;
        if let Value::Object(map) = &mut value {
            map.insert("version".into(), Value::from(6));
        }
        Ok(value)
    }
}
