//! Generations 1-5: one codec for the whole file and a flat chunk table.
//!
//! Generation 1 stores everything in one combined chunk,
//! `{"simulation": {..., "nodes": [{"suid": .., "node": {..}}, ..]}}`. It is split into a
//! simulation record and embedded nodes the first time either is accessed, and
//! joined again before writing. Generation 2 wraps the simulation chunk in
//! `{"simulation": ..}` and each node chunk in `{"suid": .., "node": ..}`; generations
//! 3-5 store both as bare objects.

use std::io::Read;

use serde_json::{Map, Value};

use crate::chunk::{Chunk, Payload};
use crate::compression::Compression;
use crate::error::{Error, Result};
use crate::format::{ChunkKind, ChunkLabel, FormatGeneration};
use crate::header::LegacyHeader;
use crate::inspector::ChunkInfo;
use crate::node::{Envelope, NodeHandle, suid_of};
use crate::reader::ChunkReader;

const SIMULATION_KEY: &str = "simulation";
const NODES_KEY: &str = "nodes";

#[derive(Debug)]
pub(crate) struct LegacyLayout {
    generation: FormatGeneration,
    compression: Compression,
    simulation: Chunk,
    nodes: Vec<NodeHandle>,
    /// Generation 1 only: the combined chunk has not been split yet.
    packed: bool,
}

impl LegacyLayout {
    pub(crate) fn new(generation: FormatGeneration, compression: Compression) -> Self {
        let label = ChunkLabel::new(ChunkKind::Simulation, 0);
        let empty = match generation {
            FormatGeneration::V2 => wrap(SIMULATION_KEY, Value::Object(Map::new())),
            _ => Value::Object(Map::new()),
        };
        Self {
            generation,
            compression,
            simulation: Chunk::from_record(label, empty).pinned(Some(compression)),
            nodes: Vec::new(),
            packed: false,
        }
    }

    pub(crate) fn read<R: Read>(source: &mut ChunkReader<R>, header: &LegacyHeader) -> Result<Self> {
        let generation = header.generation;
        let codec = header.compression;
        let Some((&first, rest)) = header.chunk_sizes.split_first() else {
            return Err(Error::ChunkSizeMismatch {
                chunk: ChunkLabel::new(ChunkKind::Simulation, 0),
                declared: 0,
                actual: 0,
            });
        };

        if generation == FormatGeneration::V1 {
            let label = ChunkLabel::new(ChunkKind::Combined, 0);
            let bytes = source.read_chunk(label, first)?;
            return Ok(Self {
                generation,
                compression: codec,
                simulation: Chunk::from_bytes(label, bytes, codec).pinned(Some(codec)),
                nodes: Vec::new(),
                packed: true,
            });
        }

        let label = ChunkLabel::new(ChunkKind::Simulation, 0);
        let simulation =
            Chunk::from_bytes(label, source.read_chunk(label, first)?, codec).pinned(Some(codec));

        let envelope = if generation == FormatGeneration::V2 {
            Envelope::Keyed
        } else {
            Envelope::Bare
        };
        let nodes = rest
            .iter()
            .enumerate()
            .map(|(index, &size)| {
                let label = ChunkLabel::new(ChunkKind::Node, index);
                let bytes = source.read_chunk(label, size)?;
                let chunk = Chunk::from_bytes(label, bytes, codec).pinned(Some(codec));
                Ok(NodeHandle::legacy(chunk, envelope))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            generation,
            compression: codec,
            simulation,
            nodes,
            packed: false,
        })
    }

    pub(crate) fn compression(&self) -> Compression {
        self.compression
    }

    pub(crate) fn set_compression(&mut self, codec: Compression) -> Result<()> {
        self.compression = codec;
        self.simulation.recompress(codec)?;
        self.nodes.iter_mut().try_for_each(|n| n.recompress(codec))
    }

    pub(crate) fn simulation_mut(&mut self) -> Result<&mut Map<String, Value>> {
        self.unpack()?;
        let generation = self.generation;
        let label = self.simulation.label();
        let root = self.simulation.record_mut()?;
        let sim = match generation {
            FormatGeneration::V2 => root.get_mut(SIMULATION_KEY),
            _ => Some(root),
        };
        let sim = sim
            .and_then(Value::as_object_mut)
            .ok_or_else(|| corrupt(label, "simulation record is not an object"))?;
        sim.remove(NODES_KEY);
        Ok(sim)
    }

    pub(crate) fn set_simulation(&mut self, mut simulation: Map<String, Value>) -> Result<()> {
        self.unpack()?;
        simulation.remove(NODES_KEY);
        let record = match self.generation {
            FormatGeneration::V2 => wrap(SIMULATION_KEY, Value::Object(simulation)),
            _ => Value::Object(simulation),
        };
        self.simulation.replace(record);
        Ok(())
    }

    pub(crate) fn nodes(&mut self) -> Result<&mut [NodeHandle]> {
        self.unpack()?;
        Ok(&mut self.nodes)
    }

    pub(crate) fn push_node(&mut self, node: Map<String, Value>) -> Result<()> {
        self.unpack()?;
        let index = self.nodes.len();
        let label = ChunkLabel::new(ChunkKind::Node, index);

        let handle = match self.generation {
            FormatGeneration::V1 | FormatGeneration::V2 => {
                let suid = node
                    .get("suid")
                    .filter(|s| suid_of(s).is_some())
                    .cloned()
                    .ok_or_else(|| Error::invalid_record("node has no 'suid.id'"))?;
                let mut entry = Map::new();
                entry.insert("suid".into(), suid);
                entry.insert("node".into(), Value::Object(node));
                if self.generation == FormatGeneration::V1 {
                    NodeHandle::embedded(label, Value::Object(entry))
                } else {
                    let chunk = Chunk::from_record(label, Value::Object(entry))
                        .pinned(Some(self.compression));
                    NodeHandle::legacy(chunk, Envelope::Keyed)
                }
            }
            _ => {
                let chunk =
                    Chunk::from_record(label, Value::Object(node)).pinned(Some(self.compression));
                NodeHandle::legacy(chunk, Envelope::Bare)
            }
        };
        self.nodes.push(handle);
        Ok(())
    }

    pub(crate) fn handles(&self) -> &[NodeHandle] {
        &self.nodes
    }

    pub(crate) fn simulation_resident(&self) -> bool {
        self.simulation.is_materialized()
    }

    /// Commits every chunk. Generation 1 is joined back into its combined chunk.
    pub(crate) fn commit_all(&mut self) -> Result<()> {
        if self.generation == FormatGeneration::V1 {
            self.pack()?;
            return self.simulation.commit();
        }

        self.seal_simulation()?;
        self.simulation.commit()?;
        self.nodes.iter_mut().try_for_each(NodeHandle::store)
    }

    pub(crate) fn sync_header(&self, header: &mut LegacyHeader) -> Result<()> {
        let mut sizes = vec![committed_size(&self.simulation)?];
        for node in &self.nodes {
            sizes.push(committed_size(node.chunk())?);
        }
        header.compression = self.compression;
        header.chunk_sizes = sizes;
        Ok(())
    }

    pub(crate) fn for_each_payload<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(ChunkLabel, &[u8]) -> Result<()>,
    {
        f(self.simulation.label(), committed_bytes(&self.simulation)?)?;
        for node in &self.nodes {
            f(node.chunk().label(), committed_bytes(node.chunk())?)?;
        }
        Ok(())
    }

    pub(crate) fn chunk_count(&self) -> usize {
        if self.generation == FormatGeneration::V1 {
            1
        } else {
            1 + self.nodes.len()
        }
    }

    pub(crate) fn describe(&self) -> Vec<ChunkInfo> {
        std::iter::once(ChunkInfo::of(&self.simulation))
            .chain(self.nodes.iter().map(|n| ChunkInfo::of(n.chunk())))
            .collect()
    }

    fn unpack(&mut self) -> Result<()> {
        if !self.packed {
            return Ok(());
        }

        let label = self.simulation.label();
        let well_formed = self
            .simulation
            .record()?
            .get(SIMULATION_KEY)
            .and_then(Value::as_object)
            .is_some_and(|sim| matches!(sim.get(NODES_KEY), None | Some(Value::Array(_))));
        if !well_formed {
            return Err(corrupt(label, "expected {\"simulation\": {.., \"nodes\": [..]}}"));
        }

        let Value::Object(mut root) = self.simulation.take()? else {
            return Err(corrupt(label, "combined record is not an object"));
        };
        let Some(Value::Object(mut simulation)) = root.remove(SIMULATION_KEY) else {
            return Err(corrupt(label, "missing simulation object"));
        };
        let entries = match simulation.remove(NODES_KEY) {
            Some(Value::Array(entries)) => entries,
            _ => Vec::new(),
        };

        self.nodes = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| NodeHandle::embedded(ChunkLabel::new(ChunkKind::Node, index), entry))
            .collect();
        self.simulation = Chunk::from_record(
            ChunkLabel::new(ChunkKind::Simulation, 0),
            Value::Object(simulation),
        )
        .pinned(Some(self.compression));
        self.packed = false;

        tracing::debug!(nodes = self.nodes.len(), "split combined chunk");
        Ok(())
    }

    fn pack(&mut self) -> Result<()> {
        if self.packed {
            return Ok(());
        }

        let label = self.simulation.label();
        let Value::Object(mut simulation) = self.simulation.take()? else {
            return Err(corrupt(label, "simulation record is not an object"));
        };
        let entries = self
            .nodes
            .iter_mut()
            .map(NodeHandle::take_entry)
            .collect::<Result<Vec<_>>>()?;
        simulation.insert(NODES_KEY.into(), Value::Array(entries));

        self.simulation = Chunk::from_record(
            ChunkLabel::new(ChunkKind::Combined, 0),
            wrap(SIMULATION_KEY, Value::Object(simulation)),
        )
        .pinned(Some(self.compression));
        self.nodes.clear();
        self.packed = true;
        Ok(())
    }

    /// Puts back the empty `nodes` array the simulator expects.
    fn seal_simulation(&mut self) -> Result<()> {
        if !self.simulation.is_materialized() {
            return Ok(());
        }
        self.simulation_mut()?
            .insert(NODES_KEY.into(), Value::Array(Vec::new()));
        Ok(())
    }
}

fn wrap(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

pub(super) fn corrupt(chunk: ChunkLabel, reason: &str) -> Error {
    Error::CorruptChunk {
        chunk,
        reason: reason.to_string(),
    }
}

pub(super) fn committed_size<P: Payload>(chunk: &Chunk<P>) -> Result<u64> {
    committed_bytes(chunk).map(|b| b.len() as u64)
}

pub(super) fn committed_bytes<P: Payload>(chunk: &Chunk<P>) -> Result<&[u8]> {
    chunk.bytes().ok_or_else(|| corrupt(chunk.label(), "chunk was not committed"))
}
