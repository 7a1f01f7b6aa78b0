//! Generation 6: per-chunk codecs, node table keyed by suid, and individual records
//! split out of the nodes into human-collection chunks.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::Read;

use serde_json::{Map, Value};

use crate::chunk::{Chunk, HumanCollectionChunk, Payload};
use crate::compression::Compression;
use crate::constants::INDIVIDUAL_HUMANS;
use crate::error::{Error, Result};
use crate::format::{ChunkKind, ChunkLabel};
use crate::header::{HeaderV6, HumanEntry, NodeEntry, SimEntry};
use crate::inspector::ChunkInfo;
use crate::node::{NodeHandle, suid_of};
use crate::paged::PagedRecordList;
use crate::reader::ChunkReader;

use super::legacy::{committed_bytes, committed_size, corrupt};

const NODES_KEY: &str = "nodes";

#[derive(Debug)]
pub(crate) struct ChunkedLayout {
    simulation: Chunk,
    nodes: Vec<NodeHandle>,
    /// Collections whose owner suid matches no node. Written after all owned ones.
    orphans: Vec<HumanCollectionChunk>,
    pinned: Option<Compression>,
}

impl ChunkedLayout {
    pub(crate) fn new() -> Self {
        Self {
            simulation: Chunk::from_record(
                ChunkLabel::new(ChunkKind::Simulation, 0),
                Value::Object(Map::new()),
            ),
            nodes: Vec::new(),
            orphans: Vec::new(),
            pinned: None,
        }
    }

    pub(crate) fn read<R: Read>(source: &mut ChunkReader<R>, header: &HeaderV6) -> Result<Self> {
        let label = ChunkLabel::new(ChunkKind::Simulation, 0);
        let simulation = Chunk::from_bytes(
            label,
            source.read_chunk(label, header.simulation.size)?,
            header.simulation.compression,
        );

        let node_chunks = header
            .nodes
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let label = ChunkLabel::owned(ChunkKind::Node, index, entry.suid);
                let bytes = source.read_chunk(label, entry.size)?;
                Ok((entry.suid, Chunk::from_bytes(label, bytes, entry.compression)))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut by_suid = HashMap::with_capacity(node_chunks.len());
        for (position, (suid, _)) in node_chunks.iter().enumerate() {
            match by_suid.entry(*suid) {
                Entry::Vacant(slot) => {
                    slot.insert(position);
                }
                Entry::Occupied(_) => {
                    tracing::warn!(suid, "duplicate node suid, first node keeps its collections");
                }
            }
        }

        let mut owned: Vec<Vec<HumanCollectionChunk>> =
            (0..node_chunks.len()).map(|_| Vec::new()).collect();
        let mut orphans = Vec::new();
        for (index, entry) in header.humans.iter().enumerate() {
            let label = ChunkLabel::owned(ChunkKind::HumanCollection, index, entry.owner);
            let bytes = source.read_chunk(label, entry.size)?;
            let chunk = HumanCollectionChunk::from_bytes(
                index,
                entry.owner,
                entry.records,
                bytes,
                entry.compression,
            );
            match by_suid.get(&entry.owner) {
                Some(&position) => owned[position].push(chunk),
                None => {
                    tracing::warn!(owner = entry.owner, chunk = index, "human collection has no owning node");
                    orphans.push(chunk);
                }
            }
        }

        let nodes = node_chunks
            .into_iter()
            .zip(owned)
            .map(|((suid, chunk), collections)| {
                let humans = PagedRecordList::new(suid, collections)?;
                Ok(NodeHandle::paged(suid, chunk, humans))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            simulation,
            nodes,
            orphans,
            pinned: None,
        })
    }

    pub(crate) fn compression(&self) -> Option<Compression> {
        self.pinned
    }

    pub(crate) fn set_compression(&mut self, codec: Compression) -> Result<()> {
        self.pinned = Some(codec);
        self.simulation.recompress(codec)?;
        for node in &mut self.nodes {
            node.recompress(codec)?;
        }
        self.orphans.iter_mut().try_for_each(|c| c.recompress(codec))
    }

    pub(crate) fn simulation_mut(&mut self) -> Result<&mut Map<String, Value>> {
        let label = self.simulation.label();
        self.simulation
            .record_mut()?
            .as_object_mut()
            .ok_or_else(|| corrupt(label, "simulation record is not an object"))
    }

    pub(crate) fn set_simulation(&mut self, mut simulation: Map<String, Value>) {
        simulation.insert(NODES_KEY.into(), Value::Array(Vec::new()));
        self.simulation.replace(Value::Object(simulation));
    }

    pub(crate) fn nodes(&mut self) -> &mut [NodeHandle] {
        &mut self.nodes
    }

    pub(crate) fn push_node(&mut self, mut node: Map<String, Value>) -> Result<()> {
        let suid = node
            .get("suid")
            .and_then(suid_of)
            .ok_or_else(|| Error::invalid_record("node has no 'suid.id'"))?;
        let records = match node.remove(INDIVIDUAL_HUMANS) {
            None => Vec::new(),
            Some(Value::Array(records)) => records,
            Some(_) => {
                return Err(Error::invalid_record(format!(
                    "'{INDIVIDUAL_HUMANS}' must be an array"
                )));
            }
        };

        let label = ChunkLabel::owned(ChunkKind::Node, self.nodes.len(), suid);
        let chunk = Chunk::from_record(label, Value::Object(node)).pinned(self.pinned);
        let mut humans = PagedRecordList::new(suid, Vec::new())?;
        humans.pin(self.pinned);
        humans.replace_all(records);
        self.nodes.push(NodeHandle::paged(suid, chunk, humans));
        Ok(())
    }

    pub(crate) fn handles(&self) -> &[NodeHandle] {
        &self.nodes
    }

    pub(crate) fn simulation_resident(&self) -> bool {
        self.simulation.is_materialized()
    }

    pub(crate) fn commit_all(&mut self) -> Result<()> {
        if self.simulation.is_materialized() {
            self.simulation_mut()?
                .insert(NODES_KEY.into(), Value::Array(Vec::new()));
        }
        self.simulation.commit()?;
        self.nodes.iter_mut().try_for_each(NodeHandle::store)?;
        self.orphans.iter_mut().try_for_each(HumanCollectionChunk::commit)
    }

    /// Rebuilds the tables from committed chunks. Collections are listed per node in
    /// node order with orphans last, whatever order the file was read in.
    pub(crate) fn sync_header(&self, header: &mut HeaderV6) -> Result<()> {
        header.simulation = SimEntry {
            compression: committed_codec(&self.simulation)?,
            size: committed_size(&self.simulation)?,
        };
        header.nodes = self
            .nodes
            .iter()
            .map(|node| {
                let chunk = node.chunk();
                Ok(NodeEntry {
                    suid: node.suid().unwrap_or_default(),
                    compression: committed_codec(chunk)?,
                    size: committed_size(chunk)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        header.humans = self
            .collections()
            .map(|collection| {
                let chunk = collection.chunk();
                Ok(HumanEntry {
                    owner: collection.owner(),
                    records: collection.declared_count(),
                    compression: committed_codec(chunk)?,
                    size: committed_size(chunk)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
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
        for collection in self.collections() {
            let chunk = collection.chunk();
            f(chunk.label(), committed_bytes(chunk)?)?;
        }
        Ok(())
    }

    pub(crate) fn chunk_count(&self) -> usize {
        1 + self.nodes.len() + self.collections().count()
    }

    pub(crate) fn describe(&self) -> Vec<ChunkInfo> {
        let mut infos = vec![ChunkInfo::of(&self.simulation)];
        for node in &self.nodes {
            let mut info = ChunkInfo::of(node.chunk());
            if let Some(list) = node.records() {
                info.children = list.chunks().iter().map(ChunkInfo::of_collection).collect();
            }
            infos.push(info);
        }
        infos.extend(self.orphans.iter().map(ChunkInfo::of_collection));
        infos
    }

    /// Every collection in write order: per node in node order, then orphans.
    fn collections(&self) -> impl Iterator<Item = &HumanCollectionChunk> {
        self.nodes
            .iter()
            .filter_map(NodeHandle::records)
            .flat_map(PagedRecordList::chunks)
            .chain(self.orphans.iter())
    }
}

fn committed_codec<P: Payload>(chunk: &Chunk<P>) -> Result<Compression> {
    chunk
        .codec()
        .ok_or_else(|| corrupt(chunk.label(), "chunk was not committed"))
}
