//! Node records and the lending cursor over them.
//!
//! A [`NodeHandle`] behaves like a JSON object keyed by field name. The
//! `individualHumans` key is special: in generations 1-5 it is an ordinary array
//! inside the node record, in generation 6 it is backed by the node's
//! [`PagedRecordList`]. [`NodeHandle::individual_humans`] hides the difference.

use serde_json::{Map, Value};

use crate::chunk::Chunk;
use crate::compression::Compression;
use crate::constants::INDIVIDUAL_HUMANS;
use crate::error::{Error, Result};
use crate::format::ChunkLabel;
use crate::paged::PagedRecordList;

/// How a node record sits inside its chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Envelope {
    /// The chunk is the node object itself.
    Bare,
    /// The chunk is `{"suid": ..., "node": {...}}`.
    Keyed,
}

/// One node of the population.
#[derive(Debug)]
pub struct NodeHandle {
    suid: Option<u64>,
    chunk: Chunk,
    envelope: Envelope,
    humans: Option<PagedRecordList>,
    embedded: bool,
}

impl NodeHandle {
    /// A generation 2-5 node backed by its own chunk.
    pub(crate) fn legacy(chunk: Chunk, envelope: Envelope) -> Self {
        Self {
            suid: None,
            chunk,
            envelope,
            humans: None,
            embedded: false,
        }
    }

    /// A generation 1 node, split out of the combined chunk. It stays decoded.
    pub(crate) fn embedded(label: ChunkLabel, entry: Value) -> Self {
        Self {
            suid: suid_of(&entry["suid"]),
            chunk: Chunk::from_record(label, entry),
            envelope: Envelope::Keyed,
            humans: None,
            embedded: true,
        }
    }

    /// A generation 6 node with its record list.
    pub(crate) fn paged(suid: u64, chunk: Chunk, humans: PagedRecordList) -> Self {
        Self {
            suid: Some(suid),
            chunk,
            envelope: Envelope::Bare,
            humans: Some(humans),
            embedded: false,
        }
    }

    /// External node id, when known without decoding.
    pub fn suid(&self) -> Option<u64> {
        self.suid
    }

    /// Whether the node record is decoded.
    pub fn is_loaded(&self) -> bool {
        self.chunk.is_materialized()
    }

    /// Decodes the node record. Individual records stay paged.
    pub fn load(&mut self) -> Result<()> {
        self.chunk.materialize()
    }

    /// Commits the node record and any decoded record page.
    pub fn store(&mut self) -> Result<()> {
        if let Some(list) = &mut self.humans {
            list.commit()?;
        }
        if self.embedded {
            return Ok(());
        }
        self.chunk.commit()
    }

    /// Looks up `key`. `individualHumans` resolves to [`Field::Records`].
    pub fn get(&mut self, key: &str) -> Result<Option<Field<'_>>> {
        if key == INDIVIDUAL_HUMANS {
            let Self {
                chunk,
                envelope,
                humans,
                ..
            } = self;
            if let Some(list) = humans {
                return Ok(Some(Field::Records(HumanRecords::Paged(list))));
            }
            return Ok(match body_of(chunk, *envelope)?.get_mut(key) {
                Some(Value::Array(items)) => Some(Field::Records(HumanRecords::Inline(items))),
                Some(other) => Some(Field::Value(other)),
                None => None,
            });
        }
        Ok(self.body_mut()?.get_mut(key).map(Field::Value))
    }

    /// Sets `key`, returning the previous value.
    ///
    /// Setting `individualHumans` needs an array and replaces every record the node
    /// owns. No previous value is returned for it.
    pub fn set(&mut self, key: &str, value: Value) -> Result<Option<Value>> {
        if key == INDIVIDUAL_HUMANS {
            let Value::Array(records) = value else {
                return Err(Error::invalid_record(format!(
                    "'{INDIVIDUAL_HUMANS}' must be an array"
                )));
            };
            self.set_individual_humans(records)?;
            return Ok(None);
        }
        Ok(self.body_mut()?.insert(key.to_string(), value))
    }

    /// Removes `key`. `individualHumans` cannot be removed from a generation 6 node.
    pub fn remove(&mut self, key: &str) -> Result<Option<Value>> {
        if key == INDIVIDUAL_HUMANS && self.humans.is_some() {
            return Err(Error::ProtectedKey {
                key: key.to_string(),
            });
        }
        Ok(self.body_mut()?.remove(key))
    }

    /// Field names of the node record.
    pub fn keys(&mut self) -> Result<Vec<String>> {
        let paged = self.humans.is_some();
        let mut keys: Vec<String> = self.body_mut()?.keys().cloned().collect();
        if paged && !keys.iter().any(|k| k == INDIVIDUAL_HUMANS) {
            keys.push(INDIVIDUAL_HUMANS.to_string());
        }
        Ok(keys)
    }

    /// The node's individual records.
    ///
    /// A generation 1-5 node without the key gets an empty view. The key is only
    /// added to the node record once a record is pushed.
    pub fn individual_humans(&mut self) -> Result<HumanRecords<'_>> {
        let Self {
            chunk,
            envelope,
            humans,
            ..
        } = self;
        if let Some(list) = humans {
            return Ok(HumanRecords::Paged(list));
        }

        let label = chunk.label();
        let body = body_of(chunk, *envelope)?;
        if !body.contains_key(INDIVIDUAL_HUMANS) {
            return Ok(HumanRecords::Absent(body));
        }
        match body.get_mut(INDIVIDUAL_HUMANS) {
            Some(Value::Array(items)) => Ok(HumanRecords::Inline(items)),
            _ => Err(Error::CorruptChunk {
                chunk: label,
                reason: format!("'{INDIVIDUAL_HUMANS}' is not an array"),
            }),
        }
    }

    /// Replaces every individual record the node owns.
    pub fn set_individual_humans(&mut self, records: Vec<Value>) -> Result<()> {
        if let Some(list) = &mut self.humans {
            list.replace_all(records);
            return Ok(());
        }
        self.body_mut()?
            .insert(INDIVIDUAL_HUMANS.to_string(), Value::Array(records));
        Ok(())
    }

    /// Number of decoded chunks this node holds: its own record plus any page.
    pub fn resident_chunks(&self) -> (usize, usize) {
        let own = usize::from(self.chunk.is_materialized() && !self.embedded);
        let pages = self.humans.as_ref().map_or(0, PagedRecordList::resident_chunks);
        (own, pages)
    }

    pub(crate) fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub(crate) fn records(&self) -> Option<&PagedRecordList> {
        self.humans.as_ref()
    }

    pub(crate) fn pin(&mut self, codec: Option<Compression>) {
        self.chunk.pin(codec);
        if let Some(list) = &mut self.humans {
            list.pin(codec);
        }
    }

    pub(crate) fn recompress(&mut self, codec: Compression) -> Result<()> {
        self.chunk.recompress(codec)?;
        if let Some(list) = &mut self.humans {
            list.recompress(codec)?;
        }
        Ok(())
    }

    /// Takes the decoded entry out of a generation 1 node.
    pub(crate) fn take_entry(&mut self) -> Result<Value> {
        self.chunk.take()
    }

    fn body_mut(&mut self) -> Result<&mut Map<String, Value>> {
        body_of(&mut self.chunk, self.envelope)
    }
}

fn body_of(chunk: &mut Chunk, envelope: Envelope) -> Result<&mut Map<String, Value>> {
    let label = chunk.label();
    let root = chunk.record_mut()?;
    let body = match envelope {
        Envelope::Bare => Some(root),
        Envelope::Keyed => root.get_mut("node"),
    };
    body.and_then(Value::as_object_mut)
        .ok_or_else(|| Error::CorruptChunk {
            chunk: label,
            reason: "node record is not an object".into(),
        })
}

/// Reads the numeric id out of a `suid` object (`{"id": n}`).
pub(crate) fn suid_of(suid: &Value) -> Option<u64> {
    suid.get("id").and_then(Value::as_u64)
}

/// A node's individual records, inline or paged.
#[derive(Debug)]
pub enum HumanRecords<'a> {
    /// Generations 1-5: an array inside the node record.
    Inline(&'a mut Vec<Value>),
    /// Generation 6: separate collection chunks.
    Paged(&'a mut PagedRecordList),
    /// Generations 1-5 node record that had no records key when the view was taken.
    /// The key is added by the first `push`.
    Absent(&'a mut Map<String, Value>),
}

fn absent_items(body: &Map<String, Value>) -> &[Value] {
    body.get(INDIVIDUAL_HUMANS)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn absent_items_mut(body: &mut Map<String, Value>) -> Option<&mut Vec<Value>> {
    body.get_mut(INDIVIDUAL_HUMANS).and_then(Value::as_array_mut)
}

impl HumanRecords<'_> {
    /// Total record count.
    pub fn len(&self) -> usize {
        match self {
            Self::Inline(items) => items.len(),
            Self::Paged(list) => list.len(),
            Self::Absent(body) => absent_items(body).len(),
        }
    }

    /// True when there are no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record at `index`.
    pub fn get(&mut self, index: usize) -> Result<&Value> {
        match self {
            Self::Inline(items) => {
                let len = items.len();
                items.get(index).ok_or(Error::IndexOutOfRange { index, len })
            }
            Self::Paged(list) => list.get(index),
            Self::Absent(body) => {
                let items = absent_items(body);
                items.get(index).ok_or(Error::IndexOutOfRange {
                    index,
                    len: items.len(),
                })
            }
        }
    }

    /// Mutable record at `index`.
    pub fn get_mut(&mut self, index: usize) -> Result<&mut Value> {
        match self {
            Self::Inline(items) => {
                let len = items.len();
                items
                    .get_mut(index)
                    .ok_or(Error::IndexOutOfRange { index, len })
            }
            Self::Paged(list) => list.get_mut(index),
            Self::Absent(body) => {
                let len = absent_items(body).len();
                absent_items_mut(body)
                    .and_then(|items| items.get_mut(index))
                    .ok_or(Error::IndexOutOfRange { index, len })
            }
        }
    }

    /// Replaces the record at `index`, returning the old one.
    pub fn set(&mut self, index: usize, record: Value) -> Result<Value> {
        Ok(std::mem::replace(self.get_mut(index)?, record))
    }

    /// Appends a record.
    pub fn push(&mut self, record: Value) -> Result<()> {
        match self {
            Self::Inline(items) => {
                items.push(record);
                Ok(())
            }
            Self::Paged(list) => list.push(record),
            Self::Absent(body) => match body
                .entry(INDIVIDUAL_HUMANS)
                .or_insert_with(|| Value::Array(Vec::new()))
            {
                Value::Array(items) => {
                    items.push(record);
                    Ok(())
                }
                _ => Err(Error::invalid_record(format!(
                    "'{INDIVIDUAL_HUMANS}' is not an array"
                ))),
            },
        }
    }

    /// Visits every record in place, front to back.
    pub fn try_for_each_mut<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(usize, &mut Value) -> Result<()>,
    {
        match self {
            Self::Inline(items) => items
                .iter_mut()
                .enumerate()
                .try_for_each(|(i, record)| f(i, record)),
            Self::Paged(list) => list.try_for_each_mut(f),
            Self::Absent(body) => absent_items_mut(body).map_or(Ok(()), |items| {
                items
                    .iter_mut()
                    .enumerate()
                    .try_for_each(|(i, record)| f(i, record))
            }),
        }
    }

    /// Clones every record into a vector.
    pub fn to_vec(&mut self) -> Result<Vec<Value>> {
        match self {
            Self::Inline(items) => Ok(items.clone()),
            Self::Paged(list) => list.to_vec(),
            Self::Absent(body) => Ok(absent_items(body).to_vec()),
        }
    }
}

/// Result of [`NodeHandle::get`].
#[derive(Debug)]
pub enum Field<'a> {
    /// An ordinary field of the node record.
    Value(&'a mut Value),
    /// The node's individual records.
    Records(HumanRecords<'a>),
}

impl<'a> Field<'a> {
    /// The plain value, if this is not the record list.
    pub fn into_value(self) -> Option<&'a mut Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Records(_) => None,
        }
    }

    /// The record list, if this is `individualHumans`.
    pub fn into_records(self) -> Option<HumanRecords<'a>> {
        match self {
            Self::Records(records) => Some(records),
            Self::Value(_) => None,
        }
    }
}

/// Count of decoded chunks, see [`NodeList::resident_chunks`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResidentChunks {
    /// Decoded simulation chunks (0 or 1).
    pub simulation: usize,
    /// Decoded node chunks.
    pub nodes: usize,
    /// Decoded human-collection chunks.
    pub human_collections: usize,
}

impl ResidentChunks {
    pub(crate) fn of(nodes: &[NodeHandle]) -> Self {
        nodes.iter().fold(Self::default(), |mut acc, node| {
            let (own, pages) = node.resident_chunks();
            acc.nodes += own;
            acc.human_collections += pages;
            acc
        })
    }

    /// Sum of all categories.
    pub fn total(&self) -> usize {
        self.simulation + self.nodes + self.human_collections
    }
}

/// Cursor over a container's nodes.
///
/// [`NodeList::next_node`] stores the node it handed out last before loading the
/// next one, so a front-to-back walk holds one node (and at most one of its record
/// pages) decoded at a time.
#[derive(Debug)]
pub struct NodeList<'a> {
    nodes: &'a mut [NodeHandle],
    current: Option<usize>,
}

impl<'a> NodeList<'a> {
    pub(crate) fn new(nodes: &'a mut [NodeHandle]) -> Self {
        Self {
            nodes,
            current: None,
        }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the container has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Loads and returns node `index` without storing anything else.
    pub fn get(&mut self, index: usize) -> Result<&mut NodeHandle> {
        let len = self.nodes.len();
        let node = self
            .nodes
            .get_mut(index)
            .ok_or(Error::IndexOutOfRange { index, len })?;
        node.load()?;
        Ok(node)
    }

    /// Stores the previously returned node and loads the next one.
    ///
    /// Returns `None` after the last node, which is stored as well.
    pub fn next_node(&mut self) -> Result<Option<&mut NodeHandle>> {
        let next = match self.current {
            Some(index) => {
                if let Some(node) = self.nodes.get_mut(index) {
                    node.store()?;
                }
                index + 1
            }
            None => 0,
        };

        if next >= self.nodes.len() {
            self.current = Some(self.nodes.len());
            return Ok(None);
        }

        self.current = Some(next);
        let node = &mut self.nodes[next];
        node.load()?;
        Ok(Some(node))
    }

    /// Stores the current node and moves the cursor back before the first node.
    pub fn rewind(&mut self) -> Result<()> {
        if let Some(index) = self.current {
            if let Some(node) = self.nodes.get_mut(index) {
                node.store()?;
            }
        }
        self.current = None;
        Ok(())
    }

    /// Runs `f` on every node in order, storing each one before moving on.
    pub fn try_for_each<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(usize, &mut NodeHandle) -> Result<()>,
    {
        self.rewind()?;
        let mut index = 0;
        while let Some(node) = self.next_node()? {
            f(index, node)?;
            index += 1;
        }
        Ok(())
    }

    /// Decoded chunks across all nodes.
    pub fn resident_chunks(&self) -> ResidentChunks {
        ResidentChunks::of(self.nodes)
    }
}
