//! Paged access to a node's individual records.
//!
//! A generation 6 node may own several human-collection chunks. [`PagedRecordList`]
//! presents them as one indexable sequence while keeping at most one chunk decoded.
//! The decoded chunk covers the half-open index window `[start, end)`. Touching an
//! index outside it commits the current chunk and steps to the neighbour, one chunk
//! at a time, until the window covers the index.

use std::ops::Range;

use serde_json::Value;

use crate::chunk::HumanCollectionChunk;
use crate::compression::Compression;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    start: usize,
    end: usize,
}

/// One indexable sequence over a node's human-collection chunks.
#[derive(Debug)]
pub struct PagedRecordList {
    owner: u64,
    chunks: Vec<HumanCollectionChunk>,
    cursor: usize,
    /// `Some` exactly when `chunks[cursor]` is materialized.
    window: Option<Window>,
    total: usize,
    commits: usize,
    pinned: Option<Compression>,
}

impl PagedRecordList {
    /// Builds the list over `chunks`, in file order. Nothing is decoded.
    ///
    /// Fails when the declared record counts do not fit in a `usize` together.
    pub fn new(owner: u64, chunks: Vec<HumanCollectionChunk>) -> Result<Self> {
        let total = chunks
            .iter()
            .try_fold(0usize, |sum, chunk| {
                usize::try_from(chunk.declared_count())
                    .ok()
                    .and_then(|count| sum.checked_add(count))
            })
            .ok_or_else(|| {
                Error::header(format!(
                    "declared record counts for node suid {owner} overflow"
                ))
            })?;
        Ok(Self {
            owner,
            chunks,
            cursor: 0,
            window: None,
            total,
            commits: 0,
            pinned: None,
        })
    }

    /// Suid of the owning node.
    pub fn owner(&self) -> u64 {
        self.owner
    }

    /// Total record count across all chunks.
    pub fn len(&self) -> usize {
        self.total
    }

    /// True when there are no records.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Number of chunks backing the list.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// The chunks, in write order.
    pub fn chunks(&self) -> &[HumanCollectionChunk] {
        &self.chunks
    }

    /// How many times a chunk has been committed by paging or [`PagedRecordList::commit`].
    pub fn commit_count(&self) -> usize {
        self.commits
    }

    /// Index range covered by the decoded chunk, if any.
    pub fn window(&self) -> Option<Range<usize>> {
        self.window.map(|w| w.start..w.end)
    }

    /// Number of decoded chunks (0 or 1).
    pub fn resident_chunks(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_materialized()).count()
    }

    /// Codec for every chunk from now on. `None` selects by size.
    pub fn pin(&mut self, codec: Option<Compression>) {
        self.pinned = codec;
        for chunk in &mut self.chunks {
            chunk.pin(codec);
        }
    }

    pub(crate) fn recompress(&mut self, codec: Compression) -> Result<()> {
        self.pinned = Some(codec);
        self.chunks.iter_mut().try_for_each(|c| c.recompress(codec))
    }

    /// Record at `index`.
    pub fn get(&mut self, index: usize) -> Result<&Value> {
        let offset = self.seek(index)?;
        let len = self.total;
        self.chunks
            .get(self.cursor)
            .and_then(HumanCollectionChunk::records)
            .and_then(|r| r.get(offset))
            .ok_or(Error::IndexOutOfRange { index, len })
    }

    /// Mutable record at `index`. Edits persist through the next commit.
    pub fn get_mut(&mut self, index: usize) -> Result<&mut Value> {
        let offset = self.seek(index)?;
        let len = self.total;
        self.chunks
            .get_mut(self.cursor)
            .and_then(HumanCollectionChunk::records_mut)
            .and_then(|r| r.get_mut(offset))
            .ok_or(Error::IndexOutOfRange { index, len })
    }

    /// Replaces the record at `index`, returning the old one.
    pub fn set(&mut self, index: usize, record: Value) -> Result<Value> {
        Ok(std::mem::replace(self.get_mut(index)?, record))
    }

    /// Appends to the last chunk, creating one if the list has none.
    pub fn push(&mut self, record: Value) -> Result<()> {
        if self.chunks.is_empty() {
            self.attach(Vec::new());
        }

        let last = self.chunks.len() - 1;
        if self.cursor != last {
            self.commit()?;
            self.cursor = last;
        }
        if self.window.is_none() {
            let len = self.load_current()?;
            self.window = Some(Window {
                start: self.total.saturating_sub(len),
                end: self.total,
            });
        }

        if let Some(chunk) = self.chunks.get_mut(self.cursor) {
            chunk.push(record)?;
        }
        self.total += 1;
        if let Some(window) = &mut self.window {
            window.end += 1;
        }
        Ok(())
    }

    /// Discards every chunk and replaces them with one chunk holding `records`.
    pub fn replace_all(&mut self, records: Vec<Value>) {
        self.chunks.clear();
        self.total = 0;
        self.window = None;
        self.cursor = 0;
        if !records.is_empty() {
            self.attach(records);
        }
    }

    /// Commits the decoded chunk, if any. Nothing stays resident afterwards.
    pub fn commit(&mut self) -> Result<()> {
        if let Some(chunk) = self.chunks.get_mut(self.cursor) {
            if chunk.is_materialized() {
                chunk.commit()?;
                self.commits += 1;
            }
        }
        self.window = None;
        Ok(())
    }

    /// Iterates over clones of every record, front to back.
    pub fn iter(&mut self) -> Records<'_> {
        Records {
            list: self,
            next: 0,
        }
    }

    /// Visits every record in place, front to back.
    pub fn try_for_each_mut<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(usize, &mut Value) -> Result<()>,
    {
        for index in 0..self.total {
            f(index, self.get_mut(index)?)?;
        }
        Ok(())
    }

    /// Collects every record, leaving nothing resident.
    pub fn to_vec(&mut self) -> Result<Vec<Value>> {
        let records = self.iter().collect::<Result<Vec<_>>>()?;
        self.commit()?;
        Ok(records)
    }

    fn attach(&mut self, records: Vec<Value>) {
        let len = records.len();
        let mut chunk = HumanCollectionChunk::from_records(self.chunks.len(), self.owner, records);
        chunk.pin(self.pinned);
        self.chunks.push(chunk);
        self.cursor = self.chunks.len() - 1;
        self.window = Some(Window {
            start: self.total,
            end: self.total + len,
        });
        self.total += len;
    }

    /// Moves the window over `index` and returns its offset within the decoded chunk.
    fn seek(&mut self, index: usize) -> Result<usize> {
        let out_of_range = Error::IndexOutOfRange {
            index,
            len: self.total,
        };
        if index >= self.total {
            return Err(out_of_range);
        }

        let mut window = match self.window {
            Some(window) => window,
            None => {
                let start = self.start_of(self.cursor);
                let len = self.load_current()?;
                Window {
                    start,
                    end: start.checked_add(len).ok_or(out_of_range.clone())?,
                }
            }
        };

        while index < window.start {
            if self.cursor == 0 {
                return Err(out_of_range);
            }
            self.commit()?;
            self.cursor -= 1;
            let len = self.load_current()?;
            window = Window {
                start: window.start.checked_sub(len).ok_or(out_of_range.clone())?,
                end: window.start,
            };
        }

        while index >= window.end {
            if self.cursor + 1 >= self.chunks.len() {
                return Err(out_of_range);
            }
            self.commit()?;
            self.cursor += 1;
            let len = self.load_current()?;
            window = Window {
                start: window.end,
                end: window.end.checked_add(len).ok_or(out_of_range.clone())?,
            };
        }

        self.window = Some(window);
        Ok(index - window.start)
    }

    fn load_current(&mut self) -> Result<usize> {
        match self.chunks.get_mut(self.cursor) {
            Some(chunk) => {
                chunk.materialize()?;
                Ok(usize::try_from(chunk.declared_count()).unwrap_or(usize::MAX))
            }
            None => Ok(0),
        }
    }

    fn start_of(&self, cursor: usize) -> usize {
        self.chunks[..cursor.min(self.chunks.len())]
            .iter()
            .fold(0usize, |sum, c| {
                sum.saturating_add(usize::try_from(c.declared_count()).unwrap_or(usize::MAX))
            })
    }
}

/// Iterator returned by [`PagedRecordList::iter`].
#[derive(Debug)]
pub struct Records<'a> {
    list: &'a mut PagedRecordList,
    next: usize,
}

impl Iterator for Records<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.list.len() {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.list.get(index).cloned())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.list.len().saturating_sub(self.next);
        (left, Some(left))
    }
}
