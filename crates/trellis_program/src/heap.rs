//! The relocatable program heap.
//!
//! Instructions live in a flat word buffer. Every allocation is reached
//! through a [`Handle`], an index into an allocation table of
//! `(offset, size, state)` entries. [`Heap::compact`] slides live words left
//! over freed ones and rewrites the table, so handles stay valid across a
//! compaction while raw offsets do not.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;
use trellis_foundation::{Error, Invariant, Result};

/// A stable logical id for a heap allocation.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Handle(pub u32);

impl Handle {
    /// Returns the raw table index.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

/// Lifecycle of an allocation table entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EntryState {
    /// Live words owned by this entry.
    Allocated,
    /// Released; reclaimed at the next compaction.
    Freed,
    /// Reclaimed. The handle is dead.
    Purged,
    /// An indirect reference to a raw address inside some allocation.
    Pointer,
}

#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct HeapEntry {
    offset: u32,
    size: u32,
    state: EntryState,
}

/// A growable word buffer with a handle-indirected allocation table.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Heap {
    words: Vec<u32>,
    table: Vec<HeapEntry>,
    /// Non-pointer handles in offset order.
    order: Vec<Handle>,
    open: Option<Handle>,
}

impl Heap {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of words in the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Returns true if the buffer holds no words.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Appends a word to the open allocation.
    ///
    /// # Errors
    /// Returns [`Invariant::OpenAllocation`] if no allocation is open.
    pub fn push(&mut self, word: u32) -> Result<()> {
        if self.open.is_none() {
            return Err(Error::invariant(Invariant::OpenAllocation));
        }
        self.words.push(word);
        Ok(())
    }

    /// Reserves a handle whose size is recorded later by [`Heap::finish_malloc`].
    ///
    /// # Errors
    /// Returns [`Invariant::OpenAllocation`] if another allocation is open.
    pub fn malloc(&mut self) -> Result<Handle> {
        if self.open.is_some() {
            return Err(Error::invariant(Invariant::OpenAllocation));
        }
        let handle = self.next_handle()?;
        self.table.push(HeapEntry {
            offset: self.word_count()?,
            size: 0,
            state: EntryState::Allocated,
        });
        self.order.push(handle);
        self.open = Some(handle);
        Ok(handle)
    }

    /// Closes the open allocation and records its size.
    ///
    /// # Errors
    /// Returns [`Invariant::OpenAllocation`] if `handle` is not the open allocation.
    pub fn finish_malloc(&mut self, handle: Handle) -> Result<()> {
        if self.open != Some(handle) {
            return Err(Error::invariant(Invariant::OpenAllocation));
        }
        let end = self.word_count()?;
        let entry = &mut self.table[handle.index()];
        entry.size = end - entry.offset;
        self.open = None;
        Ok(())
    }

    /// Creates a pointer entry referring to a raw address.
    ///
    /// Compaction forwards the address together with the allocation that
    /// contains it.
    ///
    /// # Errors
    /// Returns [`Invariant::InvalidAddress`] if `addr` is past the end of the buffer.
    pub fn alloc_pointer(&mut self, addr: usize) -> Result<Handle> {
        if addr > self.words.len() {
            return Err(Error::invariant(Invariant::InvalidAddress(addr)));
        }
        let handle = self.next_handle()?;
        self.table.push(HeapEntry {
            offset: u32::try_from(addr)
                .map_err(|_| Error::invariant(Invariant::InvalidAddress(addr)))?,
            size: 0,
            state: EntryState::Pointer,
        });
        Ok(handle)
    }

    /// Resolves a handle to its current physical offset.
    ///
    /// # Errors
    /// Returns [`Invariant::InvalidHandle`] for unknown, freed, or purged handles.
    pub fn getaddr(&self, handle: Handle) -> Result<usize> {
        self.live_entry(handle).map(|entry| entry.offset as usize)
    }

    /// Resolves a handle to its current size in words.
    ///
    /// # Errors
    /// Returns [`Invariant::InvalidHandle`] for unknown, freed, or purged handles.
    pub fn sizeof(&self, handle: Handle) -> Result<usize> {
        self.live_entry(handle).map(|entry| entry.size as usize)
    }

    /// Returns the state of a table entry, if the handle exists.
    #[must_use]
    pub fn state(&self, handle: Handle) -> Option<EntryState> {
        self.table.get(handle.index()).map(|entry| entry.state)
    }

    /// Returns the words of an allocation.
    ///
    /// # Errors
    /// Returns [`Invariant::InvalidHandle`] for unknown, freed, or purged handles.
    pub fn words(&self, handle: Handle) -> Result<&[u32]> {
        let entry = self.live_entry(handle)?;
        let start = entry.offset as usize;
        Ok(&self.words[start..start + entry.size as usize])
    }

    /// Reads the word at a raw address.
    ///
    /// # Errors
    /// Returns [`Invariant::InvalidAddress`] if `addr` is out of range.
    pub fn get(&self, addr: usize) -> Result<u32> {
        self.words
            .get(addr)
            .copied()
            .ok_or_else(|| Error::invariant(Invariant::InvalidAddress(addr)))
    }

    /// Marks an allocation reclaimable without moving memory.
    ///
    /// # Errors
    /// Returns [`Invariant::InvalidHandle`] unless the entry is allocated
    /// and closed.
    pub fn free(&mut self, handle: Handle) -> Result<()> {
        if self.open == Some(handle) {
            return Err(Error::invariant(Invariant::OpenAllocation));
        }
        match self.table.get_mut(handle.index()) {
            Some(entry) if entry.state == EntryState::Allocated => {
                entry.state = EntryState::Freed;
                Ok(())
            }
            _ => Err(Error::invariant(Invariant::InvalidHandle(handle.raw()))),
        }
    }

    /// Maps a raw address back to the allocation containing it.
    ///
    /// Returns the handle and the address relative to the allocation start.
    #[must_use]
    pub fn handle_at(&self, addr: usize) -> Option<(Handle, usize)> {
        let position = self
            .order
            .partition_point(|handle| self.table[handle.index()].offset as usize <= addr);
        let candidates = self.order[..position].iter().rev();
        for &handle in candidates {
            let entry = self.table[handle.index()];
            // Empty neighbours may share the offset of the real owner.
            if entry.size == 0 {
                continue;
            }
            let start = entry.offset as usize;
            if entry.state == EntryState::Allocated && addr < start + entry.size as usize {
                return Some((handle, addr - start));
            }
            return None;
        }
        None
    }

    /// Reclaims every freed allocation.
    ///
    /// Live words slide left in one sweep; allocation offsets and pointer
    /// addresses are rewritten by the amount freed below them. Handles stay
    /// valid; raw offsets taken before the call do not.
    ///
    /// # Errors
    /// Returns [`Invariant::OpenAllocation`] if an allocation is still open.
    pub fn compact(&mut self) -> Result<()> {
        if self.open.is_some() {
            return Err(Error::invariant(Invariant::OpenAllocation));
        }

        let mut words = Vec::with_capacity(self.words.len());
        let mut freed: Vec<(u32, u32)> = Vec::new();
        let mut removed = 0u32;

        for &handle in &self.order {
            let entry = &mut self.table[handle.index()];
            let start = entry.offset as usize;
            let end = start + entry.size as usize;
            match entry.state {
                EntryState::Allocated => {
                    words.extend_from_slice(&self.words[start..end]);
                    entry.offset -= removed;
                }
                EntryState::Freed => {
                    freed.push((entry.offset, entry.offset + entry.size));
                    entry.offset -= removed;
                    removed += entry.size;
                    entry.size = 0;
                    entry.state = EntryState::Purged;
                }
                EntryState::Purged => entry.offset -= removed,
                EntryState::Pointer => {}
            }
        }

        for entry in &mut self.table {
            if entry.state != EntryState::Pointer {
                continue;
            }
            let addr = entry.offset;
            if freed.iter().any(|&(start, end)| start <= addr && addr < end) {
                entry.state = EntryState::Purged;
                continue;
            }
            let below: u32 = freed
                .iter()
                .filter(|&&(_, end)| end <= addr)
                .map(|&(start, end)| end - start)
                .sum();
            entry.offset = addr - below;
        }

        debug!(
            reclaimed = removed,
            remaining = words.len(),
            "heap compacted"
        );
        self.words = words;
        Ok(())
    }

    fn live_entry(&self, handle: Handle) -> Result<HeapEntry> {
        match self.table.get(handle.index()) {
            Some(entry) if matches!(entry.state, EntryState::Allocated | EntryState::Pointer) => {
                Ok(*entry)
            }
            _ => Err(Error::invariant(Invariant::InvalidHandle(handle.raw()))),
        }
    }

    fn next_handle(&self) -> Result<Handle> {
        u32::try_from(self.table.len())
            .map(Handle)
            .map_err(|_| Error::invariant(Invariant::InvalidHandle(u32::MAX)))
    }

    fn word_count(&self) -> Result<u32> {
        u32::try_from(self.words.len())
            .map_err(|_| Error::invariant(Invariant::InvalidAddress(self.words.len())))
    }
}
