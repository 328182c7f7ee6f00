//! Temp data buffers for GC migration.
//!
//! A migrated slice is read into a temp entry and written back out of the
//! same entry; the entry records the slot of the request currently bound
//! to it, which is the blocking linkage the scheduler uses to keep the
//! write behind its read. Retired entries are recycled oldest-first.

use core::num::NonZeroUsize;

use lru::LruCache;

use crate::nand::req::{SliceBuf, SlotTag};
use crate::prelude::*;

/// Index of a temp buffer entry.
pub type TempBufId = u16;

struct TempBufEntry {
    buf: SliceBuf,
    blocking_req: Option<SlotTag>,
}

pub struct TempBufPool {
    entries: Vec<TempBufEntry>,
    /// Entries available for reuse, least-recently-retired first.
    reuse: LruCache<TempBufId, ()>,
}

impl TempBufPool {
    pub fn new(entries: usize, bytes_per_slice: usize) -> Result<Self> {
        let cap = NonZeroUsize::new(entries)
            .ok_or(Error::with_msg(InvalidArgs, "temp buffer pool must be non-empty"))?;
        let mut reuse = LruCache::new(cap);
        for id in 0..entries {
            reuse.put(id as TempBufId, ());
        }
        Ok(Self {
            entries: (0..entries)
                .map(|_| TempBufEntry {
                    buf: SliceBuf::new(bytes_per_slice),
                    blocking_req: None,
                })
                .collect(),
            reuse,
        })
    }

    /// Claim the least-recently-retired free entry.
    pub fn alloc(&mut self) -> Result<TempBufId> {
        match self.reuse.pop_lru() {
            Some((id, ())) => Ok(id),
            None => Err(Error::with_msg(NoFreeSlot, "all temp buffers in flight")),
        }
    }

    pub fn buf(&self, id: TempBufId) -> SliceBuf {
        self.entries[id as usize].buf.clone()
    }

    /// Bind the entry to a request slot. Rebinding supersedes the previous
    /// link: the write of a read/write pair replaces the read as the
    /// in-flight owner.
    pub fn set_blocking_req(&mut self, id: TempBufId, tag: SlotTag) {
        self.entries[id as usize].blocking_req = Some(tag);
    }

    pub fn blocking_req(&self, id: TempBufId) -> Option<SlotTag> {
        self.entries[id as usize].blocking_req
    }

    /// Retire the entry once its paired write has completed.
    pub fn complete(&mut self, id: TempBufId) {
        self.entries[id as usize].blocking_req = None;
        self.reuse.put(id, ());
    }

    pub fn available(&self) -> usize {
        self.reuse.len()
    }
}
