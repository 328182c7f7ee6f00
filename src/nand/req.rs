//! NAND request descriptors and the request slot pool.
//!
//! A request is a tagged command plus a small, finite option record; the
//! pool is a fixed slot array fronted by a bounded free-slot queue. Slot
//! exhaustion is the transient `NoFreeSlot` condition: the caller drains
//! completions and retries instead of blocking.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use spin::Mutex;

use crate::address::{Lsa, Vsa};
use crate::nand::temp_buf::TempBufId;
use crate::prelude::*;

/// Index of a request slot in the pool.
pub type SlotTag = u16;

/// Shared byte buffer bound to a request. Clones share the storage, which
/// is how a temp-buffer entry and the request descriptor see the same data.
#[derive(Clone)]
pub struct SliceBuf(Arc<Mutex<Vec<u8>>>);

impl SliceBuf {
    pub fn new(len: usize) -> Self {
        Self(Arc::new(Mutex::new(vec![0u8; len])))
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self(Arc::new(Mutex::new(data.to_vec())))
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the buffer contents into `dst`.
    pub fn copy_to(&self, dst: &mut [u8]) {
        dst.copy_from_slice(&self.0.lock());
    }

    /// Overwrite the buffer contents from `src`.
    pub fn copy_from(&self, src: &[u8]) {
        self.0.lock().copy_from_slice(src);
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.lock().clone()
    }
}

impl Debug for SliceBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceBuf").field("len", &self.len()).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EccMode {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyCheck {
    Check,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSpace {
    Main,
    Spare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    Vsa,
    Physical,
}

/// Per-request configuration handed to the low-level scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReqOptions {
    pub ecc: EccMode,
    /// Report correctable-error warnings back to the issuer.
    pub ecc_warning: bool,
    pub row_addr_dependency: DependencyCheck,
    pub block_space: BlockSpace,
    pub addr_mode: AddrMode,
}

impl ReqOptions {
    /// Options for host-facing transfers.
    pub fn host() -> Self {
        Self {
            ecc: EccMode::On,
            ecc_warning: true,
            row_addr_dependency: DependencyCheck::Check,
            block_space: BlockSpace::Main,
            addr_mode: AddrMode::Vsa,
        }
    }

    /// Options for GC migration traffic: warnings are pointless there,
    /// the data moves regardless.
    pub fn gc() -> Self {
        Self {
            ecc_warning: false,
            ..Self::host()
        }
    }

    /// Options for erases.
    pub fn erase() -> Self {
        Self {
            ecc: EccMode::Off,
            ecc_warning: false,
            row_addr_dependency: DependencyCheck::Check,
            block_space: BlockSpace::Main,
            addr_mode: AddrMode::Physical,
        }
    }
}

/// The command carried by a request slot.
#[derive(Debug, Clone)]
pub enum ReqKind {
    Read { lsa: Lsa, vsa: Vsa },
    Write { lsa: Lsa, vsa: Vsa },
    Erase { die: u16, block: u16 },
}

/// A fully-populated request, ready for the low-level scheduler.
#[derive(Debug, Clone)]
pub struct NandReq {
    pub kind: ReqKind,
    pub opts: ReqOptions,
    pub buf: Option<SliceBuf>,
    /// Temp-buffer entry backing `buf`, if any.
    pub temp_entry: Option<TempBufId>,
    /// Slot of the read this request must not overtake.
    pub blocking_slot: Option<SlotTag>,
}

/// Fixed-size pool of request slots.
pub struct ReqPool {
    slots: Vec<Option<NandReq>>,
    free_q: ArrayQueue<SlotTag>,
}

impl ReqPool {
    pub fn new(capacity: usize) -> Self {
        let free_q = ArrayQueue::new(capacity);
        for tag in 0..capacity {
            let _ = free_q.push(tag as SlotTag);
        }
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            free_q,
        }
    }

    /// Claim a free slot.
    pub fn acquire(&mut self) -> Result<SlotTag> {
        match self.free_q.pop() {
            Some(tag) => Ok(tag),
            None => Err(Error::with_msg(NoFreeSlot, "request pool exhausted")),
        }
    }

    /// Populate a claimed slot.
    pub fn set(&mut self, tag: SlotTag, req: NandReq) {
        debug_assert!(self.slots[tag as usize].is_none());
        self.slots[tag as usize] = Some(req);
    }

    pub fn slot(&self, tag: SlotTag) -> Option<&NandReq> {
        self.slots[tag as usize].as_ref()
    }

    /// Return a slot to the free queue after its completion drained.
    pub fn release(&mut self, tag: SlotTag) {
        self.slots[tag as usize] = None;
        let _ = self.free_q.push(tag);
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn free_slots(&self) -> usize {
        self.free_q.len()
    }

    pub fn all_free(&self) -> bool {
        self.free_slots() == self.capacity()
    }
}
