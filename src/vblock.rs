//! Virtual block map, per-die free lists and victim buckets.
//!
//! Every (die, block) pair has one record here. The records double as
//! intrusive list nodes: `prev`/`next` are block indices within the die,
//! and a block is linked in at most one list at a time, either its die's
//! free FIFO or exactly one victim bucket. Victim buckets are indexed by
//! invalid-slice count, which is what makes greedy victim selection a
//! near-constant-time scan.

use crate::address::{Vorg, BLOCK_NONE};
use crate::config::Geometry;
use crate::prelude::*;

/// Who is asking for a free block. Normal writes must leave the reserve
/// untouched; GC may drain the pool to empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocMode {
    ForUse,
    ForGc,
}

#[derive(Debug, Clone)]
pub struct VirtualBlock {
    free: bool,
    bad: bool,
    erase_cnt: u32,
    current_page: u16,
    invalid_slices: u16,
    prev: u16,
    next: u16,
}

impl VirtualBlock {
    fn new_free() -> Self {
        Self {
            free: true,
            bad: false,
            erase_cnt: 0,
            current_page: 0,
            invalid_slices: 0,
            prev: BLOCK_NONE,
            next: BLOCK_NONE,
        }
    }

    pub fn is_free(&self) -> bool {
        self.free
    }

    pub fn is_bad(&self) -> bool {
        self.bad
    }

    pub fn erase_count(&self) -> u32 {
        self.erase_cnt
    }

    pub fn current_page(&self) -> u16 {
        self.current_page
    }

    pub fn invalid_slices(&self) -> u16 {
        self.invalid_slices
    }
}

#[derive(Debug, Clone, Copy)]
struct BlockQueue {
    head: u16,
    tail: u16,
}

impl BlockQueue {
    const EMPTY: Self = Self {
        head: BLOCK_NONE,
        tail: BLOCK_NONE,
    };
}

struct DieState {
    free: BlockQueue,
    free_count: usize,
    /// Block currently absorbing writes, not in any list.
    current_block: u16,
}

pub struct VBlockMap {
    dies: usize,
    blocks_per_die: usize,
    slices_per_block: usize,
    reserved_free_blocks: usize,
    blocks: Vec<VirtualBlock>,
    die_states: Vec<DieState>,
    /// victim[die][k] chains blocks with k invalid slices, FIFO.
    victim: Vec<Vec<BlockQueue>>,
}

impl VBlockMap {
    pub fn new(geometry: &Geometry, reserved_free_blocks: usize) -> Self {
        let dies = geometry.dies;
        let blocks_per_die = geometry.blocks_per_die;
        let mut blocks = Vec::with_capacity(dies * blocks_per_die);
        let mut die_states = Vec::with_capacity(dies);
        for _ in 0..dies {
            // Chain the whole die into its free FIFO in index order.
            for block in 0..blocks_per_die {
                let mut record = VirtualBlock::new_free();
                record.prev = if block == 0 {
                    BLOCK_NONE
                } else {
                    (block - 1) as u16
                };
                record.next = if block + 1 == blocks_per_die {
                    BLOCK_NONE
                } else {
                    (block + 1) as u16
                };
                blocks.push(record);
            }
            die_states.push(DieState {
                free: BlockQueue {
                    head: 0,
                    tail: (blocks_per_die - 1) as u16,
                },
                free_count: blocks_per_die,
                current_block: BLOCK_NONE,
            });
        }
        Self {
            dies,
            blocks_per_die,
            slices_per_block: geometry.slices_per_block(),
            reserved_free_blocks,
            blocks,
            die_states,
            victim: vec![vec![BlockQueue::EMPTY; geometry.slices_per_block() + 1]; dies],
        }
    }

    fn idx(&self, die: u16, block: u16) -> usize {
        die as usize * self.blocks_per_die + block as usize
    }

    pub fn block(&self, die: u16, block: u16) -> &VirtualBlock {
        &self.blocks[self.idx(die, block)]
    }

    pub fn free_count(&self, die: u16) -> usize {
        self.die_states[die as usize].free_count
    }

    pub fn current_block(&self, die: u16) -> u16 {
        self.die_states[die as usize].current_block
    }

    pub fn reserved_free_blocks(&self) -> usize {
        self.reserved_free_blocks
    }

    /// Detach the head of the die's free FIFO, honoring the GC reserve.
    pub fn pop_free(&mut self, die: u16, mode: AllocMode) -> Option<u16> {
        let state = &self.die_states[die as usize];
        match mode {
            AllocMode::ForUse => {
                if state.free_count <= self.reserved_free_blocks {
                    return None;
                }
            }
            AllocMode::ForGc => {
                if state.free_count == 0 {
                    return None;
                }
            }
        }
        let block = state.free.head;
        debug_assert_ne!(block, BLOCK_NONE);
        let i = self.idx(die, block);
        let next = self.blocks[i].next;
        let state = &mut self.die_states[die as usize];
        if next == BLOCK_NONE {
            state.free = BlockQueue::EMPTY;
        } else {
            state.free.head = next;
            let ni = self.idx(die, next);
            self.blocks[ni].prev = BLOCK_NONE;
        }
        self.die_states[die as usize].free_count -= 1;
        let record = &mut self.blocks[i];
        record.prev = BLOCK_NONE;
        record.next = BLOCK_NONE;
        record.free = false;
        Some(block)
    }

    /// Append a block to the tail of the die's free FIFO.
    pub fn push_free(&mut self, die: u16, block: u16) {
        let i = self.idx(die, block);
        debug_assert!(!self.blocks[i].bad);
        self.blocks[i].free = true;
        self.blocks[i].next = BLOCK_NONE;
        let tail = self.die_states[die as usize].free.tail;
        if tail == BLOCK_NONE {
            self.blocks[i].prev = BLOCK_NONE;
            self.die_states[die as usize].free = BlockQueue { head: block, tail: block };
        } else {
            self.blocks[i].prev = tail;
            let ti = self.idx(die, tail);
            self.blocks[ti].next = block;
            self.die_states[die as usize].free.tail = block;
        }
        self.die_states[die as usize].free_count += 1;
    }

    /// Append a block to the tail of `victim[die][k]`.
    pub fn put_victim(&mut self, die: u16, block: u16, k: usize) {
        let i = self.idx(die, block);
        let queue = self.victim[die as usize][k];
        if queue.tail == BLOCK_NONE {
            self.blocks[i].prev = BLOCK_NONE;
            self.blocks[i].next = BLOCK_NONE;
            self.victim[die as usize][k] = BlockQueue { head: block, tail: block };
        } else {
            self.blocks[i].prev = queue.tail;
            self.blocks[i].next = BLOCK_NONE;
            let ti = self.idx(die, queue.tail);
            self.blocks[ti].next = block;
            self.victim[die as usize][k].tail = block;
        }
    }

    /// Detach the oldest block from the fullest non-empty victim bucket.
    /// Buckets with zero invalid slices are never scanned; erasing such a
    /// block would reclaim nothing.
    pub fn pop_best_victim(&mut self, die: u16) -> Result<u16> {
        for k in (1..=self.slices_per_block).rev() {
            let head = self.victim[die as usize][k].head;
            if head == BLOCK_NONE {
                continue;
            }
            let i = self.idx(die, head);
            let next = self.blocks[i].next;
            if next == BLOCK_NONE {
                self.victim[die as usize][k] = BlockQueue::EMPTY;
            } else {
                let ni = self.idx(die, next);
                self.blocks[ni].prev = BLOCK_NONE;
                self.victim[die as usize][k].head = next;
            }
            self.blocks[i].prev = BLOCK_NONE;
            self.blocks[i].next = BLOCK_NONE;
            return Ok(head);
        }
        return_errno_with_msg!(NoVictim, "all victim buckets empty");
    }

    /// Unlink a block from whichever victim bucket holds it. The bucket is
    /// located through the block's own invalid-slice count, so callers must
    /// unlink before touching the counter.
    pub fn remove_victim(&mut self, die: u16, block: u16) {
        let i = self.idx(die, block);
        let prev = self.blocks[i].prev;
        let next = self.blocks[i].next;
        let k = self.blocks[i].invalid_slices as usize;
        if prev != BLOCK_NONE {
            let pi = self.idx(die, prev);
            self.blocks[pi].next = next;
        } else {
            self.victim[die as usize][k].head = next;
        }
        if next != BLOCK_NONE {
            let ni = self.idx(die, next);
            self.blocks[ni].prev = prev;
        } else {
            self.victim[die as usize][k].tail = prev;
        }
        self.blocks[i].prev = BLOCK_NONE;
        self.blocks[i].next = BLOCK_NONE;
    }

    /// Count a freshly stale slice against its block. With `rebucket` set
    /// the block is re-linked into the bucket matching the new count,
    /// unless it is free, bad, or the die's current write block (those are
    /// in no bucket by construction).
    pub fn mark_slice_invalid(&mut self, die: u16, block: u16, rebucket: bool) {
        let i = self.idx(die, block);
        debug_assert!((self.blocks[i].invalid_slices as usize) < self.slices_per_block);
        let bucketed = rebucket
            && !self.blocks[i].free
            && !self.blocks[i].bad
            && self.die_states[die as usize].current_block != block;
        if bucketed {
            self.remove_victim(die, block);
        }
        self.blocks[i].invalid_slices += 1;
        if bucketed {
            let k = self.blocks[i].invalid_slices as usize;
            self.put_victim(die, block, k);
        }
    }

    /// Hand out the next free slice on the die, pulling a fresh block from
    /// the free FIFO when needed. A block that fills up retires into the
    /// victim bucket matching its invalid count.
    pub fn alloc_slice(&mut self, die: u16, mode: AllocMode) -> Option<Vorg> {
        if self.die_states[die as usize].current_block == BLOCK_NONE {
            let block = self.pop_free(die, mode)?;
            self.die_states[die as usize].current_block = block;
        }
        let block = self.die_states[die as usize].current_block;
        let i = self.idx(die, block);
        let page = self.blocks[i].current_page;
        self.blocks[i].current_page += 1;
        if (page as usize) + 1 == self.slices_per_block {
            let k = self.blocks[i].invalid_slices as usize;
            self.die_states[die as usize].current_block = BLOCK_NONE;
            self.put_victim(die, block, k);
        }
        Some(Vorg { die, block, page })
    }

    /// Reset a block's record after a successful erase. The caller decides
    /// whether the block re-enters the free FIFO; RU-owned blocks do not.
    pub fn reset_after_erase(&mut self, die: u16, block: u16) {
        let i = self.idx(die, block);
        let record = &mut self.blocks[i];
        record.erase_cnt += 1;
        record.current_page = 0;
        record.invalid_slices = 0;
        record.prev = BLOCK_NONE;
        record.next = BLOCK_NONE;
    }

    /// Erase bookkeeping for a block owned by the per-die pools.
    pub fn on_erase_success(&mut self, die: u16, block: u16) {
        self.reset_after_erase(die, block);
        self.push_free(die, block);
    }

    /// Take a block out of circulation after a failed erase.
    pub fn mark_bad(&mut self, die: u16, block: u16) {
        let i = self.idx(die, block);
        let record = &mut self.blocks[i];
        record.bad = true;
        record.free = false;
        record.prev = BLOCK_NONE;
        record.next = BLOCK_NONE;
    }

    /// Walk `victim[die][k]` head to tail.
    pub fn bucket_blocks(&self, die: u16, k: usize) -> Vec<u16> {
        let mut blocks = Vec::new();
        let mut cursor = self.victim[die as usize][k].head;
        while cursor != BLOCK_NONE {
            blocks.push(cursor);
            cursor = self.blocks[self.idx(die, cursor)].next;
        }
        blocks
    }

    /// Walk the die's free FIFO head to tail.
    pub fn free_blocks(&self, die: u16) -> Vec<u16> {
        let mut blocks = Vec::new();
        let mut cursor = self.die_states[die as usize].free.head;
        while cursor != BLOCK_NONE {
            blocks.push(cursor);
            cursor = self.blocks[self.idx(die, cursor)].next;
        }
        blocks
    }
}
