//! Free-RU and victim-RU queues.
//!
//! Per reclaim group: one free FIFO, and a bucket matrix of victim queues
//! indexed by (handle, invalid-slice count). The queues are intrusive,
//! threaded through the RUs' own `prev`/`next` links, so an RU is in at
//! most one queue at any time.

use crate::config::RuhType;
use crate::prelude::*;
use crate::vblock::AllocMode;

use super::{EnduranceGroup, RgId, RuQueue, RugId, RuhId, RU_NONE};

impl EnduranceGroup {
    /// Detach the head of the group's free list. `ForUse` yields `None`
    /// once only the GC reserve is left; `ForGc` only on a truly empty
    /// list.
    pub fn get_free_ru(&mut self, rg: RgId, mode: AllocMode) -> Option<RugId> {
        let reserved = self.reserved_free_rus;
        let group = &mut self.rgs[rg as usize];
        match mode {
            AllocMode::ForUse => {
                if group.free_count <= reserved {
                    return None;
                }
            }
            AllocMode::ForGc => {
                if group.free.head == RU_NONE {
                    return None;
                }
            }
        }
        let rug = group.free.head;
        debug_assert_ne!(rug, RU_NONE);
        let next = group.rus[rug as usize].next;
        if next == RU_NONE {
            group.free = RuQueue::EMPTY;
        } else {
            group.free.head = next;
            group.rus[next as usize].prev = RU_NONE;
        }
        group.free_count -= 1;
        let ru = &mut group.rus[rug as usize];
        ru.prev = RU_NONE;
        ru.next = RU_NONE;
        Some(rug)
    }

    /// Append an RU to the tail of the group's free list.
    pub fn put_free_ru(&mut self, rg: RgId, rug: RugId) {
        let group = &mut self.rgs[rg as usize];
        if group.free.head == RU_NONE {
            group.rus[rug as usize].prev = RU_NONE;
            group.rus[rug as usize].next = RU_NONE;
            group.free = RuQueue { head: rug, tail: rug };
        } else {
            let tail = group.free.tail;
            group.rus[rug as usize].prev = tail;
            group.rus[rug as usize].next = RU_NONE;
            group.rus[tail as usize].next = rug;
            group.free.tail = rug;
        }
        group.free_count += 1;
    }

    /// Append an RU to the tail of `victim[ruh][k]`.
    pub fn put_victim_ru(&mut self, rg: RgId, rug: RugId, ruh: RuhId, k: usize) {
        let group = &mut self.rgs[rg as usize];
        let queue = group.victim[ruh as usize][k];
        if queue.tail == RU_NONE {
            group.rus[rug as usize].prev = RU_NONE;
            group.rus[rug as usize].next = RU_NONE;
            group.victim[ruh as usize][k] = RuQueue { head: rug, tail: rug };
        } else {
            group.rus[rug as usize].prev = queue.tail;
            group.rus[rug as usize].next = RU_NONE;
            group.rus[queue.tail as usize].next = rug;
            group.victim[ruh as usize][k].tail = rug;
        }
    }

    /// Pick a victim RU for the handle: greedy by invalid count over the
    /// handle's own buckets, FIFO within a bucket. An initially-isolated
    /// handle that finds nothing may take another handle's victim, but
    /// never its own active RU; a persistently-isolated handle never
    /// crosses. Exhaustion is fatal.
    pub fn get_victim_ru(&mut self, rg: RgId, ruh: RuhId) -> Result<RugId> {
        for k in (0..=self.slices_per_ru).rev() {
            let head = self.rgs[rg as usize].victim[ruh as usize][k].head;
            if head != RU_NONE {
                self.unlink_victim(rg, ruh, k, head);
                return Ok(head);
            }
        }

        if self.ruhs[ruh as usize].ruht == RuhType::InitiallyIsolated {
            let own_active = self.active_ru(rg, ruh);
            for other in 0..self.nruh {
                if other == ruh {
                    continue;
                }
                for k in (0..=self.slices_per_ru).rev() {
                    let mut cand = self.rgs[rg as usize].victim[other as usize][k].head;
                    if cand == own_active {
                        cand = self.rgs[rg as usize].rus[cand as usize].next;
                    }
                    if cand != RU_NONE {
                        debug!("gc: handle {ruh} borrows victim RU {cand} from handle {other}");
                        self.unlink_victim(rg, other, k, cand);
                        return Ok(cand);
                    }
                }
            }
        }

        return_errno_with_msg!(NoVictim, "victim RU queues exhausted")
    }

    /// Unlink an RU from whichever victim bucket holds it, located through
    /// the RU's own handle stamp and invalid count. Callers re-bucketing
    /// on a count change must unlink before touching the counter.
    pub fn pop_victim_ru(&mut self, rg: RgId, rug: RugId) {
        let ru = &self.rgs[rg as usize].rus[rug as usize];
        let ruh = ru.ruhid;
        let k = ru.invalid_slices as usize;
        self.unlink_victim(rg, ruh, k, rug);
    }

    fn unlink_victim(&mut self, rg: RgId, ruh: RuhId, k: usize, rug: RugId) {
        let group = &mut self.rgs[rg as usize];
        let prev = group.rus[rug as usize].prev;
        let next = group.rus[rug as usize].next;
        if prev != RU_NONE {
            group.rus[prev as usize].next = next;
        } else {
            group.victim[ruh as usize][k].head = next;
        }
        if next != RU_NONE {
            group.rus[next as usize].prev = prev;
        } else {
            group.victim[ruh as usize][k].tail = prev;
        }
        group.rus[rug as usize].prev = RU_NONE;
        group.rus[rug as usize].next = RU_NONE;
    }
}
