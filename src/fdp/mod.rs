//! Flexible Data Placement: endurance group, reclaim groups, reclaim
//! units and handles.
//!
//! The media is carved into Reclaim Units of `rusize_blocks` blocks each,
//! partitioned among Reclaim Groups. A Reclaim Unit Handle is a writer
//! identity: it owns one active RU per group, and host writes carrying a
//! placement handle land on the RU of the handle they resolve to. The
//! static block-to-RU mapping strides dies first, so one RU's blocks sit
//! on distinct dies and program in parallel.

mod gc;
mod queues;

use crate::address::Vorg;
use crate::config::{FdpConfig, Geometry, RuhType};
use crate::prelude::*;
use crate::vblock::AllocMode;

/// Reclaim Group id.
pub type RgId = u16;
/// Reclaim Unit Handle id.
pub type RuhId = u16;
/// Reclaim Unit id within its group.
pub type RugId = u16;
/// Encoded RU address: `rugId << rgif | rgId`.
pub type RuAddr = u16;

/// Sentinel for RU list links and absent RU ids.
pub const RU_NONE: RugId = RugId::MAX;
/// Sentinel for an RU bound to no handle.
pub const RUHID_NONE: RuhId = RuhId::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockAddr {
    pub die: u16,
    pub block: u16,
}

pub struct ReclaimUnit {
    /// Reclaim Unit Available Media Writes, in bytes.
    ruamw: u64,
    /// Handle currently stamped on this RU; `RUHID_NONE` when free.
    ruhid: RuhId,
    blocks: Vec<BlockAddr>,
    current_slice: u16,
    invalid_slices: u16,
    prev: RugId,
    next: RugId,
}

impl ReclaimUnit {
    pub fn ruhid(&self) -> RuhId {
        self.ruhid
    }

    pub fn ruamw(&self) -> u64 {
        self.ruamw
    }

    pub fn current_slice(&self) -> u16 {
        self.current_slice
    }

    pub fn invalid_slices(&self) -> u16 {
        self.invalid_slices
    }

    pub fn blocks(&self) -> &[BlockAddr] {
        &self.blocks
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RuQueue {
    pub(crate) head: RugId,
    pub(crate) tail: RugId,
}

impl RuQueue {
    pub(crate) const EMPTY: Self = Self {
        head: RU_NONE,
        tail: RU_NONE,
    };
}

pub struct ReclaimGroup {
    pub(crate) rus: Vec<ReclaimUnit>,
    pub(crate) free: RuQueue,
    pub(crate) free_count: usize,
    /// victim[ruh][k] chains victim RUs with k invalid slices, FIFO.
    pub(crate) victim: Vec<Vec<RuQueue>>,
}

pub struct RuHandle {
    ruht: RuhType,
    // NVMe RUH descriptor fields, reported but not acted on here.
    #[allow(dead_code)]
    ruha: u8,
    #[allow(dead_code)]
    event_filter: u64,
    #[allow(dead_code)]
    lbafi: u8,
    #[allow(dead_code)]
    ruamw: u64,
    /// Active RU per reclaim group.
    rus: Vec<RugId>,
}

impl RuHandle {
    pub fn ruht(&self) -> RuhType {
        self.ruht
    }
}

/// A namespace's view of FDP: its placement handle table.
pub struct NamespaceFdp {
    phs: Vec<RuhId>,
}

impl NamespaceFdp {
    pub fn nphs(&self) -> usize {
        self.phs.len()
    }
}

/// The endurance group: all FDP state of the device.
pub struct EnduranceGroup {
    nruh: u16,
    nrg: u16,
    rgif: u8,
    /// Reclaim Unit Nominal Size in bytes.
    runs: u64,
    /// Host Bytes with Metadata Written.
    hbmw: u64,
    /// Media Bytes with Metadata Written.
    mbmw: u64,
    /// Media Bytes Erased.
    mbe: u64,
    rusize_blocks: usize,
    slices_per_ru: usize,
    pages_per_block: usize,
    blocks_per_die: usize,
    bytes_per_slice: usize,
    reserved_free_rus: usize,
    rucnt_per_group: usize,
    ruhs: Vec<RuHandle>,
    namespaces: Vec<NamespaceFdp>,
    pub(crate) rgs: Vec<ReclaimGroup>,
    /// O(1) inverse mapping, indexed by die * blocks_per_die + block.
    block_ru: Vec<RuAddr>,
}

impl EnduranceGroup {
    /// Build the endurance group and bind every handle to a starting RU
    /// in every group.
    pub fn new(config: &FdpConfig, geometry: &Geometry) -> Result<Self> {
        config.validate(geometry)?;
        let rucnt_per_group =
            geometry.total_blocks() / config.rusize_blocks / config.nrg as usize;
        let slices_per_ru = config.slices_per_ru(geometry);
        if (rucnt_per_group as u32) << config.rgif > u16::MAX as u32 + 1 {
            return_errno_with_msg!(InvalidArgs, "RU address does not fit its encoding");
        }

        let mut block_ru = vec![0 as RuAddr; geometry.total_blocks()];
        let mut rgs = Vec::with_capacity(config.nrg as usize);
        // One cursor walks the whole array, dies first, so consecutive
        // blocks of an RU land on distinct dies.
        let mut die = 0u16;
        let mut block = 0u16;
        for rg_id in 0..config.nrg {
            let mut rus = Vec::with_capacity(rucnt_per_group);
            for rug_id in 0..rucnt_per_group {
                let ru_addr = ((rug_id as RuAddr) << config.rgif) | rg_id as RuAddr;
                let mut blocks = Vec::with_capacity(config.rusize_blocks);
                for _ in 0..config.rusize_blocks {
                    block_ru[die as usize * geometry.blocks_per_die + block as usize] = ru_addr;
                    blocks.push(BlockAddr { die, block });
                    die += 1;
                    if die as usize == geometry.dies {
                        die = 0;
                        block += 1;
                    }
                }
                rus.push(ReclaimUnit {
                    ruamw: 0,
                    ruhid: RUHID_NONE,
                    blocks,
                    current_slice: 0,
                    invalid_slices: 0,
                    prev: if rug_id == 0 {
                        RU_NONE
                    } else {
                        (rug_id - 1) as RugId
                    },
                    next: if rug_id + 1 == rucnt_per_group {
                        RU_NONE
                    } else {
                        (rug_id + 1) as RugId
                    },
                });
            }
            rgs.push(ReclaimGroup {
                rus,
                free: RuQueue {
                    head: 0,
                    tail: (rucnt_per_group - 1) as RugId,
                },
                free_count: rucnt_per_group,
                victim: vec![vec![RuQueue::EMPTY; slices_per_ru + 1]; config.nruh as usize],
            });
        }

        let ruhs = (0..config.nruh)
            .map(|_| RuHandle {
                ruht: config.ruht,
                ruha: 0,
                event_filter: 0,
                lbafi: 0,
                ruamw: 0,
                rus: vec![RU_NONE; config.nrg as usize],
            })
            .collect();
        let namespaces = config
            .namespaces
            .iter()
            .map(|phs| NamespaceFdp { phs: phs.clone() })
            .collect();

        let mut endgrp = Self {
            nruh: config.nruh,
            nrg: config.nrg,
            rgif: config.rgif,
            runs: config.runs(geometry),
            hbmw: 0,
            mbmw: 0,
            mbe: 0,
            rusize_blocks: config.rusize_blocks,
            slices_per_ru,
            pages_per_block: geometry.pages_per_block,
            blocks_per_die: geometry.blocks_per_die,
            bytes_per_slice: geometry.bytes_per_slice,
            reserved_free_rus: config.reserved_free_rus,
            rucnt_per_group,
            ruhs,
            namespaces,
            rgs,
            block_ru,
        };
        endgrp.init_handles()?;
        Ok(endgrp)
    }

    /// Give every handle a starting RU in every group.
    fn init_handles(&mut self) -> Result<()> {
        for ruh_id in 0..self.nruh {
            for rg_id in 0..self.nrg {
                let Some(rug_id) = self.get_free_ru(rg_id, AllocMode::ForUse) else {
                    return_errno_with_msg!(InvalidArgs, "not enough free RUs for the handles");
                };
                self.activate(rg_id, ruh_id, rug_id);
            }
        }
        Ok(())
    }

    pub fn nruh(&self) -> u16 {
        self.nruh
    }

    pub fn nrg(&self) -> u16 {
        self.nrg
    }

    pub fn runs(&self) -> u64 {
        self.runs
    }

    pub fn slices_per_ru(&self) -> usize {
        self.slices_per_ru
    }

    pub fn rusize_blocks(&self) -> usize {
        self.rusize_blocks
    }

    pub fn rucnt_per_group(&self) -> usize {
        self.rucnt_per_group
    }

    pub fn reserved_free_rus(&self) -> usize {
        self.reserved_free_rus
    }

    pub fn hbmw(&self) -> u64 {
        self.hbmw
    }

    pub fn mbmw(&self) -> u64 {
        self.mbmw
    }

    pub fn mbe(&self) -> u64 {
        self.mbe
    }

    pub fn ru(&self, rg: RgId, rug: RugId) -> &ReclaimUnit {
        &self.rgs[rg as usize].rus[rug as usize]
    }

    pub fn handle(&self, ruh: RuhId) -> &RuHandle {
        &self.ruhs[ruh as usize]
    }

    pub fn free_ru_count(&self, rg: RgId) -> usize {
        self.rgs[rg as usize].free_count
    }

    /// The handle's active RU in the group.
    pub fn active_ru(&self, rg: RgId, ruh: RuhId) -> RugId {
        self.ruhs[ruh as usize].rus[rg as usize]
    }

    /// Encoded RU address of a block, set once at bring-up.
    pub fn ru_addr_of(&self, die: u16, block: u16) -> RuAddr {
        self.block_ru[die as usize * self.blocks_per_die + block as usize]
    }

    pub fn decode_ru_addr(&self, addr: RuAddr) -> (RgId, RugId) {
        let rg = addr & ((1 << self.rgif) - 1);
        (rg, addr >> self.rgif)
    }

    /// Resolve a namespace placement handle to its RUH.
    pub fn resolve_placement(&self, nsid: u16, ph: u16) -> Result<RuhId> {
        let ns = self
            .namespaces
            .get(nsid as usize)
            .ok_or(Error::with_msg(InvalidArgs, "unknown namespace"))?;
        match ns.phs.get(ph as usize) {
            Some(ruh) => Ok(*ruh),
            None => Err(Error::with_msg(
                InvalidHandle,
                "placement handle out of range for the namespace",
            )),
        }
    }

    /// Virtual origin of the RU's `slice`-th slice: blocks fill one after
    /// another, pages in order within each block.
    pub fn ru_slice_to_vorg(&self, rg: RgId, rug: RugId, slice: usize) -> Vorg {
        debug_assert!(slice < self.slices_per_ru);
        let addr = self.rgs[rg as usize].rus[rug as usize].blocks
            [slice / self.pages_per_block];
        Vorg {
            die: addr.die,
            block: addr.block,
            page: (slice % self.pages_per_block) as u16,
        }
    }

    /// Install an RU as the handle's active destination in the group.
    pub fn activate(&mut self, rg: RgId, ruh: RuhId, rug: RugId) {
        self.ruhs[ruh as usize].rus[rg as usize] = rug;
        let ru = &mut self.rgs[rg as usize].rus[rug as usize];
        ru.ruhid = ruh;
        ru.ruamw = self.runs;
    }

    /// Take the next slice of the handle's active RU. A full RU retires
    /// into its victim bucket; the second return value tells the caller to
    /// re-arm the handle before the next write.
    pub fn take_slice(&mut self, rg: RgId, ruh: RuhId) -> Result<(Vorg, bool)> {
        let rug = self.active_ru(rg, ruh);
        if rug == RU_NONE {
            return_errno_with_msg!(InvalidArgs, "handle has no active RU in the group");
        }
        let ru = &mut self.rgs[rg as usize].rus[rug as usize];
        debug_assert!((ru.current_slice as usize) < self.slices_per_ru);
        let slice = ru.current_slice as usize;
        ru.current_slice += 1;
        ru.ruamw = ru.ruamw.saturating_sub(self.bytes_per_slice as u64);
        let full = ru.current_slice as usize == self.slices_per_ru;
        let vorg = self.ru_slice_to_vorg(rg, rug, slice);
        if full {
            let k = self.rgs[rg as usize].rus[rug as usize].invalid_slices;
            self.put_victim_ru(rg, rug, ruh, k as usize);
        }
        Ok((vorg, full))
    }

    /// Count a freshly stale slice against the RU owning (die, block) and
    /// keep the RU's bucket position in step. An active RU only bumps its
    /// counter; it enters the right bucket when it retires.
    pub fn invalidate_slice(&mut self, die: u16, block: u16) {
        let (rg, rug) = self.decode_ru_addr(self.ru_addr_of(die, block));
        let ruhid = self.rgs[rg as usize].rus[rug as usize].ruhid;
        debug_assert_ne!(ruhid, RUHID_NONE, "stale slice in a free RU");
        let active = self.active_ru(rg, ruhid) == rug;
        if !active {
            self.pop_victim_ru(rg, rug);
        }
        let ru = &mut self.rgs[rg as usize].rus[rug as usize];
        debug_assert!((ru.invalid_slices as usize) < self.slices_per_ru);
        ru.invalid_slices += 1;
        if !active {
            let k = self.rgs[rg as usize].rus[rug as usize].invalid_slices as usize;
            self.put_victim_ru(rg, rug, ruhid, k);
        }
    }

    /// Record the destination RU's write position after a GC migration.
    pub(crate) fn finish_migration(&mut self, rg: RgId, rug: RugId, cursor: usize) {
        debug_assert!(cursor <= self.slices_per_ru);
        let runs = self.runs;
        let bytes = self.bytes_per_slice as u64;
        let ru = &mut self.rgs[rg as usize].rus[rug as usize];
        ru.current_slice = cursor as u16;
        ru.ruamw = runs - cursor as u64 * bytes;
    }

    /// Return an erased RU to its blank state. Requeueing is the caller's
    /// decision.
    pub(crate) fn reset_ru_after_erase(&mut self, rg: RgId, rug: RugId) {
        let ru = &mut self.rgs[rg as usize].rus[rug as usize];
        ru.ruhid = RUHID_NONE;
        ru.ruamw = 0;
        ru.current_slice = 0;
        ru.invalid_slices = 0;
        ru.prev = RU_NONE;
        ru.next = RU_NONE;
    }

    /// Take an RU out of circulation after one of its blocks went bad.
    /// Its content is garbage at this point, the collector migrated
    /// whatever was live before the erase attempt.
    pub(crate) fn retire_ru(&mut self, rg: RgId, rug: RugId) {
        let ru = &mut self.rgs[rg as usize].rus[rug as usize];
        ru.ruhid = RUHID_NONE;
        ru.ruamw = 0;
        ru.current_slice = 0;
        ru.invalid_slices = 0;
        ru.prev = RU_NONE;
        ru.next = RU_NONE;
    }

    pub(crate) fn add_host_bytes(&mut self, bytes: u64) {
        self.hbmw += bytes;
        self.mbmw += bytes;
    }

    pub(crate) fn add_migrated_bytes(&mut self, bytes: u64) {
        self.mbmw += bytes;
    }

    pub(crate) fn add_erased_bytes(&mut self, bytes: u64) {
        self.mbe += bytes;
    }

    /// Walk a victim bucket head to tail.
    pub(crate) fn victim_bucket(&self, rg: RgId, ruh: RuhId, k: usize) -> Vec<RugId> {
        let mut rus = Vec::new();
        let mut cursor = self.rgs[rg as usize].victim[ruh as usize][k].head;
        while cursor != RU_NONE {
            rus.push(cursor);
            cursor = self.rgs[rg as usize].rus[cursor as usize].next;
        }
        rus
    }

    /// Walk the group's free list head to tail.
    pub(crate) fn free_rus(&self, rg: RgId) -> Vec<RugId> {
        let mut rus = Vec::new();
        let mut cursor = self.rgs[rg as usize].free.head;
        while cursor != RU_NONE {
            rus.push(cursor);
            cursor = self.rgs[rg as usize].rus[cursor as usize].next;
        }
        rus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashSet;

    fn geometry() -> Geometry {
        Geometry {
            dies: 4,
            blocks_per_die: 8,
            pages_per_block: 4,
            bytes_per_slice: 16,
        }
    }

    fn config() -> FdpConfig {
        FdpConfig {
            nruh: 2,
            nrg: 2,
            rgif: 1,
            rusize_blocks: 2,
            ruht: RuhType::InitiallyIsolated,
            reserved_free_rus: 1,
            namespaces: vec![vec![0, 1]],
        }
    }

    #[test]
    fn block_to_ru_mapping_is_a_bijection() {
        let endgrp = EnduranceGroup::new(&config(), &geometry()).unwrap();
        assert_eq!(endgrp.rucnt_per_group(), 8);

        let mut seen = HashSet::new();
        for rg in 0..2 {
            for rug in 0..8u16 {
                let ru = endgrp.ru(rg, rug);
                let mut dies = HashSet::new();
                for addr in ru.blocks() {
                    assert!(seen.insert((addr.die, addr.block)), "block assigned twice");
                    assert!(dies.insert(addr.die), "RU blocks share a die");
                    // The inverse table points straight back.
                    let decoded = endgrp.decode_ru_addr(endgrp.ru_addr_of(addr.die, addr.block));
                    assert_eq!(decoded, (rg, rug));
                }
            }
        }
        assert_eq!(seen.len(), geometry().total_blocks());
    }

    #[test]
    fn handles_start_with_distinct_active_rus() {
        let endgrp = EnduranceGroup::new(&config(), &geometry()).unwrap();
        for rg in 0..2 {
            let mut actives = HashSet::new();
            for ruh in 0..2 {
                let rug = endgrp.active_ru(rg, ruh);
                assert_ne!(rug, RU_NONE);
                assert!(actives.insert(rug));
                assert_eq!(endgrp.ru(rg, rug).ruhid(), ruh);
                assert_eq!(endgrp.ru(rg, rug).ruamw(), endgrp.runs());
                assert!(!endgrp.free_rus(rg).contains(&rug));
            }
            assert_eq!(endgrp.free_ru_count(rg), 6);
        }
    }

    #[test]
    fn placement_resolution_checks_the_table() {
        let endgrp = EnduranceGroup::new(&config(), &geometry()).unwrap();
        assert_eq!(endgrp.resolve_placement(0, 1).unwrap(), 1);
        assert_eq!(
            endgrp.resolve_placement(0, 2).unwrap_err().errno(),
            crate::error::Errno::InvalidHandle
        );
        assert_eq!(
            endgrp.resolve_placement(3, 0).unwrap_err().errno(),
            crate::error::Errno::InvalidArgs
        );
    }

    #[test]
    fn ru_slices_fill_block_by_block() {
        let endgrp = EnduranceGroup::new(&config(), &geometry()).unwrap();
        let first = endgrp.ru(0, 0).blocks()[0];
        let second = endgrp.ru(0, 0).blocks()[1];
        let vorg0 = endgrp.ru_slice_to_vorg(0, 0, 0);
        let vorg3 = endgrp.ru_slice_to_vorg(0, 0, 3);
        let vorg4 = endgrp.ru_slice_to_vorg(0, 0, 4);
        assert_eq!((vorg0.die, vorg0.block, vorg0.page), (first.die, first.block, 0));
        assert_eq!((vorg3.die, vorg3.block, vorg3.page), (first.die, first.block, 3));
        assert_eq!((vorg4.die, vorg4.block, vorg4.page), (second.die, second.block, 0));
    }

    #[test]
    fn full_ru_retires_into_its_bucket() {
        let mut endgrp = EnduranceGroup::new(&config(), &geometry()).unwrap();
        let rug = endgrp.active_ru(0, 0);
        for slice in 0..8 {
            let (_, full) = endgrp.take_slice(0, 0).unwrap();
            assert_eq!(full, slice == 7);
        }
        assert_eq!(endgrp.victim_bucket(0, 0, 0), vec![rug]);
        assert_eq!(endgrp.ru(0, rug).ruamw(), 0);
    }
}
