//! The translation core.
//!
//! `FtlCore` owns the slice maps, the virtual block map, the request and
//! temp-buffer pools and, when configured, the FDP endurance group. It is
//! driven by the NVMe I/O handler through `read`, `write`, `trim`,
//! `flush` and the GC entry points; everything runs on one cooperative
//! executor, so a `&mut self` method is the whole serialization story.
//!
//! # Usage example
//!
//! Write, overwrite and read back slices on an in-memory NAND array.
//!
//! ```
//! let config = FtlConfig::default();
//! let nand = MemNand::new(config.geometry);
//! let mut core = FtlCore::new(config, None, nand)?;
//!
//! let payload = vec![7u8; 4096];
//! core.write(0, &payload, None)?;
//! let mut readback = vec![0u8; 4096];
//! core.read(0, &mut readback)?;
//! assert_eq!(readback, payload);
//! ```

use std::sync::Arc;

use crate::address::{Lsa, Vorg, Vsa, VSA_NONE};
use crate::config::{FdpConfig, FtlConfig};
use crate::fdp::{EnduranceGroup, RgId, RuhId};
use crate::nand::{NandReq, NandScheduler, ReqKind, ReqOptions, ReqPool, SliceBuf, SlotTag, TempBufPool};
use crate::map::SliceMaps;
use crate::prelude::*;
use crate::stats::WAF_STATS;
use crate::vblock::{AllocMode, VBlockMap};

/// Decoded placement directive of a host write: the namespace, its
/// placement handle index, and the target reclaim group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlacementSpec {
    pub nsid: u16,
    pub ph: u16,
    pub rg: RgId,
}

pub struct FtlCore {
    pub(crate) config: FtlConfig,
    pub(crate) maps: SliceMaps,
    pub(crate) vblocks: VBlockMap,
    pub(crate) req_pool: ReqPool,
    pub(crate) temp_bufs: TempBufPool,
    pub(crate) fdp: Option<EnduranceGroup>,
    pub(crate) nand: Arc<dyn NandScheduler>,
    /// Round-robin die cursor for writes without a placement directive.
    next_die: u16,
}

impl FtlCore {
    pub fn new(
        config: FtlConfig,
        fdp: Option<FdpConfig>,
        nand: Arc<dyn NandScheduler>,
    ) -> Result<Self> {
        config.validate()?;
        let geometry = config.geometry;
        let fdp = match fdp {
            Some(fdp_config) => Some(EnduranceGroup::new(&fdp_config, &geometry)?),
            None => None,
        };
        info!(
            "ftl: {} dies x {} blocks x {} slices, fdp {}",
            geometry.dies,
            geometry.blocks_per_die,
            geometry.slices_per_block(),
            if fdp.is_some() { "on" } else { "off" },
        );
        Ok(Self {
            maps: SliceMaps::new(config.user_slices, geometry.total_slices()),
            vblocks: VBlockMap::new(&geometry, config.reserved_free_blocks),
            req_pool: ReqPool::new(config.req_pool_size),
            temp_bufs: TempBufPool::new(config.temp_buf_entries, geometry.bytes_per_slice)?,
            fdp,
            nand,
            next_die: 0,
            config,
        })
    }

    /// Resolve and read one slice. An unmapped slice yields the
    /// deallocated pattern; filling it in is the command layer's business,
    /// zeros stand in for it here.
    pub fn read(&mut self, lsa: Lsa, buf: &mut [u8]) -> Result<()> {
        self.check_host_args(lsa, buf.len())?;
        let vsa = self.maps.vsa_of(lsa);
        if vsa == VSA_NONE {
            buf.fill(0);
            return Ok(());
        }
        let data = SliceBuf::new(buf.len());
        let tag = self.req_pool.acquire()?;
        self.req_pool.set(
            tag,
            NandReq {
                kind: ReqKind::Read { lsa, vsa },
                opts: ReqOptions::host(),
                buf: Some(data.clone()),
                temp_entry: None,
                blocking_slot: None,
            },
        );
        self.dispatch(tag)?;
        data.copy_to(buf);
        Ok(())
    }

    /// Allocate a destination slice, program it, and rebind the maps.
    /// With a placement directive (or FDP enabled at all) the destination
    /// comes from the resolved handle's active RU; otherwise from the
    /// per-die pools.
    pub fn write(&mut self, lsa: Lsa, data: &[u8], placement: Option<PlacementSpec>) -> Result<()> {
        self.check_host_args(lsa, data.len())?;
        let vorg = if self.fdp.is_some() {
            // Writes without a directive use the default placement
            // handle 0 of namespace 0, as hosts without FDP awareness do.
            let spec = placement.unwrap_or_default();
            let ruh = {
                let endgrp = self.endgrp();
                if spec.rg >= endgrp.nrg() {
                    return_errno_with_msg!(OutOfRange, "reclaim group out of range");
                }
                endgrp.resolve_placement(spec.nsid, spec.ph)?
            };
            self.alloc_fdp_slice(spec.rg, ruh)?
        } else {
            if placement.is_some() {
                return_errno_with_msg!(FdpDisabled, "placement hint while fdp is disabled");
            }
            self.alloc_user_slice()?
        };
        let vsa = self.config.geometry.vorg_to_vsa(vorg);

        let tag = self.req_pool.acquire()?;
        self.req_pool.set(
            tag,
            NandReq {
                kind: ReqKind::Write { lsa, vsa },
                opts: ReqOptions::host(),
                buf: Some(SliceBuf::from_slice(data)),
                temp_entry: None,
                blocking_slot: None,
            },
        );
        self.dispatch(tag)?;

        if let Some(old) = self.maps.record_write(lsa, vsa) {
            self.invalidate(old);
        }
        let bytes = data.len() as u64;
        WAF_STATS.add_logical(bytes);
        WAF_STATS.add_physical(bytes);
        if let Some(endgrp) = self.fdp.as_mut() {
            endgrp.add_host_bytes(bytes);
        }
        Ok(())
    }

    /// Deallocate a range of logical slices.
    pub fn trim(&mut self, lsas: core::ops::Range<Lsa>) -> Result<()> {
        if lsas.end as usize > self.maps.n_lsa() {
            return_errno_with_msg!(OutOfRange, "trim beyond user capacity");
        }
        for lsa in lsas {
            if let Some(old) = self.maps.trim(lsa) {
                self.invalidate(old);
            }
        }
        Ok(())
    }

    /// Admit everything queued but not yet issued.
    pub fn flush(&mut self) -> Result<()> {
        self.nand.flush()?;
        debug_assert!(self.req_pool.all_free());
        Ok(())
    }

    /// Run one GC pass when the die's free pool has dropped to the
    /// reserve. Returns whether a pass ran.
    pub fn gc_if_needed(&mut self, die: u16) -> Result<bool> {
        if self.vblocks.free_count(die) > self.vblocks.reserved_free_blocks() {
            return Ok(false);
        }
        self.collect(die)?;
        Ok(true)
    }

    /// FDP counterpart of `gc_if_needed`, per (group, handle).
    pub fn gc_if_needed_fdp(&mut self, rg: RgId, ruh: RuhId) -> Result<bool> {
        let needed = {
            let endgrp = self.endgrp();
            endgrp.free_ru_count(rg) <= endgrp.reserved_free_rus()
        };
        if needed {
            self.collect_fdp(rg, ruh)?;
        }
        Ok(needed)
    }

    /// Hand a populated slot to the low-level scheduler and drain its
    /// completion.
    pub(crate) fn dispatch(&mut self, tag: SlotTag) -> Result<()> {
        let res = match self.req_pool.slot(tag) {
            Some(req) => self.nand.submit(req),
            None => Err(Error::with_msg(InvalidArgs, "dispatch of an empty slot")),
        };
        self.req_pool.release(tag);
        res
    }

    /// The endurance group.
    ///
    /// # Panics
    ///
    /// FDP must be configured; callers sit behind an FDP-enabled entry
    /// point.
    pub(crate) fn endgrp(&self) -> &EnduranceGroup {
        self.fdp.as_ref().expect("fdp is enabled")
    }

    fn check_host_args(&self, lsa: Lsa, len: usize) -> Result<()> {
        if lsa as usize >= self.maps.n_lsa() {
            return_errno_with_msg!(OutOfRange, "lsa beyond user capacity");
        }
        if len != self.config.geometry.bytes_per_slice {
            return_errno_with_msg!(InvalidArgs, "buffer is not one slice");
        }
        Ok(())
    }

    /// Pick a destination slice for a plain write, running GC on the die
    /// when the reserve blocks allocation.
    fn alloc_user_slice(&mut self) -> Result<Vorg> {
        let die = self.next_die;
        self.next_die = (self.next_die + 1) % self.config.geometry.dies as u16;
        loop {
            if let Some(vorg) = self.vblocks.alloc_slice(die, AllocMode::ForUse) {
                return Ok(vorg);
            }
            self.collect(die)?;
        }
    }

    /// Take the next slice of the handle's active RU, re-arming the
    /// handle from the free queue, or through GC, when the RU fills.
    fn alloc_fdp_slice(&mut self, rg: RgId, ruh: RuhId) -> Result<Vorg> {
        let (vorg, full) = {
            // Safety: the write path checked `fdp` before routing here.
            let endgrp = self.fdp.as_mut().unwrap();
            endgrp.take_slice(rg, ruh)?
        };
        if full {
            let rearmed = {
                let endgrp = self.fdp.as_mut().unwrap();
                match endgrp.get_free_ru(rg, AllocMode::ForUse) {
                    Some(next) => {
                        endgrp.activate(rg, ruh, next);
                        true
                    }
                    None => false,
                }
            };
            if !rearmed {
                self.collect_fdp(rg, ruh)?;
            }
        }
        Ok(vorg)
    }

    /// Account a displaced slice: bump its block's counter, and keep the
    /// victim structures in step, classic buckets in plain mode, the
    /// owning RU under FDP.
    fn invalidate(&mut self, old_vsa: Vsa) {
        let vorg = self.config.geometry.vsa_to_vorg(old_vsa);
        let fdp_enabled = self.fdp.is_some();
        self.vblocks
            .mark_slice_invalid(vorg.die, vorg.block, !fdp_enabled);
        if let Some(endgrp) = self.fdp.as_mut() {
            endgrp.invalidate_slice(vorg.die, vorg.block);
        }
    }
}

#[cfg(test)]
impl FtlCore {
    /// Every mapped LSA must round-trip through the virtual map.
    pub(crate) fn check_map_consistency(&self) {
        for lsa in 0..self.maps.n_lsa() as Lsa {
            let vsa = self.maps.vsa_of(lsa);
            if vsa != VSA_NONE {
                assert_eq!(self.maps.lsa_of(vsa), lsa, "lsa {lsa} does not round-trip");
            }
        }
    }

    /// Every block's invalid counter matches a recount of its stale
    /// programmed slices. Bad blocks are out of circulation and skipped.
    pub(crate) fn check_invalid_counters(&self) {
        let geometry = self.config.geometry;
        for die in 0..geometry.dies as u16 {
            for block in 0..geometry.blocks_per_die as u16 {
                let record = self.vblocks.block(die, block);
                if record.is_bad() {
                    continue;
                }
                let extent = match self.fdp.as_ref() {
                    Some(endgrp) => {
                        let (rg, rug) = endgrp.decode_ru_addr(endgrp.ru_addr_of(die, block));
                        let ru = endgrp.ru(rg, rug);
                        let nth = ru
                            .blocks()
                            .iter()
                            .position(|addr| addr.die == die && addr.block == block)
                            .unwrap();
                        (ru.current_slice() as usize)
                            .saturating_sub(nth * geometry.pages_per_block)
                            .min(geometry.pages_per_block)
                    }
                    None => record.current_page() as usize,
                };
                let stale = (0..extent as u16)
                    .filter(|page| {
                        let vsa = geometry.vorg_to_vsa(Vorg { die, block, page: *page });
                        !self.maps.is_valid(vsa)
                    })
                    .count();
                assert_eq!(
                    record.invalid_slices() as usize,
                    stale,
                    "die {die} block {block} miscounts its stale slices"
                );
            }
        }
    }

    /// Classic mode: a non-free, non-bad block that is not the die's
    /// current write block sits in exactly the bucket of its count.
    pub(crate) fn check_bucket_membership(&self) {
        assert!(self.fdp.is_none(), "classic bucket audit in fdp mode");
        let geometry = self.config.geometry;
        for die in 0..geometry.dies as u16 {
            let mut bucketed = hashbrown::HashMap::new();
            for k in 0..=geometry.slices_per_block() {
                for block in self.vblocks.bucket_blocks(die, k) {
                    let replaced = bucketed.insert(block, k);
                    assert!(replaced.is_none(), "die {die} block {block} in two buckets");
                }
            }
            for block in 0..geometry.blocks_per_die as u16 {
                let record = self.vblocks.block(die, block);
                let expect_bucketed = !record.is_free()
                    && !record.is_bad()
                    && self.vblocks.current_block(die) != block;
                if expect_bucketed {
                    assert_eq!(
                        bucketed.get(&block),
                        Some(&(record.invalid_slices() as usize)),
                        "die {die} block {block} in the wrong bucket"
                    );
                } else {
                    assert!(
                        !bucketed.contains_key(&block),
                        "die {die} block {block} bucketed unexpectedly"
                    );
                }
            }
        }
    }

    /// FDP: every RU is in exactly one of the free queue, the victim
    /// bucket of its (handle, count), or some handle's active slot. The
    /// only RUs outside all three are retirees with a bad block.
    pub(crate) fn check_ru_exclusivity(&self) {
        let endgrp = self.endgrp();
        for rg in 0..endgrp.nrg() {
            let free: hashbrown::HashSet<_> = endgrp.free_rus(rg).into_iter().collect();
            let mut victims = hashbrown::HashSet::new();
            for ruh in 0..endgrp.nruh() {
                for k in 0..=endgrp.slices_per_ru() {
                    for rug in endgrp.victim_bucket(rg, ruh, k) {
                        let ru = endgrp.ru(rg, rug);
                        assert_eq!(ru.ruhid(), ruh, "RU {rug} in a foreign bucket");
                        assert_eq!(ru.invalid_slices() as usize, k, "RU {rug} mis-bucketed");
                        assert!(victims.insert(rug), "RU {rug} in two buckets");
                    }
                }
            }
            let actives: hashbrown::HashSet<_> =
                (0..endgrp.nruh()).map(|ruh| endgrp.active_ru(rg, ruh)).collect();
            for rug in 0..endgrp.rucnt_per_group() as u16 {
                let memberships = [free.contains(&rug), victims.contains(&rug), actives.contains(&rug)]
                    .iter()
                    .filter(|held| **held)
                    .count();
                if memberships == 0 {
                    let has_bad_block = endgrp
                        .ru(rg, rug)
                        .blocks()
                        .iter()
                        .any(|addr| self.vblocks.block(addr.die, addr.block).is_bad());
                    assert!(has_bad_block, "rg {rg} RU {rug} leaked out of every queue");
                } else {
                    assert_eq!(memberships, 1, "rg {rg} RU {rug} in several places");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Geometry;
    use crate::nand::MemNand;
    use std::sync::Once;

    static INIT_LOG: Once = Once::new();

    fn init_logger() {
        INIT_LOG.call_once(|| {
            let _ = env_logger::builder()
                .is_test(true)
                .filter_level(log::LevelFilter::Debug)
                .try_init();
        });
    }

    fn classic_core(
        dies: usize,
        blocks_per_die: usize,
        pages_per_block: usize,
        reserved: usize,
        user_slices: usize,
    ) -> (FtlCore, Arc<MemNand>) {
        init_logger();
        let geometry = Geometry {
            dies,
            blocks_per_die,
            pages_per_block,
            bytes_per_slice: 4,
        };
        let config = FtlConfig {
            user_slices,
            reserved_free_blocks: reserved,
            req_pool_size: 16,
            temp_buf_entries: dies,
            geometry,
        };
        let nand = MemNand::new(geometry);
        let core = FtlCore::new(config, None, nand.clone()).unwrap();
        (core, nand)
    }

    fn payload(tag: u8) -> Vec<u8> {
        vec![tag; 4]
    }

    #[test]
    fn write_read_overwrite_and_bucket_movement() {
        let (mut core, _nand) = classic_core(1, 4, 4, 0, 16);
        // Fill block 0 so it retires, then overwrite its first slice.
        for lsa in 0..4u32 {
            core.write(lsa, &payload(b'A' + lsa as u8), None).unwrap();
        }
        let mut buf = [0u8; 4];
        core.read(0, &mut buf).unwrap();
        assert_eq!(buf, *payload(b'A').as_slice());

        core.write(0, &payload(b'Z'), None).unwrap();
        core.read(0, &mut buf).unwrap();
        assert_eq!(buf, *payload(b'Z').as_slice());

        // The displaced slice is counted and block 0 moved to bucket 1.
        assert_eq!(core.vblocks.block(0, 0).invalid_slices(), 1);
        assert_eq!(core.vblocks.bucket_blocks(0, 1), vec![0]);
        core.check_map_consistency();
        core.check_invalid_counters();
        core.check_bucket_membership();
    }

    #[test]
    fn gc_frees_a_stale_block_and_preserves_the_rest() {
        let (mut core, _nand) = classic_core(1, 5, 4, 0, 16);
        for lsa in 0..16u32 {
            core.write(lsa, &payload(lsa as u8), None).unwrap();
        }
        // All of block 0 turns stale.
        for lsa in 0..4u32 {
            core.write(lsa, &payload(0xB0 | lsa as u8), None).unwrap();
        }
        let erased = core.collect(0).unwrap();
        assert_eq!(erased, 0);
        assert!(core.vblocks.free_blocks(0).contains(&0));

        let mut buf = [0u8; 4];
        for lsa in 4..16u32 {
            core.read(lsa, &mut buf).unwrap();
            assert_eq!(buf, *payload(lsa as u8).as_slice(), "lsa {lsa} lost by gc");
        }
        for lsa in 0..4u32 {
            core.read(lsa, &mut buf).unwrap();
            assert_eq!(buf, *payload(0xB0 | lsa as u8).as_slice());
        }
        core.check_map_consistency();
        core.check_invalid_counters();
        core.check_bucket_membership();
    }

    #[test]
    fn trim_deallocates_and_reads_back_zeros() {
        let (mut core, _nand) = classic_core(1, 4, 4, 0, 16);
        for lsa in 0..8u32 {
            core.write(lsa, &payload(lsa as u8 + 1), None).unwrap();
        }
        core.trim(2..6).unwrap();
        let mut buf = [1u8; 4];
        core.read(3, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 4]);
        core.read(1, &mut buf).unwrap();
        assert_eq!(buf, *payload(2).as_slice());
        // Four slices of block 0/1 turned stale.
        assert_eq!(
            core.vblocks.block(0, 0).invalid_slices() + core.vblocks.block(0, 1).invalid_slices(),
            4
        );
        // Trimming unmapped slices is a no-op.
        core.trim(2..6).unwrap();
        core.check_map_consistency();
        core.check_invalid_counters();
        core.check_bucket_membership();
    }

    #[test]
    fn plain_writes_round_robin_the_dies() {
        let (mut core, _nand) = classic_core(2, 4, 4, 0, 16);
        for lsa in 0..4u32 {
            core.write(lsa, &payload(lsa as u8), None).unwrap();
        }
        let dies: Vec<u16> = (0..4u32)
            .map(|lsa| core.config.geometry.vsa_to_vorg(core.maps.vsa_of(lsa)).die)
            .collect();
        assert_eq!(dies, vec![0, 1, 0, 1]);
    }

    #[test]
    fn host_argument_errors() {
        let (mut core, _nand) = classic_core(1, 4, 4, 0, 8);
        let mut buf = [0u8; 4];
        assert_eq!(
            core.read(8, &mut buf).unwrap_err().errno(),
            crate::error::Errno::OutOfRange
        );
        assert_eq!(
            core.write(0, &[0u8; 3], None).unwrap_err().errno(),
            crate::error::Errno::InvalidArgs
        );
        assert_eq!(
            core.trim(0..9).unwrap_err().errno(),
            crate::error::Errno::OutOfRange
        );
        assert_eq!(
            core.write(0, &payload(1), Some(PlacementSpec::default()))
                .unwrap_err()
                .errno(),
            crate::error::Errno::FdpDisabled
        );
    }

    #[test]
    fn gc_if_needed_respects_the_reserve() {
        let (mut core, _nand) = classic_core(1, 5, 4, 1, 12);
        for lsa in 0..12u32 {
            core.write(lsa, &payload(lsa as u8), None).unwrap();
        }
        assert!(!core.gc_if_needed(0).unwrap());
        // Consume the last non-reserved block, then the pool is at the
        // reserve and a pass must run.
        for lsa in 0..4u32 {
            core.write(lsa, &payload(0xC0 | lsa as u8), None).unwrap();
        }
        assert_eq!(core.vblocks.free_count(0), 1);
        assert!(core.gc_if_needed(0).unwrap());
        assert_eq!(core.vblocks.free_count(0), 2);
        core.check_map_consistency();
        core.check_invalid_counters();
        core.check_bucket_membership();
    }

    #[test]
    fn sustained_overwrites_survive_inline_gc() {
        let (mut core, _nand) = classic_core(2, 8, 4, 1, 24);
        // Several times the device capacity, hot/cold skewed.
        let mut shadow = vec![None; 24];
        for round in 0..12u32 {
            for i in 0..12u32 {
                let lsa = (i * 7 + round) % 24;
                let tag = (round * 31 + lsa) as u8;
                core.write(lsa, &payload(tag), None).unwrap();
                shadow[lsa as usize] = Some(tag);
            }
        }
        let mut buf = [0u8; 4];
        for lsa in 0..24u32 {
            core.read(lsa, &mut buf).unwrap();
            match shadow[lsa as usize] {
                Some(tag) => assert_eq!(buf, *payload(tag).as_slice(), "lsa {lsa} corrupt"),
                None => assert_eq!(buf, [0u8; 4]),
            }
        }
        core.check_map_consistency();
        core.check_invalid_counters();
        core.check_bucket_membership();
        // Migration only ever adds physical traffic.
        assert!(WAF_STATS.physical() >= WAF_STATS.logical());
    }

    #[test]
    fn flush_leaves_no_request_in_flight() {
        let (mut core, _nand) = classic_core(1, 4, 4, 0, 16);
        for lsa in 0..4u32 {
            core.write(lsa, &payload(lsa as u8), None).unwrap();
        }
        core.flush().unwrap();
        assert!(core.req_pool.all_free());
    }

    mod fdp {
        use super::*;
        use crate::config::{FdpConfig, RuhType};

        fn fdp_core() -> (FtlCore, Arc<MemNand>) {
            init_logger();
            let geometry = Geometry {
                dies: 2,
                blocks_per_die: 8,
                pages_per_block: 2,
                bytes_per_slice: 4,
            };
            let config = FtlConfig {
                user_slices: geometry.total_slices(),
                reserved_free_blocks: 0,
                req_pool_size: 16,
                temp_buf_entries: 2,
                geometry,
            };
            let fdp = FdpConfig {
                nruh: 2,
                nrg: 1,
                rgif: 0,
                rusize_blocks: 2,
                ruht: RuhType::InitiallyIsolated,
                reserved_free_rus: 1,
                namespaces: vec![vec![0, 1]],
            };
            let nand = MemNand::new(geometry);
            let core = FtlCore::new(config, Some(fdp), nand.clone()).unwrap();
            (core, nand)
        }

        #[test]
        fn writes_land_in_the_resolved_handles_ru() {
            let (mut core, _nand) = fdp_core();
            let active = core.endgrp().active_ru(0, 1);
            core.write(
                5,
                &payload(0x55),
                Some(PlacementSpec { nsid: 0, ph: 1, rg: 0 }),
            )
            .unwrap();
            let vorg = core.config.geometry.vsa_to_vorg(core.maps.vsa_of(5));
            let ru_blocks = core.endgrp().ru(0, active).blocks().to_vec();
            assert!(ru_blocks
                .iter()
                .any(|addr| addr.die == vorg.die && addr.block == vorg.block));
            assert_eq!(core.endgrp().ru(0, active).current_slice(), 1);
        }

        #[test]
        fn hintless_writes_use_the_default_handle() {
            let (mut core, _nand) = fdp_core();
            let active = core.endgrp().active_ru(0, 0);
            core.write(3, &payload(3), None).unwrap();
            let vorg = core.config.geometry.vsa_to_vorg(core.maps.vsa_of(3));
            let ru_blocks = core.endgrp().ru(0, active).blocks().to_vec();
            assert!(ru_blocks
                .iter()
                .any(|addr| addr.die == vorg.die && addr.block == vorg.block));
        }

        #[test]
        fn placement_errors_surface_to_the_host() {
            let (mut core, _nand) = fdp_core();
            assert_eq!(
                core.write(0, &payload(0), Some(PlacementSpec { nsid: 0, ph: 7, rg: 0 }))
                    .unwrap_err()
                    .errno(),
                crate::error::Errno::InvalidHandle
            );
            assert_eq!(
                core.write(0, &payload(0), Some(PlacementSpec { nsid: 0, ph: 0, rg: 3 }))
                    .unwrap_err()
                    .errno(),
                crate::error::Errno::OutOfRange
            );
        }

        #[test]
        fn accounting_tracks_host_and_migration_traffic() {
            let (mut core, _nand) = fdp_core();
            for i in 0..12u32 {
                core.write(i, &payload(i as u8), Some(PlacementSpec::default())).unwrap();
            }
            assert_eq!(core.endgrp().hbmw(), 48);
            assert_eq!(core.endgrp().mbmw(), 48);
            // Overwrites then GC: media writes pull ahead of host writes.
            for i in 0..4u32 {
                core.write(i, &payload(0xD0 | i as u8), Some(PlacementSpec::default())).unwrap();
            }
            core.collect_fdp(0, 0).unwrap();
            assert_eq!(core.endgrp().hbmw(), 64);
            assert!(core.endgrp().mbmw() >= 64);
            assert!(core.endgrp().mbe() > 0);
            core.check_ru_exclusivity();
            core.check_invalid_counters();
        }

        #[test]
        fn gc_if_needed_fdp_watches_the_free_queue() {
            let (mut core, _nand) = fdp_core();
            assert!(!core.gc_if_needed_fdp(0, 0).unwrap());
            // Burn through free RUs until one above the reserve is left.
            let mut lsa = 0u32;
            while core.endgrp().free_ru_count(0) > core.endgrp().reserved_free_rus() + 1 {
                core.write(lsa, &payload(lsa as u8), Some(PlacementSpec::default())).unwrap();
                lsa += 1;
            }
            // Stale an entire retired RU so the pass has a cheap victim;
            // the rewrites land the free queue exactly at the reserve.
            for i in 0..4u32 {
                core.write(i, &payload(0xE0 | i as u8), Some(PlacementSpec::default())).unwrap();
            }
            assert_eq!(core.endgrp().free_ru_count(0), core.endgrp().reserved_free_rus());
            assert!(core.gc_if_needed_fdp(0, 0).unwrap());
            assert!(core.endgrp().free_ru_count(0) > core.endgrp().reserved_free_rus());
            core.check_map_consistency();
            core.check_ru_exclusivity();
        }
    }
}
