//! Per-die garbage collection.
//!
//! One pass pops the fullest victim bucket, migrates whatever is still
//! live through a temp buffer, erases the victim and returns it to the
//! free FIFO. A victim whose every slice is stale skips the migration
//! loop entirely. Erase failures demote the block to bad and the pass
//! restarts with the next victim.

use crate::address::{Lsa, Vorg, Vsa, LSA_NONE};
use crate::ftl::FtlCore;
use crate::nand::{NandReq, ReqKind, ReqOptions};
use crate::prelude::*;
use crate::stats::WAF_STATS;
use crate::vblock::AllocMode;

impl FtlCore {
    /// Run one GC pass on the die. Returns the erased block.
    ///
    /// Fails with `NoVictim` when every victim bucket is empty, which the
    /// top-level loop treats as device end-of-life.
    pub fn collect(&mut self, die: u16) -> Result<u16> {
        loop {
            let victim = self.vblocks.pop_best_victim(die)?;
            let invalid = self.vblocks.block(die, victim).invalid_slices() as usize;
            let slices_per_block = self.config.geometry.slices_per_block();
            debug!("gc: die {die} victim block {victim}, {invalid}/{slices_per_block} invalid");

            if invalid != slices_per_block {
                for page in 0..slices_per_block as u16 {
                    let vorg = Vorg { die, block: victim, page };
                    let vsa = self.config.geometry.vorg_to_vsa(vorg);
                    let lsa = self.maps.lsa_of(vsa);
                    if lsa == LSA_NONE || self.maps.vsa_of(lsa) != vsa {
                        continue; // stale slice
                    }
                    let Some(dst) = self.vblocks.alloc_slice(die, AllocMode::ForGc) else {
                        return_errno_with_msg!(NoVictim, "no free slice for gc copy");
                    };
                    debug_assert_ne!(dst.block, victim);
                    let dst_vsa = self.config.geometry.vorg_to_vsa(dst);
                    self.migrate_slice(lsa, vsa, dst_vsa)?;
                }
            }

            match self.erase_block(die, victim) {
                Ok(()) => {
                    self.vblocks.on_erase_success(die, victim);
                    return Ok(victim);
                }
                Err(e) if e.errno() == BadBlock => {
                    warn!("gc: die {die} block {victim} failed erase, marked bad");
                    self.vblocks.mark_bad(die, victim);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Copy one live slice from `src_vsa` to `dst_vsa` through a temp
    /// buffer. The write is linked behind its read via the buffer entry,
    /// and the maps are rebound on completion; the displaced slice needs
    /// no invalidation accounting, it dies with the victim's erase.
    pub(crate) fn migrate_slice(&mut self, lsa: Lsa, src_vsa: Vsa, dst_vsa: Vsa) -> Result<()> {
        let entry = self.temp_bufs.alloc()?;
        let buf = self.temp_bufs.buf(entry);

        let read_tag = self.req_pool.acquire()?;
        self.temp_bufs.set_blocking_req(entry, read_tag);
        self.req_pool.set(
            read_tag,
            NandReq {
                kind: ReqKind::Read { lsa, vsa: src_vsa },
                opts: ReqOptions::gc(),
                buf: Some(buf.clone()),
                temp_entry: Some(entry),
                blocking_slot: None,
            },
        );
        if let Err(e) = self.dispatch(read_tag) {
            self.temp_bufs.complete(entry);
            return Err(e);
        }

        let write_tag = self.req_pool.acquire()?;
        self.temp_bufs.set_blocking_req(entry, write_tag);
        self.req_pool.set(
            write_tag,
            NandReq {
                kind: ReqKind::Write { lsa, vsa: dst_vsa },
                opts: ReqOptions::gc(),
                buf: Some(buf),
                temp_entry: Some(entry),
                blocking_slot: Some(read_tag),
            },
        );
        let res = self.dispatch(write_tag);
        self.temp_bufs.complete(entry);
        res?;

        self.maps.record_write(lsa, dst_vsa);
        WAF_STATS.add_physical(self.config.geometry.bytes_per_slice as u64);
        Ok(())
    }

    pub(crate) fn erase_block(&mut self, die: u16, block: u16) -> Result<()> {
        let tag = self.req_pool.acquire()?;
        self.req_pool.set(
            tag,
            NandReq {
                kind: ReqKind::Erase { die, block },
                opts: ReqOptions::erase(),
                buf: None,
                temp_entry: None,
                blocking_slot: None,
            },
        );
        self.dispatch(tag)
    }
}
