//! Garbage collection over Reclaim Units.
//!
//! The FDP collector works per (group, handle): it drains a victim RU
//! chosen under the handle's isolation policy, moving live slices into
//! the handle's destination RU through the same temp-buffer pairing the
//! per-die collector uses. The handle's active RU doubles as the target
//! while it has room; once it fills, it retires into its victim bucket
//! and a fresh RU takes over from the free queue. The victim's blocks
//! are erased together and the RU cycles back to the free queue.

use crate::address::{Vorg, LSA_NONE};
use crate::ftl::FtlCore;
use crate::prelude::*;
use crate::vblock::AllocMode;

use super::{RgId, RugId, RuhId, RU_NONE};

impl FtlCore {
    /// Reclaim one victim RU for the handle. Returns the handle's active
    /// RU afterwards, already installed as its destination.
    pub fn collect_fdp(&mut self, rg: RgId, ruh: RuhId) -> Result<RugId> {
        let bytes_per_slice = self.config.geometry.bytes_per_slice as u64;
        let slices_per_ru;
        let rusize_blocks;
        let victim;
        let mut dst_rug;
        let mut dst_cursor;
        {
            let Some(endgrp) = self.fdp.as_mut() else {
                return_errno_with_msg!(FdpDisabled, "fdp gc without an endurance group");
            };
            slices_per_ru = endgrp.slices_per_ru();
            rusize_blocks = endgrp.rusize_blocks();

            // A handle arrives here either mid-stream, its active RU still
            // writable, or from the write path with the active RU full and
            // already bucketed. Only the latter needs a fresh destination.
            let active = endgrp.active_ru(rg, ruh);
            let healthy = active != RU_NONE
                && (endgrp.ru(rg, active).current_slice() as usize) < slices_per_ru;
            if healthy {
                dst_rug = active;
            } else {
                let Some(target) = endgrp.get_free_ru(rg, AllocMode::ForGc) else {
                    return_errno_with_msg!(NoVictim, "free RU queue exhausted");
                };
                dst_rug = target;
            }
            victim = match endgrp.get_victim_ru(rg, ruh) {
                Ok(victim) => victim,
                Err(e) => {
                    if !healthy {
                        endgrp.put_free_ru(rg, dst_rug);
                    }
                    return Err(e);
                }
            };
            if !healthy {
                endgrp.activate(rg, ruh, dst_rug);
            }
            dst_cursor = endgrp.ru(rg, dst_rug).current_slice() as usize;
        }
        debug!("fdp gc: rg {rg} ruh {ruh} victim RU {victim} -> target RU {dst_rug}");

        let victim_full =
            self.endgrp().ru(rg, victim).invalid_slices() as usize == slices_per_ru;
        let mut migrated = 0u64;
        if !victim_full {
            for slice in 0..slices_per_ru {
                let src_vorg = self.endgrp().ru_slice_to_vorg(rg, victim, slice);
                let src_vsa = self.config.geometry.vorg_to_vsa(src_vorg);
                let lsa = self.maps.lsa_of(src_vsa);
                if lsa == LSA_NONE || self.maps.vsa_of(lsa) != src_vsa {
                    continue; // stale slice
                }
                if dst_cursor == slices_per_ru {
                    // Destination filled mid-migration: retire it and pull
                    // the next free RU for the handle.
                    let Some(endgrp) = self.fdp.as_mut() else {
                        return_errno_with_msg!(FdpDisabled, "fdp gc without an endurance group");
                    };
                    endgrp.finish_migration(rg, dst_rug, dst_cursor);
                    let k = endgrp.ru(rg, dst_rug).invalid_slices() as usize;
                    endgrp.put_victim_ru(rg, dst_rug, ruh, k);
                    let Some(next) = endgrp.get_free_ru(rg, AllocMode::ForGc) else {
                        return_errno_with_msg!(NoVictim, "free RU queue exhausted");
                    };
                    endgrp.activate(rg, ruh, next);
                    dst_rug = next;
                    dst_cursor = 0;
                }
                let dst_vorg = self.endgrp().ru_slice_to_vorg(rg, dst_rug, dst_cursor);
                let dst_vsa = self.config.geometry.vorg_to_vsa(dst_vorg);
                self.migrate_slice(lsa, src_vsa, dst_vsa)?;
                dst_cursor += 1;
                migrated += 1;
            }
        }

        // Erase every constituent block of the victim.
        let victim_blocks: Vec<Vorg> = (0..rusize_blocks)
            .map(|i| {
                self.endgrp()
                    .ru_slice_to_vorg(rg, victim, i * self.config.geometry.pages_per_block)
            })
            .collect();
        let mut bad_erase = false;
        for addr in &victim_blocks {
            match self.erase_block(addr.die, addr.block) {
                Ok(()) => self.vblocks.reset_after_erase(addr.die, addr.block),
                Err(e) if e.errno() == BadBlock => {
                    warn!(
                        "fdp gc: die {} block {} failed erase, RU {victim} retired",
                        addr.die, addr.block
                    );
                    self.vblocks.mark_bad(addr.die, addr.block);
                    bad_erase = true;
                }
                Err(e) => return Err(e),
            }
        }

        {
            // Safety: checked Some at entry.
            let endgrp = self.fdp.as_mut().unwrap();
            endgrp.add_migrated_bytes(migrated * bytes_per_slice);
            endgrp.finish_migration(rg, dst_rug, dst_cursor);
            if bad_erase {
                endgrp.retire_ru(rg, victim);
            } else {
                let runs = endgrp.runs();
                endgrp.reset_ru_after_erase(rg, victim);
                endgrp.put_free_ru(rg, victim);
                endgrp.add_erased_bytes(runs);
            }
            // A destination that filled on the last copy still needs the
            // handle re-armed; the just-erased victim is available now.
            if dst_cursor == slices_per_ru {
                let k = endgrp.ru(rg, dst_rug).invalid_slices() as usize;
                endgrp.put_victim_ru(rg, dst_rug, ruh, k);
                let Some(next) = endgrp.get_free_ru(rg, AllocMode::ForGc) else {
                    return_errno_with_msg!(NoVictim, "free RU queue exhausted");
                };
                endgrp.activate(rg, ruh, next);
                dst_rug = next;
            }
        }
        Ok(dst_rug)
    }
}
