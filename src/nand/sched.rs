//! The low-level scheduler boundary and an in-memory NAND model.

use std::sync::Arc;

use hashbrown::HashSet;
use spin::Mutex;

use crate::config::Geometry;
use crate::nand::req::{NandReq, ReqKind};
use crate::prelude::*;

/// The consumer of fully-populated requests.
///
/// Contract: completions of a dependent read/write pair are delivered in
/// order; a request whose `blocking_slot` names a read must not start
/// before that read completes. The translation core never waits on a
/// specific request; it observes completion through the request pool.
pub trait NandScheduler {
    fn submit(&self, req: &NandReq) -> Result<()>;

    /// Admit everything queued but not yet issued.
    fn flush(&self) -> Result<()>;
}

struct MemNandInner {
    geometry: Geometry,
    /// Per-VSA payload; `None` means erased.
    slices: Vec<Option<Vec<u8>>>,
    erase_counts: Vec<u32>,
    programmed_slices: u64,
    erased_blocks: u64,
    failing_erases: HashSet<(u16, u16)>,
}

/// An in-memory NAND array that completes every request inline, which
/// trivially satisfies the read-before-write ordering contract. Reads of
/// erased slices return the deallocated pattern (zeros); programming a
/// slice twice without an erase in between is rejected, as real NAND
/// would corrupt it.
pub struct MemNand {
    inner: Mutex<MemNandInner>,
}

impl MemNand {
    pub fn new(geometry: Geometry) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(MemNandInner {
                slices: vec![None; geometry.total_slices()],
                erase_counts: vec![0; geometry.total_blocks()],
                programmed_slices: 0,
                erased_blocks: 0,
                failing_erases: HashSet::new(),
                geometry,
            }),
        })
    }

    /// Make every erase of (die, block) fail from now on.
    pub fn inject_erase_failure(&self, die: u16, block: u16) {
        self.inner.lock().failing_erases.insert((die, block));
    }

    pub fn clear_erase_failure(&self, die: u16, block: u16) {
        self.inner.lock().failing_erases.remove(&(die, block));
    }

    /// Programmed payload of a slice, `None` if erased.
    pub fn slice(&self, vsa: crate::address::Vsa) -> Option<Vec<u8>> {
        self.inner.lock().slices[vsa as usize].clone()
    }

    pub fn erase_count(&self, die: u16, block: u16) -> u32 {
        let inner = self.inner.lock();
        inner.erase_counts[die as usize * inner.geometry.blocks_per_die + block as usize]
    }

    pub fn programmed_slices(&self) -> u64 {
        self.inner.lock().programmed_slices
    }

    pub fn erased_blocks(&self) -> u64 {
        self.inner.lock().erased_blocks
    }
}

impl NandScheduler for MemNand {
    fn submit(&self, req: &NandReq) -> Result<()> {
        let mut inner = self.inner.lock();
        match &req.kind {
            ReqKind::Read { vsa, .. } => {
                let buf = req
                    .buf
                    .as_ref()
                    .ok_or(Error::with_msg(InvalidArgs, "read without a data buffer"))?;
                match &inner.slices[*vsa as usize] {
                    Some(data) => buf.copy_from(data),
                    None => buf.copy_from(&vec![0u8; buf.len()]),
                }
                Ok(())
            }
            ReqKind::Write { vsa, .. } => {
                let buf = req
                    .buf
                    .as_ref()
                    .ok_or(Error::with_msg(InvalidArgs, "write without a data buffer"))?;
                if inner.slices[*vsa as usize].is_some() {
                    return_errno_with_msg!(IoFailed, "program of an unerased slice");
                }
                let mut data = vec![0u8; buf.len()];
                buf.copy_to(&mut data);
                inner.slices[*vsa as usize] = Some(data);
                inner.programmed_slices += 1;
                Ok(())
            }
            ReqKind::Erase { die, block } => {
                if inner.failing_erases.contains(&(*die, *block)) {
                    return_errno_with_msg!(BadBlock, "erase failed");
                }
                let geometry = inner.geometry;
                for page in 0..geometry.pages_per_block as u16 {
                    let vsa = geometry.vorg_to_vsa(crate::address::Vorg {
                        die: *die,
                        block: *block,
                        page,
                    });
                    inner.slices[vsa as usize] = None;
                }
                let block_idx = *die as usize * geometry.blocks_per_die + *block as usize;
                inner.erase_counts[block_idx] += 1;
                inner.erased_blocks += 1;
                Ok(())
            }
        }
    }

    fn flush(&self) -> Result<()> {
        // Inline completion leaves nothing queued.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Vorg;
    use crate::nand::req::{ReqOptions, SliceBuf};

    fn geometry() -> Geometry {
        Geometry {
            dies: 2,
            blocks_per_die: 4,
            pages_per_block: 4,
            bytes_per_slice: 8,
        }
    }

    fn write_req(vsa: u32, payload: &[u8]) -> NandReq {
        NandReq {
            kind: ReqKind::Write { lsa: 0, vsa },
            opts: ReqOptions::host(),
            buf: Some(SliceBuf::from_slice(payload)),
            temp_entry: None,
            blocking_slot: None,
        }
    }

    #[test]
    fn program_read_erase_cycle() {
        let geometry = geometry();
        let nand = MemNand::new(geometry);
        let vsa = geometry.vorg_to_vsa(Vorg { die: 1, block: 2, page: 3 });

        nand.submit(&write_req(vsa, b"payload!")).unwrap();
        assert_eq!(nand.slice(vsa).unwrap(), b"payload!");

        let readback = SliceBuf::new(8);
        nand.submit(&NandReq {
            kind: ReqKind::Read { lsa: 0, vsa },
            opts: ReqOptions::host(),
            buf: Some(readback.clone()),
            temp_entry: None,
            blocking_slot: None,
        })
        .unwrap();
        assert_eq!(readback.to_vec(), b"payload!");

        nand.submit(&NandReq {
            kind: ReqKind::Erase { die: 1, block: 2 },
            opts: ReqOptions::erase(),
            buf: None,
            temp_entry: None,
            blocking_slot: None,
        })
        .unwrap();
        assert!(nand.slice(vsa).is_none());
        assert_eq!(nand.erase_count(1, 2), 1);
    }

    #[test]
    fn double_program_is_rejected() {
        let geometry = geometry();
        let nand = MemNand::new(geometry);
        let vsa = geometry.vorg_to_vsa(Vorg { die: 0, block: 0, page: 0 });
        nand.submit(&write_req(vsa, b"11111111")).unwrap();
        let err = nand.submit(&write_req(vsa, b"22222222")).unwrap_err();
        assert_eq!(err.errno(), crate::error::Errno::IoFailed);
    }

    #[test]
    fn erased_slice_reads_deallocated_pattern() {
        let geometry = geometry();
        let nand = MemNand::new(geometry);
        let buf = SliceBuf::from_slice(b"junkjunk");
        nand.submit(&NandReq {
            kind: ReqKind::Read { lsa: 0, vsa: 0 },
            opts: ReqOptions::host(),
            buf: Some(buf.clone()),
            temp_entry: None,
            blocking_slot: None,
        })
        .unwrap();
        assert_eq!(buf.to_vec(), vec![0u8; 8]);
    }

    #[test]
    fn injected_erase_failure() {
        let geometry = geometry();
        let nand = MemNand::new(geometry);
        nand.inject_erase_failure(0, 1);
        let req = NandReq {
            kind: ReqKind::Erase { die: 0, block: 1 },
            opts: ReqOptions::erase(),
            buf: None,
            temp_entry: None,
            blocking_slot: None,
        };
        assert_eq!(
            nand.submit(&req).unwrap_err().errno(),
            crate::error::Errno::BadBlock
        );
        nand.clear_erase_failure(0, 1);
        nand.submit(&req).unwrap();
    }
}
