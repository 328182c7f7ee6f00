//! The flash-translation core of an open-source SSD firmware.
//!
//! The crate terminates at two boundaries: above, the NVMe I/O handler
//! drives [`FtlCore`] with reads, writes (optionally carrying an FDP
//! placement directive), trims and flushes; below, fully-populated
//! requests are handed to a [`NandScheduler`]. In between live the
//! logical/virtual slice maps, the per-die free and victim block lists,
//! the greedy garbage collector, and the Flexible Data Placement overlay
//! of reclaim groups, units and handles.
//!
//! Every cross-reference between the tables is an index into a
//! fixed-size arena, never an owning pointer, mirroring the statically
//! placed memory regions of the firmware this models. [`MemNand`]
//! provides an in-memory NAND array for tests and benches.

#![deny(unsafe_code)]

mod address;
mod config;
mod error;
mod fdp;
mod ftl;
mod gc;
mod map;
mod nand;
mod prelude;
mod stats;
mod vblock;

pub use self::{
    address::{Lsa, Vorg, Vsa, BLOCK_NONE, LSA_NONE, VSA_NONE},
    config::{FdpConfig, FtlConfig, Geometry, RuhType},
    error::{Errno, Error},
    fdp::{
        BlockAddr, EnduranceGroup, NamespaceFdp, ReclaimGroup, ReclaimUnit, RgId, RuAddr,
        RuHandle, RugId, RuhId, RUHID_NONE, RU_NONE,
    },
    ftl::{FtlCore, PlacementSpec},
    nand::{
        AddrMode, BlockSpace, DependencyCheck, EccMode, MemNand, NandReq, NandScheduler,
        ReqKind, ReqOptions, SliceBuf, SlotTag, TempBufId,
    },
    stats::{WafStats, WAF_STATS},
    vblock::AllocMode,
};
