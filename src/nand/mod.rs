//! The boundary to the low-level NAND request scheduler: request slots,
//! temp data buffers, and the scheduler trait with an in-memory model.

mod req;
mod sched;
mod temp_buf;

pub use self::req::{
    AddrMode, BlockSpace, DependencyCheck, EccMode, NandReq, ReqKind, ReqOptions, ReqPool,
    SliceBuf, SlotTag,
};
pub use self::sched::{MemNand, NandScheduler};
pub use self::temp_buf::{TempBufId, TempBufPool};
