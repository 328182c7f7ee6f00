//! Slice address arithmetic.
//!
//! Three address spaces meet here: logical slice addresses (host-visible),
//! virtual slice addresses (device-level), and virtual origins, the
//! (die, block, page) triple a VSA decomposes into. Consecutive VSAs
//! interleave across dies so that sequential traffic spreads over
//! independently schedulable units.

use crate::config::Geometry;

/// Logical slice address.
pub type Lsa = u32;
/// Virtual slice address.
pub type Vsa = u32;

/// Sentinel for an unmapped logical slice.
pub const LSA_NONE: Lsa = Lsa::MAX;
/// Sentinel for an unmapped virtual slice.
pub const VSA_NONE: Vsa = Vsa::MAX;
/// Sentinel for list links and absent block indices.
pub const BLOCK_NONE: u16 = u16::MAX;

/// Virtual origin of a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Vorg {
    pub die: u16,
    pub block: u16,
    pub page: u16,
}

impl Geometry {
    /// Translate a virtual origin to the VSA holding that page's slice.
    ///
    /// The origin must lie within the geometry.
    pub fn vorg_to_vsa(&self, vorg: Vorg) -> Vsa {
        debug_assert!((vorg.die as usize) < self.dies);
        debug_assert!((vorg.block as usize) < self.blocks_per_die);
        debug_assert!((vorg.page as usize) < self.pages_per_block);
        let linear = vorg.die as usize
            + self.dies * (vorg.block as usize * self.pages_per_block + vorg.page as usize);
        linear as Vsa
    }

    /// Decompose a VSA into its virtual origin.
    ///
    /// The VSA must be within the slice address space; sentinels are not
    /// translatable.
    pub fn vsa_to_vorg(&self, vsa: Vsa) -> Vorg {
        debug_assert!((vsa as usize) < self.total_slices());
        let die = vsa as usize % self.dies;
        let rest = vsa as usize / self.dies;
        Vorg {
            die: die as u16,
            block: (rest / self.pages_per_block) as u16,
            page: (rest % self.pages_per_block) as u16,
        }
    }
}
