//! Write-amplification statistics.

use core::sync::atomic::{AtomicU64, Ordering};
use lazy_static::lazy_static;

/// Tracks host-issued bytes against bytes actually programmed to NAND.
/// GC migration traffic counts on the physical side only, which is what
/// pushes the ratio above 1.0.
pub struct WafStats {
    logical_bytes: AtomicU64,
    physical_bytes: AtomicU64,
}

impl WafStats {
    pub const fn new() -> Self {
        Self {
            logical_bytes: AtomicU64::new(0),
            physical_bytes: AtomicU64::new(0),
        }
    }

    pub fn add_logical(&self, bytes: u64) {
        self.logical_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_physical(&self, bytes: u64) {
        self.physical_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn logical(&self) -> u64 {
        self.logical_bytes.load(Ordering::Relaxed)
    }

    pub fn physical(&self) -> u64 {
        self.physical_bytes.load(Ordering::Relaxed)
    }

    /// Write amplification factor; 0.0 before any host write.
    pub fn waf(&self) -> f64 {
        let logical = self.logical() as f64;
        if logical > 0.0 {
            self.physical() as f64 / logical
        } else {
            0.0
        }
    }

    pub fn reset(&self) {
        self.logical_bytes.store(0, Ordering::Relaxed);
        self.physical_bytes.store(0, Ordering::Relaxed);
    }

    pub fn log_summary(&self) {
        log::info!(
            "waf: logical {} B, physical {} B, factor {:.3}",
            self.logical(),
            self.physical(),
            self.waf()
        );
    }
}

lazy_static! {
    /// Global write-amplification counters.
    pub static ref WAF_STATS: WafStats = WafStats::new();
}
