use serde::{Deserialize, Serialize};

/// FTL tunables, fixed at namespace initialization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FtlConfig {
    /// Free-line watermark below which GC runs opportunistically after a
    /// host write.
    pub gc_thres_lines: u32,
    /// Free-line watermark at or below which GC runs in the foreground,
    /// blocking the write path until enough lines are reclaimed.
    pub gc_thres_lines_high: u32,
    /// Charge GC copy traffic to the NAND timeline. When off, collection
    /// reshuffles mappings without consuming simulated device time.
    pub enable_gc_delay: bool,
    /// Over-provisioned share of the physical capacity (0.07 = 7%).
    pub op_area_pcent: f64,
}

impl Default for FtlConfig {
    fn default() -> Self {
        FtlConfig {
            gc_thres_lines: 4,
            gc_thres_lines_high: 2,
            enable_gc_delay: true,
            op_area_pcent: 0.07,
        }
    }
}

impl FtlConfig {
    /// Physical-to-logical capacity ratio in percent.
    pub fn pba_pcent(&self) -> u64 {
        ((1.0 + self.op_area_pcent) * 100.0).round() as u64
    }
}
