//! NAND geometry: the user-facing [`SsdConfig`] and the fully derived
//! [`SsdParams`] every other component consumes.
//!
//! Terminology, bottom-up: a *page* (4 KiB) is the mapping unit, a *flash
//! page* the sensing unit (tR boundary), a *oneshot page* the program unit
//! (tPROG covers all bit-planes of a wordline), a *block* the erase unit, a
//! *LUN* (die) the operation unit, and a *channel* the transfer unit between
//! controller and dies.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ppa::Ppa;

pub const KB4: u64 = 4096;

/// Number of bit-planes a multi-level cell can expose (LSB/MSB/CSB).
pub const MAX_CELL_TYPES: usize = 3;

#[derive(Debug, Error)]
pub enum NandError {
    #[error("{nchs} channels cannot be split evenly into {nparts} partitions")]
    PartitionSplit { nchs: u32, nparts: u32 },
    #[error("oneshot/flash page sizes must be multiples of the mapping page size")]
    PageGrouping,
    #[error("multi-plane geometries are not supported; line sizing assumes one plane per LUN")]
    MultiPlane,
}

/// NAND cell mode; doubles as the number of bit-planes per physical cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellMode {
    Slc,
    Mlc,
    Tlc,
}

impl CellMode {
    pub fn bits_per_cell(self) -> u32 {
        match self {
            CellMode::Slc => 1,
            CellMode::Mlc => 2,
            CellMode::Tlc => 3,
        }
    }
}

/// Static device description, loaded once at namespace initialization.
///
/// All latencies are nanoseconds, all bandwidths MiB/s. The default profile
/// mirrors a mid-range MLC drive and is what the integration tests override
/// piecemeal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SsdConfig {
    pub secsz: u32,
    pub secs_per_pg: u32,
    pub nchs: u32,
    pub luns_per_ch: u32,
    pub pls_per_lun: u32,
    pub blks_per_pl: u32,
    pub cell_mode: CellMode,

    pub oneshot_page_size: u32,
    pub flash_page_size: u32,

    /// Unit size of an NVMe write; transfer sizes are multiples of it.
    pub write_unit_size: u32,
    pub write_early_completion: bool,

    pub pg_4kb_rd_lat: [u64; MAX_CELL_TYPES],
    pub pg_rd_lat: [u64; MAX_CELL_TYPES],
    pub pg_wr_lat: u64,
    pub blk_er_lat: u64,
    pub max_ch_xfer_size: u64,

    pub fw_4kb_rd_lat: u64,
    pub fw_rd_lat: u64,
    pub fw_ch_xfer_lat: u64,
    pub fw_wbuf_lat0: u64,
    pub fw_wbuf_lat1: u64,

    pub ch_bandwidth: u64,
    pub pcie_bandwidth: u64,

    pub write_buffer_size: u64,
}

impl Default for SsdConfig {
    fn default() -> Self {
        SsdConfig {
            secsz: 512,
            secs_per_pg: 8,
            nchs: 8,
            luns_per_ch: 2,
            pls_per_lun: 1,
            blks_per_pl: 8192,
            cell_mode: CellMode::Mlc,
            oneshot_page_size: 32 * 1024,
            flash_page_size: 32 * 1024,
            write_unit_size: 512,
            write_early_completion: true,
            pg_4kb_rd_lat: [35_760, 53_470, 53_470],
            pg_rd_lat: [36_013, 53_708, 53_708],
            pg_wr_lat: 185_000,
            blk_er_lat: 3_500_000,
            max_ch_xfer_size: 16 * 1024,
            fw_4kb_rd_lat: 21_500,
            fw_rd_lat: 30_490,
            fw_ch_xfer_lat: 413,
            fw_wbuf_lat0: 4_000,
            fw_wbuf_lat1: 460,
            ch_bandwidth: 800,
            pcie_bandwidth: 3_360,
            write_buffer_size: 10 * 1024 * 1024,
        }
    }
}

/// Geometry and timing parameters of one FTL partition, with every derived
/// count precomputed. Immutable after construction.
#[derive(Clone, Debug)]
pub struct SsdParams {
    pub secsz: u32,
    pub secs_per_pg: u32,
    /// Mapping unit size in bytes.
    pub pgsz: u32,
    pub pgs_per_flashpg: u32,
    pub flashpgs_per_blk: u32,
    pub pgs_per_oneshotpg: u32,
    pub oneshotpgs_per_blk: u32,
    pub pgs_per_blk: u32,
    pub blks_per_pl: u32,
    pub pls_per_lun: u32,
    pub luns_per_ch: u32,
    pub nchs: u32,
    pub cell_mode: CellMode,

    pub write_unit_size: u32,
    pub write_early_completion: bool,

    pub pg_4kb_rd_lat: [u64; MAX_CELL_TYPES],
    pub pg_rd_lat: [u64; MAX_CELL_TYPES],
    pub pg_wr_lat: u64,
    pub blk_er_lat: u64,
    pub max_ch_xfer_size: u64,

    pub fw_4kb_rd_lat: u64,
    pub fw_rd_lat: u64,
    pub fw_ch_xfer_lat: u64,
    pub fw_wbuf_lat0: u64,
    pub fw_wbuf_lat1: u64,

    pub ch_bandwidth: u64,
    pub pcie_bandwidth: u64,

    pub secs_per_blk: u64,
    pub secs_per_pl: u64,
    pub secs_per_lun: u64,
    pub secs_per_ch: u64,
    pub tt_secs: u64,

    pub pgs_per_pl: u64,
    pub pgs_per_lun: u64,
    pub pgs_per_ch: u64,
    pub tt_pgs: u64,

    pub blks_per_lun: u64,
    pub blks_per_ch: u64,
    pub tt_blks: u64,

    pub pls_per_ch: u64,
    pub tt_pls: u64,
    pub tt_luns: u64,

    pub secs_per_line: u64,
    pub pgs_per_line: u64,
    pub blks_per_line: u64,
    pub tt_lines: u64,

    pub write_buffer_size: u64,
}

impl SsdParams {
    /// Derives one partition's parameters. `capacity` is the *physical* byte
    /// capacity of the whole device; channels and capacity are split evenly
    /// across `nparts` partitions and the per-block page count falls out of
    /// the per-partition share.
    pub fn new(cfg: &SsdConfig, capacity: u64, nparts: u32) -> Result<SsdParams, NandError> {
        if nparts == 0 || cfg.nchs % nparts != 0 {
            return Err(NandError::PartitionSplit {
                nchs: cfg.nchs,
                nparts,
            });
        }
        if cfg.pls_per_lun != 1 {
            return Err(NandError::MultiPlane);
        }

        let pgsz = cfg.secsz * cfg.secs_per_pg;
        if cfg.oneshot_page_size % pgsz != 0
            || cfg.flash_page_size % pgsz != 0
            || cfg.oneshot_page_size % cfg.flash_page_size != 0
        {
            return Err(NandError::PageGrouping);
        }

        let nchs = cfg.nchs / nparts;
        let capacity = capacity / u64::from(nparts);

        let blk_units =
            u64::from(cfg.blks_per_pl) * u64::from(cfg.pls_per_lun) * u64::from(cfg.luns_per_ch) * u64::from(nchs);
        let blk_size = capacity.div_ceil(blk_units);

        let pgs_per_oneshotpg = cfg.oneshot_page_size / pgsz;
        let oneshotpgs_per_blk = blk_size.div_ceil(u64::from(cfg.oneshot_page_size)) as u32;
        let pgs_per_flashpg = cfg.flash_page_size / pgsz;
        let flashpgs_per_blk = (cfg.oneshot_page_size / cfg.flash_page_size) * oneshotpgs_per_blk;
        let pgs_per_blk = pgs_per_oneshotpg * oneshotpgs_per_blk;

        let secs_per_blk = u64::from(cfg.secs_per_pg) * u64::from(pgs_per_blk);
        let secs_per_pl = secs_per_blk * u64::from(cfg.blks_per_pl);
        let secs_per_lun = secs_per_pl * u64::from(cfg.pls_per_lun);
        let secs_per_ch = secs_per_lun * u64::from(cfg.luns_per_ch);
        let tt_secs = secs_per_ch * u64::from(nchs);

        let pgs_per_pl = u64::from(pgs_per_blk) * u64::from(cfg.blks_per_pl);
        let pgs_per_lun = pgs_per_pl * u64::from(cfg.pls_per_lun);
        let pgs_per_ch = pgs_per_lun * u64::from(cfg.luns_per_ch);
        let tt_pgs = pgs_per_ch * u64::from(nchs);

        let blks_per_lun = u64::from(cfg.blks_per_pl) * u64::from(cfg.pls_per_lun);
        let blks_per_ch = blks_per_lun * u64::from(cfg.luns_per_ch);
        let tt_blks = blks_per_ch * u64::from(nchs);

        let pls_per_ch = u64::from(cfg.pls_per_lun) * u64::from(cfg.luns_per_ch);
        let tt_pls = pls_per_ch * u64::from(nchs);
        let tt_luns = u64::from(cfg.luns_per_ch) * u64::from(nchs);

        // Lines span one block per LUN; with one plane per LUN the line count
        // equals the per-LUN block count.
        let blks_per_line = tt_luns;
        let pgs_per_line = blks_per_line * u64::from(pgs_per_blk);
        let secs_per_line = pgs_per_line * u64::from(cfg.secs_per_pg);
        let tt_lines = blks_per_lun;

        Ok(SsdParams {
            secsz: cfg.secsz,
            secs_per_pg: cfg.secs_per_pg,
            pgsz,
            pgs_per_flashpg,
            flashpgs_per_blk,
            pgs_per_oneshotpg,
            oneshotpgs_per_blk,
            pgs_per_blk,
            blks_per_pl: cfg.blks_per_pl,
            pls_per_lun: cfg.pls_per_lun,
            luns_per_ch: cfg.luns_per_ch,
            nchs,
            cell_mode: cfg.cell_mode,
            write_unit_size: cfg.write_unit_size,
            write_early_completion: cfg.write_early_completion,
            pg_4kb_rd_lat: cfg.pg_4kb_rd_lat,
            pg_rd_lat: cfg.pg_rd_lat,
            pg_wr_lat: cfg.pg_wr_lat,
            blk_er_lat: cfg.blk_er_lat,
            max_ch_xfer_size: cfg.max_ch_xfer_size,
            fw_4kb_rd_lat: cfg.fw_4kb_rd_lat,
            fw_rd_lat: cfg.fw_rd_lat,
            fw_ch_xfer_lat: cfg.fw_ch_xfer_lat,
            fw_wbuf_lat0: cfg.fw_wbuf_lat0,
            fw_wbuf_lat1: cfg.fw_wbuf_lat1,
            ch_bandwidth: cfg.ch_bandwidth,
            pcie_bandwidth: cfg.pcie_bandwidth,
            secs_per_blk,
            secs_per_pl,
            secs_per_lun,
            secs_per_ch,
            tt_secs,
            pgs_per_pl,
            pgs_per_lun,
            pgs_per_ch,
            tt_pgs,
            blks_per_lun,
            blks_per_ch,
            tt_blks,
            pls_per_ch,
            tt_pls,
            tt_luns,
            secs_per_line,
            pgs_per_line,
            blks_per_line,
            tt_lines,
            write_buffer_size: cfg.write_buffer_size,
        })
    }

    /// Which bit-plane of the cell the page resides on; indexes the read
    /// latency tables.
    pub fn cell_of(&self, pg: u32) -> usize {
        ((pg / self.pgs_per_flashpg) % self.cell_mode.bits_per_cell()) as usize
    }

    /// Flat page ordinal used by the reverse map.
    pub fn ppa_index(&self, ppa: Ppa) -> u64 {
        u64::from(ppa.ch()) * self.pgs_per_ch
            + u64::from(ppa.lun()) * self.pgs_per_lun
            + u64::from(ppa.pl()) * self.pgs_per_pl
            + u64::from(ppa.blk()) * u64::from(self.pgs_per_blk)
            + u64::from(ppa.pg())
    }

    /// Flat block ordinal for the per-block metadata arena.
    pub fn blk_index(&self, ppa: Ppa) -> u64 {
        u64::from(ppa.ch()) * self.blks_per_ch
            + u64::from(ppa.lun()) * self.blks_per_lun
            + u64::from(ppa.pl()) * u64::from(self.blks_per_pl)
            + u64::from(ppa.blk())
    }
}
