//! Per-page, per-sector, and per-block NAND state, kept in flat arenas
//! indexed by the ordinals `SsdParams` derives from a PPA.

use vssd_nand::{Ppa, SsdParams};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum PageStatus {
    Free,
    Invalid,
    Valid,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct BlockMeta {
    pub ipc: u32,
    pub vpc: u32,
    pub erase_cnt: u32,
    /// Next page to program within the block; equals vpc + ipc.
    pub wp: u32,
}

pub(crate) struct FlashState {
    pages: Vec<PageStatus>,
    secs: Vec<PageStatus>,
    blocks: Vec<BlockMeta>,
}

impl FlashState {
    pub fn new(params: &SsdParams) -> FlashState {
        FlashState {
            pages: vec![PageStatus::Free; params.tt_pgs as usize],
            secs: vec![PageStatus::Free; params.tt_secs as usize],
            blocks: vec![BlockMeta::default(); params.tt_blks as usize],
        }
    }

    pub fn page(&self, ppa_idx: u64) -> PageStatus {
        self.pages[ppa_idx as usize]
    }

    pub fn block(&self, blk_idx: u64) -> &BlockMeta {
        &self.blocks[blk_idx as usize]
    }

    pub fn blocks(&self) -> &[BlockMeta] {
        &self.blocks
    }

    fn set_secs(&mut self, params: &SsdParams, ppa_idx: u64, status: PageStatus) {
        let base = (ppa_idx * u64::from(params.secs_per_pg)) as usize;
        for sec in &mut self.secs[base..base + params.secs_per_pg as usize] {
            *sec = status;
        }
    }

    pub fn mark_page_valid(&mut self, params: &SsdParams, ppa: Ppa) {
        let idx = params.ppa_index(ppa);
        debug_assert_eq!(self.pages[idx as usize], PageStatus::Free);
        self.pages[idx as usize] = PageStatus::Valid;
        self.set_secs(params, idx, PageStatus::Valid);

        let blk = &mut self.blocks[params.blk_index(ppa) as usize];
        blk.vpc += 1;
        debug_assert_eq!(blk.wp, ppa.pg());
        blk.wp += 1;
    }

    pub fn mark_page_invalid(&mut self, params: &SsdParams, ppa: Ppa) {
        let idx = params.ppa_index(ppa);
        debug_assert_eq!(self.pages[idx as usize], PageStatus::Valid);
        self.pages[idx as usize] = PageStatus::Invalid;
        self.set_secs(params, idx, PageStatus::Invalid);

        let blk = &mut self.blocks[params.blk_index(ppa) as usize];
        debug_assert!(blk.vpc > 0);
        blk.vpc -= 1;
        blk.ipc += 1;
    }

    /// Wholesale erase: every page of the block returns to FREE regardless
    /// of its previous status.
    pub fn erase_block(&mut self, params: &SsdParams, ppa: Ppa) {
        let first_pg = Ppa::new(ppa.ch(), ppa.lun(), ppa.pl(), ppa.blk(), 0);
        let base = params.ppa_index(first_pg);
        for pg in 0..u64::from(params.pgs_per_blk) {
            self.pages[(base + pg) as usize] = PageStatus::Free;
            self.set_secs(params, base + pg, PageStatus::Free);
        }

        let blk = &mut self.blocks[params.blk_index(ppa) as usize];
        blk.ipc = 0;
        blk.vpc = 0;
        blk.wp = 0;
        blk.erase_cnt += 1;
    }
}
