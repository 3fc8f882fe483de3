//! Forward (L2P) and reverse (P2L) page mapping tables.
//!
//! Both are dense arrays sized to the partition's physical page count. The
//! reverse table stands in for per-page out-of-band metadata: entries go
//! stale when a block is erased and are only meaningful for pages whose
//! status is VALID.

use vssd_nand::{Ppa, UNMAPPED_LPN};

pub(crate) struct MapTable {
    l2p: Vec<Ppa>,
    p2l: Vec<u64>,
}

impl MapTable {
    pub fn new(tt_pgs: u64) -> MapTable {
        MapTable {
            l2p: vec![Ppa::UNMAPPED; tt_pgs as usize],
            p2l: vec![UNMAPPED_LPN; tt_pgs as usize],
        }
    }

    pub fn translate(&self, lpn: u64) -> Ppa {
        self.l2p[lpn as usize]
    }

    /// Points `lpn` at `ppa` and records the back-pointer at the page's flat
    /// ordinal. The caller must already have invalidated the page the LPN
    /// previously mapped to.
    pub fn assign(&mut self, lpn: u64, ppa: Ppa, ppa_idx: u64) {
        self.l2p[lpn as usize] = ppa;
        self.p2l[ppa_idx as usize] = lpn;
    }

    pub fn reverse(&self, ppa_idx: u64) -> u64 {
        self.p2l[ppa_idx as usize]
    }

    pub fn clear_reverse(&mut self, ppa_idx: u64) {
        self.p2l[ppa_idx as usize] = UNMAPPED_LPN;
    }

    pub fn l2p(&self) -> &[Ppa] {
        &self.l2p
    }
}
