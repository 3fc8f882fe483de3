//! One partition of the page-mapped FTL.
//!
//! All methods run to completion on the partition's dispatcher thread;
//! timing is simulated, never awaited. The host-facing entry points live in
//! [`crate::namespace`], which demultiplexes LPNs across partitions.

use tracing::trace;

use vssd_nand::{IoKind, NandCmd, NandOp, Ppa, Ssd, SsdParams};

use crate::config::FtlConfig;
use crate::error::FtlError;
use crate::flash::{FlashState, PageStatus};
use crate::line::{LineMgmt, LineState, NOT_IN_QUEUE};
use crate::map::MapTable;

/// Which write stream a pointer feeds: host data or GC copy-forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Stream {
    User,
    Gc,
}

/// Cursor naming the next physical page a stream will program.
#[derive(Clone, Copy, Debug)]
pub(crate) struct WritePointer {
    pub curline: u32,
    pub ch: u32,
    pub lun: u32,
    pub pl: u32,
    pub blk: u32,
    pub pg: u32,
}

/// Token bucket pacing host writes against GC reclamation.
pub(crate) struct WriteFlowControl {
    pub credits: u32,
    pub credits_to_refill: u32,
}

pub struct ConvFtl {
    pub(crate) ssd: Ssd,
    pub(crate) cp: FtlConfig,
    pub(crate) map: MapTable,
    pub(crate) flash: FlashState,
    pub(crate) lm: LineMgmt,
    pub(crate) wp: WritePointer,
    pub(crate) gc_wp: WritePointer,
    pub(crate) wfc: WriteFlowControl,
}

impl ConvFtl {
    pub(crate) fn new(ssd: Ssd, cp: &FtlConfig) -> Result<ConvFtl, FtlError> {
        let params = ssd.params();
        let map = MapTable::new(params.tt_pgs);
        let flash = FlashState::new(params);
        let mut lm = LineMgmt::new(params.tt_lines);
        let pgs_per_line = params.pgs_per_line as u32;

        let wp = Self::open_line(&mut lm)?;
        let gc_wp = Self::open_line(&mut lm)?;

        Ok(ConvFtl {
            ssd,
            cp: cp.clone(),
            map,
            flash,
            lm,
            wp,
            gc_wp,
            wfc: WriteFlowControl {
                credits: pgs_per_line * 2,
                credits_to_refill: pgs_per_line,
            },
        })
    }

    fn open_line(lm: &mut LineMgmt) -> Result<WritePointer, FtlError> {
        let id = lm.pop_free().ok_or(FtlError::NoFreeLines)?;
        Ok(WritePointer {
            curline: id,
            ch: 0,
            lun: 0,
            pl: 0,
            blk: id,
            pg: 0,
        })
    }

    pub fn params(&self) -> &SsdParams {
        self.ssd.params()
    }

    pub fn ssd(&self) -> &Ssd {
        &self.ssd
    }

    pub fn translate(&self, lpn: u64) -> Ppa {
        self.map.translate(lpn)
    }

    pub fn free_line_cnt(&self) -> u32 {
        self.lm.free_line_cnt()
    }

    pub fn victim_line_cnt(&self) -> u32 {
        self.lm.victim_line_cnt()
    }

    pub fn full_line_cnt(&self) -> u32 {
        self.lm.full_line_cnt
    }

    pub fn write_credits(&self) -> u32 {
        self.wfc.credits
    }

    pub fn erase_count(&self, ppa: Ppa) -> u32 {
        self.flash.block(self.params().blk_index(ppa)).erase_cnt
    }

    pub(crate) fn stream_wp(&self, stream: Stream) -> &WritePointer {
        match stream {
            Stream::User => &self.wp,
            Stream::Gc => &self.gc_wp,
        }
    }

    fn stream_wp_mut(&mut self, stream: Stream) -> &mut WritePointer {
        match stream {
            Stream::User => &mut self.wp,
            Stream::Gc => &mut self.gc_wp,
        }
    }

    pub(crate) fn current_ppa(&self, stream: Stream) -> Ppa {
        let wp = self.stream_wp(stream);
        Ppa::new(wp.ch, wp.lun, wp.pl, wp.blk, wp.pg)
    }

    /// Advances a stream's cursor: LUN first, then channel, then page.
    /// Exhausting the block's pages closes the line and opens a fresh one
    /// from the free list.
    pub(crate) fn advance_write_pointer(&mut self, stream: Stream) -> Result<(), FtlError> {
        let (luns_per_ch, nchs, pgs_per_blk, pgs_per_line) = {
            let p = self.params();
            (p.luns_per_ch, p.nchs, p.pgs_per_blk, p.pgs_per_line as u32)
        };

        let mut wp = *self.stream_wp(stream);
        wp.lun += 1;
        if wp.lun == luns_per_ch {
            wp.lun = 0;
            wp.ch += 1;
            if wp.ch == nchs {
                wp.ch = 0;
                wp.pg += 1;
                if wp.pg == pgs_per_blk {
                    wp.pg = 0;
                    self.close_full_line(wp.curline, pgs_per_line);
                    let id = self
                        .lm
                        .pop_free()
                        .ok_or(FtlError::NoFreeLines)?;
                    trace!(stream = ?stream, line = id, "opened new line");
                    wp.curline = id;
                    wp.blk = id;
                }
            }
        }
        *self.stream_wp_mut(stream) = wp;
        Ok(())
    }

    fn close_full_line(&mut self, id: u32, pgs_per_line: u32) {
        let line = &mut self.lm.lines[id as usize];
        debug_assert_eq!(line.state, LineState::Open);
        debug_assert_eq!(line.vpc + line.ipc, pgs_per_line);
        if line.ipc > 0 {
            line.state = LineState::Victim;
            let LineMgmt { lines, victims, .. } = &mut self.lm;
            victims.push(lines, id);
        } else {
            line.state = LineState::Full;
            self.lm.full_line_cnt += 1;
        }
    }

    /// Retires the old physical copy of an overwritten page, promoting or
    /// re-ranking its line in the victim queue as needed.
    pub(crate) fn mark_page_invalid(&mut self, ppa: Ppa) {
        self.flash.mark_page_invalid(self.ssd.params(), ppa);

        let id = ppa.blk();
        let line = &mut self.lm.lines[id as usize];
        debug_assert!(line.vpc > 0);
        line.vpc -= 1;
        line.ipc += 1;
        match line.state {
            LineState::Victim => {
                let LineMgmt { lines, victims, .. } = &mut self.lm;
                victims.reprioritize(lines, id);
            }
            LineState::Full => {
                line.state = LineState::Victim;
                self.lm.full_line_cnt -= 1;
                let LineMgmt { lines, victims, .. } = &mut self.lm;
                victims.push(lines, id);
            }
            LineState::Open => {}
            LineState::Free => debug_assert!(false, "invalidated a page on a free line"),
        }
    }

    pub(crate) fn mark_page_valid(&mut self, ppa: Ppa) {
        self.flash.mark_page_valid(self.ssd.params(), ppa);
        self.lm.lines[ppa.blk() as usize].vpc += 1;
    }

    /// Services one host page write. Returns the completion time of the
    /// NAND program this write triggered, if it closed a oneshot page.
    pub(crate) fn write_page(
        &mut self,
        lpn: u64,
        nand_stime: u64,
    ) -> Result<Option<u64>, FtlError> {
        self.consume_write_credit();
        self.check_and_refill_write_credit()?;

        let old = self.map.translate(lpn);
        if !old.is_unmapped() {
            // Overwrite: retire the old physical copy.
            self.mark_page_invalid(old);
            let idx = self.params().ppa_index(old);
            self.map.clear_reverse(idx);
        }

        let ppa = self.current_ppa(Stream::User);
        let idx = self.params().ppa_index(ppa);
        self.map.assign(lpn, ppa, idx);
        self.mark_page_valid(ppa);
        self.advance_write_pointer(Stream::User)?;

        let (pgs_per_oneshotpg, pgsz) = {
            let p = self.params();
            (p.pgs_per_oneshotpg, p.pgsz)
        };
        let mut nand_done = None;
        if (ppa.pg() + 1) % pgs_per_oneshotpg == 0 {
            // This page closed its oneshot page: program the whole wordline.
            let cmd = NandCmd {
                kind: IoKind::User,
                op: NandOp::Write,
                ppa,
                xfer_bytes: u64::from(pgs_per_oneshotpg) * u64::from(pgsz),
                stime: nand_stime,
                interleave_pci_dma: false,
            };
            nand_done = Some(self.ssd.advance_nand(&cmd));
        }

        self.run_gc_if_needed()?;
        Ok(nand_done)
    }

    /// Issues the host-facing NAND read for a run of pages sharing a flash
    /// page; returns its completion time.
    pub(crate) fn nand_read(&mut self, ppa: Ppa, xfer_bytes: u64, stime: u64) -> u64 {
        let cmd = NandCmd {
            kind: IoKind::User,
            op: NandOp::Read,
            ppa,
            xfer_bytes,
            stime,
            interleave_pci_dma: true,
        };
        self.ssd.advance_nand(&cmd)
    }

    fn consume_write_credit(&mut self) {
        self.wfc.credits = self.wfc.credits.saturating_sub(1);
    }

    /// Once the bucket empties, reclamation must happen before the write
    /// proceeds. When the device still has free lines above the foreground
    /// watermark there is nothing to reclaim; top the bucket back up so a
    /// mostly-empty device is not throttled.
    fn check_and_refill_write_credit(&mut self) -> Result<(), FtlError> {
        if self.wfc.credits == 0 {
            self.foreground_gc()?;
            if self.wfc.credits == 0 {
                self.wfc.credits = self.wfc.credits_to_refill;
            }
        }
        Ok(())
    }

    /// Asserts the structural invariants tying the mapping tables, page
    /// states, block counters, and line sets together. Intended for tests
    /// and debug builds; panics on corruption.
    pub fn verify_consistency(&self) {
        let params = self.params();

        // Mapped LPNs point at VALID pages whose reverse entry agrees.
        for (lpn, &ppa) in self.map.l2p().iter().enumerate() {
            if ppa.is_unmapped() {
                continue;
            }
            let idx = params.ppa_index(ppa);
            assert_eq!(
                self.flash.page(idx),
                PageStatus::Valid,
                "LPN {lpn} maps to a non-valid page {ppa:?}"
            );
            assert_eq!(
                self.map.reverse(idx),
                lpn as u64,
                "reverse entry of {ppa:?} disagrees with LPN {lpn}"
            );
        }

        // Block counters account for every page.
        for (i, blk) in self.flash.blocks().iter().enumerate() {
            assert_eq!(
                blk.vpc + blk.ipc,
                blk.wp,
                "block {i}: vpc + ipc diverged from its write pointer"
            );
            assert!(blk.wp <= params.pgs_per_blk);
        }

        // Free lines are fully erased.
        for &id in &self.lm.free_list {
            let line = &self.lm.lines[id as usize];
            assert_eq!(line.state, LineState::Free);
            assert_eq!((line.vpc, line.ipc), (0, 0), "free line {id} has pages");
            for ch in 0..params.nchs {
                for lun in 0..params.luns_per_ch {
                    let blk = self
                        .flash
                        .block(params.blk_index(Ppa::new(ch, lun, 0, id, 0)));
                    assert_eq!((blk.vpc, blk.ipc, blk.wp), (0, 0, 0));
                }
            }
        }

        // Victim queue: full lines with invalid pages, heap-ordered by
        // (vpc, id), back-pointers in sync.
        let heap = self.lm.victims.as_slice();
        for (slot, &id) in heap.iter().enumerate() {
            let line = &self.lm.lines[id as usize];
            assert_eq!(line.state, LineState::Victim);
            assert!(line.ipc > 0, "victim line {id} has no invalid pages");
            assert_eq!(line.pos, slot);
            if slot > 0 {
                let parent = &self.lm.lines[heap[(slot - 1) / 2] as usize];
                assert!(
                    (parent.vpc, parent.id) <= (line.vpc, line.id),
                    "victim queue order violated at slot {slot}"
                );
            }
        }

        // Line sets partition the line space; exactly two lines are open.
        let open = self
            .lm
            .lines
            .iter()
            .filter(|l| l.state == LineState::Open)
            .count() as u64;
        assert_eq!(open, 2);
        assert_eq!(self.lm.lines[self.wp.curline as usize].state, LineState::Open);
        assert_eq!(self.lm.lines[self.gc_wp.curline as usize].state, LineState::Open);
        assert_eq!(
            u64::from(self.lm.free_line_cnt())
                + u64::from(self.lm.victim_line_cnt())
                + u64::from(self.lm.full_line_cnt)
                + open,
            params.tt_lines,
            "line sets do not partition the line space"
        );
        for line in &self.lm.lines {
            if line.state != LineState::Victim {
                assert_eq!(line.pos, NOT_IN_QUEUE);
            }
        }
    }
}
