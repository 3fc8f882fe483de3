//! Garbage collection: trigger policy, greedy victim selection,
//! copy-forward of valid pages, and the closing erase.

use tracing::debug;

use vssd_nand::{IoKind, NandCmd, NandOp, Ppa, UNMAPPED_LPN};

use crate::error::FtlError;
use crate::flash::PageStatus;
use crate::ftl::{ConvFtl, Stream};
use crate::line::{LineMgmt, LineState, NOT_IN_QUEUE};

impl ConvFtl {
    pub(crate) fn should_gc(&self) -> bool {
        self.lm.free_line_cnt() <= self.cp.gc_thres_lines
    }

    pub(crate) fn should_gc_high(&self) -> bool {
        self.lm.free_line_cnt() <= self.cp.gc_thres_lines_high
    }

    /// Post-write trigger: below the high watermark, reclaim in the
    /// foreground until the pressure clears; in the band between the two
    /// watermarks, run a single opportunistic cycle and tolerate it finding
    /// nothing worthwhile.
    pub(crate) fn run_gc_if_needed(&mut self) -> Result<(), FtlError> {
        if self.should_gc_high() {
            self.foreground_gc()
        } else if self.should_gc() {
            match self.do_gc(false) {
                Err(FtlError::GcCannotFree) => Ok(()),
                other => other.map(|_| ()),
            }
        } else {
            Ok(())
        }
    }

    pub(crate) fn foreground_gc(&mut self) -> Result<(), FtlError> {
        while self.should_gc_high() {
            self.do_gc(true)?;
        }
        Ok(())
    }

    /// Greedy pick: the enrolled line with the fewest valid pages. A
    /// non-forced pick declines victims that would copy more than 1/8th of
    /// a line. Returns `Ok(None)` only for that declined case.
    fn select_victim(&mut self, force: bool) -> Result<Option<u32>, FtlError> {
        let pgs_per_line = self.params().pgs_per_line as u32;
        let LineMgmt { lines, victims, .. } = &mut self.lm;

        let Some(head) = victims.peek() else {
            return Err(FtlError::GcCannotFree);
        };
        let vpc = lines[head as usize].vpc;
        if vpc == pgs_per_line {
            return Err(FtlError::GcCannotFree);
        }
        if !force && vpc > pgs_per_line / 8 {
            return Ok(None);
        }
        match victims.pop(lines) {
            Some(id) => Ok(Some(id)),
            None => Err(FtlError::GcCannotFree),
        }
    }

    /// One collection cycle: pick a victim, copy its valid pages behind the
    /// GC write pointer, erase its member blocks, and return it to the free
    /// list. Returns whether a line was freed.
    pub(crate) fn do_gc(&mut self, force: bool) -> Result<bool, FtlError> {
        let Some(victim) = self.select_victim(force)? else {
            return Ok(false);
        };
        debug!(
            line = victim,
            vpc = self.lm.lines[victim as usize].vpc,
            ipc = self.lm.lines[victim as usize].ipc,
            force,
            "collecting victim line"
        );

        let (nchs, luns_per_ch, pgs_per_blk, pgsz) = {
            let p = self.params();
            (p.nchs, p.luns_per_ch, p.pgs_per_blk, p.pgsz)
        };

        // Copy-forward in deterministic channel-major order.
        for ch in 0..nchs {
            for lun in 0..luns_per_ch {
                for pg in 0..pgs_per_blk {
                    let ppa = Ppa::new(ch, lun, 0, victim, pg);
                    let idx = self.params().ppa_index(ppa);
                    if self.flash.page(idx) != PageStatus::Valid {
                        continue;
                    }
                    self.gc_read_page(ppa, u64::from(pgsz));
                    self.gc_write_page(ppa)?;
                }
            }
        }

        // All survivors are copied; erase every member block.
        for ch in 0..nchs {
            for lun in 0..luns_per_ch {
                let ppa = Ppa::new(ch, lun, 0, victim, 0);
                if self.cp.enable_gc_delay {
                    let cmd = NandCmd {
                        kind: IoKind::Gc,
                        op: NandOp::Erase,
                        ppa,
                        xfer_bytes: 0,
                        stime: 0,
                        interleave_pci_dma: false,
                    };
                    self.ssd.advance_nand(&cmd);
                }
                self.flash.erase_block(self.ssd.params(), ppa);
            }
        }

        self.mark_line_free(victim);
        Ok(true)
    }

    fn gc_read_page(&mut self, ppa: Ppa, xfer_bytes: u64) {
        if !self.cp.enable_gc_delay {
            return;
        }
        let cmd = NandCmd {
            kind: IoKind::Gc,
            op: NandOp::Read,
            ppa,
            xfer_bytes,
            // Internal traffic: no host DMA to interleave.
            interleave_pci_dma: false,
            stime: 0,
        };
        self.ssd.advance_nand(&cmd);
    }

    /// Moves one valid page behind the GC write pointer and redirects its
    /// LPN. The old copy stays VALID; the block-level erase reclaims it.
    fn gc_write_page(&mut self, old: Ppa) -> Result<(), FtlError> {
        let old_idx = self.params().ppa_index(old);
        let lpn = self.map.reverse(old_idx);
        debug_assert_ne!(lpn, UNMAPPED_LPN, "valid page without a reverse entry");

        let new = self.current_ppa(Stream::Gc);
        let new_idx = self.params().ppa_index(new);
        self.map.assign(lpn, new, new_idx);
        self.mark_page_valid(new);
        self.advance_write_pointer(Stream::Gc)?;

        let (pgs_per_oneshotpg, pgsz) = {
            let p = self.params();
            (p.pgs_per_oneshotpg, p.pgsz)
        };
        if self.cp.enable_gc_delay && (new.pg() + 1) % pgs_per_oneshotpg == 0 {
            let cmd = NandCmd {
                kind: IoKind::Gc,
                op: NandOp::Write,
                ppa: new,
                xfer_bytes: u64::from(pgs_per_oneshotpg) * u64::from(pgsz),
                stime: 0,
                interleave_pci_dma: false,
            };
            self.ssd.advance_nand(&cmd);
        }
        Ok(())
    }

    fn mark_line_free(&mut self, id: u32) {
        let line = &mut self.lm.lines[id as usize];
        debug_assert_eq!(line.pos, NOT_IN_QUEUE);
        line.ipc = 0;
        line.vpc = 0;
        line.state = LineState::Free;
        self.lm.free_list.push_back(id);

        // Reclaimed capacity buys the host more write admissions.
        self.wfc.credits += self.wfc.credits_to_refill;
        debug!(line = id, free_lines = self.lm.free_line_cnt(), "line reclaimed");
    }
}
