//! The namespace-level command processor.
//!
//! A namespace owns `nparts` fully independent FTL partitions, each with its
//! own channel slice and dispatcher-thread state; global LPNs stripe across
//! them round-robin. Partitions share only the write buffer and the PCIe
//! link, both spin-locked. This layer is the boundary the NVMe dispatcher
//! talks to.

use std::sync::Arc;

use tracing::warn;

use vssd_nand::{IoClock, Ppa, Ssd, SsdConfig, SsdParams, WriteBuffer, KB4};

use crate::config::FtlConfig;
use crate::error::FtlError;
use crate::ftl::ConvFtl;

/// NVM command set opcodes understood by the processor.
pub const NVME_CMD_FLUSH: u8 = 0x00;
pub const NVME_CMD_WRITE: u8 = 0x01;
pub const NVME_CMD_READ: u8 = 0x02;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmdStatus {
    Success,
    LbaOutOfRange,
    InvalidOpcode,
}

/// One host command, as handed over by the NVMe dispatcher.
#[derive(Clone, Copy, Debug)]
pub struct IoRequest {
    pub opcode: u8,
    pub slba: u64,
    /// Number of logical blocks; zero-length commands complete immediately.
    pub nlb: u32,
    /// Arrival timestamp in ns.
    pub stime: u64,
}

/// Tells the dispatcher when the device-side copy of a write settles and
/// its write-buffer reservation can be released.
#[derive(Clone, Copy, Debug)]
pub struct Writeback {
    pub bytes: u64,
    pub at: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct IoCompletion {
    pub status: CmdStatus,
    pub complete_at: u64,
    pub writeback: Option<Writeback>,
}

impl IoCompletion {
    fn immediate(status: CmdStatus, at: u64) -> IoCompletion {
        IoCompletion {
            status,
            complete_at: at,
            writeback: None,
        }
    }
}

/// Tracks a run of consecutively mapped pages sharing one flash page, so a
/// sequential read costs one sensing operation instead of one per page.
#[derive(Clone, Copy)]
struct ReadRun {
    ppa: Ppa,
    xfer_bytes: u64,
}

pub struct Namespace {
    parts: Vec<ConvFtl>,
    write_buffer: Arc<WriteBuffer>,
    params: SsdParams,
    logical_secs: u64,
}

impl Namespace {
    /// Builds the partition registry. `capacity` is the physical byte
    /// capacity of the device; the host-visible size is scaled down by the
    /// configured over-provisioning.
    pub fn new(
        cfg: &SsdConfig,
        ftl_cfg: &FtlConfig,
        capacity: u64,
        nparts: u32,
        clock: Arc<dyn IoClock>,
    ) -> Result<Namespace, FtlError> {
        let params = SsdParams::new(cfg, capacity, nparts)?;

        let first = Ssd::new(params.clone(), Arc::clone(&clock));
        let pcie = first.shared_pcie();
        let write_buffer = Arc::clone(first.write_buffer());

        let mut parts = Vec::with_capacity(nparts as usize);
        parts.push(ConvFtl::new(first, ftl_cfg)?);
        for _ in 1..nparts {
            let ssd = Ssd::with_shared(
                params.clone(),
                Arc::clone(&clock),
                Arc::clone(&pcie),
                Arc::clone(&write_buffer),
            );
            parts.push(ConvFtl::new(ssd, ftl_cfg)?);
        }

        let logical_bytes = capacity * 100 / ftl_cfg.pba_pcent();
        let logical_secs = logical_bytes / u64::from(cfg.secsz);

        Ok(Namespace {
            parts,
            write_buffer,
            params,
            logical_secs,
        })
    }

    /// Host-visible capacity in sectors.
    pub fn logical_secs(&self) -> u64 {
        self.logical_secs
    }

    pub fn nparts(&self) -> usize {
        self.parts.len()
    }

    pub fn partition(&self, idx: usize) -> &ConvFtl {
        &self.parts[idx]
    }

    pub fn write_buffer(&self) -> &WriteBuffer {
        &self.write_buffer
    }

    /// Returns a write's buffer reservation once its writeback deadline has
    /// passed on the dispatcher's clock.
    pub fn release_write_buffer(&self, bytes: u64) {
        self.write_buffer.release(bytes);
    }

    /// The time at which every LUN of every partition has drained.
    pub fn next_idle_time(&self) -> u64 {
        self.parts
            .iter()
            .map(|p| p.ssd().next_idle_time())
            .max()
            .unwrap_or(0)
    }

    pub fn verify_consistency(&self) {
        for part in &self.parts {
            part.verify_consistency();
        }
    }

    /// Entry point for the NVMe dispatcher. `Err` values are either the
    /// retryable [`FtlError::WriteBufferFull`] stall or a fatal invariant
    /// break; everything else surfaces as a completion with a status.
    pub fn process_io(&mut self, req: &IoRequest) -> Result<IoCompletion, FtlError> {
        match req.opcode {
            NVME_CMD_READ => self.read(req),
            NVME_CMD_WRITE => self.write(req),
            NVME_CMD_FLUSH => Ok(IoCompletion::immediate(
                CmdStatus::Success,
                self.next_idle_time().max(req.stime),
            )),
            opcode => {
                warn!(opcode, "unimplemented NVM command");
                Ok(IoCompletion::immediate(CmdStatus::InvalidOpcode, req.stime))
            }
        }
    }

    fn in_range(&self, req: &IoRequest) -> bool {
        req.slba
            .checked_add(u64::from(req.nlb))
            .is_some_and(|end| end <= self.logical_secs)
    }

    fn write(&mut self, req: &IoRequest) -> Result<IoCompletion, FtlError> {
        if !self.in_range(req) {
            return Ok(IoCompletion::immediate(CmdStatus::LbaOutOfRange, req.stime));
        }
        if req.nlb == 0 {
            return Ok(IoCompletion::immediate(CmdStatus::Success, req.stime));
        }

        let bytes = u64::from(req.nlb) * u64::from(self.params.secsz);
        if self.write_buffer.allocate(bytes) == 0 {
            warn!(bytes, "write buffer full, stalling command");
            return Err(FtlError::WriteBufferFull);
        }

        // Admission covers the whole transfer; NAND programs submit at the
        // moment the data is buffered.
        let admit = self.parts[0].ssd().advance_write_buffer(req.stime, bytes);

        let secs_per_pg = u64::from(self.params.secs_per_pg);
        let start_lpn = req.slba / secs_per_pg;
        let end_lpn = (req.slba + u64::from(req.nlb) - 1) / secs_per_pg;
        let nparts = self.parts.len() as u64;

        let mut latest = admit;
        for lpn in start_lpn..=end_lpn {
            let part = (lpn % nparts) as usize;
            let local_lpn = lpn / nparts;
            if let Some(done) = self.parts[part].write_page(local_lpn, admit)? {
                latest = latest.max(done);
            }
        }

        let complete_at = if self.params.write_early_completion {
            admit
        } else {
            latest
        };
        Ok(IoCompletion {
            status: CmdStatus::Success,
            complete_at,
            writeback: Some(Writeback { bytes, at: latest }),
        })
    }

    fn read(&mut self, req: &IoRequest) -> Result<IoCompletion, FtlError> {
        if !self.in_range(req) {
            return Ok(IoCompletion::immediate(CmdStatus::LbaOutOfRange, req.stime));
        }
        if req.nlb == 0 {
            return Ok(IoCompletion::immediate(CmdStatus::Success, req.stime));
        }

        let bytes = u64::from(req.nlb) * u64::from(self.params.secsz);
        let fw_lat = if bytes <= KB4 {
            self.params.fw_4kb_rd_lat
        } else {
            self.params.fw_rd_lat
        };
        let start = req.stime + fw_lat;

        let secs_per_pg = u64::from(self.params.secs_per_pg);
        let start_lpn = req.slba / secs_per_pg;
        let end_lpn = (req.slba + u64::from(req.nlb) - 1) / secs_per_pg;
        let nparts = self.parts.len() as u64;

        let mut latest = start;
        let mut pending: Vec<Option<ReadRun>> = vec![None; self.parts.len()];
        for lpn in start_lpn..=end_lpn {
            let part = (lpn % nparts) as usize;
            let local_lpn = lpn / nparts;
            let ppa = self.parts[part].translate(local_lpn);

            if ppa.is_unmapped() {
                // Never written: zero-filled data, no NAND involved. The
                // gap also breaks any sensing run in flight.
                if let Some(run) = pending[part].take() {
                    latest = latest.max(self.parts[part].nand_read(run.ppa, run.xfer_bytes, start));
                }
                continue;
            }

            match &mut pending[part] {
                Some(run) if same_flash_page(&self.params, run.ppa, ppa) => {
                    run.xfer_bytes += u64::from(self.params.pgsz);
                }
                slot => {
                    if let Some(run) = slot.take() {
                        latest =
                            latest.max(self.parts[part].nand_read(run.ppa, run.xfer_bytes, start));
                    }
                    *slot = Some(ReadRun {
                        ppa,
                        xfer_bytes: u64::from(self.params.pgsz),
                    });
                }
            }
        }
        for (part, slot) in pending.iter_mut().enumerate() {
            if let Some(run) = slot.take() {
                latest = latest.max(self.parts[part].nand_read(run.ppa, run.xfer_bytes, start));
            }
        }

        Ok(IoCompletion::immediate(CmdStatus::Success, latest))
    }
}

fn same_flash_page(params: &SsdParams, a: Ppa, b: Ppa) -> bool {
    a.ch() == b.ch()
        && a.lun() == b.lun()
        && a.pl() == b.pl()
        && a.blk() == b.blk()
        && a.pg() / params.pgs_per_flashpg == b.pg() / params.pgs_per_flashpg
}
