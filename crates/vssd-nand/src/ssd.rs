//! The NAND timing engine.
//!
//! [`Ssd::advance_nand`] is pure timeline arithmetic: it advances per-LUN
//! availability clocks and the per-channel/PCIe transfer queues and returns
//! the command's completion timestamp. It never touches logical state; the
//! FTL layered on top owns mapping tables and page status.

use std::sync::Arc;

use spin::Mutex;
use tracing::error;

use crate::buffer::WriteBuffer;
use crate::channel::ChannelModel;
use crate::clock::IoClock;
use crate::geometry::{SsdParams, KB4};
use crate::ppa::Ppa;

/// NAND operation kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NandOp {
    Read,
    Write,
    Erase,
    Nop,
}

/// Originator of a command. The timing engine ignores it today; it is kept
/// on the command for GC-aware scheduling experiments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoKind {
    User,
    Gc,
}

#[derive(Clone, Copy, Debug)]
pub struct NandCmd {
    pub kind: IoKind,
    pub op: NandOp,
    pub ppa: Ppa,
    /// Transfer size in bytes (data moved over the channel).
    pub xfer_bytes: u64,
    /// Submission time in ns; 0 means "now" per the injected clock.
    pub stime: u64,
    /// Overlap per-chunk PCIe DMA with the NAND channel transfer.
    pub interleave_pci_dma: bool,
}

struct NandLun {
    next_avail_time: u64,
}

struct SsdChannel {
    luns: Vec<NandLun>,
    model: ChannelModel,
}

/// One partition's NAND array plus the transfer models. The PCIe link and
/// the write buffer are shared between partitions and spin-locked; channels
/// and LUNs are owned by the partition's dispatcher thread alone.
pub struct Ssd {
    params: SsdParams,
    channels: Vec<SsdChannel>,
    pcie: Arc<Mutex<ChannelModel>>,
    write_buffer: Arc<WriteBuffer>,
    clock: Arc<dyn IoClock>,
}

fn lock_spinning<'a>(model: &'a Mutex<ChannelModel>) -> spin::MutexGuard<'a, ChannelModel> {
    loop {
        if let Some(guard) = model.try_lock() {
            return guard;
        }
        core::hint::spin_loop();
    }
}

impl Ssd {
    /// Builds a partition together with fresh shared resources. The first
    /// partition of a namespace is built this way; siblings attach to its
    /// PCIe model and write buffer via [`Ssd::with_shared`].
    pub fn new(params: SsdParams, clock: Arc<dyn IoClock>) -> Ssd {
        let pcie = Arc::new(Mutex::new(ChannelModel::new(params.pcie_bandwidth, 0)));
        let write_buffer = Arc::new(WriteBuffer::new(params.write_buffer_size));
        Ssd::with_shared(params, clock, pcie, write_buffer)
    }

    pub fn with_shared(
        params: SsdParams,
        clock: Arc<dyn IoClock>,
        pcie: Arc<Mutex<ChannelModel>>,
        write_buffer: Arc<WriteBuffer>,
    ) -> Ssd {
        let channels = (0..params.nchs)
            .map(|_| SsdChannel {
                luns: (0..params.luns_per_ch)
                    .map(|_| NandLun { next_avail_time: 0 })
                    .collect(),
                model: ChannelModel::new(params.ch_bandwidth, params.fw_ch_xfer_lat),
            })
            .collect();
        Ssd {
            params,
            channels,
            pcie,
            write_buffer,
            clock,
        }
    }

    pub fn params(&self) -> &SsdParams {
        &self.params
    }

    pub fn write_buffer(&self) -> &Arc<WriteBuffer> {
        &self.write_buffer
    }

    pub fn shared_pcie(&self) -> Arc<Mutex<ChannelModel>> {
        Arc::clone(&self.pcie)
    }

    pub fn lun_next_avail(&self, ch: u32, lun: u32) -> u64 {
        self.channels[ch as usize].luns[lun as usize].next_avail_time
    }

    /// Advances the timeline for one NAND command and returns its completion
    /// time. A sentinel PPA is a caller bug: it is logged and the submit
    /// time is returned with no state advanced.
    pub fn advance_nand(&mut self, cmd: &NandCmd) -> u64 {
        let stime = if cmd.stime == 0 {
            self.clock.now_ns()
        } else {
            cmd.stime
        };

        if cmd.ppa.is_unmapped() {
            error!(op = ?cmd.op, "NAND command issued on unmapped PPA");
            return stime;
        }

        let cell = self.params.cell_of(cmd.ppa.pg());
        let pcie = Arc::clone(&self.pcie);
        let params = &self.params;
        let SsdChannel { luns, model } = &mut self.channels[cmd.ppa.ch() as usize];
        let lun = &mut luns[cmd.ppa.lun() as usize];

        match cmd.op {
            NandOp::Read => {
                // Sense first, then stream the data out over the channel in
                // chunks bounded by the channel's burst size.
                let nand_stime = lun.next_avail_time.max(stime);
                let sense = if cmd.xfer_bytes == KB4 {
                    params.pg_4kb_rd_lat[cell]
                } else {
                    params.pg_rd_lat[cell]
                };
                let nand_etime = nand_stime + sense;

                let mut remaining = cmd.xfer_bytes;
                let mut chnl_stime = nand_etime;
                let mut chnl_etime = nand_etime;
                let mut completed = nand_etime;
                while remaining > 0 {
                    let xfer = remaining.min(params.max_ch_xfer_size);
                    chnl_etime = model.request(chnl_stime, xfer);
                    completed = if cmd.interleave_pci_dma {
                        // The DMA of chunk N overlaps the channel transfer of
                        // chunk N+1: the next chunk starts at channel end,
                        // not PCIe end.
                        lock_spinning(&pcie).request(chnl_etime, xfer)
                    } else {
                        chnl_etime
                    };
                    remaining -= xfer;
                    chnl_stime = chnl_etime;
                }

                lun.next_avail_time = chnl_etime;
                completed
            }
            NandOp::Write => {
                // Transfer over the channel first, then program.
                let chnl_stime = lun.next_avail_time.max(stime);
                let chnl_etime = model.request(chnl_stime, cmd.xfer_bytes);
                let nand_etime = chnl_etime + params.pg_wr_lat;
                lun.next_avail_time = nand_etime;
                nand_etime
            }
            NandOp::Erase => {
                let nand_stime = lun.next_avail_time.max(stime);
                let nand_etime = nand_stime + params.blk_er_lat;
                lun.next_avail_time = nand_etime;
                nand_etime
            }
            NandOp::Nop => {
                let t = lun.next_avail_time.max(stime);
                lun.next_avail_time = t;
                t
            }
        }
    }

    /// Queues a host-side DMA on the shared PCIe link.
    pub fn advance_pcie(&self, start: u64, bytes: u64) -> u64 {
        lock_spinning(&self.pcie).request(start, bytes)
    }

    /// Write buffer admission latency: fixed firmware handshake, a per-4KiB
    /// firmware cost, then the PCIe DMA of the payload.
    pub fn advance_write_buffer(&self, start: u64, bytes: u64) -> u64 {
        let t = start + self.params.fw_wbuf_lat0 + self.params.fw_wbuf_lat1 * bytes.div_ceil(KB4);
        self.advance_pcie(t, bytes)
    }

    /// The time at which every LUN of this partition has drained, never
    /// earlier than "now".
    pub fn next_idle_time(&self) -> u64 {
        let mut latest = self.clock.now_ns();
        for ch in &self.channels {
            for lun in &ch.luns {
                latest = latest.max(lun.next_avail_time);
            }
        }
        latest
    }
}
