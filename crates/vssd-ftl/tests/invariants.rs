//! Model-based workload tests: after every command the FTL's structural
//! invariants must hold and the mapping tables must agree with a trivial
//! shadow model of which LPNs have been written.

use std::sync::Arc;

use proptest::prelude::*;
use vssd_ftl::{CmdStatus, FtlConfig, FtlError, IoRequest, Namespace, NVME_CMD_READ, NVME_CMD_WRITE};
use vssd_nand::{CellMode, FakeClock, SsdConfig};

const SECS_PER_PG: u64 = 8;
/// 100% OP: 64 logical pages over 128 physical, so random workloads always
/// leave GC something to reclaim.
const LOGICAL_PGS: u64 = 64;

fn test_config() -> SsdConfig {
    SsdConfig {
        secsz: 512,
        secs_per_pg: SECS_PER_PG as u32,
        nchs: 2,
        luns_per_ch: 2,
        pls_per_lun: 1,
        blks_per_pl: 8,
        cell_mode: CellMode::Slc,
        oneshot_page_size: 4096,
        flash_page_size: 4096,
        write_unit_size: 512,
        write_early_completion: true,
        pg_4kb_rd_lat: [2_000; 3],
        pg_rd_lat: [4_000; 3],
        pg_wr_lat: 10_000,
        blk_er_lat: 50_000,
        max_ch_xfer_size: 4096,
        fw_4kb_rd_lat: 1_000,
        fw_rd_lat: 1_500,
        fw_ch_xfer_lat: 0,
        fw_wbuf_lat0: 100,
        fw_wbuf_lat1: 10,
        ch_bandwidth: 250,
        pcie_bandwidth: 500,
        write_buffer_size: 1 << 20,
    }
}

fn make_namespace() -> Namespace {
    let ftl_cfg = FtlConfig {
        gc_thres_lines: 2,
        gc_thres_lines_high: 2,
        enable_gc_delay: true,
        op_area_pcent: 1.0,
    };
    Namespace::new(
        &test_config(),
        &ftl_cfg,
        524_288,
        1,
        Arc::new(FakeClock::new(0)),
    )
    .unwrap()
}

#[derive(Clone, Debug)]
enum Op {
    Write { lpn: u64, npages: u64 },
    Read { lpn: u64, npages: u64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let span = prop_oneof![
        3 => Just(1u64),
        2 => 2u64..=4,
    ];
    (0u64..LOGICAL_PGS, span, prop::bool::ANY).prop_map(|(lpn, npages, is_write)| {
        let npages = npages.min(LOGICAL_PGS - lpn);
        if is_write {
            Op::Write { lpn, npages }
        } else {
            Op::Read { lpn, npages }
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_workloads_preserve_structural_invariants(
        ops in prop::collection::vec(op_strategy(), 1..200),
    ) {
        let mut ns = make_namespace();
        let mut written = vec![false; LOGICAL_PGS as usize];

        for op in &ops {
            match *op {
                Op::Write { lpn, npages } => {
                    let done = match ns.process_io(&IoRequest {
                        opcode: NVME_CMD_WRITE,
                        slba: lpn * SECS_PER_PG,
                        nlb: (npages * SECS_PER_PG) as u32,
                        stime: 1,
                    }) {
                        Ok(done) => done,
                        // A wedged partition is a legal terminal state, not
                        // a model violation; end the case there.
                        Err(FtlError::GcCannotFree) => break,
                        Err(e) => return Err(TestCaseError::fail(format!("write failed: {e}"))),
                    };
                    prop_assert_eq!(done.status, CmdStatus::Success);
                    prop_assert!(done.complete_at >= 1);
                    // Act as the dispatcher: return the reservation.
                    if let Some(wb) = done.writeback {
                        ns.release_write_buffer(wb.bytes);
                    }
                    for l in lpn..lpn + npages {
                        written[l as usize] = true;
                    }
                }
                Op::Read { lpn, npages } => {
                    let done = ns
                        .process_io(&IoRequest {
                            opcode: NVME_CMD_READ,
                            slba: lpn * SECS_PER_PG,
                            nlb: (npages * SECS_PER_PG) as u32,
                            stime: 1,
                        })
                        .expect("reads never stall");
                    prop_assert_eq!(done.status, CmdStatus::Success);
                    prop_assert!(done.complete_at >= 1);
                }
            }

            ns.verify_consistency();

            // The mapping tables agree with the shadow model: written LPNs
            // stay mapped (GC may move them but never unmap them), untouched
            // LPNs stay unmapped.
            for (lpn, &w) in written.iter().enumerate() {
                prop_assert_eq!(
                    !ns.partition(0).translate(lpn as u64).is_unmapped(),
                    w,
                    "LPN {} mapping diverged from the model",
                    lpn
                );
            }
        }
    }

    #[test]
    fn lun_timelines_never_move_backwards(
        ops in prop::collection::vec(op_strategy(), 1..100),
    ) {
        let mut ns = make_namespace();
        let mut floors = vec![0u64; 4];

        for op in &ops {
            let (opcode, lpn, npages) = match *op {
                Op::Write { lpn, npages } => (NVME_CMD_WRITE, lpn, npages),
                Op::Read { lpn, npages } => (NVME_CMD_READ, lpn, npages),
            };
            let done = match ns.process_io(&IoRequest {
                opcode,
                slba: lpn * SECS_PER_PG,
                nlb: (npages * SECS_PER_PG) as u32,
                stime: 1,
            }) {
                Ok(done) => done,
                Err(FtlError::GcCannotFree) => break,
                Err(e) => return Err(TestCaseError::fail(format!("command failed: {e}"))),
            };
            if let Some(wb) = done.writeback {
                ns.release_write_buffer(wb.bytes);
            }

            let ssd = ns.partition(0).ssd();
            for ch in 0..2u32 {
                for lun in 0..2u32 {
                    let avail = ssd.lun_next_avail(ch, lun);
                    let floor = &mut floors[(ch * 2 + lun) as usize];
                    prop_assert!(avail >= *floor, "LUN ({ch},{lun}) clock went backwards");
                    *floor = avail;
                }
            }
        }
    }
}
