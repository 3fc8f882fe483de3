use std::sync::Arc;

use vssd_ftl::{FtlConfig, FtlError, IoRequest, Namespace, NVME_CMD_WRITE};
use vssd_nand::{CellMode, FakeClock, Ppa, SsdConfig};

fn test_config() -> SsdConfig {
    SsdConfig {
        secsz: 512,
        secs_per_pg: 8,
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

/// 8 lines of 16 pages; user and GC pointers hold lines 0 and 1 at init,
/// leaving 6 free lines.
fn make_namespace(ftl_cfg: &FtlConfig) -> Namespace {
    Namespace::new(
        &test_config(),
        ftl_cfg,
        524_288,
        1,
        Arc::new(FakeClock::new(0)),
    )
    .unwrap()
}

fn write_pages(ns: &mut Namespace, first_lpn: u64, npages: u32) -> Result<u64, FtlError> {
    let done = ns.process_io(&IoRequest {
        opcode: NVME_CMD_WRITE,
        slba: first_lpn * 8,
        nlb: npages * 8,
        stime: 0,
    })?;
    if let Some(wb) = done.writeback {
        ns.release_write_buffer(wb.bytes);
    }
    Ok(done.complete_at)
}

#[test]
fn invalidating_a_full_line_triggers_collection_and_frees_it() {
    let cfg = FtlConfig {
        gc_thres_lines: 3,
        gc_thres_lines_high: 2,
        enable_gc_delay: true,
        op_area_pcent: 0.07,
    };
    let mut ns = make_namespace(&cfg);

    // Three lines of fresh data...
    write_pages(&mut ns, 0, 16).unwrap();
    write_pages(&mut ns, 16, 16).unwrap();
    write_pages(&mut ns, 32, 16).unwrap();
    assert_eq!(ns.partition(0).free_line_cnt(), 3);
    assert_eq!(ns.partition(0).victim_line_cnt(), 0);

    // ...then rewrite the first line wholesale. Its old copy drops to zero
    // valid pages and the free-line pressure forces a collection.
    write_pages(&mut ns, 0, 16).unwrap();

    let part = ns.partition(0);
    assert_eq!(part.victim_line_cnt(), 0, "victim was not collected");
    assert_eq!(part.free_line_cnt(), 3);
    for ch in 0..2 {
        for lun in 0..2 {
            assert_eq!(
                part.erase_count(Ppa::new(ch, lun, 0, 0, 0)),
                1,
                "member block ({ch},{lun}) of the victim line was not erased"
            );
        }
    }
    assert!(part.write_credits() > 0);
    ns.verify_consistency();
}

#[test]
fn copy_forward_relocates_surviving_pages_into_the_gc_line() {
    let cfg = FtlConfig {
        gc_thres_lines: 2,
        gc_thres_lines_high: 2,
        enable_gc_delay: true,
        op_area_pcent: 0.07,
    };
    let mut ns = make_namespace(&cfg);

    // Line 0: LPNs 0..15. Overwrite the first half; LPNs 8..15 survive.
    write_pages(&mut ns, 0, 16).unwrap();
    write_pages(&mut ns, 0, 8).unwrap();
    assert_eq!(ns.partition(0).victim_line_cnt(), 1);

    // Burn free lines with fresh data until the high watermark forces a
    // foreground collection of line 0.
    write_pages(&mut ns, 48, 8).unwrap();
    write_pages(&mut ns, 64, 16).unwrap();
    write_pages(&mut ns, 80, 16).unwrap();

    let part = ns.partition(0);
    assert_eq!(part.victim_line_cnt(), 0);
    assert_eq!(part.free_line_cnt(), 3);

    // Survivors moved behind the GC write pointer (line 1), preserving the
    // LUN-first striping of the copy order.
    for lpn in 8..16 {
        assert_eq!(part.translate(lpn).blk(), 1, "LPN {lpn} not relocated");
    }
    assert_eq!(part.translate(8), Ppa::new(0, 0, 0, 1, 0));
    assert_eq!(part.translate(15), Ppa::new(1, 1, 0, 1, 1));
    for ch in 0..2 {
        for lun in 0..2 {
            assert_eq!(part.erase_count(Ppa::new(ch, lun, 0, 0, 0)), 1);
        }
    }
    ns.verify_consistency();
}

#[test]
fn foreground_gc_without_victims_is_fatal() {
    let cfg = FtlConfig {
        gc_thres_lines: 2,
        gc_thres_lines_high: 2,
        enable_gc_delay: true,
        op_area_pcent: 0.07,
    };
    let mut ns = make_namespace(&cfg);

    // Purely fresh data: nothing ever becomes invalid, so when the free
    // pool hits the high watermark there is nothing GC can reclaim.
    write_pages(&mut ns, 0, 16).unwrap();
    write_pages(&mut ns, 16, 16).unwrap();
    write_pages(&mut ns, 32, 16).unwrap();

    // Closing the fourth line drops the free pool to the watermark.
    let err = write_pages(&mut ns, 48, 16).unwrap_err();
    assert!(matches!(err, FtlError::GcCannotFree));
}

#[test]
fn opportunistic_gc_skips_expensive_victims() {
    let cfg = FtlConfig {
        gc_thres_lines: 3,
        gc_thres_lines_high: 1,
        enable_gc_delay: true,
        op_area_pcent: 0.07,
    };
    let mut ns = make_namespace(&cfg);

    // Make line 0 a victim with 15 of 16 pages still valid: far beyond the
    // 1/8th-of-a-line budget an opportunistic cycle will accept.
    write_pages(&mut ns, 0, 16).unwrap();
    write_pages(&mut ns, 0, 1).unwrap();

    // Drop to the opportunistic band. The victim stays enrolled.
    write_pages(&mut ns, 16, 15).unwrap();
    write_pages(&mut ns, 31, 16).unwrap();
    let part = ns.partition(0);
    assert!(part.free_line_cnt() <= 3);
    assert_eq!(part.victim_line_cnt(), 1);
    assert_eq!(part.erase_count(Ppa::new(0, 0, 0, 0, 0)), 0);
    ns.verify_consistency();
}

#[test]
fn disabling_gc_delay_reshuffles_mappings_without_device_time() {
    let run = |enable_gc_delay: bool| -> (u64, Vec<Ppa>) {
        let cfg = FtlConfig {
            gc_thres_lines: 2,
            gc_thres_lines_high: 2,
            enable_gc_delay,
            op_area_pcent: 0.07,
        };
        let mut ns = make_namespace(&cfg);
        write_pages(&mut ns, 0, 16).unwrap();
        write_pages(&mut ns, 0, 8).unwrap();
        write_pages(&mut ns, 48, 8).unwrap();
        write_pages(&mut ns, 64, 16).unwrap();
        write_pages(&mut ns, 80, 16).unwrap();

        let mappings = (0..96).map(|lpn| ns.partition(0).translate(lpn)).collect();
        ns.verify_consistency();
        (ns.next_idle_time(), mappings)
    };

    let (idle_on, map_on) = run(true);
    let (idle_off, map_off) = run(false);

    // Logical outcome is identical; only the timeline differs.
    assert_eq!(map_on, map_off);
    assert!(
        idle_on > idle_off,
        "GC traffic should lengthen the device timeline when charged ({idle_on} <= {idle_off})"
    );
}

#[test]
fn collection_refills_write_credits() {
    let cfg = FtlConfig {
        gc_thres_lines: 2,
        gc_thres_lines_high: 2,
        enable_gc_delay: true,
        op_area_pcent: 0.07,
    };
    let mut ns = make_namespace(&cfg);

    // Leave line 0 fully invalid and the open line one page short of full.
    write_pages(&mut ns, 0, 16).unwrap();
    write_pages(&mut ns, 0, 16).unwrap();
    write_pages(&mut ns, 16, 15).unwrap();
    write_pages(&mut ns, 31, 16).unwrap();
    let before = ns.partition(0).write_credits();

    // This single page closes a line, trips the watermark, and the
    // resulting collection pays a full line of credits back.
    write_pages(&mut ns, 47, 1).unwrap();
    let after = ns.partition(0).write_credits();
    assert!(
        after >= before + 15,
        "reclaim did not refill credits: {before} -> {after}"
    );
    assert_eq!(ns.partition(0).erase_count(Ppa::new(0, 0, 0, 0, 0)), 1);
}
