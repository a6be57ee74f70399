use teslaclk_lib::klog_info;
use teslaclk_lib::testing::TestResult;

use crate::error::PmError;
use crate::hwsq::{self, HWSQ_CODE_CAPACITY, HWSQ_FLAG_BUS_ACCESS, HwsqProgram};
use crate::mclk;
use crate::perflvl::{DramTiming, PerfLevel};
use crate::pm_defs::*;
use crate::test_fixtures::{MockRig, ddr2_vram, ddr3_vram, unknown_vram};

const DECODE_CAPACITY: usize = 64;

/// Walk the byte stream the way the sequencer would, recording every
/// triggered register write in order. Returns the number recorded.
fn decode_writes(bytes: &[u8], out: &mut [(u32, u32); DECODE_CAPACITY]) -> usize {
    let mut addr = 0u32;
    let mut data = 0u32;
    let mut count = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            0x00..=0x3f => i += 1,
            0x40 => {
                addr = (addr & 0xffff_0000) | u32::from(u16::from_le_bytes([bytes[i + 1], bytes[i + 2]]));
                if count < DECODE_CAPACITY {
                    out[count] = (addr, data);
                    count += 1;
                }
                i += 3;
            }
            0x42 => {
                data = (data & 0xffff_0000) | u32::from(u16::from_le_bytes([bytes[i + 1], bytes[i + 2]]));
                i += 3;
            }
            0x5f => i += 3,
            0x7f => break,
            0x80..=0xbf => i += 1,
            0xe0 => {
                addr = u32::from_le_bytes([bytes[i + 1], bytes[i + 2], bytes[i + 3], bytes[i + 4]]);
                if count < DECODE_CAPACITY {
                    out[count] = (addr, data);
                    count += 1;
                }
                i += 5;
            }
            0xe2 => {
                data = u32::from_le_bytes([bytes[i + 1], bytes[i + 2], bytes[i + 3], bytes[i + 4]]);
                i += 5;
            }
            op => {
                klog_info!("HWSQ_TEST: BUG - undecodable op {:#04x}", op);
                break;
            }
        }
    }
    count
}

fn find_write(writes: &[(u32, u32)], addr: u32, data: u32) -> Option<usize> {
    writes.iter().position(|w| *w == (addr, data))
}

const EVENT_CAPACITY: usize = 96;

/// A decoded program step the DRAM cares about: a triggered register
/// write or the accumulated microseconds between writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeqEvent {
    Write(u32, u32),
    Delay(u32),
}

/// Like `decode_writes`, but keeps the delays. Consecutive delay bytes
/// merge into one event, mirroring how the DRAM experiences them.
fn decode_events(bytes: &[u8], out: &mut [SeqEvent; EVENT_CAPACITY]) -> usize {
    let mut addr = 0u32;
    let mut data = 0u32;
    let mut count = 0usize;
    let mut i = 0usize;

    let push = |out: &mut [SeqEvent; EVENT_CAPACITY], count: &mut usize, ev: SeqEvent| {
        if let (SeqEvent::Delay(us), Some(SeqEvent::Delay(prev))) =
            (ev, count.checked_sub(1).map(|n| out[n]))
        {
            out[*count - 1] = SeqEvent::Delay(prev + us);
            return;
        }
        if *count < EVENT_CAPACITY {
            out[*count] = ev;
            *count += 1;
        }
    };

    while i < bytes.len() {
        match bytes[i] {
            0x00 => i += 1, // padding no-op
            op @ 0x01..=0x3f => {
                let us = u32::from(op & 3) << (2 * (op >> 2));
                push(out, &mut count, SeqEvent::Delay(us));
                i += 1;
            }
            0x40 => {
                addr = (addr & 0xffff_0000) | u32::from(u16::from_le_bytes([bytes[i + 1], bytes[i + 2]]));
                push(out, &mut count, SeqEvent::Write(addr, data));
                i += 3;
            }
            0x42 => {
                data = (data & 0xffff_0000) | u32::from(u16::from_le_bytes([bytes[i + 1], bytes[i + 2]]));
                i += 3;
            }
            0x5f => i += 3,
            0x7f => break,
            0x80..=0xbf => i += 1,
            0xe0 => {
                addr = u32::from_le_bytes([bytes[i + 1], bytes[i + 2], bytes[i + 3], bytes[i + 4]]);
                push(out, &mut count, SeqEvent::Write(addr, data));
                i += 5;
            }
            0xe2 => {
                data = u32::from_le_bytes([bytes[i + 1], bytes[i + 2], bytes[i + 3], bytes[i + 4]]);
                i += 5;
            }
            op => {
                klog_info!("HWSQ_TEST: BUG - undecodable op {:#04x}", op);
                break;
            }
        }
    }
    count
}

fn mem_level(khz: u32) -> PerfLevel {
    PerfLevel {
        memory_khz: khz,
        timing: Some(DramTiming {
            mr: [0x0232, 0x0044, 0x0018],
            reg: [0x1122_3344; 9],
            odt: false,
            cas: 5,
            wr: 6,
        }),
        ..Default::default()
    }
}

/// Delay bytes pack microseconds base-4, greedily.
pub fn test_delay_encoding() -> TestResult {
    let cases: [(u32, &[u8]); 5] = [
        (1, &[0x01]),
        (4, &[0x05]),
        (12, &[0x07]),
        (5, &[0x05, 0x01]),
        (48, &[0x0b]),
    ];
    for (us, expected) in cases {
        let mut prog = HwsqProgram::new();
        if prog.usec(us).is_err() {
            return TestResult::Fail;
        }
        if prog.as_bytes() != expected {
            klog_info!("HWSQ_TEST: BUG - usec({}) encoded {:?}", us, prog.as_bytes());
            return TestResult::Fail;
        }
    }
    TestResult::Pass
}

/// The ADDR/DATA latches compress consecutive writes: unchanged data is
/// not re-loaded, matching upper halves use the short 16-bit forms.
pub fn test_write_latch_compression() -> TestResult {
    let mut prog = HwsqProgram::new();
    let steps: [(u32, u32); 3] = [(0x1002d4, 1), (0x1002d0, 1), (0x1002d0, 2)];
    for (addr, data) in steps {
        if prog.wr32(addr, data).is_err() {
            return TestResult::Fail;
        }
    }

    let expected: &[u8] = &[
        0xe2, 0x01, 0x00, 0x00, 0x00, // data  = 0x00000001
        0xe0, 0xd4, 0x02, 0x10, 0x00, // addr  = 0x001002d4, write
        0x40, 0xd0, 0x02, // addr low, write (data latch reused)
        0x42, 0x02, 0x00, // data low = 2
        0x40, 0xd0, 0x02, // write again
    ];
    if prog.as_bytes() != expected {
        klog_info!("HWSQ_TEST: BUG - compressed stream {:?}", prog.as_bytes());
        return TestResult::Fail;
    }
    TestResult::Pass
}

/// Flag ops and the two-operand micro-op.
pub fn test_flag_and_microop_encoding() -> TestResult {
    let mut prog = HwsqProgram::new();
    if prog.setf(HWSQ_FLAG_BUS_ACCESS, false).is_err()
        || prog.setf(HWSQ_FLAG_BUS_ACCESS, true).is_err()
        || prog.op5f(0x03, 0x01).is_err()
    {
        return TestResult::Fail;
    }
    if prog.as_bytes() != [0x90, 0xb0, 0x5f, 0x03, 0x01] {
        klog_info!("HWSQ_TEST: BUG - flag/micro-op stream {:?}", prog.as_bytes());
        return TestResult::Fail;
    }
    TestResult::Pass
}

/// finalize settles, exits and pads to word alignment.
pub fn test_finalize_alignment() -> TestResult {
    let mut prog = HwsqProgram::new();
    if prog.finalize().is_err() {
        return TestResult::Fail;
    }
    if prog.as_bytes() != [0x02, 0x7f, 0x00, 0x00] {
        klog_info!("HWSQ_TEST: BUG - finalized stream {:?}", prog.as_bytes());
        return TestResult::Fail;
    }
    if !prog.is_finalized() || prog.len() % 4 != 0 {
        return TestResult::Fail;
    }
    TestResult::Pass
}

/// A finalized program accepts no further ops.
pub fn test_append_after_finalize_fails() -> TestResult {
    let mut prog = HwsqProgram::new();
    if prog.finalize().is_err() {
        return TestResult::Fail;
    }
    match prog.usec(1) {
        Err(PmError::ProgramOverflow) => TestResult::Pass,
        _ => TestResult::Fail,
    }
}

/// Exceeding the code window fails cleanly without wrapping.
pub fn test_capacity_overflow() -> TestResult {
    let mut prog = HwsqProgram::new();
    for i in 0..100u32 {
        // distinct upper halves defeat the latch compression
        if let Err(err) = prog.wr32(0x0010_0000 + (i << 16), (i + 1) << 16) {
            if !matches!(err, PmError::ProgramOverflow) {
                return TestResult::Fail;
            }
            if prog.len() > HWSQ_CODE_CAPACITY {
                return TestResult::Fail;
            }
            return TestResult::Pass;
        }
    }
    klog_info!("HWSQ_TEST: BUG - never overflowed");
    TestResult::Fail
}

/// Identical device state and target produce a byte-identical program.
pub fn test_memory_program_deterministic() -> TestResult {
    let rig = MockRig::new();
    let dev = match rig.device(0x92, ddr2_vram()) {
        Ok(dev) => dev,
        Err(_) => return TestResult::Fail,
    };
    let level = mem_level(100_000);

    let a = match mclk::build_mclk_program(&dev, &level, 0) {
        Ok(plan) => plan,
        Err(_) => return TestResult::Fail,
    };
    let b = match mclk::build_mclk_program(&dev, &level, 0) {
        Ok(plan) => plan,
        Err(_) => return TestResult::Fail,
    };
    if a.program.as_bytes() != b.program.as_bytes() || a.mast != b.mast {
        klog_info!("HWSQ_TEST: BUG - program not deterministic");
        return TestResult::Fail;
    }
    TestResult::Pass
}

/// The memory program brackets the clock switch in self-refresh and runs
/// the DDR2 mode-register post with a DLL reset toggle.
pub fn test_ddr2_program_order() -> TestResult {
    let rig = MockRig::new();
    let dev = match rig.device(0x92, ddr2_vram()) {
        Ok(dev) => dev,
        Err(_) => return TestResult::Fail,
    };
    let level = mem_level(100_000);

    let plan = match mclk::build_mclk_program(&dev, &level, 0) {
        Ok(plan) => plan,
        Err(_) => return TestResult::Fail,
    };
    let mut writes = [(0u32, 0u32); DECODE_CAPACITY];
    let n = decode_writes(plan.program.as_bytes(), &mut writes);
    let writes = &writes[..n];

    let timing = level.timing.as_ref().unwrap();
    let checkpoints = [
        find_write(writes, PFB_SELF_REFRESH, 1),
        find_write(writes, PCLK_MAST, plan.mast),
        find_write(writes, PFB_SELF_REFRESH, 0),
        find_write(writes, PFB_MR0, timing.mr[0] | MR0_DLL_RESET),
        find_write(writes, PFB_MR0, timing.mr[0]),
    ];
    let mut last = 0usize;
    for (i, point) in checkpoints.iter().enumerate() {
        match point {
            Some(pos) if i == 0 || *pos > last => last = *pos,
            Some(_) => {
                klog_info!("HWSQ_TEST: BUG - checkpoint {} out of order", i);
                return TestResult::Fail;
            }
            None => {
                klog_info!("HWSQ_TEST: BUG - checkpoint {} missing", i);
                return TestResult::Fail;
            }
        }
    }

    // The coefficient write sits inside the self-refresh bracket.
    let coef = find_write(writes, PLL_MEMORY + 4, 0);
    let enter = find_write(writes, PFB_SELF_REFRESH, 1);
    let exit = find_write(writes, PFB_SELF_REFRESH, 0);
    match (enter, coef, exit) {
        (Some(enter), Some(coef), Some(exit)) if enter < coef && coef < exit => TestResult::Pass,
        _ => {
            klog_info!("HWSQ_TEST: BUG - coefficient write outside self-refresh");
            TestResult::Fail
        }
    }
}

/// DDR2 single-rank program, delays included: the controller gets its
/// 12 us settle after leaving self-refresh, the DLL reset toggles exactly
/// once with a 2 us hold, and rank B is never addressed.
pub fn test_ddr2_settle_and_dll_toggle() -> TestResult {
    let rig = MockRig::new();
    let dev = match rig.device(0x92, ddr2_vram()) {
        Ok(dev) => dev,
        Err(_) => return TestResult::Fail,
    };
    let level = mem_level(100_000);

    let plan = match mclk::build_mclk_program(&dev, &level, 0) {
        Ok(plan) => plan,
        Err(_) => return TestResult::Fail,
    };
    let mut events = [SeqEvent::Delay(0); EVENT_CAPACITY];
    let n = decode_events(plan.program.as_bytes(), &mut events);
    let events = &events[..n];

    let timing = level.timing.as_ref().unwrap();
    let set = SeqEvent::Write(PFB_MR0, timing.mr[0] | MR0_DLL_RESET);
    let clear = SeqEvent::Write(PFB_MR0, timing.mr[0]);
    if events.iter().filter(|ev| **ev == set).count() != 1
        || events.iter().filter(|ev| **ev == clear).count() != 1
    {
        klog_info!("HWSQ_TEST: BUG - DLL reset not toggled exactly once");
        return TestResult::Fail;
    }
    if events
        .iter()
        .any(|ev| matches!(ev, SeqEvent::Write(addr, _) if *addr == PFB_MR0_B || *addr == PFB_MR1_B))
    {
        klog_info!("HWSQ_TEST: BUG - rank B addressed on a single-rank board");
        return TestResult::Fail;
    }

    // Self-refresh exit settle: refresh restart followed by 12 us.
    let restart = SeqEvent::Write(PFB_AUTO_REFRESH, PFB_AUTO_REFRESH_ON);
    match events.iter().position(|ev| *ev == restart) {
        Some(pos) if events.get(pos + 1) == Some(&SeqEvent::Delay(12)) => {}
        _ => {
            klog_info!("HWSQ_TEST: BUG - missing 12 us settle after refresh restart");
            return TestResult::Fail;
        }
    }
    // DLL reset clear holds for 2 us before the program moves on.
    match events.iter().position(|ev| *ev == clear) {
        Some(pos) if events.get(pos + 1) == Some(&SeqEvent::Delay(2)) => {}
        _ => {
            klog_info!("HWSQ_TEST: BUG - missing 2 us hold after DLL reset clear");
            return TestResult::Fail;
        }
    }
    TestResult::Pass
}

/// Rank B mirrors every mode-register write on dual-rank DDR3 boards.
pub fn test_ddr3_rank_mirror() -> TestResult {
    let rig = MockRig::new();
    let dev = match rig.device(0x92, ddr3_vram()) {
        Ok(dev) => dev,
        Err(_) => return TestResult::Fail,
    };
    let level = mem_level(100_000);

    let plan = match mclk::build_mclk_program(&dev, &level, 0) {
        Ok(plan) => plan,
        Err(_) => return TestResult::Fail,
    };
    let mut writes = [(0u32, 0u32); DECODE_CAPACITY];
    let n = decode_writes(plan.program.as_bytes(), &mut writes);
    let writes = &writes[..n];

    let timing = level.timing.as_ref().unwrap();
    for (addr, data) in [
        (PFB_MR2_B, timing.mr[2]),
        (PFB_MR1_B, timing.mr[1]),
        (PFB_MR0_B, timing.mr[0]),
    ] {
        if find_write(writes, addr, data).is_none() {
            klog_info!("HWSQ_TEST: BUG - rank B write {:#08x} missing", addr);
            return TestResult::Fail;
        }
    }
    TestResult::Pass
}

/// A timing set over unrecognized memory is rejected before anything is
/// built.
pub fn test_unknown_ram_rejected() -> TestResult {
    let rig = MockRig::new();
    let dev = match rig.device(0x92, unknown_vram()) {
        Ok(dev) => dev,
        Err(_) => return TestResult::Fail,
    };
    match mclk::build_mclk_program(&dev, &mem_level(100_000), 0) {
        Err(PmError::UnsupportedRam(_)) => TestResult::Pass,
        _ => TestResult::Fail,
    }
}

/// Without a timing set the program carries no mode-register writes.
pub fn test_missing_timing_conservative() -> TestResult {
    let rig = MockRig::new();
    let dev = match rig.device(0x92, ddr2_vram()) {
        Ok(dev) => dev,
        Err(_) => return TestResult::Fail,
    };
    let level = PerfLevel {
        memory_khz: 100_000,
        ..Default::default()
    };

    let plan = match mclk::build_mclk_program(&dev, &level, 0) {
        Ok(plan) => plan,
        Err(_) => return TestResult::Fail,
    };
    let mut writes = [(0u32, 0u32); DECODE_CAPACITY];
    let n = decode_writes(plan.program.as_bytes(), &mut writes);
    for (addr, _) in &writes[..n] {
        if [PFB_MR0, PFB_MR1, PFB_MR2, PFB_MR0_B, PFB_MR1_B, PFB_MR2_B].contains(addr) {
            klog_info!("HWSQ_TEST: BUG - MR write in conservative program");
            return TestResult::Fail;
        }
    }
    TestResult::Pass
}

/// upload copies the image into the variant's code window with shadowing
/// off and leaves the sequencer enabled.
pub fn test_upload_window() -> TestResult {
    let rig = MockRig::new();
    let dev = match rig.device(0x92, ddr2_vram()) {
        Ok(dev) => dev,
        Err(_) => return TestResult::Fail,
    };

    let mut prog = HwsqProgram::new();
    if prog.wr32(0x1002d4, 1).is_err() || prog.finalize().is_err() {
        return TestResult::Fail;
    }
    hwsq::upload(&dev, &prog);

    let words = prog.len() / 4;
    for i in 0..words {
        if rig.bus.writes_to(HWSQ_DATA_LARGE + (i as u32) * 4) != 1 {
            klog_info!("HWSQ_TEST: BUG - window word {} not written", i);
            return TestResult::Fail;
        }
    }
    if rig.bus.last_write_to(PBUS_HWSQ_ENTRY) != Some(0) {
        return TestResult::Fail;
    }
    match rig.bus.last_write_to(PBUS_HWSQ_CTRL) {
        Some(ctrl) if ctrl & HWSQ_CTRL_ENABLE == HWSQ_CTRL_ENABLE => TestResult::Pass,
        _ => TestResult::Fail,
    }
}

/// launch kicks the chip-specific doorbell and reports a stuck program.
pub fn test_launch_kick_and_timeout() -> TestResult {
    let rig = MockRig::new();
    let dev = match rig.device(0x92, ddr2_vram()) {
        Ok(dev) => dev,
        Err(_) => return TestResult::Fail,
    };

    let mut prog = HwsqProgram::new();
    if prog.finalize().is_err() {
        return TestResult::Fail;
    }

    if hwsq::launch(&dev, &prog).is_err() {
        return TestResult::Fail;
    }
    if rig.bus.last_write_to(PBUS_HWSQ_KICK) != Some(HWSQ_KICK_LARGE) {
        return TestResult::Fail;
    }

    rig.bus.preset(PBUS_HWSQ_STATUS, HWSQ_STATUS_ACTIVE);
    match hwsq::launch(&dev, &prog) {
        Err(PmError::SequencerTimeout) => TestResult::Pass,
        _ => TestResult::Fail,
    }
}

teslaclk_lib::define_test_suite!(
    hwsq,
    [
        test_delay_encoding,
        test_write_latch_compression,
        test_flag_and_microop_encoding,
        test_finalize_alignment,
        test_append_after_finalize_fails,
        test_capacity_overflow,
        test_memory_program_deterministic,
        test_ddr2_program_order,
        test_ddr2_settle_and_dll_toggle,
        test_ddr3_rank_mirror,
        test_unknown_ram_rejected,
        test_missing_timing_conservative,
        test_upload_window,
        test_launch_kick_and_timeout,
    ]
);
