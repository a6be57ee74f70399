use teslaclk_lib::klog_info;
use teslaclk_lib::testing::TestResult;

use crate::error::{PmError, WaitPoint};
use crate::perflvl::{DramTiming, PerfLevel};
use crate::pm_defs::*;
use crate::reclock;
use crate::test_fixtures::{MockRig, ddr2_vram, unknown_vram};

/// Seed the shared reference PLL so engine solves see a 300 MHz input.
fn seed_refclk(rig: &MockRig) {
    rig.bus.preset(PCLK_REF_COEF, (100 << 8) | 9);
}

fn engine_level() -> PerfLevel {
    PerfLevel {
        core_khz: 400_000,
        shader_khz: 800_000,
        ..Default::default()
    }
}

fn memory_level() -> PerfLevel {
    PerfLevel {
        core_khz: 400_000,
        memory_khz: 100_000,
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

/// Unknown chip revisions are refused at device construction.
pub fn test_unknown_chipset_rejected() -> TestResult {
    let rig = MockRig::new();
    match rig.device(0x40, unknown_vram()) {
        Err(PmError::UnsupportedChipset(0x40)) => TestResult::Pass,
        _ => TestResult::Fail,
    }
}

/// A failed solve aborts prepare with zero register writes.
pub fn test_prepare_atomic_on_solve_failure() -> TestResult {
    let rig = MockRig::new();
    let dev = match rig.device(0x92, ddr2_vram()) {
        Ok(dev) => dev,
        Err(_) => return TestResult::Fail,
    };
    // reference PLL left unprogrammed: every core solve must fail
    let level = PerfLevel {
        core_khz: 5_000_000,
        ..Default::default()
    };
    if reclock::prepare(&dev, &level).is_ok() {
        return TestResult::Fail;
    }
    if rig.bus.write_count() != 0 {
        klog_info!(
            "RECLOCK_TEST: BUG - {} writes during failed prepare",
            rig.bus.write_count()
        );
        return TestResult::Fail;
    }
    TestResult::Pass
}

/// Engine plan: safe-mux parking first, then core PLL ctrl+coef, then the
/// slaved shader, then the divider register.
pub fn test_prepare_engine_write_order() -> TestResult {
    let rig = MockRig::new();
    let dev = match rig.device(0x92, ddr2_vram()) {
        Ok(dev) => dev,
        Err(_) => return TestResult::Fail,
    };
    seed_refclk(&rig);

    let txn = match reclock::prepare(&dev, &engine_level()) {
        Ok(txn) => txn,
        Err(err) => {
            klog_info!("RECLOCK_TEST: BUG - prepare failed: {}", err);
            return TestResult::Fail;
        }
    };

    let writes = txn.engine_writes();
    let expected_addrs = [PCLK_MAST, PLL_CORE, PLL_CORE + 4, PLL_SHADER, PCLK_DIV_B];
    if writes.len() != expected_addrs.len() {
        klog_info!("RECLOCK_TEST: BUG - {} engine writes", writes.len());
        return TestResult::Fail;
    }
    for (w, addr) in writes.iter().zip(expected_addrs) {
        if w.addr != addr {
            klog_info!("RECLOCK_TEST: BUG - write to {:#08x}, expected {:#08x}", w.addr, addr);
            return TestResult::Fail;
        }
    }

    // 300 MHz ref, 400 MHz target: N=8 M=3 P=1 exactly.
    if writes[1].val != PLL_CTRL_ENABLE | (1 << 19) | (1 << 16) {
        klog_info!("RECLOCK_TEST: BUG - core ctrl {:#010x}", writes[1].val);
        return TestResult::Fail;
    }
    if writes[2].val != (8 << 8) | 3 {
        klog_info!("RECLOCK_TEST: BUG - core coef {:#010x}", writes[2].val);
        return TestResult::Fail;
    }
    // shader slaved at P-1 = 0, PLL left disabled
    if writes[3].val != 0 {
        return TestResult::Fail;
    }
    // final mux: core on its PLL, shader slaved
    if txn.final_mast() != 0x0000_0023 {
        klog_info!("RECLOCK_TEST: BUG - final mast {:#010x}", txn.final_mast());
        return TestResult::Fail;
    }
    TestResult::Pass
}

/// PLL control words are read-modify-write: bits outside the enable,
/// P-field and bypass group survive the reprogram, bits inside it do not.
pub fn test_prepare_preserves_pll_ctrl_bits() -> TestResult {
    let rig = MockRig::new();
    let dev = match rig.device(0x92, ddr2_vram()) {
        Ok(dev) => dev,
        Err(_) => return TestResult::Fail,
    };
    seed_refclk(&rig);
    rig.arm_quiesce_acks();
    // 0xc02000 must survive; the stale stage-2 bypass bit must not.
    rig.bus.preset(PLL_CORE, 0x00c0_2100);
    rig.bus.preset(PLL_SHADER, 0x0000_4000);

    let txn = match reclock::prepare(&dev, &engine_level()) {
        Ok(txn) => txn,
        Err(err) => {
            klog_info!("RECLOCK_TEST: BUG - prepare failed: {}", err);
            return TestResult::Fail;
        }
    };

    let core = txn.engine_writes().iter().find(|w| w.addr == PLL_CORE);
    let expected = PLL_CTRL_ENABLE | (1 << 19) | (1 << 16) | 0x00c0_2000;
    if core.map(|w| w.val) != Some(expected) {
        klog_info!("RECLOCK_TEST: BUG - core ctrl plan {:?}", core.map(|w| w.val));
        return TestResult::Fail;
    }
    let shader = txn.engine_writes().iter().find(|w| w.addr == PLL_SHADER);
    if shader.map(|w| w.val) != Some(0x0000_4000) {
        klog_info!("RECLOCK_TEST: BUG - shader ctrl plan {:?}", shader.map(|w| w.val));
        return TestResult::Fail;
    }

    if reclock::commit(&dev, txn).is_err() {
        return TestResult::Fail;
    }
    if rig.bus.last_write_to(PLL_CORE) != Some(expected) {
        klog_info!(
            "RECLOCK_TEST: BUG - committed core ctrl {:#010x}",
            rig.bus.read_back(PLL_CORE)
        );
        return TestResult::Fail;
    }
    TestResult::Pass
}

/// vdec picks the closer of core-divider and alternate routes; dom6
/// matches hclk directly.
pub fn test_prepare_aux_domain_routes() -> TestResult {
    let rig = MockRig::new();
    let dev = match rig.device(0x92, ddr2_vram()) {
        Ok(dev) => dev,
        Err(_) => return TestResult::Fail,
    };
    seed_refclk(&rig);

    let level = PerfLevel {
        core_khz: 400_000,
        vdec_khz: 250_000,
        dom6_khz: 277_000,
        ..Default::default()
    };
    let txn = match reclock::prepare(&dev, &level) {
        Ok(txn) => txn,
        Err(_) => return TestResult::Fail,
    };

    // core/2 = 200 MHz beats the unprogrammed vdec PLL
    if txn.final_mast() & 0x0000_0c00 != 0x0000_0c00 {
        klog_info!("RECLOCK_TEST: BUG - vdec not on core route");
        return TestResult::Fail;
    }
    if txn.final_mast() & 0x0c00_0000 != 0x0800_0000 {
        klog_info!("RECLOCK_TEST: BUG - dom6 not on hclk");
        return TestResult::Fail;
    }
    let div = txn
        .engine_writes()
        .iter()
        .find(|w| w.addr == PCLK_DIV_B)
        .map(|w| w.val);
    if div != Some(1 << 8) {
        klog_info!("RECLOCK_TEST: BUG - divider plan {:?}", div);
        return TestResult::Fail;
    }
    TestResult::Pass
}

/// Commit runs the memory program before any engine-clock write and
/// leaves the final mux value last.
pub fn test_commit_memory_before_engines() -> TestResult {
    let rig = MockRig::new();
    let dev = match rig.device(0x92, ddr2_vram()) {
        Ok(dev) => dev,
        Err(_) => return TestResult::Fail,
    };
    seed_refclk(&rig);
    rig.arm_quiesce_acks();

    let txn = match reclock::prepare(&dev, &memory_level()) {
        Ok(txn) => txn,
        Err(_) => return TestResult::Fail,
    };
    if !txn.memory_planned() {
        return TestResult::Fail;
    }
    let final_mast = txn.final_mast();

    if let Err(err) = reclock::commit(&dev, txn) {
        klog_info!("RECLOCK_TEST: BUG - commit failed: {}", err);
        return TestResult::Fail;
    }

    let kick = rig.bus.first_write_to(PBUS_HWSQ_KICK);
    let core = rig.bus.first_write_to(PLL_CORE);
    match (kick, core) {
        (Some(kick), Some(core)) if kick < core => {}
        _ => {
            klog_info!("RECLOCK_TEST: BUG - engine write before memory program");
            return TestResult::Fail;
        }
    }

    if rig.bus.last_write_to(PCLK_MAST) != Some(final_mast) {
        klog_info!("RECLOCK_TEST: BUG - final mast not last");
        return TestResult::Fail;
    }
    if rig.fifo.pause_count() != 1 || rig.fifo.resume_count() != 1 {
        return TestResult::Fail;
    }
    TestResult::Pass
}

/// A quiesce timeout still resumes everything it engaged.
pub fn test_commit_resumes_after_freeze_timeout() -> TestResult {
    let rig = MockRig::new();
    let dev = match rig.device(0x92, ddr2_vram()) {
        Ok(dev) => dev,
        Err(_) => return TestResult::Fail,
    };
    seed_refclk(&rig);
    // freeze ack never raised: the 0x2504 wait must time out

    let txn = match reclock::prepare(&dev, &engine_level()) {
        Ok(txn) => txn,
        Err(_) => return TestResult::Fail,
    };
    match reclock::commit(&dev, txn) {
        Err(PmError::Timeout(WaitPoint::FifoFreeze)) => {}
        _ => {
            klog_info!("RECLOCK_TEST: BUG - expected freeze timeout");
            return TestResult::Fail;
        }
    }

    if rig.fifo.pause_count() != 1 || rig.fifo.resume_count() != 1 {
        return TestResult::Fail;
    }
    // freeze request cleared on the way out
    match rig.bus.last_write_to(PFIFO_FREEZE) {
        Some(val) if val & PFIFO_FREEZE_REQUEST == 0 => {}
        _ => {
            klog_info!("RECLOCK_TEST: BUG - freeze request left set");
            return TestResult::Fail;
        }
    }
    // no engine write made it through
    if rig.bus.first_write_to(PLL_CORE).is_some() {
        return TestResult::Fail;
    }
    TestResult::Pass
}

/// A failing BIOS script aborts before the program is uploaded, and the
/// engines resume.
pub fn test_commit_script_failure() -> TestResult {
    let rig = MockRig::with_bios_prologue(&[0x11]);
    let dev = match rig.device(0x92, ddr2_vram()) {
        Ok(dev) => dev,
        Err(_) => return TestResult::Fail,
    };
    seed_refclk(&rig);
    rig.arm_quiesce_acks();
    rig.bios.fail_script(0x11);

    let txn = match reclock::prepare(&dev, &memory_level()) {
        Ok(txn) => txn,
        Err(_) => return TestResult::Fail,
    };
    match reclock::commit(&dev, txn) {
        Err(PmError::ScriptFailed(0x11)) => {}
        _ => return TestResult::Fail,
    }
    if rig.bus.writes_to(HWSQ_DATA_LARGE) != 0 {
        klog_info!("RECLOCK_TEST: BUG - program uploaded after script failure");
        return TestResult::Fail;
    }
    if rig.fifo.resume_count() != 1 {
        return TestResult::Fail;
    }
    TestResult::Pass
}

/// One-shot helper drives an engine-only reclock end to end.
pub fn test_reclock_one_shot() -> TestResult {
    let rig = MockRig::new();
    let dev = match rig.device(0x92, ddr2_vram()) {
        Ok(dev) => dev,
        Err(_) => return TestResult::Fail,
    };
    seed_refclk(&rig);
    rig.arm_quiesce_acks();

    let level = PerfLevel {
        core_khz: 400_000,
        ..Default::default()
    };
    if reclock::reclock(&dev, &level).is_err() {
        return TestResult::Fail;
    }
    // core routed onto its PLL by the final mux write
    if rig.bus.last_write_to(PCLK_MAST) != Some(0x0000_0003) {
        return TestResult::Fail;
    }
    TestResult::Pass
}

/// IGP core domain: an exact hit off the hrefm4 tap beats spinning up
/// the PLL, and the shift lands in the control word without touching the
/// other bits.
pub fn test_igp_prepare_prefers_divider() -> TestResult {
    let rig = MockRig::new();
    let dev = match rig.device(0xaa, unknown_vram()) {
        Ok(dev) => dev,
        Err(_) => return TestResult::Fail,
    };
    rig.bus.preset(PLL_CORE, PLL_CTRL_ENABLE | (5 << 16));

    let level = PerfLevel {
        core_khz: 100_000,
        ..Default::default()
    };
    let txn = match reclock::prepare(&dev, &level) {
        Ok(txn) => txn,
        Err(err) => {
            klog_info!("RECLOCK_TEST: BUG - prepare failed: {}", err);
            return TestResult::Fail;
        }
    };

    let writes = txn.engine_writes();
    if writes.len() != 2 || writes[0].addr != PCLK_MAST_IGP || writes[1].addr != PLL_CORE {
        klog_info!("RECLOCK_TEST: BUG - {} planned writes", writes.len());
        return TestResult::Fail;
    }
    if writes[0].val != 0x0340_0640 {
        klog_info!("RECLOCK_TEST: BUG - safe mux {:#010x}", writes[0].val);
        return TestResult::Fail;
    }
    // 400 MHz >> 2; shift replaces the old field, enable bit untouched
    if writes[1].val != PLL_CTRL_ENABLE | (2 << 16) {
        klog_info!("RECLOCK_TEST: BUG - core ctrl {:#010x}", writes[1].val);
        return TestResult::Fail;
    }
    if txn.final_mast() != 0x0300_0002 {
        klog_info!("RECLOCK_TEST: BUG - final mast {:#010x}", txn.final_mast());
        return TestResult::Fail;
    }
    TestResult::Pass
}

/// IGP PLL route end to end: coefficients at twice the target, integer
/// post-divider register, lock wait, vdec divider, final bridge mux, and
/// the unused shader PLL powered down after resume.
pub fn test_igp_commit_pll_route() -> TestResult {
    let rig = MockRig::new();
    let dev = match rig.device(0xaa, unknown_vram()) {
        Ok(dev) => dev,
        Err(_) => return TestResult::Fail,
    };
    rig.arm_igp_acks();
    rig.bus.preset(PTHERM_GATE, PTHERM_GATE_ENGINES);

    let level = PerfLevel {
        core_khz: 300_000,
        vdec_khz: 150_000,
        ..Default::default()
    };
    let txn = match reclock::prepare(&dev, &level) {
        Ok(txn) => txn,
        Err(err) => {
            klog_info!("RECLOCK_TEST: BUG - prepare failed: {}", err);
            return TestResult::Fail;
        }
    };
    if txn.final_mast() != 0x0340_0003 {
        klog_info!("RECLOCK_TEST: BUG - final mast {:#010x}", txn.final_mast());
        return TestResult::Fail;
    }

    if let Err(err) = reclock::commit(&dev, txn) {
        klog_info!("RECLOCK_TEST: BUG - commit failed: {}", err);
        return TestResult::Fail;
    }

    // VCO at 600 MHz: N=12 M=2 off the 100 MHz reference, P=1 integer.
    if rig.bus.last_write_to(PLL_CORE + 4) != Some((12 << 8) | 2) {
        klog_info!("RECLOCK_TEST: BUG - core coef {:?}", rig.bus.last_write_to(PLL_CORE + 4));
        return TestResult::Fail;
    }
    if rig.bus.last_write_to(PLL_CORE) != Some(PLL_CTRL_ENABLE | (1 << 16)) {
        return TestResult::Fail;
    }
    if rig.bus.last_write_to(PLL_CORE_POST_IGP) != Some(1 << 16) {
        klog_info!("RECLOCK_TEST: BUG - core post divider not programmed");
        return TestResult::Fail;
    }
    // vdec: core/2 exactly, ahead of the 500 MHz source
    if rig.bus.last_write_to(PCLK_DIV_IGP) != Some(1 << 8) {
        return TestResult::Fail;
    }
    if rig.bus.last_write_to(PCLK_MAST_IGP) != Some(0x0340_0003) {
        klog_info!(
            "RECLOCK_TEST: BUG - bridge mux left at {:#010x}",
            rig.bus.read_back(PCLK_MAST_IGP)
        );
        return TestResult::Fail;
    }
    // engines resumed, clock gating restored
    if rig.fifo.pause_count() != 1 || rig.fifo.resume_count() != 1 {
        return TestResult::Fail;
    }
    if rig.bus.last_write_to(PTHERM_GATE) != Some(PTHERM_GATE_ENGINES) {
        klog_info!("RECLOCK_TEST: BUG - clock gating not restored");
        return TestResult::Fail;
    }
    // shader stayed off its PLL: post divider zeroed, enable cleared
    if rig.bus.last_write_to(PLL_SHADER_POST_IGP) != Some(0) {
        return TestResult::Fail;
    }
    if rig.bus.read_back(PLL_SHADER) & PLL_CTRL_ENABLE != 0 {
        return TestResult::Fail;
    }
    TestResult::Pass
}

/// An IGP quiesce that never sees the engines idle times out and still
/// resumes everything, with no PLL coefficient written.
pub fn test_igp_commit_resumes_after_idle_timeout() -> TestResult {
    let rig = MockRig::new();
    let dev = match rig.device(0xaa, unknown_vram()) {
        Ok(dev) => dev,
        Err(_) => return TestResult::Fail,
    };
    // freeze ack only; the 0x251c idle bits never come up
    rig.arm_quiesce_acks();
    rig.bus.preset(PTHERM_GATE, PTHERM_GATE_ENGINES);

    let level = PerfLevel {
        core_khz: 300_000,
        ..Default::default()
    };
    let txn = match reclock::prepare(&dev, &level) {
        Ok(txn) => txn,
        Err(_) => return TestResult::Fail,
    };
    match reclock::commit(&dev, txn) {
        Err(PmError::Timeout(WaitPoint::EngineIdle)) => {}
        _ => {
            klog_info!("RECLOCK_TEST: BUG - expected engine idle timeout");
            return TestResult::Fail;
        }
    }

    if rig.fifo.pause_count() != 1 || rig.fifo.resume_count() != 1 {
        return TestResult::Fail;
    }
    match rig.bus.last_write_to(PFIFO_FREEZE) {
        Some(val) if val & PFIFO_FREEZE_REQUEST == 0 => {}
        _ => {
            klog_info!("RECLOCK_TEST: BUG - freeze request left set");
            return TestResult::Fail;
        }
    }
    if rig.bus.writes_to(PLL_CORE + 4) != 0 {
        klog_info!("RECLOCK_TEST: BUG - coefficients written despite timeout");
        return TestResult::Fail;
    }
    if rig.bus.last_write_to(PTHERM_GATE) != Some(PTHERM_GATE_ENGINES) {
        return TestResult::Fail;
    }
    TestResult::Pass
}

teslaclk_lib::define_test_suite!(
    reclock,
    [
        test_unknown_chipset_rejected,
        test_prepare_atomic_on_solve_failure,
        test_prepare_engine_write_order,
        test_prepare_preserves_pll_ctrl_bits,
        test_prepare_aux_domain_routes,
        test_commit_memory_before_engines,
        test_commit_resumes_after_freeze_timeout,
        test_commit_script_failure,
        test_reclock_one_shot,
        test_igp_prepare_prefers_divider,
        test_igp_commit_pll_route,
        test_igp_commit_resumes_after_idle_timeout,
    ]
);
