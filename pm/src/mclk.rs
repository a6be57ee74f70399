//! Memory-clock program construction.
//!
//! The whole memory reclock runs inside one sequencer program because the
//! DRAM controller must sit in self-refresh while its PLL moves, and the
//! host cannot guarantee the timing. Hardware-imposed ordering:
//!
//!   scanout/bus-access off -> precharge + refresh stop + self-refresh in
//!   -> mux/PLL reprogram -> self-refresh out + refresh restart -> timing
//!   and mode-register updates -> bus-access/scanout on
//!
//! Reordering any of these risks DRAM data corruption.

use crate::clktree::{self, ClkSrc};
use crate::device::Device;
use crate::error::{PmError, PmResult};
use crate::hwsq::{HWSQ_FLAG_BUS_ACCESS, HwsqProgram};
use crate::perflvl::{DramTiming, MemoryKind, PerfLevel};
use crate::pll::{self, clk_same};
use crate::pm_defs::*;
use teslaclk_lib::klog_warn;

/// Finalized memory program plus the master-mux value it leaves behind.
pub struct MclkPlan {
    pub program: HwsqProgram,
    pub mast: u32,
}

fn ddr2_post(prog: &mut HwsqProgram, timing: &DramTiming, rank_b: bool) -> PmResult {
    prog.wr32(PFB_MR1, timing.mr[1])?;
    // DLL is documented to reset on self-refresh exit; an explicit toggle
    // does not harm.
    prog.wr32(PFB_MR0, timing.mr[0] | MR0_DLL_RESET)?;
    prog.wr32(PFB_MR0, timing.mr[0])?;
    if rank_b {
        prog.wr32(PFB_MR1_B, timing.mr[1])?;
        prog.wr32(PFB_MR0_B, timing.mr[0] | MR0_DLL_RESET)?;
        prog.wr32(PFB_MR0_B, timing.mr[0])?;
    }
    prog.usec(2)
}

fn ddr3_post(prog: &mut HwsqProgram, timing: &DramTiming, rank_b: bool) -> PmResult {
    prog.wr32(PFB_MR2, timing.mr[2])?;
    prog.wr32(PFB_MR1, timing.mr[1])?;
    prog.wr32(PFB_MR0, timing.mr[0] | MR0_DLL_RESET)?;
    prog.wr32(PFB_MR0, timing.mr[0])?;
    if rank_b {
        prog.wr32(PFB_MR2_B, timing.mr[2])?;
        prog.wr32(PFB_MR1_B, timing.mr[1])?;
        prog.wr32(PFB_MR0_B, timing.mr[0] | MR0_DLL_RESET)?;
        prog.wr32(PFB_MR0_B, timing.mr[0])?;
    }
    prog.usec(12)
}

fn gddr3_post(prog: &mut HwsqProgram, timing: &DramTiming, rank_b: bool) -> PmResult {
    prog.wr32(PFB_MR1, timing.mr[1])?;
    if rank_b {
        prog.wr32(PFB_MR1_B, timing.mr[1])?;
    }
    prog.wr32(PFB_MR0, timing.mr[0] | MR0_DLL_RESET)?;
    prog.wr32(PFB_MR0, timing.mr[0])?;
    if rank_b {
        prog.wr32(PFB_MR0_B, timing.mr[0] | MR0_DLL_RESET)?;
        prog.wr32(PFB_MR0_B, timing.mr[0])?;
    }
    prog.usec(1)?;
    prog.wr32(PFB_PRECHARGE, 0x0000_0001)?;
    // DLL stabilize.
    prog.usec(40)
}

/// Build the finalized memory-reclock program for `level`.
///
/// Pure read/solve/assemble; performs no register writes. `mast_in` is
/// the planned master-mux value so far; the returned plan carries it with
/// the memory-bypass routing folded in.
pub fn build_mclk_program(
    dev: &Device<'_>,
    level: &PerfLevel,
    mast_in: u32,
) -> PmResult<MclkPlan> {
    let variant = dev.variant();
    let freq = level.memory_khz;
    let limits = variant
        .limits_for(PLL_MEMORY)
        .ok_or(PmError::NoValidCoefficients {
            pll: PLL_MEMORY,
            target_khz: freq,
        })?;
    let bias = limits.log2p_bias as u32;

    let orig_ctrl = dev.rd32(PLL_MEMORY);
    let mut ctrl = orig_ctrl & !0x81ff_0200;
    let mut coef = dev.rd32(PLL_MEMORY + 4);

    // Run straight off the PCIE reference when it already matches,
    // otherwise solve the memory PLL.
    if clk_same(freq, clktree::read_clk(dev, ClkSrc::Href)) {
        ctrl |= PLL_CTRL_MPLL_BYPASS | (bias << 19);
    } else {
        let refclk = clktree::read_pll_ref(dev, PLL_MEMORY);
        let solved = pll::solve(limits, refclk, freq)?;
        let p = solved.p as u32;
        ctrl |= PLL_CTRL_ENABLE | (p << 22) | (p << 16) | (bias << 19);
        coef = (solved.n << 8) | solved.m;
    }

    // Bypass clock for the switch-over comes from the PCIE reference.
    let mast = (mast_in & !0xc000_0000) | 0x0000_c000;

    let mut crtc_mask = 0u8;
    for i in 0..2u32 {
        if dev.rd32(PDISP_CRTC_CLOCK_0 + i * PDISP_CRTC_STRIDE) != 0 {
            crtc_mask |= 1 << i;
        }
    }

    // Mode-register updates need a recognized technology; without a
    // timing set we fall back to a conservative no-MR sequence.
    let timing = match (&level.timing, dev.vram().kind) {
        (Some(timing), MemoryKind::Ddr2 | MemoryKind::Ddr3 | MemoryKind::Gddr3) => Some(*timing),
        (Some(_), kind) => return Err(PmError::UnsupportedRam(kind)),
        (None, _) => {
            klog_warn!("pm: no timing set, attempting unsafe memory reclock");
            None
        }
    };

    let mut prog = HwsqProgram::new();

    if crtc_mask != 0 {
        prog.op5f(crtc_mask, 0x00)?; // wait for scanout
        prog.op5f(crtc_mask, 0x01)?; // wait for vblank
    }
    if variant.has_quirk(crate::chipset::ChipQuirks::SCANOUT_TOGGLE) {
        prog.wr32(PDISP_SCANOUT_CTRL, SCANOUT_DISABLE)?;
    }
    prog.setf(HWSQ_FLAG_BUS_ACCESS, false)?;
    prog.op5f(0x00, 0x01)?;

    // Park the memory controller.
    prog.wr32(PFB_PRECHARGE, 0x0000_0001)?;
    prog.wr32(PFB_FORCE_REFRESH, 0x0000_0001)?;
    prog.wr32(PFB_AUTO_REFRESH, 0x0000_0000)?;
    prog.wr32(PFB_SELF_REFRESH, 0x0000_0001)?;

    // Move the clock while the DRAM self-refreshes.
    prog.wr32(PCLK_MAST, mast)?;
    prog.wr32(PLL_MEMORY, orig_ctrl | PLL_CTRL_MPLL_BYPASS)?;
    prog.wr32(PLL_MEMORY + 4, coef)?;
    prog.wr32(PLL_MEMORY, ctrl)?;

    // Wake the controller back up.
    prog.wr32(PFB_PRECHARGE, 0x0000_0001)?;
    prog.wr32(PFB_SELF_REFRESH, 0x0000_0000)?;
    prog.wr32(PFB_AUTO_REFRESH, PFB_AUTO_REFRESH_ON)?;
    prog.usec(12)?; // tXSRD, roughly

    if let Some(timing) = timing {
        if dev.vram().timing_supported {
            for (i, reg) in timing.reg.iter().enumerate() {
                prog.wr32(PFB_TIMING_BASE + (i as u32) * 4, *reg)?;
            }
        }
        match dev.vram().kind {
            MemoryKind::Ddr2 => ddr2_post(&mut prog, &timing, dev.vram().rank_b)?,
            MemoryKind::Ddr3 => ddr3_post(&mut prog, &timing, dev.vram().rank_b)?,
            MemoryKind::Gddr3 => gddr3_post(&mut prog, &timing, dev.vram().rank_b)?,
            MemoryKind::Unknown => {}
        }
        if timing.odt {
            prog.wr32(PFB_PRECHARGE, 0x0000_0001)?;
        }
        prog.wr32(PFB_FORCE_REFRESH, 0x0000_0001)?;
    } else {
        prog.usec(48)?;
    }

    prog.setf(HWSQ_FLAG_BUS_ACCESS, true)?;
    prog.op5f(0x00, 0x00)?;
    if variant.has_quirk(crate::chipset::ChipQuirks::SCANOUT_TOGGLE) {
        prog.wr32(PDISP_SCANOUT_CTRL, SCANOUT_ENABLE)?;
    }
    prog.finalize()?;

    Ok(MclkPlan { program: prog, mast })
}
