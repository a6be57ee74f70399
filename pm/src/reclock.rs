//! Reclock transaction coordinator.
//!
//! Two phases. `prepare` solves every domain and assembles the full plan
//! without touching a single register, so any infeasible target aborts
//! with the hardware untouched. `commit` quiesces the execution engines,
//! replays the plan and always resumes them, even when a step inside the
//! frozen window fails.

use crate::chipset::ClkFamily;
use crate::clktree::{self, ClkSrc};
use crate::device::{Device, FifoToken};
use crate::error::{PmError, PmResult, WaitPoint};
use crate::hwsq;
use crate::mclk::{self, MclkPlan};
use crate::perflvl::PerfLevel;
use crate::pll::{self, clk_same};
use crate::pm_defs::*;
use teslaclk_lib::{klog_debug, klog_error, klog_info};

/// Upper bound on planned engine-register writes in one transaction.
const ENG_WRITE_CAPACITY: usize = 8;

/// One planned register write, replayed verbatim at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegWrite {
    pub addr: u32,
    pub val: u32,
}

/// IGP-specific commit state: the lock bits to wait for before the mux
/// switch, the vdec divider write, and which PLLs the plan lands on so
/// the unused ones can be powered down after resume.
struct IgpPlan {
    lock_mask: u32,
    vdiv: Option<u32>,
    core_on_pll: bool,
    shader_on_pll: bool,
}

/// Fully solved reclock plan. Building one performs no writes; the caller
/// hands it to `commit` to make it real.
pub struct Transaction {
    target: PerfLevel,
    mclk: Option<MclkPlan>,
    mscript: Option<u16>,
    eng: [RegWrite; ENG_WRITE_CAPACITY],
    eng_len: usize,
    mast_final: u32,
    igp: Option<IgpPlan>,
}

impl Transaction {
    pub fn target(&self) -> &PerfLevel {
        &self.target
    }

    pub fn memory_planned(&self) -> bool {
        self.mclk.is_some()
    }

    pub fn engine_writes(&self) -> &[RegWrite] {
        &self.eng[..self.eng_len]
    }

    /// Master-mux value written after the settle delay.
    pub fn final_mast(&self) -> u32 {
        self.mast_final
    }

    fn push(&mut self, addr: u32, val: u32) {
        // Capacity is sized for the worst-case plan; a miscount here is a
        // programming error, not a runtime condition.
        debug_assert!(self.eng_len < ENG_WRITE_CAPACITY);
        if self.eng_len < ENG_WRITE_CAPACITY {
            self.eng[self.eng_len] = RegWrite { addr, val };
            self.eng_len += 1;
        }
    }
}

/// Solve a complete plan for `level`. Read-only: on any error the hardware
/// has seen nothing but register reads.
pub fn prepare(dev: &Device<'_>, level: &PerfLevel) -> PmResult<Transaction> {
    let variant = dev.variant();
    if variant.family == ClkFamily::Igp {
        return prepare_igp(dev, level);
    }

    let mut mast = dev.rd32(PCLK_MAST);
    let mut divs = clktree::read_div(dev);

    // vdec: route off the core divider or the alternate source, whichever
    // lands closer. The vdec PLL itself is left alone so an engine-only
    // reclock never disturbs it.
    if variant.aux_domains && level.vdec_khz != 0 {
        if let Some(sel_table) = variant.vdec_sel {
            mast &= !0x0000_0c00;
            divs &= !0x0000_0700;

            let (core_clk, p1) = pll::best_div(level.core_khz, level.vdec_khz);
            let alt_src = match sel_table[2] {
                crate::chipset::VdecSrc::HclkM3D2 => clktree::read_clk(dev, ClkSrc::HclkM3D2),
                _ => clktree::read_pll(dev, PLL_VDEC),
            };
            let (alt_clk, p2) = pll::best_div(alt_src, level.vdec_khz);

            if core_clk.abs_diff(level.vdec_khz) <= alt_clk.abs_diff(level.vdec_khz) {
                mast |= variant.vdec_core_sel;
                divs |= (p1 as u32) << 8;
            } else {
                mast |= 0x0000_0800;
                divs |= (p2 as u32) << 8;
            }
        }
    }

    // dom6: limited to host-clock multiples.
    if variant.aux_domains && level.dom6_khz != 0 {
        mast &= !0x0c00_0000;
        divs &= !0x0000_0007;

        if clk_same(level.dom6_khz, clktree::read_clk(dev, ClkSrc::Href)) {
            // href route is selector zero
        } else if clk_same(level.dom6_khz, clktree::read_clk(dev, ClkSrc::Hclk)) {
            mast |= 0x0800_0000;
        } else {
            let src = clktree::read_clk(dev, ClkSrc::HclkM3);
            let (_, p) = pll::best_div(src, level.dom6_khz);
            mast |= 0x0c00_0000;
            divs |= p as u32;
        }
    }

    // memory first: the engine switches below assume memory is already
    // stable at its new frequency.
    let (mclk_plan, mscript) =
        if level.memory_khz != 0 && !clk_same(level.memory_khz, clktree::read_clk(dev, ClkSrc::Memory)) {
            let plan = mclk::build_mclk_program(dev, level, mast)?;
            mast = plan.mast;
            (Some(plan), level.memscript)
        } else {
            (None, None)
        };

    let mut pll_writes = [RegWrite { addr: 0, val: 0 }; ENG_WRITE_CAPACITY];
    let mut pll_len = 0usize;
    let push = |writes: &mut [RegWrite; ENG_WRITE_CAPACITY], len: &mut usize, addr, val| {
        writes[*len] = RegWrite { addr, val };
        *len += 1;
    };

    // core: always on its own PLL. Only the enable, P-field and bypass
    // bits belong to us; the rest of the control word is captured here
    // and carried through the planned write.
    let mut core_p = 0u8;
    if level.core_khz != 0 {
        let limits = variant
            .limits_for(PLL_CORE)
            .ok_or(PmError::NoValidCoefficients {
                pll: PLL_CORE,
                target_khz: level.core_khz,
            })?;
        let refclk = clktree::read_pll_ref(dev, PLL_CORE);
        let solved = pll::solve(limits, refclk, level.core_khz)?;
        core_p = solved.p;

        mast |= 0x0000_0003;
        let p = solved.p as u32;
        let ctrl = dev.rd32(PLL_CORE) & !PLL_CTRL_PROG_FIELDS;
        push(
            &mut pll_writes,
            &mut pll_len,
            PLL_CORE,
            PLL_CTRL_ENABLE | (p << 19) | (p << 16) | ctrl,
        );
        push(&mut pll_writes, &mut pll_len, PLL_CORE + 4, (solved.n << 8) | solved.m);
    }

    // shader: slave to the core VCO when exactly twice the core frequency
    // fits the post-divider, otherwise its own PLL. Slaving keeps the two
    // domains phase-related, which some revisions require.
    if level.shader_khz != 0 {
        mast &= !0x0000_0030;
        let ctrl = dev.rd32(PLL_SHADER) & !PLL_CTRL_PROG_FIELDS;
        if core_p > 0 && level.shader_khz == level.core_khz << 1 {
            let p = (core_p - 1) as u32;
            mast |= 0x0000_0020;
            push(&mut pll_writes, &mut pll_len, PLL_SHADER, (p << 19) | (p << 16) | ctrl);
        } else {
            let limits = variant
                .limits_for(PLL_SHADER)
                .ok_or(PmError::NoValidCoefficients {
                    pll: PLL_SHADER,
                    target_khz: level.shader_khz,
                })?;
            let refclk = clktree::read_pll_ref(dev, PLL_SHADER);
            let solved = pll::solve(limits, refclk, level.shader_khz)?;
            let p = solved.p as u32;
            mast |= 0x0000_0030;
            push(
                &mut pll_writes,
                &mut pll_len,
                PLL_SHADER,
                PLL_CTRL_ENABLE | (p << 19) | (p << 16) | ctrl,
            );
            push(&mut pll_writes, &mut pll_len, PLL_SHADER + 4, (solved.n << 8) | solved.m);
        }
    }

    // The final mux value never leaves the core bypass engaged.
    let mast_final = mast & !0x0010_0000;

    let mut txn = Transaction {
        target: *level,
        mclk: mclk_plan,
        mscript,
        eng: [RegWrite { addr: 0, val: 0 }; ENG_WRITE_CAPACITY],
        eng_len: 0,
        mast_final,
        igp: None,
    };

    // Park core/shader on safe sources before any PLL write lands, then
    // the PLL programming, then the divider; the final mux switch happens
    // separately after the settle delay.
    let mast_safe = (mast_final & !variant.eng_safe_clear) | variant.eng_safe_set;
    txn.push(PCLK_MAST, mast_safe);
    for w in &pll_writes[..pll_len] {
        txn.push(w.addr, w.val);
    }
    if let Some(div_reg) = variant.div_reg {
        txn.push(div_reg, divs);
    }

    Ok(txn)
}

/// Solve a plan for the IGP revisions. The engine domains sit behind the
/// bridge mux and run off PCIE-reference multiples; each one picks
/// whichever of its divider route or PLL lands closer, the divider
/// winning ties so a PLL is only spun up when it actually helps.
fn prepare_igp(dev: &Device<'_>, level: &PerfLevel) -> PmResult<Transaction> {
    let variant = dev.variant();
    let href = clktree::read_clk(dev, ClkSrc::Href);
    let hrefm4 = clktree::read_clk(dev, ClkSrc::HrefM4);
    let mast_orig = dev.rd32(PCLK_MAST_IGP);

    let mut plan = IgpPlan {
        lock_mask: 0,
        vdiv: None,
        core_on_pll: false,
        shader_on_pll: false,
    };
    let mut mast = (mast_orig & !0x0040_0e73) | 0x0300_0000;

    let mut txn = Transaction {
        target: *level,
        mclk: None,
        mscript: None,
        eng: [RegWrite { addr: 0, val: 0 }; ENG_WRITE_CAPACITY],
        eng_len: 0,
        mast_final: 0,
        igp: None,
    };

    // Park everything on the PCIE reference before any PLL write lands.
    txn.push(
        PCLK_MAST_IGP,
        (mast_orig & !variant.eng_safe_clear) | variant.eng_safe_set,
    );

    // core: the hrefm4 tap with a shift divider, or the core PLL solved
    // at twice the target so the shader can slave off its output. The
    // control-word shift of 1 provides the final /2.
    if level.core_khz != 0 {
        let div = if level.core_khz < hrefm4 {
            Some(pll::best_div(hrefm4, level.core_khz))
        } else {
            None
        };
        let limits = variant
            .limits_for(PLL_CORE)
            .ok_or(PmError::NoValidCoefficients {
                pll: PLL_CORE,
                target_khz: level.core_khz,
            })?;
        let solved = pll::solve(limits, href, level.core_khz << 1);
        let div_wins = match (&div, &solved) {
            (Some((div_khz, _)), Ok(s)) => {
                div_khz.abs_diff(level.core_khz) <= (s.khz >> 1).abs_diff(level.core_khz)
            }
            (Some(_), Err(_)) => true,
            (None, _) => false,
        };

        match div {
            Some((_, shift)) if div_wins => {
                let ctrl = dev.rd32(PLL_CORE) & !0x0007_0000;
                txn.push(PLL_CORE, ctrl | ((shift as u32) << 16));
                mast |= 0x0000_0002;
            }
            _ => {
                let s = solved?;
                txn.push(PLL_CORE + 4, (s.n << 8) | s.m);
                txn.push(PLL_CORE, PLL_CTRL_ENABLE | (1 << 16));
                txn.push(PLL_CORE_POST_IGP, (s.p as u32) << 16);
                plan.lock_mask |= PLL_LOCK_CORE;
                plan.core_on_pll = true;
                mast |= 0x0000_0003;
            }
        }
    } else {
        mast |= mast_orig & 0x0000_0003;
        plan.core_on_pll = mast_orig & 0x0000_0003 == 0x0000_0003;
    }

    // shader: the PCIE reference directly, a shift off the doubled core
    // VCO when the core went on its PLL, or its own PLL.
    if level.shader_khz != 0 {
        let ctrl = dev.rd32(PLL_SHADER) & !0x0007_0000;
        if level.shader_khz == href {
            txn.push(PLL_SHADER, ctrl);
            mast |= 0x0000_0040;
        } else {
            let limits = variant
                .limits_for(PLL_SHADER)
                .ok_or(PmError::NoValidCoefficients {
                    pll: PLL_SHADER,
                    target_khz: level.shader_khz,
                })?;
            let solved = pll::solve(limits, href, level.shader_khz);
            let slave = if plan.core_on_pll {
                Some(pll::best_div(level.core_khz << 1, level.shader_khz))
            } else {
                None
            };
            let slave_wins = match (&slave, &solved) {
                (Some((slave_khz, _)), Ok(s)) => {
                    slave_khz.abs_diff(level.shader_khz) <= s.khz.abs_diff(level.shader_khz)
                }
                (Some(_), Err(_)) => true,
                (None, _) => false,
            };

            match slave {
                Some((_, shift)) if slave_wins => {
                    txn.push(PLL_SHADER, ctrl | ((shift as u32) << 16));
                    mast |= 0x0000_0020;
                }
                _ => {
                    let s = solved?;
                    txn.push(PLL_SHADER + 4, (s.n << 8) | s.m);
                    txn.push(PLL_SHADER, PLL_CTRL_ENABLE | ((s.p as u32) << 16));
                    txn.push(PLL_SHADER_POST_IGP, 0);
                    plan.lock_mask |= PLL_LOCK_SHADER;
                    plan.shader_on_pll = true;
                    mast |= 0x0000_0030;
                }
            }
        }
    } else {
        mast |= mast_orig & 0x0000_0070;
        plan.shader_on_pll = mast_orig & 0x0000_0030 == 0x0000_0030;
    }

    // vdec: a shift off the core domain or off the fixed 500 MHz source.
    if level.vdec_khz != 0 {
        let (core_clk, p1) = pll::best_div(level.core_khz, level.vdec_khz);
        let (alt_clk, p2) = pll::best_div(IGP_VDEC_SRC_KHZ, level.vdec_khz);
        if core_clk.abs_diff(level.vdec_khz) <= alt_clk.abs_diff(level.vdec_khz) {
            mast |= 0x0040_0000;
            plan.vdiv = Some((p1 as u32) << 8);
        } else {
            plan.vdiv = Some((p2 as u32) << 8);
        }
    } else {
        mast |= mast_orig & 0x0040_0000;
    }

    txn.mast_final = mast;
    txn.igp = Some(plan);
    Ok(txn)
}

/// Scoped engine quiesce. Every step it engages is undone on drop, in
/// reverse order, so an abort mid-commit still resumes the machine.
struct EngineFreeze<'d, 'a> {
    dev: &'d Device<'a>,
    ctxsw_prev: Option<u32>,
    fifo_token: Option<FifoToken>,
    frozen: bool,
    graph_access_prev: Option<u32>,
}

impl<'d, 'a> EngineFreeze<'d, 'a> {
    fn new(dev: &'d Device<'a>) -> Self {
        Self {
            dev,
            ctxsw_prev: None,
            fifo_token: None,
            frozen: false,
            graph_access_prev: None,
        }
    }

    fn quiesce(&mut self) -> PmResult {
        let dev = self.dev;

        // Stop new context switches, then wait out the one in flight.
        let prev = dev.mask32(PGRAPH_CTXSW_CTRL, PGRAPH_CTXSW_ALLOW, 0);
        self.ctxsw_prev = Some(prev & PGRAPH_CTXSW_ALLOW);
        dev.wait32(
            PGRAPH_CTXSW_STATUS,
            PGRAPH_CTXSW_BUSY,
            0,
            CTXPROG_IDLE_TIMEOUT_US,
            WaitPoint::CtxProgIdle,
        )?;

        self.fifo_token = Some(dev.fifo().pause());
        dev.mask32(PFIFO_FREEZE, 0, PFIFO_FREEZE_REQUEST);
        self.frozen = true;
        dev.wait32(
            PFIFO_FREEZE,
            PFIFO_FREEZE_ACK,
            PFIFO_FREEZE_ACK,
            FIFO_FREEZE_TIMEOUT_US,
            WaitPoint::FifoFreeze,
        )?;

        // Drain the graphics dispatch FIFO. One retry: re-opening access
        // briefly lets a wedged fetch complete.
        let prev = dev.mask32(PGRAPH_FIFO_CTRL, PGRAPH_FIFO_ACCESS, 0);
        self.graph_access_prev = Some(prev & PGRAPH_FIFO_ACCESS);
        let mut drained = false;
        for attempt in 0..2 {
            if dev
                .wait32(
                    PGRAPH_STATUS,
                    0xffff_ffff,
                    0,
                    GRAPH_IDLE_TIMEOUT_US,
                    WaitPoint::GraphDrain,
                )
                .is_ok()
            {
                drained = true;
                break;
            }
            if attempt == 0 {
                klog_debug!("pm: graphics busy, reopening dispatch for one retry");
                dev.mask32(PGRAPH_FIFO_CTRL, 0, PGRAPH_FIFO_ACCESS);
                dev.mask32(PGRAPH_FIFO_CTRL, PGRAPH_FIFO_ACCESS, 0);
            }
        }
        if !drained {
            return Err(PmError::Timeout(WaitPoint::GraphDrain));
        }

        for reg in PGRAPH_DISPATCH_STATUS {
            if dev
                .wait32(reg, 0xffff_ffff, 0, GRAPH_IDLE_TIMEOUT_US, WaitPoint::GraphIdle)
                .is_err()
            {
                for reg in PGRAPH_DISPATCH_STATUS {
                    klog_error!("pm: {:#08x}: {:#010x}", reg, dev.rd32(reg));
                }
                return Err(PmError::Timeout(WaitPoint::GraphIdle));
            }
        }

        Ok(())
    }
}

impl Drop for EngineFreeze<'_, '_> {
    fn drop(&mut self) {
        let dev = self.dev;
        if let Some(prev) = self.graph_access_prev.take() {
            dev.mask32(PGRAPH_FIFO_CTRL, PGRAPH_FIFO_ACCESS, prev);
        }
        if self.frozen {
            dev.mask32(PFIFO_FREEZE, PFIFO_FREEZE_REQUEST, 0);
        }
        if let Some(token) = self.fifo_token.take() {
            dev.fifo().resume(token);
        }
        if let Some(prev) = self.ctxsw_prev.take() {
            dev.mask32(PGRAPH_CTXSW_CTRL, PGRAPH_CTXSW_ALLOW, prev);
        }
    }
}

/// Scoped IGP quiesce: gate the engine clocks, freeze the FIFO and wait
/// out the interrupt handler and the execution engines. Undone on drop
/// in reverse order.
struct IgpFreeze<'d, 'a> {
    dev: &'d Device<'a>,
    ptherm_prev: Option<u32>,
    fifo_token: Option<FifoToken>,
    frozen: bool,
}

impl<'d, 'a> IgpFreeze<'d, 'a> {
    fn new(dev: &'d Device<'a>) -> Self {
        Self {
            dev,
            ptherm_prev: None,
            fifo_token: None,
            frozen: false,
        }
    }

    fn quiesce(&mut self) -> PmResult {
        let dev = self.dev;

        let prev = dev.mask32(PTHERM_GATE, PTHERM_GATE_ENGINES, 0);
        self.ptherm_prev = Some(prev & PTHERM_GATE_ENGINES);

        dev.mask32(PFIFO_FREEZE, 0, PFIFO_FREEZE_REQUEST);
        self.frozen = true;
        dev.wait32(PMC_INTR, 0xffff_ffff, 0, INTR_IDLE_TIMEOUT_US, WaitPoint::IntrIdle)?;

        self.fifo_token = Some(dev.fifo().pause());
        dev.wait32(
            PFIFO_FREEZE,
            PFIFO_FREEZE_ACK,
            PFIFO_FREEZE_ACK,
            FIFO_FREEZE_TIMEOUT_US,
            WaitPoint::FifoFreeze,
        )?;
        dev.wait32(
            PFIFO_ENGINE_IDLE,
            PFIFO_ENGINE_IDLE_MASK,
            PFIFO_ENGINE_IDLE_MASK,
            ENGINE_IDLE_TIMEOUT_US,
            WaitPoint::EngineIdle,
        )?;

        Ok(())
    }
}

impl Drop for IgpFreeze<'_, '_> {
    fn drop(&mut self) {
        let dev = self.dev;
        if let Some(token) = self.fifo_token.take() {
            dev.fifo().resume(token);
        }
        if self.frozen {
            dev.mask32(PFIFO_FREEZE, PFIFO_FREEZE_REQUEST, 0);
        }
        if let Some(prev) = self.ptherm_prev.take() {
            dev.mask32(PTHERM_GATE, PTHERM_GATE_ENGINES, prev);
        }
    }
}

fn apply(dev: &Device<'_>, txn: &Transaction) -> PmResult {
    if let Some(plan) = &txn.mclk {
        for id in dev.bios().mem_reclock_scripts() {
            dev.bios().run_init_script(*id)?;
        }
        if let Some(id) = txn.mscript {
            dev.bios().run_init_script(id)?;
        }
        hwsq::upload(dev, &plan.program);
        hwsq::launch(dev, &plan.program)?;
    }

    for w in txn.engine_writes() {
        dev.wr32(w.addr, w.val);
    }
    dev.delay_us(PLL_SETTLE_US);
    dev.wr32(PCLK_MAST, txn.mast_final);
    Ok(())
}

fn apply_igp(dev: &Device<'_>, txn: &Transaction, plan: &IgpPlan) -> PmResult {
    for w in txn.engine_writes() {
        dev.wr32(w.addr, w.val);
    }
    if plan.lock_mask != 0 {
        dev.wait32(
            PLL_LOCK_STATUS,
            plan.lock_mask,
            plan.lock_mask,
            PLL_LOCK_TIMEOUT_US,
            WaitPoint::PllLock,
        )?;
    }
    if let Some(vdiv) = plan.vdiv {
        dev.wr32(PCLK_DIV_IGP, vdiv);
    }
    dev.wr32(PCLK_MAST_IGP, txn.mast_final);
    Ok(())
}

fn commit_igp(dev: &Device<'_>, txn: &Transaction, plan: &IgpPlan) -> PmResult {
    let mut freeze = IgpFreeze::new(dev);
    let result = freeze.quiesce().and_then(|()| apply_igp(dev, txn, plan));
    drop(freeze);

    // Power down whichever PLLs the new state does not use. Runs after
    // the engines are back up, on failure as well as success.
    if !plan.core_on_pll {
        dev.wr32(PLL_CORE_POST_IGP, 0);
        dev.mask32(PLL_CORE, PLL_CTRL_ENABLE, 0);
    }
    if !plan.shader_on_pll {
        dev.wr32(PLL_SHADER_POST_IGP, 0);
        dev.mask32(PLL_SHADER, PLL_CTRL_ENABLE, 0);
    }

    result
}

/// Execute a prepared transaction.
///
/// Serialized on the device reclock lock. The engines are resumed
/// unconditionally before the result is returned, including when the
/// quiesce itself failed partway.
pub fn commit(dev: &Device<'_>, txn: Transaction) -> PmResult {
    let _serial = dev.reclock_lock.lock();
    let start = dev.monotonic_us();

    let result = match &txn.igp {
        Some(plan) => commit_igp(dev, &txn, plan),
        None => {
            let mut freeze = EngineFreeze::new(dev);
            let result = freeze.quiesce().and_then(|()| apply(dev, &txn));
            drop(freeze);
            result
        }
    };

    match &result {
        Ok(()) => klog_info!(
            "pm: reclocked to core {} kHz / memory {} kHz in {} us",
            txn.target.core_khz,
            txn.target.memory_khz,
            dev.monotonic_us() - start
        ),
        Err(err) => klog_error!("pm: reclock failed: {}", err),
    }
    result
}

/// One-shot `prepare` + `commit`.
pub fn reclock(dev: &Device<'_>, level: &PerfLevel) -> PmResult {
    let txn = prepare(dev, level)?;
    commit(dev, txn)
}
