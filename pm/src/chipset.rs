//! Chip variant tables.
//!
//! Every chip-revision-conditional behavior in the engine lives here as
//! data: register locations, mux decode tables, PLL constraint rows and
//! the telemetry signal map. The evaluator, solver and coordinator do
//! table lookups instead of branching on the chipset byte.

use crate::error::{PmError, PmResult};
use crate::pll::{PllLimits, PostDivStyle};
use crate::pm_defs::*;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChipQuirks: u32 {
        /// Memory-reclock programs must blank scanout around self-refresh.
        const SCANOUT_TOGGLE = 1 << 0;
        /// Core PLL bypass bit in the master mux does not reroute the core
        /// domain to dom6 on this revision.
        const CORE_BYPASS_IGNORED = 1 << 1;
    }
}

/// Engine clock topology family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClkFamily {
    /// Discrete boards: crystal-referenced engine PLLs behind the main
    /// master mux, memory reclocked through the sequencer.
    Discrete,
    /// IGP revisions: PCIE-reference multiples behind the bridge mux,
    /// integer post-divider on the core PLL, no reclockable memory.
    Igp,
}

/// How a PLL's input reference is derived when the master mux does not
/// select the PCIE reference directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PllRefStyle {
    /// Two shared reference PLLs, route-select register picks one.
    /// Coefficients stored off-by-one, crystal multiplied by 2 or 4.
    DualCoef,
    /// Single shared reference PLL, coefficients stored directly.
    SingleCoef,
    /// Per-PLL 2-bit selector choosing coef pair, crystal or PCIE
    /// reference; coef pairs carry a split post-divider field.
    MuxedSel,
}

/// Decode table entry for the video-decode clock selector (2 bits in the
/// master mux).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VdecSrc {
    Crystal,
    Core,
    /// Core PLL when the cross-route bit is set, otherwise the vdec PLL.
    CorePllOrVdecPll,
    HclkM3D2,
    Memory,
    Off,
}

/// How the auxiliary (dom6) domain is clocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dom6Style {
    /// Dedicated PLL, fixed /4 post-divider.
    DomPll,
    /// Mux over host-clock multiples with a shift divider.
    HostMux,
}

/// Symbolic telemetry signal names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    HostMemWr,
    HostMemRd,
    PbusPcieRd,
    PbusPcieTrans,
    PbusPcieWr,
    PtimerTimeB12,
    PgraphIdle,
    PgraphIntrPending,
    CtxFlag1c,
    CtxFlag1d,
    CtxFlag1e,
    CtxFlag1f,
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Self::HostMemWr => "host_mem_wr",
            Self::HostMemRd => "host_mem_rd",
            Self::PbusPcieRd => "pbus_pcie_rd",
            Self::PbusPcieTrans => "pbus_pcie_trans",
            Self::PbusPcieWr => "pbus_pcie_wr",
            Self::PtimerTimeB12 => "ptimer_time_b12",
            Self::PgraphIdle => "pgraph_idle",
            Self::PgraphIntrPending => "pgraph_intr_pending",
            Self::CtxFlag1c => "ctxflag_1c",
            Self::CtxFlag1d => "ctxflag_1d",
            Self::CtxFlag1e => "ctxflag_1e",
            Self::CtxFlag1f => "ctxflag_1f",
        }
    }
}

/// Signal → counter set + hardware signal code, per chip revision.
#[derive(Debug, Clone, Copy)]
pub struct SignalRow {
    pub signal: Signal,
    pub set: u8,
    pub code: u8,
}

const fn sig(signal: Signal, set: u8, code: u8) -> SignalRow {
    SignalRow { signal, set, code }
}

/// One row per chip revision.
#[derive(Debug, Clone, Copy)]
pub struct ChipVariant {
    pub chipset: u8,
    pub family: ClkFamily,
    /// vdec/dom6 are read back and planned (absent on the first revision).
    pub aux_domains: bool,
    pub div_reg: Option<u32>,
    pub hwsq_data: u32,
    pub hwsq_kick: u32,
    pub ref_style: PllRefStyle,
    pub quirks: ChipQuirks,
    pub vdec_sel: Option<&'static [VdecSrc; 4]>,
    /// Master-mux bits selecting the core-divider route for vdec.
    pub vdec_core_sel: u32,
    pub dom6_style: Dom6Style,
    /// Clear/set masks detaching core/shader from their PLLs before a
    /// reprogram ("safe clocks").
    pub eng_safe_clear: u32,
    pub eng_safe_set: u32,
    pub pll_limits: &'static [PllLimits],
    pub signals: &'static [SignalRow],
}

impl ChipVariant {
    pub fn limits_for(&self, reg: u32) -> Option<&'static PllLimits> {
        self.pll_limits.iter().find(|l| l.reg == reg)
    }

    pub fn signal_row(&self, signal: Signal) -> PmResult<&'static SignalRow> {
        self.signals
            .iter()
            .find(|row| row.signal == signal)
            .ok_or(PmError::UnknownSignal)
    }

    pub fn has_quirk(&self, quirk: ChipQuirks) -> bool {
        self.quirks.contains(quirk)
    }
}

/// Find the variant row for a chip revision.
pub fn lookup(chipset: u8) -> PmResult<&'static ChipVariant> {
    VARIANTS
        .iter()
        .find(|v| v.chipset == chipset)
        .ok_or(PmError::UnsupportedChipset(chipset))
}

// ---------------------------------------------------------------------------
// PLL constraint rows
// ---------------------------------------------------------------------------

// Constraint ranges for the engine PLLs. The VCO window is shared by the
// whole family; per-board overrides would come from the BIOS collaborator.
static STD_PLL_LIMITS: [PllLimits; 4] = [
    PllLimits {
        reg: PLL_CORE,
        vco_min_khz: 500_000,
        vco_max_khz: 1_500_000,
        n_min: 8,
        n_max: 255,
        m_min: 1,
        m_max: 255,
        p_style: PostDivStyle::Shift,
        p_max: 7,
        log2p_bias: 0,
    },
    PllLimits {
        reg: PLL_SHADER,
        vco_min_khz: 500_000,
        vco_max_khz: 1_500_000,
        n_min: 8,
        n_max: 255,
        m_min: 1,
        m_max: 255,
        p_style: PostDivStyle::Shift,
        p_max: 7,
        log2p_bias: 0,
    },
    PllLimits {
        reg: PLL_MEMORY,
        vco_min_khz: 500_000,
        vco_max_khz: 1_200_000,
        n_min: 8,
        n_max: 255,
        m_min: 1,
        m_max: 255,
        p_style: PostDivStyle::Shift,
        p_max: 7,
        log2p_bias: 0,
    },
    PllLimits {
        reg: PLL_VDEC,
        vco_min_khz: 500_000,
        vco_max_khz: 1_500_000,
        n_min: 8,
        n_max: 255,
        m_min: 1,
        m_max: 255,
        p_style: PostDivStyle::Shift,
        p_max: 7,
        log2p_bias: 0,
    },
];

// The IGP core PLL carries a 4-bit integer post-divider; its shader PLL
// keeps the family-standard shift field.
static IGP_PLL_LIMITS: [PllLimits; 2] = [
    PllLimits {
        reg: PLL_CORE,
        vco_min_khz: 500_000,
        vco_max_khz: 1_500_000,
        n_min: 8,
        n_max: 255,
        m_min: 1,
        m_max: 255,
        p_style: PostDivStyle::Integer,
        p_max: 15,
        log2p_bias: 0,
    },
    PllLimits {
        reg: PLL_SHADER,
        vco_min_khz: 500_000,
        vco_max_khz: 1_500_000,
        n_min: 8,
        n_max: 255,
        m_min: 1,
        m_max: 255,
        p_style: PostDivStyle::Shift,
        p_max: 7,
        log2p_bias: 0,
    },
];

// ---------------------------------------------------------------------------
// vdec selector decode tables
// ---------------------------------------------------------------------------

static VDEC_SEL_STD: [VdecSrc; 4] = [
    VdecSrc::Crystal,
    VdecSrc::Off,
    VdecSrc::CorePllOrVdecPll,
    VdecSrc::Core,
];

static VDEC_SEL_CORE0: [VdecSrc; 4] = [
    VdecSrc::Core,
    VdecSrc::Off,
    VdecSrc::CorePllOrVdecPll,
    VdecSrc::Core,
];

static VDEC_SEL_HOST: [VdecSrc; 4] = [
    VdecSrc::Core,
    VdecSrc::Off,
    VdecSrc::HclkM3D2,
    VdecSrc::Memory,
];

// ---------------------------------------------------------------------------
// Telemetry signal tables
// ---------------------------------------------------------------------------

static SIGNALS_50: [SignalRow; 12] = [
    sig(Signal::HostMemWr, 0, 0x00),
    sig(Signal::HostMemRd, 0, 0x1a),
    sig(Signal::PbusPcieRd, 0, 0x1d),
    sig(Signal::PtimerTimeB12, 0, 0x27),
    sig(Signal::PbusPcieTrans, 0, 0x29),
    sig(Signal::PbusPcieWr, 0, 0x2a),
    sig(Signal::PgraphIdle, 1, 0xc8),
    sig(Signal::PgraphIntrPending, 1, 0xca),
    sig(Signal::CtxFlag1c, 1, 0xd2),
    sig(Signal::CtxFlag1d, 1, 0xd3),
    sig(Signal::CtxFlag1e, 1, 0xd4),
    sig(Signal::CtxFlag1f, 1, 0xd5),
];

static SIGNALS_84: [SignalRow; 7] = [
    sig(Signal::PtimerTimeB12, 0, 0x2c),
    sig(Signal::PgraphIdle, 1, 0xbd),
    sig(Signal::PgraphIntrPending, 1, 0xbf),
    sig(Signal::CtxFlag1c, 1, 0xc7),
    sig(Signal::CtxFlag1d, 1, 0xc8),
    sig(Signal::CtxFlag1e, 1, 0xc9),
    sig(Signal::CtxFlag1f, 1, 0xca),
];

static SIGNALS_86: [SignalRow; 12] = [
    sig(Signal::HostMemWr, 0, 0x04),
    sig(Signal::HostMemRd, 0, 0x1f),
    sig(Signal::PbusPcieRd, 0, 0x22),
    sig(Signal::PtimerTimeB12, 0, 0x2c),
    sig(Signal::PbusPcieTrans, 0, 0x2e),
    sig(Signal::PbusPcieWr, 0, 0x2f),
    sig(Signal::PgraphIdle, 1, 0xbd),
    sig(Signal::PgraphIntrPending, 1, 0xbf),
    sig(Signal::CtxFlag1c, 1, 0xc7),
    sig(Signal::CtxFlag1d, 1, 0xc8),
    sig(Signal::CtxFlag1e, 1, 0xc9),
    sig(Signal::CtxFlag1f, 1, 0xca),
];

static SIGNALS_92: [SignalRow; 11] = [
    sig(Signal::HostMemWr, 0, 0x04),
    sig(Signal::HostMemRd, 0, 0x2a),
    sig(Signal::PtimerTimeB12, 0, 0x34),
    sig(Signal::PbusPcieTrans, 0, 0x36),
    sig(Signal::PbusPcieWr, 0, 0x37),
    sig(Signal::PgraphIdle, 1, 0xbd),
    sig(Signal::PgraphIntrPending, 1, 0xbf),
    sig(Signal::CtxFlag1c, 1, 0xc7),
    sig(Signal::CtxFlag1d, 1, 0xc8),
    sig(Signal::CtxFlag1e, 1, 0xc9),
    sig(Signal::CtxFlag1f, 1, 0xca),
];

static SIGNALS_94: [SignalRow; 12] = [
    sig(Signal::HostMemWr, 0, 0x04),
    sig(Signal::HostMemRd, 0, 0x2a),
    sig(Signal::PbusPcieRd, 0, 0x2d),
    sig(Signal::PtimerTimeB12, 0, 0x37),
    sig(Signal::PbusPcieTrans, 0, 0x39),
    sig(Signal::PbusPcieWr, 0, 0x3a),
    sig(Signal::PgraphIdle, 1, 0xbd),
    sig(Signal::PgraphIntrPending, 1, 0xbf),
    sig(Signal::CtxFlag1c, 1, 0xc7),
    sig(Signal::CtxFlag1d, 1, 0xc8),
    sig(Signal::CtxFlag1e, 1, 0xc9),
    sig(Signal::CtxFlag1f, 1, 0xca),
];

static SIGNALS_96: [SignalRow; 7] = [
    sig(Signal::PtimerTimeB12, 0, 0x37),
    sig(Signal::PgraphIdle, 1, 0xbd),
    sig(Signal::PgraphIntrPending, 1, 0xbf),
    sig(Signal::CtxFlag1c, 1, 0xc7),
    sig(Signal::CtxFlag1d, 1, 0xc8),
    sig(Signal::CtxFlag1e, 1, 0xc9),
    sig(Signal::CtxFlag1f, 1, 0xca),
];

static SIGNALS_98: [SignalRow; 12] = [
    sig(Signal::HostMemWr, 0, 0x04),
    sig(Signal::HostMemRd, 0, 0x2a),
    sig(Signal::PbusPcieRd, 0, 0x2d),
    sig(Signal::PtimerTimeB12, 0, 0x37),
    sig(Signal::PbusPcieTrans, 0, 0x39),
    sig(Signal::PbusPcieWr, 0, 0x3a),
    sig(Signal::PgraphIdle, 1, 0xbd),
    sig(Signal::PgraphIntrPending, 1, 0xbf),
    sig(Signal::CtxFlag1c, 1, 0xc7),
    sig(Signal::CtxFlag1d, 1, 0xc8),
    sig(Signal::CtxFlag1e, 1, 0xc9),
    sig(Signal::CtxFlag1f, 1, 0xca),
];

static SIGNALS_A0: [SignalRow; 12] = [
    sig(Signal::HostMemWr, 0, 0x05),
    sig(Signal::HostMemRd, 0, 0x2e),
    sig(Signal::PbusPcieRd, 0, 0x31),
    sig(Signal::PtimerTimeB12, 0, 0x3b),
    sig(Signal::PbusPcieTrans, 0, 0x3d),
    sig(Signal::PbusPcieWr, 0, 0x3e),
    sig(Signal::PgraphIdle, 1, 0xc9),
    sig(Signal::PgraphIntrPending, 1, 0xcb),
    sig(Signal::CtxFlag1c, 1, 0x1c),
    sig(Signal::CtxFlag1d, 1, 0x1d),
    sig(Signal::CtxFlag1e, 1, 0x1e),
    sig(Signal::CtxFlag1f, 1, 0x1f),
];

static SIGNALS_AC: [SignalRow; 7] = [
    sig(Signal::PtimerTimeB12, 0, 0x53),
    sig(Signal::PgraphIdle, 1, 0xc9),
    sig(Signal::PgraphIntrPending, 1, 0xcb),
    sig(Signal::CtxFlag1c, 1, 0x1c),
    sig(Signal::CtxFlag1d, 1, 0x1d),
    sig(Signal::CtxFlag1e, 1, 0x1e),
    sig(Signal::CtxFlag1f, 1, 0x1f),
];

static SIGNALS_NONE: [SignalRow; 0] = [];

// ---------------------------------------------------------------------------
// Variant rows
// ---------------------------------------------------------------------------

// Safe-clock masks: the early revisions park the core domain on the dom6
// bypass (bit 20), later ones detach core/shader directly. The IGP rows
// park everything on the PCIE reference through the bridge mux.
const ENG_SAFE_CLEAR_EARLY: u32 = 0x001000b0;
const ENG_SAFE_SET_EARLY: u32 = 0x00100080;
const ENG_SAFE_CLEAR_LATE: u32 = 0x000000b3;
const ENG_SAFE_SET_LATE: u32 = 0x00000081;
const ENG_SAFE_CLEAR_IGP: u32 = 0x03400e70;
const ENG_SAFE_SET_IGP: u32 = 0x03400640;

static VARIANTS: [ChipVariant; 10] = [
    ChipVariant {
        chipset: 0x50,
        family: ClkFamily::Discrete,
        aux_domains: false,
        div_reg: Some(PCLK_DIV_A),
        hwsq_data: HWSQ_DATA_SMALL,
        hwsq_kick: HWSQ_KICK_SMALL,
        ref_style: PllRefStyle::DualCoef,
        quirks: ChipQuirks::empty(),
        vdec_sel: None,
        vdec_core_sel: 0x00000c00,
        dom6_style: Dom6Style::DomPll,
        eng_safe_clear: ENG_SAFE_CLEAR_EARLY,
        eng_safe_set: ENG_SAFE_SET_EARLY,
        pll_limits: &STD_PLL_LIMITS,
        signals: &SIGNALS_50,
    },
    ChipVariant {
        chipset: 0x84,
        family: ClkFamily::Discrete,
        aux_domains: true,
        div_reg: Some(PCLK_DIV_A),
        hwsq_data: HWSQ_DATA_SMALL,
        hwsq_kick: HWSQ_KICK_SMALL,
        ref_style: PllRefStyle::SingleCoef,
        quirks: ChipQuirks::empty(),
        vdec_sel: Some(&VDEC_SEL_STD),
        vdec_core_sel: 0x00000c00,
        dom6_style: Dom6Style::HostMux,
        eng_safe_clear: ENG_SAFE_CLEAR_EARLY,
        eng_safe_set: ENG_SAFE_SET_EARLY,
        pll_limits: &STD_PLL_LIMITS,
        signals: &SIGNALS_84,
    },
    ChipVariant {
        chipset: 0x86,
        family: ClkFamily::Discrete,
        aux_domains: true,
        div_reg: Some(PCLK_DIV_A),
        hwsq_data: HWSQ_DATA_SMALL,
        hwsq_kick: HWSQ_KICK_SMALL,
        ref_style: PllRefStyle::SingleCoef,
        quirks: ChipQuirks::empty(),
        vdec_sel: Some(&VDEC_SEL_STD),
        vdec_core_sel: 0x00000c00,
        dom6_style: Dom6Style::HostMux,
        eng_safe_clear: ENG_SAFE_CLEAR_EARLY,
        eng_safe_set: ENG_SAFE_SET_EARLY,
        pll_limits: &STD_PLL_LIMITS,
        signals: &SIGNALS_86,
    },
    ChipVariant {
        chipset: 0x92,
        family: ClkFamily::Discrete,
        aux_domains: true,
        div_reg: Some(PCLK_DIV_B),
        hwsq_data: HWSQ_DATA_LARGE,
        hwsq_kick: HWSQ_KICK_LARGE,
        ref_style: PllRefStyle::SingleCoef,
        quirks: ChipQuirks::SCANOUT_TOGGLE,
        vdec_sel: Some(&VDEC_SEL_STD),
        vdec_core_sel: 0x00000c00,
        dom6_style: Dom6Style::HostMux,
        eng_safe_clear: ENG_SAFE_CLEAR_LATE,
        eng_safe_set: ENG_SAFE_SET_LATE,
        pll_limits: &STD_PLL_LIMITS,
        signals: &SIGNALS_92,
    },
    ChipVariant {
        chipset: 0x94,
        family: ClkFamily::Discrete,
        aux_domains: true,
        div_reg: Some(PCLK_DIV_B),
        hwsq_data: HWSQ_DATA_LARGE,
        hwsq_kick: HWSQ_KICK_LARGE,
        ref_style: PllRefStyle::MuxedSel,
        quirks: ChipQuirks::SCANOUT_TOGGLE,
        vdec_sel: Some(&VDEC_SEL_STD),
        vdec_core_sel: 0x00000c00,
        dom6_style: Dom6Style::HostMux,
        eng_safe_clear: ENG_SAFE_CLEAR_LATE,
        eng_safe_set: ENG_SAFE_SET_LATE,
        pll_limits: &STD_PLL_LIMITS,
        signals: &SIGNALS_94,
    },
    ChipVariant {
        chipset: 0x96,
        family: ClkFamily::Discrete,
        aux_domains: true,
        div_reg: Some(PCLK_DIV_B),
        hwsq_data: HWSQ_DATA_LARGE,
        hwsq_kick: HWSQ_KICK_LARGE,
        ref_style: PllRefStyle::MuxedSel,
        quirks: ChipQuirks::SCANOUT_TOGGLE,
        vdec_sel: Some(&VDEC_SEL_STD),
        vdec_core_sel: 0x00000c00,
        dom6_style: Dom6Style::HostMux,
        eng_safe_clear: ENG_SAFE_CLEAR_LATE,
        eng_safe_set: ENG_SAFE_SET_LATE,
        pll_limits: &STD_PLL_LIMITS,
        signals: &SIGNALS_96,
    },
    ChipVariant {
        chipset: 0x98,
        family: ClkFamily::Discrete,
        aux_domains: true,
        div_reg: Some(PCLK_DIV_A),
        hwsq_data: HWSQ_DATA_LARGE,
        hwsq_kick: HWSQ_KICK_LARGE,
        ref_style: PllRefStyle::MuxedSel,
        quirks: ChipQuirks::SCANOUT_TOGGLE,
        vdec_sel: Some(&VDEC_SEL_HOST),
        vdec_core_sel: 0x00000000,
        dom6_style: Dom6Style::HostMux,
        eng_safe_clear: ENG_SAFE_CLEAR_LATE,
        eng_safe_set: ENG_SAFE_SET_LATE,
        pll_limits: &STD_PLL_LIMITS,
        signals: &SIGNALS_98,
    },
    ChipVariant {
        chipset: 0xa0,
        family: ClkFamily::Discrete,
        aux_domains: true,
        div_reg: Some(PCLK_DIV_A),
        hwsq_data: HWSQ_DATA_LARGE,
        hwsq_kick: HWSQ_KICK_LARGE,
        ref_style: PllRefStyle::DualCoef,
        quirks: ChipQuirks::SCANOUT_TOGGLE.union(ChipQuirks::CORE_BYPASS_IGNORED),
        vdec_sel: Some(&VDEC_SEL_CORE0),
        vdec_core_sel: 0x00000c00,
        dom6_style: Dom6Style::DomPll,
        eng_safe_clear: ENG_SAFE_CLEAR_LATE,
        eng_safe_set: ENG_SAFE_SET_LATE,
        pll_limits: &STD_PLL_LIMITS,
        signals: &SIGNALS_A0,
    },
    ChipVariant {
        chipset: 0xaa,
        family: ClkFamily::Igp,
        aux_domains: false,
        div_reg: Some(PCLK_DIV_IGP),
        hwsq_data: HWSQ_DATA_LARGE,
        hwsq_kick: HWSQ_KICK_LARGE,
        ref_style: PllRefStyle::SingleCoef,
        quirks: ChipQuirks::empty(),
        vdec_sel: None,
        vdec_core_sel: 0x00000000,
        dom6_style: Dom6Style::HostMux,
        eng_safe_clear: ENG_SAFE_CLEAR_IGP,
        eng_safe_set: ENG_SAFE_SET_IGP,
        pll_limits: &IGP_PLL_LIMITS,
        signals: &SIGNALS_NONE,
    },
    ChipVariant {
        chipset: 0xac,
        family: ClkFamily::Igp,
        aux_domains: false,
        div_reg: Some(PCLK_DIV_IGP),
        hwsq_data: HWSQ_DATA_LARGE,
        hwsq_kick: HWSQ_KICK_LARGE,
        ref_style: PllRefStyle::SingleCoef,
        quirks: ChipQuirks::empty(),
        vdec_sel: None,
        vdec_core_sel: 0x00000000,
        dom6_style: Dom6Style::HostMux,
        eng_safe_clear: ENG_SAFE_CLEAR_IGP,
        eng_safe_set: ENG_SAFE_SET_IGP,
        pll_limits: &IGP_PLL_LIMITS,
        signals: &SIGNALS_AC,
    },
];
