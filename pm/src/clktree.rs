//! Clock-source graph evaluator.
//!
//! Reconstructs current operating frequencies from live register state by
//! walking the clock-source dependency graph. Every call re-reads the
//! selector bits, so results always reflect hardware truth; two reads that
//! straddle a reprogram may legitimately disagree.
//!
//! Unknown selector codes are an informational condition, not an error:
//! they log a diagnostic and evaluate to 0.

use crate::chipset::{ChipQuirks, ClkFamily, Dom6Style, PllRefStyle, VdecSrc};
use crate::device::Device;
use crate::perflvl::PerfLevel;
use crate::pm_defs::*;
use teslaclk_lib::klog_debug;

/// Clock-source node identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClkSrc {
    Crystal,
    Href,
    HrefM4,
    HrefM2D3,
    Hclk,
    HclkM3,
    HclkM3D2,
    Host,
    Core,
    Shader,
    Memory,
    Vdec,
    Dom6,
}

/// Current value of the engine clock divider register, zero when the
/// variant has none.
pub fn read_div(dev: &Device<'_>) -> u32 {
    match dev.variant().div_reg {
        Some(reg) => dev.rd32(reg),
        None => 0,
    }
}

/// Frequency of the shared reference feeding `base`, before the master
/// mux's href-bypass is considered.
fn read_pll_src(dev: &Device<'_>, base: u32) -> u32 {
    let crystal = read_clk(dev, ClkSrc::Crystal);

    let (refclk, p, n, m) = match dev.variant().ref_style {
        PllRefStyle::DualCoef => {
            let rsel = dev.rd32(PCLK_REF_SEL);
            let id = match base {
                PLL_SHADER | PLL_CORE => u32::from(rsel & 0x0000_0004 != 0),
                PLL_MEMORY => u32::from(rsel & 0x0000_0008 != 0),
                PLL_VDEC => 0,
                _ => {
                    klog_debug!("pm: no reference route for pll {:#06x}", base);
                    return 0;
                }
            };
            let coef = dev.rd32(PCLK_REF_COEF + id * 0x0c);
            let refclk = crystal * if coef & 0x0100_0000 != 0 { 2 } else { 4 };
            let p = (coef & 0x0007_0000) >> 16;
            let n = ((coef & 0x0000_ff00) >> 8) + 1;
            let m = (coef & 0x0000_00ff) + 1;
            (refclk, p, n, m)
        }
        PllRefStyle::SingleCoef => {
            let coef = dev.rd32(PCLK_REF_COEF);
            let p = (coef & 0x0007_0000) >> 16;
            let n = (coef & 0x0000_ff00) >> 8;
            let m = coef & 0x0000_00ff;
            (crystal, p, n, m)
        }
        PllRefStyle::MuxedSel => {
            let rsel = dev.rd32(PCLK_REF_SEL_MUX);
            let sel = match base {
                PLL_SHADER => rsel & 0x0000_0003,
                PLL_MEMORY => (rsel & 0x0000_000c) >> 2,
                PLL_CORE => (rsel & 0x0000_1800) >> 11,
                PLL_VDEC => 3,
                _ => {
                    klog_debug!("pm: no reference route for pll {:#06x}", base);
                    return 0;
                }
            };
            let id = match sel {
                0 => 1,
                1 => return crystal,
                2 => return read_clk(dev, ClkSrc::Href),
                _ => 0,
            };
            let coef = dev.rd32(PCLK_REF_COEF + id * 0x28);
            let mut p = (dev.rd32(PCLK_REF_COEF_B + id * 0x28) >> 16) & 7;
            p += (coef & 0x0007_0000) >> 16;
            let n = (coef & 0x0000_ff00) >> 8;
            let m = coef & 0x0000_00ff;
            (crystal, p, n, m)
        }
    };

    if m == 0 {
        return 0;
    }
    (refclk * n / m) >> p
}

/// Input reference of the PLL at `base`: either the PCIE reference (per
/// the master mux) or the shared reference PLL chain.
pub fn read_pll_ref(dev: &Device<'_>, base: u32) -> u32 {
    let mast = dev.rd32(PCLK_MAST);
    let href_selected = match base {
        PLL_CORE => mast & 0x0020_0000 != 0,
        PLL_SHADER => mast & 0x0040_0000 != 0,
        PLL_MEMORY => mast & 0x0001_0000 != 0,
        PLL_VDEC => mast & 0x0200_0000 != 0,
        PLL_DOM6 => return read_clk(dev, ClkSrc::Crystal),
        _ => {
            klog_debug!("pm: unknown pll {:#06x}", base);
            return 0;
        }
    };

    if href_selected {
        read_clk(dev, ClkSrc::Href)
    } else {
        read_pll_src(dev, base)
    }
}

/// Output frequency of the PLL at `base` from its live coefficients.
pub fn read_pll(dev: &Device<'_>, base: u32) -> u32 {
    let mast = dev.rd32(PCLK_MAST);
    let ctrl = dev.rd32(base);
    let coef = dev.rd32(base + 4);
    let refclk = read_pll_ref(dev, base);

    if base == PLL_CORE
        && mast & 0x0010_0000 != 0
        && !dev.variant().has_quirk(ChipQuirks::CORE_BYPASS_IGNORED)
    {
        return read_clk(dev, ClkSrc::Dom6);
    }

    let n2 = (coef & 0xff00_0000) >> 24;
    let m2 = (coef & 0x00ff_0000) >> 16;
    let n1 = (coef & 0x0000_ff00) >> 8;
    let m1 = coef & 0x0000_00ff;

    if ctrl & PLL_CTRL_ENABLE == 0 || m1 == 0 {
        return 0;
    }

    let mut clk = refclk * n1 / m1;
    if ctrl & (PLL_CTRL_TWO_STAGE | PLL_CTRL_STAGE2_BYPASS) == PLL_CTRL_TWO_STAGE {
        if m2 == 0 {
            return 0;
        }
        clk = clk * n2 / m2;
    }
    clk
}

/// Resolve the frequency of a clock-source node, in kHz.
pub fn read_clk(dev: &Device<'_>, src: ClkSrc) -> u32 {
    match dev.variant().family {
        ClkFamily::Discrete => read_clk_discrete(dev, src),
        ClkFamily::Igp => read_clk_igp(dev, src),
    }
}

fn read_clk_discrete(dev: &Device<'_>, src: ClkSrc) -> u32 {
    let mast = dev.rd32(PCLK_MAST);

    match src {
        ClkSrc::Crystal => return dev.crystal_khz(),
        ClkSrc::Href => return HREF_KHZ,
        ClkSrc::HrefM4 => return HREF_KHZ * 4,
        ClkSrc::HrefM2D3 => return HREF_KHZ * 2 / 3,
        ClkSrc::Hclk => return read_clk(dev, ClkSrc::Href) * 27778 / 10000,
        ClkSrc::HclkM3 => return read_clk(dev, ClkSrc::Hclk) * 3,
        ClkSrc::HclkM3D2 => return read_clk(dev, ClkSrc::Hclk) * 3 / 2,
        ClkSrc::Host => match mast & 0x3000_0000 {
            0x0000_0000 => return read_clk(dev, ClkSrc::Href),
            0x2000_0000 | 0x3000_0000 => return read_clk(dev, ClkSrc::Hclk),
            _ => {}
        },
        ClkSrc::Core => {
            let p = if mast & 0x0010_0000 != 0 {
                0
            } else {
                (dev.rd32(PLL_CORE) & 0x0007_0000) >> 16
            };
            match mast & 0x0000_0003 {
                0x0000_0000 => return read_clk(dev, ClkSrc::Crystal) >> p,
                0x0000_0001 => return read_clk(dev, ClkSrc::Dom6),
                0x0000_0002 => return read_pll(dev, PLL_SHADER) >> p,
                _ => return read_pll(dev, PLL_CORE) >> p,
            }
        }
        ClkSrc::Shader => {
            let p = (dev.rd32(PLL_SHADER) & 0x0007_0000) >> 16;
            match mast & 0x0000_0030 {
                0x0000_0000 => {
                    if mast & 0x0000_0080 != 0 {
                        return read_clk(dev, ClkSrc::Host) >> p;
                    }
                    return read_clk(dev, ClkSrc::Crystal) >> p;
                }
                0x0000_0020 => return read_pll(dev, PLL_CORE) >> p,
                0x0000_0030 => return read_pll(dev, PLL_SHADER) >> p,
                _ => {}
            }
        }
        ClkSrc::Memory => {
            let ctrl = dev.rd32(PLL_MEMORY);
            let p = (ctrl & 0x0007_0000) >> 16;
            if ctrl & PLL_CTRL_MPLL_BYPASS != 0 {
                match mast & 0x0000_c000 {
                    0x0000_0000 => return read_clk(dev, ClkSrc::Crystal) >> p,
                    0x0000_8000 | 0x0000_c000 => return read_clk(dev, ClkSrc::Href) >> p,
                    _ => {}
                }
            } else {
                return read_pll(dev, PLL_MEMORY) >> p;
            }
        }
        ClkSrc::Vdec => {
            if let Some(sel_table) = dev.variant().vdec_sel {
                let p = (read_div(dev) & 0x0000_0700) >> 8;
                let sel = ((mast & 0x0000_0c00) >> 10) as usize;
                match sel_table[sel] {
                    VdecSrc::Crystal => return read_clk(dev, ClkSrc::Crystal) >> p,
                    VdecSrc::Core => return read_clk(dev, ClkSrc::Core) >> p,
                    VdecSrc::CorePllOrVdecPll => {
                        if mast & 0x0100_0000 != 0 {
                            return read_pll(dev, PLL_CORE) >> p;
                        }
                        return read_pll(dev, PLL_VDEC) >> p;
                    }
                    VdecSrc::HclkM3D2 => return read_clk(dev, ClkSrc::HclkM3D2) >> p,
                    VdecSrc::Memory => return read_clk(dev, ClkSrc::Memory) >> p,
                    VdecSrc::Off => return 0,
                }
            }
        }
        ClkSrc::Dom6 => match dev.variant().dom6_style {
            Dom6Style::DomPll => return read_pll(dev, PLL_DOM6) >> 2,
            Dom6Style::HostMux => {
                let p = read_div(dev) & 0x0000_0007;
                match mast & 0x0c00_0000 {
                    0x0000_0000 => return read_clk(dev, ClkSrc::Href),
                    0x0800_0000 => return read_clk(dev, ClkSrc::Hclk),
                    0x0c00_0000 => return read_clk(dev, ClkSrc::HclkM3) >> p,
                    _ => {}
                }
            }
        },
    }

    klog_debug!("pm: unknown clock source {:?} mast {:#010x}", src, mast);
    0
}

/// Output of an IGP engine PLL. The core PLL post-divider is a plain
/// integer, the shader PLL's a shift exponent; both run off the PCIE
/// reference.
fn read_pll_igp(dev: &Device<'_>, base: u32) -> u32 {
    let ctrl = dev.rd32(base);
    let coef = dev.rd32(base + 4);
    let post = match base {
        PLL_SHADER => 1 << ((dev.rd32(PLL_SHADER_POST_IGP) >> 16) & 0xf),
        PLL_CORE => (dev.rd32(PLL_CORE_POST_IGP) >> 16) & 0xf,
        _ => 0,
    };

    let n = (coef & 0x0000_ff00) >> 8;
    let m = coef & 0x0000_00ff;
    if ctrl & PLL_CTRL_ENABLE == 0 || m == 0 || post == 0 {
        return 0;
    }
    read_clk(dev, ClkSrc::Href) * n / m / post
}

/// Core PLL domain before the bridge-mux override.
fn read_igp_coreclk(dev: &Device<'_>, mast: u32) -> u32 {
    let p = (dev.rd32(PLL_CORE) & 0x0007_0000) >> 16;
    match mast & 0x0000_0003 {
        0x0000_0000 => read_clk(dev, ClkSrc::Crystal) >> p,
        0x0000_0001 => 0,
        0x0000_0002 => read_clk(dev, ClkSrc::HrefM4) >> p,
        _ => read_pll_igp(dev, PLL_CORE) >> p,
    }
}

fn read_clk_igp(dev: &Device<'_>, src: ClkSrc) -> u32 {
    let mast = dev.rd32(PCLK_MAST_IGP);

    match src {
        ClkSrc::Crystal => return dev.crystal_khz(),
        ClkSrc::Href => return HREF_KHZ,
        ClkSrc::HrefM4 => return HREF_KHZ * 4,
        ClkSrc::HrefM2D3 => return HREF_KHZ * 2 / 3,
        ClkSrc::Host => match mast & 0x000c_0000 {
            0x0000_0000 => return read_clk(dev, ClkSrc::HrefM2D3),
            0x0008_0000 => return read_clk(dev, ClkSrc::HrefM4),
            0x000c_0000 => return read_clk(dev, ClkSrc::Core),
            _ => {}
        },
        ClkSrc::Core => {
            // The bridge mux can put the core domain straight onto a
            // PCIE-reference multiple; otherwise it follows the PLL path.
            if mast & 0x0300_0000 != 0x0300_0000 || mast & 0x0000_0200 == 0 {
                return read_igp_coreclk(dev, mast);
            }
            match mast & 0x0000_0c00 {
                0x0000_0000 => return read_clk(dev, ClkSrc::Href),
                0x0000_0400 => return read_clk(dev, ClkSrc::HrefM4),
                0x0000_0800 => return read_clk(dev, ClkSrc::HrefM2D3),
                _ => return 0,
            }
        }
        ClkSrc::Shader => {
            let p = (dev.rd32(PLL_SHADER) & 0x0007_0000) >> 16;
            match mast & 0x0000_0030 {
                0x0000_0000 => {
                    if mast & 0x0000_0040 != 0 {
                        return read_clk(dev, ClkSrc::Href) >> p;
                    }
                    return read_clk(dev, ClkSrc::Crystal) >> p;
                }
                0x0000_0020 => return read_pll_igp(dev, PLL_CORE) >> p,
                0x0000_0030 => return read_pll_igp(dev, PLL_SHADER) >> p,
                _ => {}
            }
        }
        // IGP boards use carved-out system memory; there is nothing to
        // reclock and nothing to report.
        ClkSrc::Memory => return 0,
        ClkSrc::Vdec => {
            let p = (read_div(dev) & 0x0000_0700) >> 8;
            if mast & 0x0040_0000 != 0 {
                return read_igp_coreclk(dev, mast) >> p;
            }
            return IGP_VDEC_SRC_KHZ >> p;
        }
        _ => {}
    }

    klog_debug!("pm: unknown clock source {:?} mast {:#010x}", src, mast);
    0
}

/// Full read-back of the current operating point.
pub fn read_perflvl(dev: &Device<'_>) -> PerfLevel {
    let mut level = PerfLevel::default();
    level.core_khz = read_clk(dev, ClkSrc::Core);
    level.shader_khz = read_clk(dev, ClkSrc::Shader);
    level.memory_khz = read_clk(dev, ClkSrc::Memory);
    match dev.variant().family {
        ClkFamily::Discrete if dev.variant().aux_domains => {
            level.vdec_khz = read_clk(dev, ClkSrc::Vdec);
            level.dom6_khz = read_clk(dev, ClkSrc::Dom6);
        }
        ClkFamily::Igp => level.vdec_khz = read_clk(dev, ClkSrc::Vdec),
        _ => {}
    }
    level
}
