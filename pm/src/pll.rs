//! PLL coefficient solver.
//!
//! A PLL synthesizes `ref * N / M / postdiv` with the internal VCO running
//! at `ref * N / M`. How the P field maps to the post-division depends on
//! the chip family: most carry a right-shift exponent (divide by 2^P), the
//! IGP revisions an integer divider (divide by P). The solver scans the
//! post-divider range smallest first and keeps the strictly closest
//! in-range candidate, so an exact-error tie resolves to the smaller P
//! (lower post-division, less jitter).

use crate::error::{PmError, PmResult};

/// Interpretation of a PLL's P field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostDivStyle {
    /// Right-shift exponent: divide by `2^P`.
    Shift,
    /// Plain integer divider: divide by `P`.
    Integer,
}

/// Hardware constraint ranges for one PLL.
#[derive(Debug, Clone, Copy)]
pub struct PllLimits {
    pub reg: u32,
    pub vco_min_khz: u32,
    pub vco_max_khz: u32,
    pub n_min: u32,
    pub n_max: u32,
    pub m_min: u32,
    pub m_max: u32,
    pub p_style: PostDivStyle,
    pub p_max: u8,
    /// Board-specific bias added to the P field mirror in the control
    /// register (not applied to the divide itself).
    pub log2p_bias: u8,
}

/// Solved coefficients and the frequency they achieve. `p` follows the
/// limits' `p_style`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllCoef {
    pub n: u32,
    pub m: u32,
    pub p: u8,
    pub khz: u32,
}

/// Find `(N, M, P)` minimizing the error against `target_khz`.
///
/// Rejects, never clamps: when no combination keeps the VCO in range with
/// N/M inside their bit-width bounds, the whole transition must abort.
pub fn solve(limits: &PllLimits, ref_khz: u32, target_khz: u32) -> PmResult<PllCoef> {
    let fail = PmError::NoValidCoefficients {
        pll: limits.reg,
        target_khz,
    };
    if ref_khz == 0 || target_khz == 0 {
        return Err(fail);
    }

    let p_min = match limits.p_style {
        PostDivStyle::Shift => 0,
        PostDivStyle::Integer => 1,
    };

    let mut best: Option<PllCoef> = None;
    let mut best_err = u32::MAX;

    for p in p_min..=limits.p_max {
        let vco = match limits.p_style {
            PostDivStyle::Shift => target_khz.checked_shl(p as u32),
            PostDivStyle::Integer => target_khz.checked_mul(p as u32),
        };
        let vco = match vco {
            Some(v) => v,
            None => break,
        };
        if vco < limits.vco_min_khz || vco > limits.vco_max_khz {
            continue;
        }

        for m in limits.m_min..=limits.m_max {
            // N rounding to nearest keeps the error within ref/(2*M).
            let n = ((vco as u64 * m as u64 + ref_khz as u64 / 2) / ref_khz as u64) as u32;
            if n < limits.n_min || n > limits.n_max {
                continue;
            }

            let actual_vco = (ref_khz as u64 * n as u64 / m as u64) as u32;
            if actual_vco < limits.vco_min_khz || actual_vco > limits.vco_max_khz {
                continue;
            }

            let khz = match limits.p_style {
                PostDivStyle::Shift => actual_vco >> p,
                PostDivStyle::Integer => actual_vco / p as u32,
            };
            let err = khz.abs_diff(target_khz);
            if err < best_err {
                best_err = err;
                best = Some(PllCoef { n, m, p, khz });
                if err == 0 {
                    break;
                }
            }
        }

        if best_err == 0 {
            break;
        }
    }

    best.ok_or(fail)
}

/// Pick the right-shift divider 0..=7 minimizing absolute error against
/// `target_khz`. Ties resolve to the smaller shift.
pub fn best_div(src_khz: u32, target_khz: u32) -> (u32, u8) {
    let mut best_khz = src_khz;
    let mut best_shift = 0u8;
    let mut best_err = src_khz.abs_diff(target_khz);

    for shift in 1..=7u8 {
        let khz = src_khz >> shift;
        let err = khz.abs_diff(target_khz);
        if err < best_err {
            best_err = err;
            best_khz = khz;
            best_shift = shift;
        }
    }

    (best_khz, best_shift)
}

/// Frequencies are "the same" when they agree at MHz granularity.
#[inline]
pub fn clk_same(a_khz: u32, b_khz: u32) -> bool {
    a_khz / 1000 == b_khz / 1000
}
