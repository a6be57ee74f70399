//! Unified error types for the reclocking engine.
//!
//! Solve-phase errors (`NoValidCoefficients`, `UnsupportedChipset`,
//! `UnsupportedRam`, `ProgramOverflow`) are reported before any register is
//! mutated. Commit-phase errors (`Timeout`, `SequencerTimeout`,
//! `ScriptFailed`) are returned only after the full resume sequence has run;
//! hardware is never left frozen.

use crate::perflvl::MemoryKind;
use core::fmt;

/// Identifies which bounded wait exceeded its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPoint {
    CtxProgIdle,
    FifoFreeze,
    GraphDrain,
    GraphIdle,
    IntrIdle,
    EngineIdle,
    PllLock,
    SequencerDone,
}

impl fmt::Display for WaitPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CtxProgIdle => "context-switch idle",
            Self::FifoFreeze => "fifo freeze ack",
            Self::GraphDrain => "graphics dispatch drain",
            Self::GraphIdle => "graphics engine idle",
            Self::IntrIdle => "interrupt handler idle",
            Self::EngineIdle => "execution engines idle",
            Self::PllLock => "pll lock",
            Self::SequencerDone => "sequencer completion",
        };
        write!(f, "{}", name)
    }
}

/// Reclocking engine error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmError {
    NoValidCoefficients { pll: u32, target_khz: u32 },
    Timeout(WaitPoint),
    SequencerTimeout,
    UnsupportedChipset(u8),
    UnsupportedRam(MemoryKind),
    ScriptFailed(u16),
    ProgramOverflow,
    UnknownSignal,
    NoCounterSlot,
    SignalNotWatched,
}

impl fmt::Display for PmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoValidCoefficients { pll, target_khz } => {
                write!(f, "no valid coefficients for pll {:#06x} at {} kHz", pll, target_khz)
            }
            Self::Timeout(point) => write!(f, "timed out waiting for {}", point),
            Self::SequencerTimeout => write!(f, "sequencer program execution timed out"),
            Self::UnsupportedChipset(chipset) => {
                write!(f, "chipset {:#04x} not supported for reclocking", chipset)
            }
            Self::UnsupportedRam(kind) => {
                write!(f, "memory technology {:?} has no reclock sequence", kind)
            }
            Self::ScriptFailed(id) => write!(f, "bios init script {:#06x} failed", id),
            Self::ProgramOverflow => write!(f, "sequencer program exceeds code buffer"),
            Self::UnknownSignal => write!(f, "signal not available on this chipset"),
            Self::NoCounterSlot => write!(f, "all counter slots in the signal's set are busy"),
            Self::SignalNotWatched => write!(f, "signal is not currently watched"),
        }
    }
}

/// Convenience result type for reclocking operations.
pub type PmResult<T = ()> = Result<T, PmError>;
