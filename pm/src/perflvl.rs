//! Performance level and DRAM timing descriptions.
//!
//! Levels are produced by policy code outside this crate (thermal tables,
//! user selection) and consumed read-only by the transaction coordinator.

use crate::pm_defs::PFB_TIMING_COUNT;

/// Memory technology fitted on the board. Decides the mode-register
/// sequence that runs after a memory-clock change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    Ddr2,
    Ddr3,
    Gddr3,
    Unknown,
}

/// Per-speed-bin DRAM parameters.
///
/// The register images are opaque to this crate; the engine's only
/// obligation is to sequence them correctly relative to self-refresh and
/// DLL reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DramTiming {
    /// Mode-register images. `mr[0]` carries the DLL-reset bit.
    pub mr: [u32; 3],
    /// Timing register images for 0x100220..0x100240.
    pub reg: [u32; PFB_TIMING_COUNT],
    /// On-die termination in use; forces an extra precharge after MR writes.
    pub odt: bool,
    /// CAS latency, diagnostics only.
    pub cas: u8,
    /// Write recovery, diagnostics only.
    pub wr: u8,
}

/// One operating point. A zero frequency leaves that domain untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerfLevel {
    pub core_khz: u32,
    pub shader_khz: u32,
    pub memory_khz: u32,
    pub vdec_khz: u32,
    pub dom6_khz: u32,
    pub timing: Option<DramTiming>,
    /// BIOS init-script id run before the memory sequencer program.
    pub memscript: Option<u16>,
}

/// VRAM configuration discovered at probe time.
#[derive(Debug, Clone, Copy)]
pub struct VramConfig {
    pub kind: MemoryKind,
    /// Board has a second rank whose mode registers mirror rank A.
    pub rank_b: bool,
    /// Timing register images in `DramTiming::reg` are trustworthy.
    pub timing_supported: bool,
}
