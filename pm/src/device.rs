//! Device context handle.
//!
//! There is no global device singleton; every operation takes an explicit
//! `&Device`, which bundles the chip variant row, board facts (crystal,
//! VRAM) and the external collaborators behind their trait seams.

use crate::bus::RegisterBus;
use crate::chipset::{self, ChipVariant};
use crate::error::{PmError, PmResult, WaitPoint};
use crate::perflvl::VramConfig;
use crate::time::TimeSource;
use spin::Mutex;
use teslaclk_lib::klog_error;

/// Proof that the FIFO was paused; consumed by `resume`.
#[derive(Debug)]
pub struct FifoToken(pub u32);

/// BIOS init-table execution, treated as an opaque collaborator.
pub trait BiosScripts {
    /// Prologue script ids from the memory-reclock descriptor table,
    /// in execution order. Empty when the table is absent.
    fn mem_reclock_scripts(&self) -> &[u16];

    fn run_init_script(&self, id: u16) -> PmResult;
}

/// Command-FIFO pause/resume hooks.
pub trait FifoHooks {
    fn pause(&self) -> FifoToken;
    fn resume(&self, token: FifoToken);
}

pub struct Device<'a> {
    variant: &'static ChipVariant,
    crystal_khz: u32,
    vram: VramConfig,
    bus: &'a dyn RegisterBus,
    time: &'a dyn TimeSource,
    bios: &'a dyn BiosScripts,
    fifo: &'a dyn FifoHooks,
    /// Serializes reclock transactions; also excludes context-switch
    /// control from interleaving while engines are frozen.
    pub(crate) reclock_lock: Mutex<()>,
}

impl<'a> Device<'a> {
    pub fn new(
        chipset: u8,
        crystal_khz: u32,
        vram: VramConfig,
        bus: &'a dyn RegisterBus,
        time: &'a dyn TimeSource,
        bios: &'a dyn BiosScripts,
        fifo: &'a dyn FifoHooks,
    ) -> PmResult<Self> {
        let variant = chipset::lookup(chipset)?;
        Ok(Self {
            variant,
            crystal_khz,
            vram,
            bus,
            time,
            bios,
            fifo,
            reclock_lock: Mutex::new(()),
        })
    }

    pub fn variant(&self) -> &'static ChipVariant {
        self.variant
    }

    pub fn crystal_khz(&self) -> u32 {
        self.crystal_khz
    }

    pub fn vram(&self) -> &VramConfig {
        &self.vram
    }

    pub(crate) fn bios(&self) -> &dyn BiosScripts {
        self.bios
    }

    pub(crate) fn fifo(&self) -> &dyn FifoHooks {
        self.fifo
    }

    #[inline]
    pub fn rd32(&self, addr: u32) -> u32 {
        self.bus.read32(addr)
    }

    #[inline]
    pub fn wr32(&self, addr: u32, val: u32) {
        self.bus.write32(addr, val);
    }

    #[inline]
    pub fn mask32(&self, addr: u32, clear: u32, set: u32) -> u32 {
        self.bus.mask32(addr, clear, set)
    }

    #[inline]
    pub fn delay_us(&self, us: u32) {
        self.time.delay_us(us);
    }

    #[inline]
    pub fn monotonic_us(&self) -> u64 {
        self.time.monotonic_us()
    }

    /// Poll `addr` until `(value & mask) == val` or the wall-clock deadline
    /// expires. On timeout, logs the final register value and returns the
    /// wait point that failed.
    pub fn wait32(
        &self,
        addr: u32,
        mask: u32,
        val: u32,
        timeout_us: u64,
        point: WaitPoint,
    ) -> PmResult {
        let deadline = self.time.monotonic_us() + timeout_us;
        loop {
            let current = self.rd32(addr);
            if current & mask == val {
                return Ok(());
            }
            if self.time.monotonic_us() >= deadline {
                klog_error!(
                    "pm: timed out waiting for {} ({:#08x} = {:#010x}, want {:#010x}/{:#010x})",
                    point,
                    addr,
                    current,
                    val,
                    mask
                );
                return Err(PmError::Timeout(point));
            }
            self.time.delay_us(1);
        }
    }
}
