//! Register bus seam.
//!
//! Every hardware access in this crate goes through this trait, so the whole
//! engine can be driven against a recorded register map in tests. The real
//! implementation is a thin wrapper over the device's MMIO BAR.

/// 32-bit register access. Each call is a single bus transaction.
pub trait RegisterBus {
    fn read32(&self, addr: u32) -> u32;
    fn write32(&self, addr: u32, val: u32);

    /// Read-modify-write. Returns the previous value.
    fn mask32(&self, addr: u32, clear: u32, set: u32) -> u32 {
        let prev = self.read32(addr);
        self.write32(addr, (prev & !clear) | set);
        prev
    }
}
