//! Hardware sequencer program builder and runner.
//!
//! Timing-critical reclock steps (memory PLL changes) cannot tolerate host
//! preemption or races with display scanout, so they are assembled into a
//! short program executed autonomously by the on-chip sequencer. The
//! builder is pure buffer assembly: identical inputs produce byte-identical
//! programs, and nothing here touches hardware until `upload`/`launch`.
//!
//! Byte encoding (the sequencer holds an address and a data latch; writes
//! are triggered by address ops, so consecutive writes compress well):
//!
//! - `0x00..=0x3f`         delay of `ticks << (2 * shift)` µs, where the
//!                         byte is `(shift << 2) | ticks`
//! - `0x40 lo16`           load address low half, trigger write
//! - `0x42 lo16`           load data low half
//! - `0x5f v0 v1`          chip micro-op (scanout/vblank waits, fences)
//! - `0x7f`                exit
//! - `0x80 | flag`         clear flag (`| 0x20` to set instead)
//! - `0xe0 le32`           load full address, trigger write
//! - `0xe2 le32`           load full data

use crate::device::Device;
use crate::error::{PmError, PmResult, WaitPoint};
use crate::pm_defs::*;
use teslaclk_lib::klog_error;

/// On-chip code window size.
pub const HWSQ_CODE_CAPACITY: usize = 0x200;

/// Sequencer flag controlling bus access during the frozen window.
pub const HWSQ_FLAG_BUS_ACCESS: u8 = 0x10;

pub struct HwsqProgram {
    code: [u8; HWSQ_CODE_CAPACITY],
    len: usize,
    addr: u32,
    data: u32,
    addr_valid: bool,
    data_valid: bool,
    finalized: bool,
}

impl HwsqProgram {
    pub const fn new() -> Self {
        Self {
            code: [0; HWSQ_CODE_CAPACITY],
            len: 0,
            addr: 0,
            data: 0,
            addr_valid: false,
            data_valid: false,
            finalized: false,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.code[..self.len]
    }

    /// Little-endian 32-bit words of the finalized image.
    pub fn words(&self) -> impl Iterator<Item = u32> + '_ {
        self.code[..self.len]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
    }

    fn push(&mut self, byte: u8) -> PmResult {
        if self.finalized || self.len >= HWSQ_CODE_CAPACITY {
            return Err(PmError::ProgramOverflow);
        }
        self.code[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    fn push_le16(&mut self, val: u16) -> PmResult {
        for byte in val.to_le_bytes() {
            self.push(byte)?;
        }
        Ok(())
    }

    fn push_le32(&mut self, val: u32) -> PmResult {
        for byte in val.to_le_bytes() {
            self.push(byte)?;
        }
        Ok(())
    }

    /// Append a register write. Loads the data latch first (skipped when
    /// it already holds `data`), then the address latch, which triggers
    /// the write.
    pub fn wr32(&mut self, addr: u32, data: u32) -> PmResult {
        if !self.data_valid || self.data != data {
            if self.data_valid && self.data >> 16 == data >> 16 {
                self.push(0x42)?;
                self.push_le16(data as u16)?;
            } else {
                self.push(0xe2)?;
                self.push_le32(data)?;
            }
            self.data = data;
            self.data_valid = true;
        }

        if self.addr_valid && self.addr >> 16 == addr >> 16 {
            self.push(0x40)?;
            self.push_le16(addr as u16)?;
        } else {
            self.push(0xe0)?;
            self.push_le32(addr)?;
        }
        self.addr = addr;
        self.addr_valid = true;
        Ok(())
    }

    /// Append a microsecond delay, greedily packed into base-4 delay bytes.
    pub fn usec(&mut self, us: u32) -> PmResult {
        let mut remaining = us;
        loop {
            let mut shift = 0u8;
            let mut ticks = remaining;
            while ticks > 3 {
                ticks >>= 2;
                shift += 1;
            }
            self.push((shift << 2) | ticks as u8)?;
            remaining -= ticks << (2 * shift);
            if remaining == 0 {
                return Ok(());
            }
        }
    }

    /// Append a sequencer flag update. `flag` must fit in 5 bits.
    pub fn setf(&mut self, flag: u8, set: bool) -> PmResult {
        let byte = 0x80 | (flag & 0x1f) | if set { 0x20 } else { 0x00 };
        self.push(byte)
    }

    /// Append a chip micro-op.
    pub fn op5f(&mut self, v0: u8, v1: u8) -> PmResult {
        self.push(0x5f)?;
        self.push(v0)?;
        self.push(v1)
    }

    /// Seal the program: a short settle delay, the exit op, then zero
    /// padding (0 is a no-op delay) up to word alignment.
    pub fn finalize(&mut self) -> PmResult {
        self.usec(2)?;
        self.push(0x7f)?;
        while self.len % 4 != 0 {
            self.push(0x00)?;
        }
        self.finalized = true;
        Ok(())
    }
}

impl Default for HwsqProgram {
    fn default() -> Self {
        Self::new()
    }
}

/// Write a finalized program into the chip's code window.
///
/// MMIO shadowing of the window is disabled during the copy and the
/// sequencer is re-enabled afterwards. Must only run while the
/// coordinator holds the engines quiesced.
pub fn upload(dev: &Device<'_>, prog: &HwsqProgram) {
    let window = dev.variant().hwsq_data;

    dev.mask32(PBUS_HWSQ_CTRL, HWSQ_CTRL_MMIO_SHADOW, 0);
    dev.wr32(PBUS_HWSQ_ENTRY, 0);
    for (i, word) in prog.words().enumerate() {
        dev.wr32(window + (i as u32) * 4, word);
    }
    dev.mask32(PBUS_HWSQ_CTRL, HWSQ_CTRL_ENABLE, HWSQ_CTRL_ENABLE);
}

/// Kick the uploaded program and poll for completion.
///
/// On timeout the status register and the whole uploaded window are
/// dumped for postmortem replay before the error is returned.
pub fn launch(dev: &Device<'_>, prog: &HwsqProgram) -> PmResult {
    let variant = dev.variant();

    dev.wr32(PBUS_HWSQ_KICK, variant.hwsq_kick);
    if dev
        .wait32(
            PBUS_HWSQ_STATUS,
            HWSQ_STATUS_ACTIVE,
            0,
            SEQUENCER_TIMEOUT_US,
            WaitPoint::SequencerDone,
        )
        .is_err()
    {
        klog_error!("pm: sequencer program timed out");
        klog_error!("pm: {:#08x}: {:#010x}", PBUS_HWSQ_STATUS, dev.rd32(PBUS_HWSQ_STATUS));
        for i in 0..prog.words().count() {
            let addr = variant.hwsq_data + (i as u32) * 4;
            klog_error!("pm: {:#08x}: {:#010x}", addr, dev.rd32(addr));
        }
        return Err(PmError::SequencerTimeout);
    }

    Ok(())
}
