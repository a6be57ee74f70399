//! Signal/counter telemetry registry.
//!
//! The performance monitor exposes 8 counter sets of 4 slots each; which
//! hardware signal code lands in which set is chip-revision data from the
//! variant table. The registry tracks watched signals, reprograms the
//! monitor on each poll and caches the last readout for `sample`.
//!
//! Entirely independent of the reclock path: its own lock, no interaction
//! with the engine-freeze window. Periodic polling is the embedder's job.

use crate::chipset::{Signal, SignalRow};
use crate::device::Device;
use crate::error::{PmError, PmResult};
use crate::pm_defs::*;
use spin::Mutex;

#[derive(Clone, Copy)]
struct Slot {
    signal: Signal,
    code: u8,
}

struct SetState {
    slots: [Option<Slot>; PCOUNTER_SLOTS],
    values: [u32; PCOUNTER_SLOTS],
    cycles: u32,
}

impl SetState {
    const fn new() -> Self {
        Self {
            slots: [None; PCOUNTER_SLOTS],
            values: [0; PCOUNTER_SLOTS],
            cycles: 0,
        }
    }

    fn in_use(&self) -> bool {
        self.slots.iter().any(|s| s.is_some())
    }
}

pub struct Counters {
    sets: Mutex<[SetState; PCOUNTER_SETS]>,
}

impl Counters {
    pub const fn new() -> Self {
        Self {
            sets: Mutex::new([const { SetState::new() }; PCOUNTER_SETS]),
        }
    }

    /// Start watching `signal`. Watching an already-watched signal is a
    /// no-op; a full counter set fails with `NoCounterSlot`.
    pub fn watch(&self, dev: &Device<'_>, signal: Signal) -> PmResult {
        let row = dev.variant().signal_row(signal)?;
        let mut sets = self.sets.lock();
        let set = &mut sets[row.set as usize];

        if set
            .slots
            .iter()
            .any(|s| s.is_some_and(|slot| slot.signal == signal))
        {
            return Ok(());
        }

        match set.slots.iter_mut().find(|s| s.is_none()) {
            Some(slot) => {
                *slot = Some(Slot {
                    signal,
                    code: row.code,
                });
                Ok(())
            }
            None => Err(PmError::NoCounterSlot),
        }
    }

    /// Stop watching `signal` and discard its cached value.
    pub fn unwatch(&self, dev: &Device<'_>, signal: Signal) -> PmResult {
        let row = dev.variant().signal_row(signal)?;
        let mut sets = self.sets.lock();
        let set = &mut sets[row.set as usize];

        for (i, slot) in set.slots.iter_mut().enumerate() {
            if slot.is_some_and(|s| s.signal == signal) {
                *slot = None;
                set.values[i] = 0;
                return Ok(());
            }
        }
        Err(PmError::SignalNotWatched)
    }

    /// Last polled `(value, cycles)` pair for `signal`. `cycles` is the
    /// set's cycle count over the same window, for ratio computation.
    pub fn sample(&self, dev: &Device<'_>, signal: Signal) -> PmResult<(u32, u32)> {
        let row = dev.variant().signal_row(signal)?;
        let sets = self.sets.lock();
        let set = &sets[row.set as usize];

        for (i, slot) in set.slots.iter().enumerate() {
            if slot.is_some_and(|s| s.signal == signal) {
                return Ok((set.values[i], set.cycles));
            }
        }
        Err(PmError::SignalNotWatched)
    }

    /// Reprogram the monitor for the watched signals, count over one
    /// sampling window, then latch and read every active set back.
    pub fn poll(&self, dev: &Device<'_>) {
        let mut sets = self.sets.lock();

        for (set_idx, set) in sets.iter().enumerate() {
            if !set.in_use() {
                continue;
            }
            let off = (set_idx as u32) * 4;
            dev.wr32(PCOUNTER_MODE + off, 0x0000_0001);
            dev.wr32(PCOUNTER_CTRL_A + off, 0x0000_0000);
            dev.wr32(PCOUNTER_CTRL_B + off, 0x0000_0000);
            for (slot_idx, slot) in set.slots.iter().enumerate() {
                let code = slot.map_or(0, |s| s.code as u32);
                dev.wr32(PCOUNTER_SIGSEL[slot_idx] + off, code);
                dev.wr32(PCOUNTER_TRUTH[slot_idx] + off, PCOUNTER_TRUTH_PASSTHROUGH);
            }
        }

        // Latch pulse resets the counters and starts the window.
        dev.mask32(PGRAPH_DEBUG_1, 0, PGRAPH_DEBUG_1_COUNTER_LATCH);
        dev.mask32(PGRAPH_DEBUG_1, PGRAPH_DEBUG_1_COUNTER_LATCH, 0);

        dev.delay_us(COUNTER_WINDOW_US);

        // Second pulse freezes the window for readout.
        dev.mask32(PGRAPH_DEBUG_1, 0, PGRAPH_DEBUG_1_COUNTER_LATCH);
        dev.mask32(PGRAPH_DEBUG_1, PGRAPH_DEBUG_1_COUNTER_LATCH, 0);

        for (set_idx, set) in sets.iter_mut().enumerate() {
            if !set.in_use() {
                continue;
            }
            let off = (set_idx as u32) * 4;
            set.cycles = dev.rd32(PCOUNTER_CYCLES + off);
            for (slot_idx, slot) in set.slots.iter().enumerate() {
                if slot.is_some() {
                    set.values[slot_idx] = dev.rd32(PCOUNTER_VALUE[slot_idx] + off);
                }
            }
        }
    }
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

/// Signals the chip revision can express, with their set assignment.
pub fn list_available(dev: &Device<'_>) -> &'static [SignalRow] {
    dev.variant().signals
}
