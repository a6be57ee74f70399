//! Mock collaborators for the suite tests.
//!
//! `MockBus` keeps a small register map plus an ordered write log, so
//! tests can assert both final register state and write ordering. A
//! per-address OR mask makes status bits that real hardware would raise
//! (freeze acks, idle bits) visible to bounded waits; without one, a wait
//! on a set-bit condition times out, which is the injection mechanism for
//! the resume-always tests. `MockTime` is a virtual clock that advances
//! only through `delay_us`, so every timeout is deterministic.

use crate::bus::RegisterBus;
use crate::device::{BiosScripts, Device, FifoHooks, FifoToken};
use crate::error::{PmError, PmResult};
use crate::perflvl::{MemoryKind, VramConfig};
use crate::time::TimeSource;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use spin::Mutex;

pub const MOCK_REG_CAPACITY: usize = 64;
pub const MOCK_OR_CAPACITY: usize = 8;
pub const MOCK_LOG_CAPACITY: usize = 512;

struct MockBusState {
    regs: [(u32, u32); MOCK_REG_CAPACITY],
    reg_len: usize,
    or_masks: [(u32, u32); MOCK_OR_CAPACITY],
    or_len: usize,
    log: [(u32, u32); MOCK_LOG_CAPACITY],
    log_len: usize,
}

pub struct MockBus {
    state: Mutex<MockBusState>,
}

impl MockBus {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(MockBusState {
                regs: [(0, 0); MOCK_REG_CAPACITY],
                reg_len: 0,
                or_masks: [(0, 0); MOCK_OR_CAPACITY],
                or_len: 0,
                log: [(0, 0); MOCK_LOG_CAPACITY],
                log_len: 0,
            }),
        }
    }

    /// Seed a register value without touching the write log.
    pub fn preset(&self, addr: u32, val: u32) {
        let state = &mut *self.state.lock();
        store(&mut state.regs, &mut state.reg_len, addr, val);
    }

    /// Bits of `addr` that read as set regardless of stored value, like
    /// hardware status bits the mock has no state machine for.
    pub fn set_read_or(&self, addr: u32, mask: u32) {
        let state = &mut *self.state.lock();
        store(&mut state.or_masks, &mut state.or_len, addr, mask);
    }

    pub fn read_back(&self, addr: u32) -> u32 {
        let state = self.state.lock();
        load(&state.regs[..state.reg_len], addr)
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().log_len
    }

    pub fn nth_write(&self, n: usize) -> Option<(u32, u32)> {
        let state = self.state.lock();
        state.log[..state.log_len].get(n).copied()
    }

    /// Log index of the first write to `addr`.
    pub fn first_write_to(&self, addr: u32) -> Option<usize> {
        let state = self.state.lock();
        state.log[..state.log_len].iter().position(|w| w.0 == addr)
    }

    pub fn writes_to(&self, addr: u32) -> usize {
        let state = self.state.lock();
        state.log[..state.log_len]
            .iter()
            .filter(|w| w.0 == addr)
            .count()
    }

    pub fn last_write_to(&self, addr: u32) -> Option<u32> {
        let state = self.state.lock();
        state.log[..state.log_len]
            .iter()
            .rev()
            .find(|w| w.0 == addr)
            .map(|w| w.1)
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

fn store<const N: usize>(table: &mut [(u32, u32); N], len: &mut usize, addr: u32, val: u32) {
    for entry in table[..*len].iter_mut() {
        if entry.0 == addr {
            entry.1 = val;
            return;
        }
    }
    if *len < N {
        table[*len] = (addr, val);
        *len += 1;
    }
}

fn load(table: &[(u32, u32)], addr: u32) -> u32 {
    table
        .iter()
        .find(|entry| entry.0 == addr)
        .map_or(0, |entry| entry.1)
}

impl RegisterBus for MockBus {
    fn read32(&self, addr: u32) -> u32 {
        let state = self.state.lock();
        let val = load(&state.regs[..state.reg_len], addr);
        val | load(&state.or_masks[..state.or_len], addr)
    }

    fn write32(&self, addr: u32, val: u32) {
        let state = &mut *self.state.lock();
        store(&mut state.regs, &mut state.reg_len, addr, val);
        if state.log_len < MOCK_LOG_CAPACITY {
            state.log[state.log_len] = (addr, val);
            state.log_len += 1;
        }
    }
}

/// Virtual clock. `delay_us` is the only thing that moves it.
pub struct MockTime {
    now_us: AtomicU64,
}

impl MockTime {
    pub const fn new() -> Self {
        Self {
            now_us: AtomicU64::new(0),
        }
    }
}

impl Default for MockTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MockTime {
    fn monotonic_us(&self) -> u64 {
        self.now_us.load(Ordering::Relaxed)
    }

    fn delay_us(&self, us: u32) {
        self.now_us.fetch_add(us as u64, Ordering::Relaxed);
    }
}

const MOCK_SCRIPT_CAPACITY: usize = 8;

struct MockBiosState {
    ran: [u16; MOCK_SCRIPT_CAPACITY],
    ran_len: usize,
    fail_id: Option<u16>,
}

pub struct MockBios {
    prologue: &'static [u16],
    state: Mutex<MockBiosState>,
}

impl MockBios {
    pub const fn new(prologue: &'static [u16]) -> Self {
        Self {
            prologue,
            state: Mutex::new(MockBiosState {
                ran: [0; MOCK_SCRIPT_CAPACITY],
                ran_len: 0,
                fail_id: None,
            }),
        }
    }

    /// Make `run_init_script(id)` fail with `ScriptFailed(id)`.
    pub fn fail_script(&self, id: u16) {
        self.state.lock().fail_id = Some(id);
    }

    pub fn scripts_run(&self) -> usize {
        self.state.lock().ran_len
    }

    pub fn nth_script(&self, n: usize) -> Option<u16> {
        let state = self.state.lock();
        state.ran[..state.ran_len].get(n).copied()
    }
}

impl BiosScripts for MockBios {
    fn mem_reclock_scripts(&self) -> &[u16] {
        self.prologue
    }

    fn run_init_script(&self, id: u16) -> PmResult {
        let mut state = self.state.lock();
        if state.fail_id == Some(id) {
            return Err(PmError::ScriptFailed(id));
        }
        if state.ran_len < MOCK_SCRIPT_CAPACITY {
            let idx = state.ran_len;
            state.ran[idx] = id;
            state.ran_len += 1;
        }
        Ok(())
    }
}

pub struct MockFifo {
    pauses: AtomicU32,
    resumes: AtomicU32,
}

impl MockFifo {
    pub const fn new() -> Self {
        Self {
            pauses: AtomicU32::new(0),
            resumes: AtomicU32::new(0),
        }
    }

    pub fn pause_count(&self) -> u32 {
        self.pauses.load(Ordering::Relaxed)
    }

    pub fn resume_count(&self) -> u32 {
        self.resumes.load(Ordering::Relaxed)
    }
}

impl Default for MockFifo {
    fn default() -> Self {
        Self::new()
    }
}

impl FifoHooks for MockFifo {
    fn pause(&self) -> FifoToken {
        FifoToken(self.pauses.fetch_add(1, Ordering::Relaxed))
    }

    fn resume(&self, _token: FifoToken) {
        self.resumes.fetch_add(1, Ordering::Relaxed);
    }
}

/// One bundle of all four mock collaborators, so a test can own them on
/// the stack and borrow a `Device` out of them.
pub struct MockRig {
    pub bus: MockBus,
    pub time: MockTime,
    pub bios: MockBios,
    pub fifo: MockFifo,
}

pub const MOCK_CRYSTAL_KHZ: u32 = 27_000;

impl MockRig {
    pub const fn new() -> Self {
        Self {
            bus: MockBus::new(),
            time: MockTime::new(),
            bios: MockBios::new(&[]),
            fifo: MockFifo::new(),
        }
    }

    pub const fn with_bios_prologue(prologue: &'static [u16]) -> Self {
        Self {
            bus: MockBus::new(),
            time: MockTime::new(),
            bios: MockBios::new(prologue),
            fifo: MockFifo::new(),
        }
    }

    pub fn device(&self, chipset: u8, vram: VramConfig) -> PmResult<Device<'_>> {
        Device::new(
            chipset,
            MOCK_CRYSTAL_KHZ,
            vram,
            &self.bus,
            &self.time,
            &self.bios,
            &self.fifo,
        )
    }

    /// Raise the status bits every quiesce wait polls for, so a commit
    /// makes it through the frozen window.
    pub fn arm_quiesce_acks(&self) {
        self.bus
            .set_read_or(crate::pm_defs::PFIFO_FREEZE, crate::pm_defs::PFIFO_FREEZE_ACK);
    }

    /// Same for the IGP quiesce and lock waits: freeze ack, engine idle
    /// bits and both PLL lock fields.
    pub fn arm_igp_acks(&self) {
        use crate::pm_defs::*;
        self.bus.set_read_or(PFIFO_FREEZE, PFIFO_FREEZE_ACK);
        self.bus.set_read_or(PFIFO_ENGINE_IDLE, PFIFO_ENGINE_IDLE_MASK);
        self.bus
            .set_read_or(PLL_LOCK_STATUS, PLL_LOCK_CORE | PLL_LOCK_SHADER);
    }
}

pub fn ddr2_vram() -> VramConfig {
    VramConfig {
        kind: MemoryKind::Ddr2,
        rank_b: false,
        timing_supported: true,
    }
}

pub fn ddr3_vram() -> VramConfig {
    VramConfig {
        kind: MemoryKind::Ddr3,
        rank_b: true,
        timing_supported: true,
    }
}

pub fn gddr3_vram() -> VramConfig {
    VramConfig {
        kind: MemoryKind::Gddr3,
        rank_b: false,
        timing_supported: true,
    }
}

pub fn unknown_vram() -> VramConfig {
    VramConfig {
        kind: MemoryKind::Unknown,
        rank_b: false,
        timing_supported: false,
    }
}
