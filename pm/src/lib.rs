#![no_std]

pub mod bus;
pub mod chipset;
pub mod clktree;
pub mod counter;
pub mod device;
pub mod error;
pub mod hwsq;
pub mod hwsq_tests;
pub mod mclk;
pub mod perflvl;
pub mod pll;
pub mod pm_defs;
pub mod reclock;
pub mod reclock_tests;
pub mod test_fixtures;
pub mod time;

pub use bus::RegisterBus;
pub use chipset::{ChipVariant, Signal};
pub use counter::Counters;
pub use device::{BiosScripts, Device, FifoHooks, FifoToken};
pub use error::{PmError, PmResult, WaitPoint};
pub use perflvl::{DramTiming, MemoryKind, PerfLevel, VramConfig};
pub use reclock::{Transaction, commit, prepare, reclock};
pub use time::TimeSource;
