// Clock master control
pub const PCLK_MAST: u32 = 0x00c040;
pub const PCLK_MAST_IGP: u32 = 0x00c054;
pub const PCLK_REF_SEL: u32 = 0x00e18c;
pub const PCLK_REF_SEL_MUX: u32 = 0x00c050;
pub const PCLK_REF_COEF: u32 = 0x00e81c;
pub const PCLK_REF_COEF_B: u32 = 0x00e824;

// Engine PLLs (control register; coefficient register is base + 4)
pub const PLL_SHADER: u32 = 0x004020;
pub const PLL_CORE: u32 = 0x004028;
pub const PLL_MEMORY: u32 = 0x004008;
pub const PLL_VDEC: u32 = 0x004030;
pub const PLL_DOM6: u32 = 0x00e810;

pub const PLL_CTRL_ENABLE: u32 = 0x8000_0000;
pub const PLL_CTRL_TWO_STAGE: u32 = 0x4000_0000;
pub const PLL_CTRL_STAGE2_BYPASS: u32 = 0x0000_0100;
pub const PLL_CTRL_MPLL_BYPASS: u32 = 0x0000_0200;
// Control bits a reprogram owns; everything outside is preserved.
pub const PLL_CTRL_PROG_FIELDS: u32 = 0xc03f_0100;

// IGP engine PLL post-divider registers and the lock status word
pub const PLL_CORE_POST_IGP: u32 = 0x004040;
pub const PLL_SHADER_POST_IGP: u32 = 0x004070;
pub const PLL_LOCK_STATUS: u32 = 0x004080;
pub const PLL_LOCK_CORE: u32 = 0x0000_0300;
pub const PLL_LOCK_SHADER: u32 = 0x0000_3000;

// Engine clock divider register, location is chip dependent
pub const PCLK_DIV_A: u32 = 0x004700;
pub const PCLK_DIV_B: u32 = 0x004800;
pub const PCLK_DIV_IGP: u32 = 0x004600;

// Hardware sequencer
pub const PBUS_HWSQ_CTRL: u32 = 0x001098;
pub const PBUS_HWSQ_ENTRY: u32 = 0x001304;
pub const PBUS_HWSQ_STATUS: u32 = 0x001308;
pub const PBUS_HWSQ_KICK: u32 = 0x00130c;
pub const HWSQ_CTRL_MMIO_SHADOW: u32 = 0x0000_0008;
pub const HWSQ_CTRL_ENABLE: u32 = 0x0000_0018;
pub const HWSQ_STATUS_ACTIVE: u32 = 0x0000_0100;
pub const HWSQ_DATA_SMALL: u32 = 0x001400;
pub const HWSQ_DATA_LARGE: u32 = 0x080000;
pub const HWSQ_KICK_SMALL: u32 = 0x0000_0003;
pub const HWSQ_KICK_LARGE: u32 = 0x0000_0001;

// FIFO freeze
pub const PFIFO_FREEZE: u32 = 0x002504;
pub const PFIFO_FREEZE_REQUEST: u32 = 0x0000_0001;
pub const PFIFO_FREEZE_ACK: u32 = 0x0000_0010;
pub const PFIFO_ENGINE_IDLE: u32 = 0x00251c;
pub const PFIFO_ENGINE_IDLE_MASK: u32 = 0x0000_003f;

// IGP quiesce: engine clock gating and the pending-interrupt word
pub const PTHERM_GATE: u32 = 0x020060;
pub const PTHERM_GATE_ENGINES: u32 = 0x0007_0000;
pub const PMC_INTR: u32 = 0x000100;

// Graphics engine quiesce
pub const PGRAPH_FIFO_CTRL: u32 = 0x400500;
pub const PGRAPH_FIFO_ACCESS: u32 = 0x0000_0001;
pub const PGRAPH_STATUS: u32 = 0x400700;
pub const PGRAPH_CTXSW_STATUS: u32 = 0x400304;
pub const PGRAPH_CTXSW_BUSY: u32 = 0x0000_0001;
pub const PGRAPH_CTXSW_CTRL: u32 = 0x400324;
pub const PGRAPH_CTXSW_ALLOW: u32 = 0x0000_0001;
pub const PGRAPH_DISPATCH_STATUS: [u32; 3] = [0x400380, 0x400384, 0x400388];

// Display scanout
pub const PDISP_SCANOUT_CTRL: u32 = 0x611200;
pub const SCANOUT_DISABLE: u32 = 0x0000_3300;
pub const SCANOUT_ENABLE: u32 = 0x0000_3330;
pub const PDISP_CRTC_CLOCK_0: u32 = 0x610ad0;
pub const PDISP_CRTC_STRIDE: u32 = 0x540;

// Memory controller
pub const PFB_PRECHARGE: u32 = 0x1002d4;
pub const PFB_FORCE_REFRESH: u32 = 0x1002d0;
pub const PFB_AUTO_REFRESH: u32 = 0x100210;
pub const PFB_AUTO_REFRESH_ON: u32 = 0x8000_0000;
pub const PFB_SELF_REFRESH: u32 = 0x1002dc;
pub const PFB_TIMING_BASE: u32 = 0x100220;
pub const PFB_TIMING_COUNT: usize = 9;
pub const PFB_MR0: u32 = 0x1002c0;
pub const PFB_MR1: u32 = 0x1002c4;
pub const PFB_MR0_B: u32 = 0x1002c8;
pub const PFB_MR1_B: u32 = 0x1002cc;
pub const PFB_MR2: u32 = 0x1002e0;
pub const PFB_MR2_B: u32 = 0x1002e8;
pub const MR0_DLL_RESET: u32 = 0x0000_0100;

// Performance counters
pub const PCOUNTER_SETS: usize = 8;
pub const PCOUNTER_SLOTS: usize = 4;
pub const PCOUNTER_MODE: u32 = 0x00a7c0;
pub const PCOUNTER_CTRL_A: u32 = 0x00a500;
pub const PCOUNTER_CTRL_B: u32 = 0x00a520;
pub const PCOUNTER_SIGSEL: [u32; PCOUNTER_SLOTS] = [0x00a400, 0x00a440, 0x00a480, 0x00a4c0];
pub const PCOUNTER_TRUTH: [u32; PCOUNTER_SLOTS] = [0x00a420, 0x00a460, 0x00a4a0, 0x00a4e0];
pub const PCOUNTER_TRUTH_PASSTHROUGH: u32 = 0x0000_aaaa;
pub const PCOUNTER_CYCLES: u32 = 0x00a600;
pub const PCOUNTER_VALUE: [u32; PCOUNTER_SLOTS] = [0x00a700, 0x00a6c0, 0x00a680, 0x00a740];
pub const PGRAPH_DEBUG_1: u32 = 0x400084;
pub const PGRAPH_DEBUG_1_COUNTER_LATCH: u32 = 0x0000_0020;

// Fixed reference frequencies (kHz)
pub const HREF_KHZ: u32 = 100_000;
pub const IGP_VDEC_SRC_KHZ: u32 = 500_000;

// Bounded-wait deadlines (microseconds)
pub const CTXPROG_IDLE_TIMEOUT_US: u64 = 2_000;
pub const FIFO_FREEZE_TIMEOUT_US: u64 = 2_000;
pub const GRAPH_IDLE_TIMEOUT_US: u64 = 2_000;
pub const INTR_IDLE_TIMEOUT_US: u64 = 2_000;
pub const ENGINE_IDLE_TIMEOUT_US: u64 = 2_000;
pub const PLL_LOCK_TIMEOUT_US: u64 = 2_000;
pub const SEQUENCER_TIMEOUT_US: u64 = 100_000;

// Post-PLL settle: covers 20000 periods of the slowest 100 MHz reference.
pub const PLL_SETTLE_US: u32 = 200;

// Counter sampling window for an on-demand poll.
pub const COUNTER_WINDOW_US: u32 = 100_000;
