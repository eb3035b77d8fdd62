/*
    Copyright (C) 2023  The VDPTEST Authors

    This file is part of VDPTEST, a Rust library for measuring MSX VDP I/O timing.

    For the full copyright notice, see the lib.rs file.
*/
//! Benchmark configuration and platform calibration data.
use core::fmt;
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use crate::chip::{CpuMode, RefreshRate, CPU_MODE_COUNT, REFRESH_RATE_COUNT};
use crate::longrun;

/// The largest supported number of trials per refresh rate and test.
pub const MAX_ITERATIONS: usize = 128;
/// The cost of the fastest instruction, which bounds the cost of an unrolled block from below.
pub const MIN_INSTRUCTION_CYCLES: u32 = 5;
/// The extra rounds counter wraps around after this many rounds.
pub const MAX_EXTRA_ROUNDS: u32 = u8::MAX as u32;

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidIterations(u8),
    InvalidRoundingConstant(f64),
    InvalidWindow,
    /// The number of unrolled blocks is zero or lets the extra rounds counter wrap around.
    InvalidUnrollBlocks(u16),
    /// The long run needs more passes than its 16-bit counter holds.
    LongRunTooLong(u32),
}

impl std::error::Error for ConfigError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidIterations(n) => write!(f,
                "the number of iterations must be between 1 and {}, got {}", MAX_ITERATIONS, n),
            ConfigError::InvalidRoundingConstant(c) => write!(f,
                "the frame counting rounding constant must be in [0, 1), got {}", c),
            ConfigError::InvalidWindow => f.write_str(
                "the code window must be 16 KiB aligned, hold the code of every test \
                 and may not overlap the system area"),
            ConfigError::InvalidUnrollBlocks(n) => write!(f,
                "{} unrolled blocks are too few to count the rounds of the longest frame", n),
            ConfigError::LongRunTooLong(n) => write!(f,
                "the long run of {} instructions does not fit in the code window", n),
        }
    }
}

pub type Result<T> = core::result::Result<T, ConfigError>;

/// Platform calibration data.
///
/// Cycle counts are expressed in CPU cycles including the platform's wait states. The `*_turbo_add`
/// values are added in the Z80 turbo mode only.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(default, rename_all = "camelCase"))]
#[derive(Clone, Debug, PartialEq)]
pub struct Calibration {
    /// Added to a calibration test count before multiplying it by the instruction cost.
    pub frame_count_add_up: f64,
    /// The cost of the tail sequence executed each time the test code loops in its window.
    pub tail_cycles: u32,
    pub tail_turbo_add: u32,
    /// The interrupt handler body executed after the synchronization `HALT`.
    pub int_cycles: u32,
    pub int_turbo_add: u32,
    /// The interrupt acknowledge with the interrupt vector code.
    pub kick_off_cycles: u32,
    pub kick_off_turbo_add: u32,
    /// The common preamble executed after returning from the synchronization interrupt.
    pub common_start_cycles: u32,
    pub common_start_turbo_add: u32,
    /// The expected frame lengths indexed by [CpuMode] and [RefreshRate].
    pub frame_targets: [[u32; REFRESH_RATE_COUNT]; CPU_MODE_COUNT],
    /// The number of `OUT (0x98),A` instructions executed by the long run.
    pub long_run_out_count: u32,
    /// The expected duration of the long run in seconds.
    pub long_run_seconds: u32,
    /// The long run elapsed time multiplier in the Z80 turbo mode.
    pub turbo_time_multiplier: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Calibration {
            frame_count_add_up: 0.333,
            tail_cycles: 57,
            tail_turbo_add: 0,
            int_cycles: 51,
            int_turbo_add: 0,
            kick_off_cycles: 37,
            kick_off_turbo_add: 0,
            common_start_cycles: 49,
            common_start_turbo_add: 0,
            frame_targets: [
                [59736, 71364],
                [89387, 106776],
                [150000, 200000],
                [200000, 300000],
            ],
            long_run_out_count: 3_579_545,
            long_run_seconds: 12,
            turbo_time_multiplier: 1.5,
        }
    }
}

impl Calibration {
    /// Returns the tail sequence cost in the given CPU mode.
    pub fn tail_cycles(&self, mode: CpuMode) -> u32 {
        self.tail_cycles + if mode.is_turbo() { self.tail_turbo_add } else { 0 }
    }
    /// Returns the number of cycles of each measured frame that are not spent in the test code.
    ///
    /// The value includes the interrupt handling, the common preamble and the `startup_cycles`
    /// of the first calibration test.
    pub fn frame_overhead(&self, mode: CpuMode, startup_cycles: u32) -> u32 {
        let mut cycles = self.int_cycles + self.kick_off_cycles + self.common_start_cycles;
        if mode.is_turbo() {
            cycles += self.int_turbo_add + self.kick_off_turbo_add + self.common_start_turbo_add;
        }
        cycles + startup_cycles
    }

    pub fn frame_target(&self, mode: CpuMode, rate: RefreshRate) -> u32 {
        self.frame_targets[mode.index()][rate.index()]
    }
    /// Returns the longest of the frame targets.
    pub fn longest_frame(&self) -> u32 {
        self.frame_targets.iter().flatten().copied().max().unwrap_or(0)
    }
}

/// How test code is made available to the CPU.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuildVariant {
    /// Test code is generated in RAM before each test.
    Direct,
    /// Test code is pre-built in cartridge banks.
    Banked,
}

impl Default for BuildVariant {
    fn default() -> Self {
        BuildVariant::Direct
    }
}

impl fmt::Display for BuildVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BuildVariant::Direct => "RAM",
            BuildVariant::Banked => "ROM",
        })
    }
}

/// Addresses used by the generated code.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(default, rename_all = "camelCase"))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MemoryMap {
    /// The start of the test code window, a bank is mapped here in the banked variant.
    pub window_base: u16,
    /// The size of the test code window in bytes.
    pub window_size: u16,
    /// The address of the common preamble.
    pub preamble: u16,
    /// The extra rounds counter incremented by the test code tail.
    pub extra_rounds: u16,
    /// Writing a non-zero value here arms the capture hook.
    pub hook_arm: u16,
    /// A 16-bit counter of the long run passes.
    pub long_run_counter: u16,
    /// Memory accessed by the test instructions reading or writing data.
    pub scratch: u16,
    /// The initial stack pointer.
    pub stack_top: u16,
    /// Reserved for the platform's interrupt handler.
    pub isr: u16,
}

impl Default for MemoryMap {
    fn default() -> Self {
        MemoryMap {
            window_base: 0x8000,
            window_size: 0x4000,
            preamble: 0xC000,
            extra_rounds: 0xC0F0,
            hook_arm: 0xC0F1,
            long_run_counter: 0xC0F2,
            scratch: 0xD000,
            stack_top: 0xF000,
            isr: 0xC100,
        }
    }
}

impl MemoryMap {
    /// Returns the address just past the test code window.
    pub fn window_end(&self) -> u32 {
        u32::from(self.window_base) + u32::from(self.window_size)
    }

    fn validate(&self) -> Result<()> {
        let system = [self.preamble, self.extra_rounds, self.hook_arm, self.long_run_counter,
                      self.long_run_counter.wrapping_add(1), self.isr];
        let min_size = longrun::STARTUP_SIZE + longrun::TAIL_SIZE + longrun::UNROLL.len();
        if self.window_base & 0x3FFF != 0 || usize::from(self.window_size) < min_size
           || self.window_size > 0x4000
           || system.iter().any(|&addr| (self.window_base..).contains(&addr)
                                        && u32::from(addr) < self.window_end())
        {
            return Err(ConfigError::InvalidWindow)
        }
        Ok(())
    }
}

/// The benchmark configuration.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(default, rename_all = "camelCase"))]
#[derive(Clone, Debug, PartialEq)]
pub struct BenchConfig {
    /// The number of trials per refresh rate and test.
    pub iterations: u8,
    pub variant: BuildVariant,
    pub memory_map: MemoryMap,
    pub calibration: Calibration,
    /// Limits the number of unrolled blocks generated in RAM, `None` fills the whole window.
    pub unroll_blocks: Option<u16>,
    /// Enables the long run clock cross-check.
    pub long_run: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            iterations: 4,
            variant: BuildVariant::Direct,
            memory_map: MemoryMap::default(),
            calibration: Calibration::default(),
            unroll_blocks: None,
            long_run: true,
        }
    }
}

impl BenchConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if any of the values is out of its supported range.
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 || usize::from(self.iterations) > MAX_ITERATIONS {
            return Err(ConfigError::InvalidIterations(self.iterations))
        }
        let add_up = self.calibration.frame_count_add_up;
        if !(0.0..1.0).contains(&add_up) {
            return Err(ConfigError::InvalidRoundingConstant(add_up))
        }
        self.memory_map.validate()?;
        if let Some(blocks) = self.unroll_blocks {
            let pass_cycles = u32::from(blocks) * MIN_INSTRUCTION_CYCLES + self.calibration.tail_cycles;
            if blocks == 0 || self.calibration.longest_frame() / pass_cycles >= MAX_EXTRA_ROUNDS {
                return Err(ConfigError::InvalidUnrollBlocks(blocks))
            }
        }
        let out_count = self.calibration.long_run_out_count;
        if self.long_run && longrun::pass_count(&self.memory_map, out_count) > u32::from(u16::MAX) {
            return Err(ConfigError::LongRunTooLong(out_count))
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation_works() {
        let mut config = BenchConfig::default();
        assert_eq!(config.validate(), Ok(()));
        config.iterations = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidIterations(0)));
        config.iterations = 129;
        assert_eq!(config.validate(), Err(ConfigError::InvalidIterations(129)));
        config.iterations = 128;
        config.calibration.frame_count_add_up = 1.0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidRoundingConstant(1.0)));
        config.calibration.frame_count_add_up = 0.5;
        config.memory_map.preamble = 0x8100;
        assert_eq!(config.validate(), Err(ConfigError::InvalidWindow));
        config.memory_map.preamble = 0xC000;
        config.memory_map.window_base = 0x8100;
        assert_eq!(config.validate(), Err(ConfigError::InvalidWindow));
        config.memory_map.window_base = 0x8000;
        config.long_run = false;
        config.memory_map.window_size = 16;
        assert_eq!(config.validate(), Err(ConfigError::InvalidWindow));
        config.memory_map.window_size = 27;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn unroll_blocks_validation_works() {
        let mut config = BenchConfig { unroll_blocks: Some(0), ..BenchConfig::default() };
        assert_eq!(config.validate(), Err(ConfigError::InvalidUnrollBlocks(0)));
        config.unroll_blocks = Some(10);
        assert_eq!(config.validate(), Err(ConfigError::InvalidUnrollBlocks(10)));
        // 300000 / (223 * 5 + 57) = 255
        config.unroll_blocks = Some(223);
        assert_eq!(config.validate(), Err(ConfigError::InvalidUnrollBlocks(223)));
        config.unroll_blocks = Some(224);
        assert_eq!(config.validate(), Ok(()));
        config.calibration.frame_targets = [[59736, 71364]; CPU_MODE_COUNT];
        config.unroll_blocks = Some(50);
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.calibration.longest_frame(), 71364);
    }

    #[test]
    fn long_run_validation_works() {
        let mut config = BenchConfig::default();
        config.memory_map.window_size = 1024;
        // 3579545 / 499 + 1 passes
        assert_eq!(config.validate(), Ok(()));
        config.memory_map.window_size = 64;
        assert_eq!(config.validate(), Err(ConfigError::LongRunTooLong(3_579_545)));
        config.long_run = false;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn calibration_works() {
        let cal = Calibration { tail_turbo_add: 3, int_turbo_add: 103, kick_off_turbo_add: 2,
                                common_start_turbo_add: 8, ..Calibration::default() };
        assert_eq!(cal.tail_cycles(CpuMode::Z80), 57);
        assert_eq!(cal.tail_cycles(CpuMode::Z80Turbo), 60);
        assert_eq!(cal.frame_overhead(CpuMode::Z80, 0), 51 + 37 + 49);
        assert_eq!(cal.frame_overhead(CpuMode::Z80Turbo, 11), 51 + 37 + 49 + 103 + 2 + 8 + 11);
        assert_eq!(cal.frame_target(CpuMode::Z80Turbo, RefreshRate::Pal), 106776);
    }

    #[cfg(feature = "snapshot")]
    #[test]
    fn config_serde_works() {
        let cal: Calibration = serde_json::from_str(
            r#"{"tailCycles": 60, "frameTargets": [[1,2],[3,4],[5,6],[7,8]]}"#).unwrap();
        assert_eq!(cal.tail_cycles, 60);
        assert_eq!(cal.frame_count_add_up, 0.333);
        assert_eq!(cal.frame_target(CpuMode::R800Dram, RefreshRate::Ntsc), 7);
        let config = BenchConfig { iterations: 7, variant: BuildVariant::Banked, ..BenchConfig::default() };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""variant":"Banked""#));
        let config1: BenchConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, config1);
    }
}
