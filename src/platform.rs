/*
    Copyright (C) 2023  The VDPTEST Authors

    This file is part of VDPTEST, a Rust library for measuring MSX VDP I/O timing.

    For the full copyright notice, see the lib.rs file.
*/
//! Interfaces of the platform running the benchmark.
//!
//! The engine needs only a handful of synchronous services. An implementation is expected to
//! disable interrupts around operations that must not be interrupted, e.g. arming the VRAM pointer
//! or switching banks.
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use crate::chip::{MsxGeneration, RefreshRate};
use crate::config::MemoryMap;
use crate::hook::CaptureRegion;

/// The timed stream signals its completion by writing to this port.
pub const STREAM_DONE_PORT: u8 = 0x2E;
/// The VRAM address the VDP pointer is armed at before each trial.
pub const VRAM_SCRATCH_ADDRESS: u32 = 0x1_0000;

/// The direction the VDP address pointer is armed for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VramAccess {
    Read,
    Write,
}

/// The CPU selected on a turbo R machine.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TurboRCpu {
    Z80 = 0,
    R800Rom = 1,
    R800Dram = 2,
}

impl Default for TurboRCpu {
    fn default() -> Self {
        TurboRCpu::Z80
    }
}

/// Platform capability queries.
pub trait MachineInfo {
    fn generation(&self) -> MsxGeneration;
    /// Returns `true` if a Z80 turbo mode is available.
    fn has_turbo(&self) -> bool;
    /// Returns `true` if the Z80 turbo mode is enabled.
    fn is_turbo_enabled(&self) -> bool;
    /// Returns the active CPU of a turbo R machine.
    fn turbo_r_cpu(&self) -> TurboRCpu;
    /// Changes the active CPU of a turbo R machine.
    fn set_turbo_r_cpu(&mut self, cpu: TurboRCpu);
}

/// Video display processor services.
pub trait VideoControl {
    fn refresh_rate(&self) -> RefreshRate;
    fn set_refresh_rate(&mut self, rate: RefreshRate);
    /// Arms the VDP address pointer at `address` for the given `access`.
    fn arm_vram(&mut self, access: VramAccess, address: u32);
    /// Remembers the palette so it can be restored later.
    fn save_palette(&mut self);
    fn restore_palette(&mut self);
}

/// Makes code visible to the CPU.
pub trait CodeTarget {
    /// Copies `code` into RAM at `address`.
    fn load_code(&mut self, address: u16, code: &[u8]);
    /// Maps RAM in the test code window.
    fn map_ram_window(&mut self);
    /// Maps the cartridge `bank` in the test code window.
    fn map_code_bank(&mut self, bank: u8);
    /// Returns the number of cartridge banks, `0` if no cartridge is inserted.
    fn bank_count(&self) -> usize;
}

/// Executes timed code.
pub trait TimedExecution: CaptureRegion + CodeTarget {
    /// Replaces the frame interrupt vector with the capture hook.
    ///
    /// The hook handler is placed at [MemoryMap::isr] and is armed by writing a non-zero value to
    /// [MemoryMap::hook_arm].
    fn install_hook(&mut self, map: &MemoryMap);
    /// Restores the frame interrupt vector.
    fn restore_hook(&mut self);
    /// Executes the code at `entry` until the frame interrupt is captured.
    fn run_captured(&mut self, entry: u16);
    /// Executes the code at `entry` until it writes to the [STREAM_DONE_PORT].
    fn run_stream(&mut self, entry: u16);
    /// Reads a byte of memory.
    fn peek(&self, address: u16) -> u8;
}

/// The real-time clock, registers 0 to 3 hold the BCD digits of seconds and minutes.
pub trait RealTimeClock {
    /// Returns the low nibble of the register `reg` of the clock block 0.
    fn read_clock(&mut self, reg: u8) -> u8;
}

/// Line oriented text output.
pub trait TextOutput {
    fn print_line(&mut self, line: &str);
}

/// Everything the benchmark needs from a platform.
pub trait Platform: MachineInfo + VideoControl + TimedExecution + RealTimeClock + TextOutput {}

impl<T> Platform for T
    where T: MachineInfo + VideoControl + TimedExecution + RealTimeClock + TextOutput
{}
