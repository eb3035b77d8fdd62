/*
    Copyright (C) 2023  The VDPTEST Authors

    This file is part of VDPTEST, a Rust library for measuring MSX VDP I/O timing.

    For the full copyright notice, see the lib.rs file.
*/
//! An emulated MSX2 computer running the benchmark on the host.
//!
//! The machine consists of a Z80 CPU, 64 KiB of RAM with an optional ASCII16 cartridge in page 2,
//! a V9938 VDP reduced to its CPU interface and an RP5C01 real-time clock. Every opcode fetch
//! and interrupt acknowledge is extended with a single wait state. Additional wait states can
//! be inserted on VDP access and on cartridge access to emulate slower machines.
mod bus;
mod rtc;
mod vdp;

use core::num::Wrapping;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use crate::z80emu::{Cpu, Clock, BreakCause, Z80NMOS};
use crate::chip::{host_timing, CpuMode, MsxGeneration, RefreshRate};
use crate::clock::{FTs, MsxTsCounter, MsxWaitStates};
use crate::config::{Calibration, MemoryMap};
use crate::hook::{CaptureRegion, CaptureToken};
use crate::memory::{MsxMemory, MsxMemoryError, Page2Slot, ASCII16_PAGE2_SELECT};
use crate::platform::{
    CodeTarget, MachineInfo, RealTimeClock, TextOutput, TimedExecution, TurboRCpu,
    VideoControl, VramAccess
};

pub use bus::{HostBreak, MsxBus, CAPTURE_PORT, RTC_DATA_PORT, RTC_SELECT_PORT};
pub use rtc::Rtc;
pub use vdp::{Vdp, DEFAULT_PALETTE, PALETTE_SIZE, VRAM_SIZE};

/// The address of the IM 1 interrupt vector.
pub const INTERRUPT_VECTOR: u16 = 0x0038;
/// The maximum number of frames a captured run may last.
pub const MAX_CAPTURE_FRAMES: u32 = 8;
/// The maximum number of frames a stream may last.
pub const MAX_STREAM_FRAMES: u32 = 1 << 20;

const VECTOR_SIZE: usize = 5;
/// `PUSH AF; IN A,(0x99); POP AF; EI; RET`
const INTERRUPT_HANDLER: [u8; 7] = [0xF5, 0xDB, 0x99, 0xF1, 0xFB, 0xC9, 0x00];

/// The configuration of the emulated machine.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(default, rename_all = "camelCase"))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MachineConfig {
    pub generation: MsxGeneration,
    /// An MSX2+ Z80 turbo mode is available.
    pub has_turbo: bool,
    /// The Z80 turbo mode is enabled.
    pub turbo_enabled: bool,
    /// The active CPU of a turbo R.
    pub turbo_r_cpu: TurboRCpu,
    pub refresh_rate: RefreshRate,
    /// Extra wait states of every VDP port access.
    pub vdp_io_wait: u8,
    /// Extra wait states of every cartridge access.
    pub rom_wait: u8,
    /// Extra wait states of every other I/O port access.
    pub io_wait: u8,
    /// `false` emulates a clock with a dead battery.
    pub rtc_running: bool,
    /// The emulated clock advances this many times faster.
    pub rtc_divisor: u32,
    /// The time of day the clock is started at, in seconds.
    pub rtc_start_seconds: u32,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            generation: MsxGeneration::Msx2,
            has_turbo: false,
            turbo_enabled: false,
            turbo_r_cpu: TurboRCpu::Z80,
            refresh_rate: RefreshRate::Ntsc,
            vdp_io_wait: 0,
            rom_wait: 0,
            io_wait: 0,
            rtc_running: true,
            rtc_divisor: 1,
            rtc_start_seconds: 12 * 3600,
        }
    }
}

impl MachineConfig {
    /// Returns the wait states of the configured bus.
    pub fn wait_states(&self) -> MsxWaitStates {
        MsxWaitStates {
            vdp_io: self.vdp_io_wait,
            rom: self.rom_wait,
            io: self.io_wait,
            ..MsxWaitStates::msx()
        }
    }
    /// Returns the calibration data matching the timing of the emulated machine.
    ///
    /// The instruction executing when the frame interrupt arrives completes before it is
    /// accepted and is counted by the capture, the kick-off cost accounts for it. Both calibration
    /// tests are then exact, so no count is added up. Frame targets are those of the emulated frames.
    pub fn calibration(&self) -> Calibration {
        let Calibration { frame_targets: [_, _, r800_rom, r800_dram], .. } = Calibration::default();
        Calibration {
            frame_count_add_up: 0.0,
            int_cycles: 51 + u32::from(self.vdp_io_wait),
            kick_off_cycles: 33 + u32::from(self.io_wait),
            kick_off_turbo_add: 3,
            frame_targets: [
                [59736, 71364],
                [89604, 107046],
                r800_rom,
                r800_dram,
            ],
            ..Calibration::default()
        }
    }
}

/// The emulated MSX computer.
pub struct MsxMachine {
    pub cpu: Z80NMOS,
    pub bus: MsxBus,
    pub tsc: MsxTsCounter<MsxWaitStates>,
    pub frames: Wrapping<u64>,
    config: MachineConfig,
    cpu_rate: u32,
    frame_tstates: FTs,
    saved_palette: Option<[u16; PALETTE_SIZE]>,
    saved_vector: Option<[u8; VECTOR_SIZE]>,
    output: Vec<String>,
}

impl Default for MsxMachine {
    fn default() -> Self {
        MsxMachine::new(MachineConfig::default())
    }
}

impl MsxMachine {
    /// Creates a machine with the given configuration.
    pub fn new(config: MachineConfig) -> Self {
        let mut memory = MsxMemory::default();
        for (addr, byte) in (INTERRUPT_VECTOR..).zip(INTERRUPT_HANDLER.iter()) {
            memory.write(addr, *byte);
        }
        let mut vdp = Vdp::default();
        vdp.set_pal(config.refresh_rate.is_pal());
        let rtc = Rtc::new(config.rtc_start_seconds, 1, config.rtc_running);
        let mut machine = MsxMachine {
            cpu: Z80NMOS::default(),
            bus: MsxBus::new(memory, vdp, rtc),
            tsc: MsxTsCounter::new(0, config.wait_states()),
            frames: Wrapping(0),
            config,
            cpu_rate: 0,
            frame_tstates: 0,
            saved_palette: None,
            saved_vector: None,
            output: Vec::new(),
        };
        machine.update_timing();
        machine
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }
    /// Returns the calibration data matching the timing of this machine.
    pub fn calibration(&self) -> Calibration {
        self.config.calibration()
    }
    /// Inserts the cartridge `rom` with the ASCII16 mapper.
    ///
    /// # Errors
    /// Returns an error if the size of `rom` is not supported.
    pub fn insert_cartridge(&mut self, rom: &[u8]) -> Result<(), MsxMemoryError> {
        self.bus.memory.load_rom(rom)?;
        debug!("cartridge: {} banks", self.bus.memory.bank_count());
        Ok(())
    }
    /// Returns the mode the CPU currently runs in.
    pub fn cpu_mode(&self) -> CpuMode {
        match self.config.generation {
            MsxGeneration::TurboR => match self.config.turbo_r_cpu {
                TurboRCpu::Z80 => CpuMode::Z80,
                TurboRCpu::R800Rom => CpuMode::R800Rom,
                TurboRCpu::R800Dram => CpuMode::R800Dram,
            }
            _ if self.config.has_turbo && self.config.turbo_enabled => CpuMode::Z80Turbo,
            _ => CpuMode::Z80
        }
    }
    /// Enables or disables the Z80 turbo mode, if available.
    pub fn set_turbo_enabled(&mut self, enabled: bool) {
        if self.config.has_turbo {
            self.config.turbo_enabled = enabled;
            self.update_timing();
        }
    }

    pub fn cpu_clock_rate(&self) -> u32 {
        self.cpu_rate
    }

    pub fn frame_cycle_count(&self) -> FTs {
        self.frame_tstates
    }
    /// Returns the number of T-states elapsed since the machine was created.
    pub fn elapsed_tstates(&self) -> u64 {
        self.bus.absolute_ts(self.tsc.as_timestamp())
    }
    /// Returns the lines printed so far.
    pub fn output(&self) -> &[String] {
        &self.output
    }
    /// Removes and returns the lines printed so far.
    pub fn take_output(&mut self) -> Vec<String> {
        core::mem::take(&mut self.output)
    }

    fn update_timing(&mut self) {
        let rate = if self.bus.vdp.is_pal() { RefreshRate::Pal } else { RefreshRate::Ntsc };
        let (cpu_rate, frame_tstates) = host_timing(self.cpu_mode(), rate);
        self.cpu_rate = cpu_rate;
        self.frame_tstates = frame_tstates;
        let divisor = u64::from(self.config.rtc_divisor.max(1));
        self.bus.rtc.set_tstates_per_second(u64::from(cpu_rate) / divisor);
    }

    fn ensure_next_frame_tsc(&mut self) -> MsxTsCounter<MsxWaitStates> {
        while self.tsc.as_timestamp() >= self.frame_tstates {
            self.bus.clock_base += self.frame_tstates as u64;
            self.tsc.tsc -= Wrapping(self.frame_tstates);
            self.frames += Wrapping(1);
            self.bus.vdp.start_frame();
            self.update_timing();
        }
        self.tsc.waits = self.bus.wait_states(self.tsc.waits);
        self.tsc
    }
    /// Executes frames until the bus breaks the execution or `max_frames` frames are over.
    fn execute_frames(&mut self, max_frames: u32) -> Option<HostBreak> {
        for _ in 0..max_frames {
            let mut tsc = self.ensure_next_frame_tsc();
            let limit = self.frame_tstates;
            let brk = match self.cpu.execute_with_limit(&mut self.bus, &mut tsc, limit) {
                Ok(()) => None,
                Err(BreakCause::Halt) => {
                    let r_incr = tsc.halt_until(limit, self.cpu.get_pc());
                    self.cpu.add_r(r_incr);
                    None
                }
                Err(BreakCause::WriteIo(brk)) => Some(brk),
                Err(BreakCause::Reti(())) => None,
            };
            self.tsc = tsc;
            if brk.is_some() {
                return brk
            }
        }
        None
    }

    fn start_cpu(&mut self, entry: u16) {
        self.cpu.reset();
        self.cpu.set_pc(entry);
        self.bus.clear_pending_capture();
    }
}

impl MachineInfo for MsxMachine {
    fn generation(&self) -> MsxGeneration {
        self.config.generation
    }

    fn has_turbo(&self) -> bool {
        self.config.has_turbo
    }

    fn is_turbo_enabled(&self) -> bool {
        self.config.has_turbo && self.config.turbo_enabled
    }

    fn turbo_r_cpu(&self) -> TurboRCpu {
        if self.config.generation == MsxGeneration::TurboR {
            self.config.turbo_r_cpu
        }
        else {
            TurboRCpu::Z80
        }
    }

    fn set_turbo_r_cpu(&mut self, cpu: TurboRCpu) {
        if self.config.generation == MsxGeneration::TurboR {
            info!("turbo R CPU: {:?}", cpu);
            self.config.turbo_r_cpu = cpu;
            self.update_timing();
        }
    }
}

impl VideoControl for MsxMachine {
    fn refresh_rate(&self) -> RefreshRate {
        if self.bus.vdp.is_pal() { RefreshRate::Pal } else { RefreshRate::Ntsc }
    }
    /// The new frame length applies from the next frame.
    fn set_refresh_rate(&mut self, rate: RefreshRate) {
        self.bus.vdp.set_pal(rate.is_pal());
    }

    fn arm_vram(&mut self, access: VramAccess, address: u32) {
        self.bus.vdp.set_vram_address(access, address);
    }

    fn save_palette(&mut self) {
        self.saved_palette = Some(*self.bus.vdp.palette());
    }

    fn restore_palette(&mut self) {
        if let Some(palette) = self.saved_palette.take() {
            self.bus.vdp.set_palette(&palette);
        }
    }
}

impl CodeTarget for MsxMachine {
    fn load_code(&mut self, address: u16, code: &[u8]) {
        if let Err(err) = self.bus.memory.load_ram(address, code) {
            error!("loading {} bytes at {:04x}: {}", code.len(), address, err);
        }
    }

    fn map_ram_window(&mut self) {
        // RAM is always selectable
        let _ = self.bus.memory.select_page2(Page2Slot::Ram);
    }

    fn map_code_bank(&mut self, bank: u8) {
        if usize::from(bank) >= self.bus.memory.bank_count() {
            warn!("cartridge bank {} does not exist", bank);
        }
        self.bus.memory.write(ASCII16_PAGE2_SELECT.start, bank);
    }

    fn bank_count(&self) -> usize {
        self.bus.memory.bank_count()
    }
}

impl CaptureRegion for MsxMachine {
    fn begin_captured_region(&mut self) -> CaptureToken {
        self.bus.hook.begin()
    }

    fn end_captured_region(&mut self, token: CaptureToken) -> Option<u16> {
        self.bus.hook.end(token)
    }
}

impl TimedExecution for MsxMachine {
    fn install_hook(&mut self, map: &MemoryMap) {
        let mut saved = [0u8; VECTOR_SIZE];
        for (addr, byte) in (INTERRUPT_VECTOR..).zip(saved.iter_mut()) {
            *byte = self.bus.memory.read(addr);
        }
        if self.saved_vector.is_none() {
            self.saved_vector = Some(saved);
        }
        let [lo, hi] = map.isr.to_le_bytes();
        self.load_code(map.isr, &INTERRUPT_HANDLER[..6]);
        self.load_code(INTERRUPT_VECTOR, &[0xD3, CAPTURE_PORT, 0xC3, lo, hi]);
        self.bus.hook.install();
        self.bus.hook_arm = Some(map.hook_arm);
        debug!("hook installed, handler at {:04x}", map.isr);
    }

    fn restore_hook(&mut self) {
        if let Some(saved) = self.saved_vector.take() {
            self.load_code(INTERRUPT_VECTOR, &saved);
        }
        self.bus.hook_arm = None;
        if !self.bus.hook.restore() {
            warn!("the hook was not installed");
        }
    }

    fn run_captured(&mut self, entry: u16) {
        self.start_cpu(entry);
        match self.execute_frames(MAX_CAPTURE_FRAMES) {
            Some(HostBreak::Captured) => {}
            Some(HostBreak::StreamComplete) => warn!("unexpected stream completion"),
            None => warn!("no frame interrupt was captured in {} frames", MAX_CAPTURE_FRAMES),
        }
    }

    fn run_stream(&mut self, entry: u16) {
        self.start_cpu(entry);
        let start = self.elapsed_tstates();
        match self.execute_frames(MAX_STREAM_FRAMES) {
            Some(HostBreak::StreamComplete) => {
                debug!("stream completed in {} T-states", self.elapsed_tstates() - start);
            }
            Some(HostBreak::Captured) => warn!("unexpected capture during a stream"),
            None => warn!("the stream did not complete in {} frames", MAX_STREAM_FRAMES),
        }
    }

    fn peek(&self, address: u16) -> u8 {
        self.bus.memory.read(address)
    }
}

impl RealTimeClock for MsxMachine {
    fn read_clock(&mut self, reg: u8) -> u8 {
        0xF0 | self.bus.rtc.read_register(reg, self.elapsed_tstates())
    }
}

impl TextOutput for MsxMachine {
    fn print_line(&mut self, line: &str) {
        self.output.push(line.to_string());
    }
}
