use core::num::NonZeroU16;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

use crate::z80emu::{Io, Memory};
use crate::clock::{FTs, MsxWaitStates};
use crate::hook::{PcCaptureHook, TickOutcome};
use crate::memory::MsxMemory;
use crate::platform::STREAM_DONE_PORT;
use super::rtc::Rtc;
use super::vdp::Vdp;

/// Writing to this port from the interrupt vector ends a captured run.
pub const CAPTURE_PORT: u8 = 0x2F;
/// The RP5C01 register select port.
pub const RTC_SELECT_PORT: u8 = 0xB4;
/// The RP5C01 data port.
pub const RTC_DATA_PORT: u8 = 0xB5;

/// Why the CPU execution was stopped by the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostBreak {
    /// The frame interrupt was captured.
    Captured,
    /// The stream signalled its completion.
    StreamComplete,
}

/// Everything the CPU can reach: memory, the VDP, the real-time clock and the capture hook.
#[derive(Clone, Debug)]
pub struct MsxBus {
    pub memory: MsxMemory,
    pub vdp: Vdp,
    pub rtc: Rtc,
    pub hook: PcCaptureHook,
    /// Writing a non-zero value to this address arms the hook.
    pub hook_arm: Option<u16>,
    /// The T-states elapsed before the current frame.
    pub clock_base: u64,
    pending_capture: bool,
}

impl MsxBus {
    pub fn new(memory: MsxMemory, vdp: Vdp, rtc: Rtc) -> Self {
        MsxBus {
            memory,
            vdp,
            rtc,
            hook: PcCaptureHook::default(),
            hook_arm: None,
            clock_base: 0,
            pending_capture: false,
        }
    }
    /// Returns the wait-state scheme reflecting the current memory mapping.
    pub fn wait_states(&self, waits: MsxWaitStates) -> MsxWaitStates {
        MsxWaitStates { rom_page2: self.memory.is_page2_rom(), ..waits }
    }
    /// Returns the absolute time for the frame timestamp `ts`.
    #[inline]
    pub fn absolute_ts(&self, ts: FTs) -> u64 {
        (self.clock_base as i64 + i64::from(ts)).max(0) as u64
    }
    /// Discards a capture that was not delivered to the capture port.
    pub fn clear_pending_capture(&mut self) {
        self.pending_capture = false;
    }
}

impl Io for MsxBus {
    type Timestamp = FTs;
    type WrIoBreak = HostBreak;
    type RetiBreak = ();

    #[inline(always)]
    fn is_irq(&mut self, _ts: FTs) -> bool {
        self.vdp.is_irq()
    }

    fn irq_data(&mut self, pc: u16, ts: FTs) -> (u8, Option<NonZeroU16>) {
        if let TickOutcome::Captured(pc) = self.hook.on_tick(pc) {
            trace!("captured at: {:04x} ts: {}", pc, ts);
            self.pending_capture = true;
        }
        (u8::max_value(), None)
    }

    fn read_io(&mut self, port: u16, ts: FTs) -> (u8, Option<NonZeroU16>) {
        let port = port as u8;
        let data = match port {
            0x98..=0x9B => self.vdp.read_port(port),
            RTC_DATA_PORT => self.rtc.read_data(self.absolute_ts(ts)),
            _ => u8::max_value()
        };
        (data, None)
    }

    fn write_io(&mut self, port: u16, data: u8, _ts: FTs) -> (Option<HostBreak>, Option<NonZeroU16>) {
        let port = port as u8;
        match port {
            0x98..=0x9B => self.vdp.write_port(port, data),
            RTC_SELECT_PORT => self.rtc.select_register(data),
            RTC_DATA_PORT => self.rtc.write_data(data),
            CAPTURE_PORT if self.pending_capture => {
                self.pending_capture = false;
                return (Some(HostBreak::Captured), None)
            }
            STREAM_DONE_PORT => return (Some(HostBreak::StreamComplete), None),
            _ => {}
        }
        (None, None)
    }
}

impl Memory for MsxBus {
    type Timestamp = FTs;

    #[inline]
    fn read_debug(&self, addr: u16) -> u8 {
        self.memory.read(addr)
    }

    #[inline]
    fn read_mem(&self, addr: u16, _ts: FTs) -> u8 {
        self.memory.read(addr)
    }

    #[inline]
    fn read_mem16(&self, addr: u16, _ts: FTs) -> u16 {
        self.memory.read16(addr)
    }

    #[inline]
    fn read_opcode(&mut self, pc: u16, _ir: u16, _ts: FTs) -> u8 {
        self.memory.read(pc)
    }

    #[inline]
    fn write_mem(&mut self, addr: u16, val: u8, _ts: FTs) {
        if self.hook_arm == Some(addr) && val != 0 {
            self.hook.arm();
        }
        self.memory.write(addr, val);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> MsxBus {
        MsxBus::new(MsxMemory::default(), Vdp::default(), Rtc::new(0, 10, true))
    }

    #[test]
    fn capture_breaks_at_capture_port() {
        let mut bus = bus();
        bus.hook.install();
        bus.hook_arm = Some(0xC0F1);
        let token = bus.hook.begin();
        assert_eq!(bus.write_io(0x2F, 0, 0), (None, None));
        bus.write_mem(0xC0F1, 0, 0);
        assert!(!bus.hook.is_armed());
        bus.write_mem(0xC0F1, 1, 0);
        assert!(bus.hook.is_armed());
        assert_eq!(bus.memory.read(0xC0F1), 1);
        bus.irq_data(0x8123, 10);
        assert_eq!(bus.write_io(0x2F, 0, 20), (Some(HostBreak::Captured), None));
        assert_eq!(bus.write_io(0x2F, 0, 30), (None, None));
        assert_eq!(bus.hook.end(token), Some(0x8123));
        assert_eq!(bus.write_io(0x122E, 0, 30), (Some(HostBreak::StreamComplete), None));
    }

    #[test]
    fn bus_decodes_ports() {
        let mut bus = bus();
        bus.write_io(0xB4, 13, 0);
        bus.write_io(0xB5, 0x08, 0);
        bus.write_io(0xB4, 0, 0);
        bus.clock_base = 25;
        assert_eq!(bus.read_io(0xB5, 5).0, 0xF3);
        assert_eq!(bus.read_io(0x06, 0).0, 0xFF);
        assert!(!bus.is_irq(0));
        bus.vdp.start_frame();
        assert!(bus.is_irq(0));
        assert_eq!(bus.read_io(0x99, 0).0, 0x80);
        assert!(!bus.is_irq(0));
        let waits = bus.wait_states(MsxWaitStates { rom: 1, ..MsxWaitStates::msx() });
        assert!(!waits.rom_page2);
    }
}
