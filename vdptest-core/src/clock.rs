/*
    Copyright (C) 2023  The VDPTEST Authors

    This file is part of VDPTEST, a Rust library for measuring MSX VDP I/O timing.

    For the full copyright notice, see the lib.rs file.
*/
//! T-state timestamp types and counters with the MSX bus wait-state insertion.
use core::fmt::Debug;
use core::num::{NonZeroU8, NonZeroU16, Wrapping};

use z80emu::{Clock, host::cycles::*};
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

/// A linear T-state timestamp type.
pub type FTs = i32;

/// The first VDP I/O port.
pub const VDP_PORT_FIRST: u8 = 0x98;
/// The last VDP I/O port.
pub const VDP_PORT_LAST: u8 = 0x9B;

/// A trait used by [MsxTsCounter] for determining the number of wait states inserted by the bus.
pub trait WaitStates: Copy + Debug {
    /// Wait states added to an opcode fetch (`M1`) cycle from the given `address`.
    fn m1_wait(self, address: u16) -> u8;
    /// Wait states added to a memory read or write cycle at the given `address`.
    fn mreq_wait(self, address: u16) -> u8;
    /// Wait states added to an I/O cycle on the given `port`.
    fn io_wait(self, port: u16) -> u8;
    /// Wait states added to the interrupt acknowledge cycle.
    fn ack_wait(self) -> u8;
}

/// The MSX wait-state scheme.
///
/// Every `M1` cycle is extended by [MsxWaitStates::m1] wait states (one on all MSX models).
/// The remaining fields introduce additional waits for the purpose of emulating machines with
/// slower VDP access or slower cartridge memory.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Hash)]
pub struct MsxWaitStates {
    /// Wait states of every opcode fetch and interrupt acknowledge.
    pub m1: u8,
    /// Extra wait states of the VDP ports `0x98..=0x9B`.
    pub vdp_io: u8,
    /// Extra wait states of all the other ports.
    pub io: u8,
    /// Extra wait states of every memory access in page 2 when a ROM bank is mapped there.
    pub rom: u8,
    /// Set when page 2 (`0x8000..0xC000`) is mapped to a ROM bank.
    pub rom_page2: bool,
}

impl MsxWaitStates {
    /// Returns the wait-state scheme of a standard MSX computer.
    pub const fn msx() -> Self {
        MsxWaitStates { m1: 1, vdp_io: 0, io: 0, rom: 0, rom_page2: false }
    }
    /// Returns `true` if `port` addresses the VDP.
    #[inline]
    pub fn is_vdp_port(port: u16) -> bool {
        (VDP_PORT_FIRST..=VDP_PORT_LAST).contains(&(port as u8))
    }

    #[inline]
    fn rom_wait(self, address: u16) -> u8 {
        if self.rom_page2 && address & 0xC000 == 0x8000 {
            self.rom
        }
        else {
            0
        }
    }
}

impl WaitStates for MsxWaitStates {
    #[inline]
    fn m1_wait(self, address: u16) -> u8 {
        self.m1 + self.rom_wait(address)
    }
    #[inline]
    fn mreq_wait(self, address: u16) -> u8 {
        self.rom_wait(address)
    }
    #[inline]
    fn io_wait(self, port: u16) -> u8 {
        if MsxWaitStates::is_vdp_port(port) { self.vdp_io } else { self.io }
    }
    #[inline]
    fn ack_wait(self) -> u8 {
        self.m1
    }
}

/// A linear T-states counter implementing [Clock] with wait states determined by `W:` [WaitStates].
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct MsxTsCounter<W> {
    /// The current value of this counter.
    pub tsc: Wrapping<FTs>,
    /// An instance implementing a [WaitStates] trait.
    pub waits: W,
}

impl<W: WaitStates> MsxTsCounter<W> {
    /// Creates a new counter from the given T-states and the wait-state scheme.
    pub fn new(ts: FTs, waits: W) -> Self {
        MsxTsCounter { tsc: Wrapping(ts), waits }
    }
    /// Returns the number of T-states one halted `NOP` cycle takes when `pc` addresses the `HALT`.
    #[inline]
    pub fn halt_cycle_ts(&self, pc: u16) -> FTs {
        M1_CYCLE_TS as FTs + self.waits.m1_wait(pc) as FTs
    }
    /// Emulates the halted CPU state until the counter reaches the `limit`.
    ///
    /// The counter is set to the `limit`, so the frame interrupt is accepted right at the start of
    /// the next frame. Returns the number of halted cycles, rounded up, which is also the number the
    /// `R` register should be increased by.
    pub fn halt_until(&mut self, limit: FTs, pc: u16) -> i32 {
        let ts = self.tsc.0;
        if ts >= limit {
            return 0
        }
        let cycle = self.halt_cycle_ts(pc);
        let count = (limit - ts + cycle - 1) / cycle;
        self.tsc = Wrapping(limit);
        count
    }
}

impl<W: WaitStates> Clock for MsxTsCounter<W> {
    type Limit = FTs;
    type Timestamp = FTs;

    #[inline]
    fn is_past_limit(&self, limit: Self::Limit) -> bool {
        self.tsc.0 >= limit
    }

    #[inline]
    fn add_irq(&mut self, _pc: u16) -> FTs {
        let ts = (self.tsc + Wrapping(INT_IORQ_LOW_TS as FTs)).0;
        self.tsc += Wrapping(IRQ_ACK_CYCLE_TS as FTs + self.waits.ack_wait() as FTs);
        ts
    }

    #[inline]
    fn add_no_mreq(&mut self, _address: u16, add_ts: NonZeroU8) {
        self.tsc += Wrapping(add_ts.get() as FTs);
    }

    #[inline]
    fn add_m1(&mut self, address: u16) -> FTs {
        self.tsc += Wrapping(M1_CYCLE_TS as FTs + self.waits.m1_wait(address) as FTs);
        self.tsc.0
    }

    #[inline]
    fn add_mreq(&mut self, address: u16) -> FTs {
        self.tsc += Wrapping(MEMRW_CYCLE_TS as FTs + self.waits.mreq_wait(address) as FTs);
        self.tsc.0
    }

    #[inline]
    fn add_io(&mut self, port: u16) -> FTs {
        let ts = (self.tsc + Wrapping(IO_IORQ_LOW_TS as FTs)).0;
        self.tsc += Wrapping(IO_CYCLE_TS as FTs + self.waits.io_wait(port) as FTs);
        ts
    }

    #[inline]
    fn add_wait_states(&mut self, _bus: u16, wait_states: NonZeroU16) {
        self.tsc += Wrapping(wait_states.get() as FTs);
    }

    #[inline]
    fn as_timestamp(&self) -> FTs {
        self.tsc.0
    }
}
