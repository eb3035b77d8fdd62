/*
    Copyright (C) 2023  The VDPTEST Authors

    This file is part of VDPTEST, a Rust library for measuring MSX VDP I/O timing.

    For the full copyright notice, see the lib.rs file.
*/
//! Machine identification and host timing configurations.
use core::fmt;
use core::str::FromStr;
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use crate::clock::FTs;

/// The number of supported video refresh rates.
pub const REFRESH_RATE_COUNT: usize = 2;
/// The number of supported CPU modes.
pub const CPU_MODE_COUNT: usize = 4;

/// A video refresh rate selected by the VDP.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RefreshRate {
    Ntsc = 0,
    Pal = 1,
}

/// A CPU and its speed mode.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CpuMode {
    /// Z80 at 3.58 MHz.
    Z80 = 0,
    /// Z80 at 5.37 MHz found in some MSX2+ machines.
    Z80Turbo = 1,
    /// R800 of turbo R executing from ROM.
    R800Rom = 2,
    /// R800 of turbo R executing from DRAM.
    R800Dram = 3,
}

/// An MSX standard generation as reported by the BIOS.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MsxGeneration {
    Msx1 = 0,
    Msx2 = 1,
    Msx2Plus = 2,
    TurboR = 3,
}

/// An error returned when parsing machine identifiers from strings or numbers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseChipError(&'static str);

impl std::error::Error for ParseChipError {}

impl fmt::Display for ParseChipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized {}", self.0)
    }
}

impl RefreshRate {
    /// Both refresh rates in the order the benchmark visits them.
    pub const ALL: [RefreshRate; REFRESH_RATE_COUNT] = [RefreshRate::Ntsc, RefreshRate::Pal];
    /// Returns an index suitable for accessing per refresh rate tables.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
    /// Returns the nominal frequency in Hz.
    pub fn hz(self) -> u32 {
        match self {
            RefreshRate::Ntsc => 60,
            RefreshRate::Pal => 50,
        }
    }

    pub fn is_pal(self) -> bool {
        self == RefreshRate::Pal
    }
}

impl fmt::Display for RefreshRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshRate::Ntsc => f.write_str("60 Hz NTSC"),
            RefreshRate::Pal => f.write_str("50 Hz PAL"),
        }
    }
}

impl FromStr for RefreshRate {
    type Err = ParseChipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("ntsc") || s == "60" {
            Ok(RefreshRate::Ntsc)
        }
        else if s.eq_ignore_ascii_case("pal") || s == "50" {
            Ok(RefreshRate::Pal)
        }
        else {
            Err(ParseChipError("refresh rate"))
        }
    }
}

impl CpuMode {
    pub const ALL: [CpuMode; CPU_MODE_COUNT] = [
        CpuMode::Z80, CpuMode::Z80Turbo, CpuMode::R800Rom, CpuMode::R800Dram
    ];
    /// Returns an index suitable for accessing per CPU mode tables.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
    /// Returns `true` for a Z80 turbo mode.
    #[inline]
    pub fn is_turbo(self) -> bool {
        self == CpuMode::Z80Turbo
    }
    /// Returns `true` for both Z80 modes.
    #[inline]
    pub fn is_z80(self) -> bool {
        matches!(self, CpuMode::Z80|CpuMode::Z80Turbo)
    }
}

impl fmt::Display for CpuMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CpuMode::Z80 => "Z80",
            CpuMode::Z80Turbo => "Z80 turbo",
            CpuMode::R800Rom => "R800 ROM",
            CpuMode::R800Dram => "R800 DRAM",
        })
    }
}

impl MsxGeneration {
    /// Returns `true` if the generation has a VDP capable of both refresh rates.
    pub fn is_supported(self) -> bool {
        self >= MsxGeneration::Msx2
    }
}

impl core::convert::TryFrom<u8> for MsxGeneration {
    type Error = ParseChipError;
    /// Converts the MSX version byte found in the BIOS at `0x002D`.
    fn try_from(version: u8) -> Result<Self, Self::Error> {
        Ok(match version {
            0 => MsxGeneration::Msx1,
            1 => MsxGeneration::Msx2,
            2 => MsxGeneration::Msx2Plus,
            3 => MsxGeneration::TurboR,
            _ => return Err(ParseChipError("MSX version"))
        })
    }
}

impl fmt::Display for MsxGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MsxGeneration::Msx1 => "MSX1",
            MsxGeneration::Msx2 => "MSX2",
            MsxGeneration::Msx2Plus => "MSX2+",
            MsxGeneration::TurboR => "MSX turbo R",
        })
    }
}

impl FromStr for MsxGeneration {
    type Err = ParseChipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_start_matches(|c: char| c.is_ascii_alphabetic() && !c.eq_ignore_ascii_case(&'t'));
        if s == "1" {
            Ok(MsxGeneration::Msx1)
        }
        else if s == "2" {
            Ok(MsxGeneration::Msx2)
        }
        else if s == "2+" || s == "2p" {
            Ok(MsxGeneration::Msx2Plus)
        }
        else if s.eq_ignore_ascii_case("tr") || s.eq_ignore_ascii_case("turbor") {
            Ok(MsxGeneration::TurboR)
        }
        else {
            Err(ParseChipError("MSX generation"))
        }
    }
}

/// A trait for declaring host timing constants of an emulated machine.
pub trait HostConfig {
    /// The number of CPU cycles (T-states) per second.
    const CPU_HZ: u32;
    /// The number of CPU cycles (T-states) in a single 60 Hz frame.
    const FRAME_TSTATES_NTSC: FTs;
    /// The number of CPU cycles (T-states) in a single 50 Hz frame.
    const FRAME_TSTATES_PAL: FTs;
    /// Returns the number of CPU cycles in a single frame at the given refresh rate.
    #[inline]
    fn frame_tstates(rate: RefreshRate) -> FTs {
        match rate {
            RefreshRate::Ntsc => Self::FRAME_TSTATES_NTSC,
            RefreshRate::Pal => Self::FRAME_TSTATES_PAL,
        }
    }
}

/// The host configuration of an MSX2 machine with the Z80 clocked at 3.58 MHz.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct Msx2Config;

/// The host configuration of an MSX2+ machine with the Z80 in a 5.37 MHz turbo mode.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct Msx2TurboConfig;

impl HostConfig for Msx2Config {
    const CPU_HZ: u32 = 3_579_545;
    const FRAME_TSTATES_NTSC: FTs = 262 * 228;
    const FRAME_TSTATES_PAL: FTs = 313 * 228;
}

impl HostConfig for Msx2TurboConfig {
    const CPU_HZ: u32 = Msx2Config::CPU_HZ * 3 / 2;
    const FRAME_TSTATES_NTSC: FTs = Msx2Config::FRAME_TSTATES_NTSC * 3 / 2;
    const FRAME_TSTATES_PAL: FTs = Msx2Config::FRAME_TSTATES_PAL * 3 / 2;
}

/// Returns `(cpu_hz, frame_tstates)` of the Z80 in the given `mode` and the refresh `rate`.
///
/// R800 modes are timed like a Z80, as no R800 core is emulated.
pub fn host_timing(mode: CpuMode, rate: RefreshRate) -> (u32, FTs) {
    if mode.is_turbo() {
        (Msx2TurboConfig::CPU_HZ, Msx2TurboConfig::frame_tstates(rate))
    }
    else {
        (Msx2Config::CPU_HZ, Msx2Config::frame_tstates(rate))
    }
}
