/*
    Copyright (C) 2023  The VDPTEST Authors

    This file is part of VDPTEST, a Rust library for measuring MSX VDP I/O timing.

    For the full copyright notice, see the lib.rs file.
*/
//! The static catalog of measured instruction sequences.
//!
//! Each [TestDescriptor] is plain data. The machine code of a test is produced by its [TestCode]
//! through the [CodeEmitter] interface, so the same descriptor serves both the code generated in
//! RAM and the code pre-built in cartridge banks.
use core::fmt;
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use crate::config::MemoryMap;

/// The maximum length of a test name.
pub const MAX_NAME_LEN: usize = 9;
/// The number of calibration tests leading the catalog.
pub const CALIBRATION_TESTS: usize = 2;
/// The bank of the first test in the banked variant, lower banks hold the program.
pub const TEST_BANK_OFFSET: u8 = 2;

bitflags::bitflags! {
    /// Differential groups a test's deviation contributes to.
    #[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
    #[cfg_attr(feature = "snapshot", serde(from = "u8", into = "u8"))]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct TestGroups: u8 {
        /// Instructions accessing the VDP ports.
        const VDP_IO           = 0b0000_0001;
        /// Instructions accessing a port without any wait states.
        const PLAIN_IO         = 0b0000_0010;
        /// Executed from a bank, without data access.
        const ROM_SEGMENT      = 0b0000_0100;
        /// Executed from RAM, without data access.
        const RAM_SEGMENT      = 0b0000_1000;
        /// Executed from a bank, with diverse bus cycles.
        const ROM_FUNDAMENTAL  = 0b0001_0000;
        /// Executed from RAM, with the fundamental bus cycles.
        const RAM_FUNDAMENTAL  = 0b0010_0000;
        /// Executed from a bank, each with a forced RAM twin.
        const ROM_REFERENCE    = 0b0100_0000;
        /// The forced RAM twins.
        const RAM_REFERENCE    = 0b1000_0000;
    }
}

impl From<u8> for TestGroups {
    fn from(groups: u8) -> Self {
        TestGroups::from_bits_truncate(groups)
    }
}

impl From<TestGroups> for u8 {
    fn from(groups: TestGroups) -> u8 {
        groups.bits()
    }
}

/// Which direction the VDP address pointer must be prepared for before a trial.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VramDirection {
    Write,
    Read,
    NotApplicable,
}

/// The code of a single test.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TestCode {
    /// `NOP`
    Nop,
    /// `INC HL`
    IncHl,
    /// `OUT (0x98),A`
    OutVdpData,
    /// `IN A,(0x98)`
    InVdpData,
    /// `IN A,(0x99)` with the status register S#2 selected.
    InVdpStatus,
    /// `OUT (0x9A),A` in pairs, one palette entry per block.
    OutVdpPalette,
    /// `INC (HL)`
    IncHlIndirect,
    /// `ADC A,(IY+0)`
    AdcIy,
    /// `BIT 0,(IY+0)`
    BitIy,
    /// `CP 0`
    CpN,
    /// `OUTI` on port `0x98`.
    OutiVdpData,
    /// `IN A,(0x06)`
    InPlain,
    /// `INC A`
    IncA,
    /// `CPI`
    Cpi,
}

/// Emits the machine code of a test.
pub trait CodeEmitter {
    /// Returns `true` if the test executes startup code before the unrolled instructions.
    fn has_startup(&self) -> bool;
    /// Appends the startup code to `buf`.
    fn emit_startup(&self, map: &MemoryMap, buf: &mut Vec<u8>);
    /// Appends a single unrolled block to `buf`.
    fn unroll_once(&self, buf: &mut Vec<u8>);
}

const LD_HL_NN: u8 = 0x21;
const LD_C_N: u8 = 0x0E;
const LD_BC_NN: u8 = 0x01;
const LD_A_N: u8 = 0x3E;
const OUT_N_A: u8 = 0xD3;
const XOR_A: u8 = 0xAF;
const IY_PREFIX: u8 = 0xFD;

impl TestCode {
    /// Returns a single unrolled block.
    pub fn unroll_bytes(self) -> &'static [u8] {
        match self {
            TestCode::Nop => &[0x00],
            TestCode::IncHl => &[0x23],
            TestCode::OutVdpData => &[0xD3, 0x98],
            TestCode::InVdpData => &[0xDB, 0x98],
            TestCode::InVdpStatus => &[0xDB, 0x99],
            TestCode::OutVdpPalette => &[0xD3, 0x9A, 0xD3, 0x9A],
            TestCode::IncHlIndirect => &[0x34],
            TestCode::AdcIy => &[0xFD, 0x8E, 0x00],
            TestCode::BitIy => &[0xFD, 0xCB, 0x00, 0x46],
            TestCode::CpN => &[0xFE, 0x00],
            TestCode::OutiVdpData => &[0xED, 0xA3],
            TestCode::InPlain => &[0xDB, 0x06],
            TestCode::IncA => &[0x3C],
            TestCode::Cpi => &[0xED, 0xA1],
        }
    }
}

fn push_u16(buf: &mut Vec<u8>, nn: u16) {
    buf.extend_from_slice(&nn.to_le_bytes());
}

/// Appends code writing `val` to the VDP register `reg`.
fn emit_vdp_register_write(buf: &mut Vec<u8>, reg: u8, val: u8) {
    if val == 0 {
        buf.push(XOR_A);
    }
    else {
        buf.extend_from_slice(&[LD_A_N, val]);
    }
    buf.extend_from_slice(&[OUT_N_A, 0x99, LD_A_N, 0x80 | reg, OUT_N_A, 0x99]);
}

impl CodeEmitter for TestCode {
    fn has_startup(&self) -> bool {
        matches!(self,
            TestCode::InVdpStatus|TestCode::OutVdpPalette|TestCode::IncHlIndirect|
            TestCode::AdcIy|TestCode::BitIy|TestCode::OutiVdpData|TestCode::Cpi)
    }

    fn emit_startup(&self, map: &MemoryMap, buf: &mut Vec<u8>) {
        match self {
            TestCode::InVdpStatus => emit_vdp_register_write(buf, 15, 2),
            TestCode::OutVdpPalette => emit_vdp_register_write(buf, 16, 0),
            TestCode::IncHlIndirect => {
                buf.push(LD_HL_NN);
                push_u16(buf, map.scratch);
            }
            TestCode::AdcIy|TestCode::BitIy => {
                buf.extend_from_slice(&[IY_PREFIX, LD_HL_NN]);
                push_u16(buf, map.scratch);
            }
            TestCode::OutiVdpData => {
                buf.push(LD_HL_NN);
                push_u16(buf, map.scratch);
                buf.extend_from_slice(&[LD_C_N, 0x98]);
            }
            TestCode::Cpi => {
                buf.push(LD_HL_NN);
                push_u16(buf, map.scratch);
                buf.push(LD_BC_NN);
                push_u16(buf, 0);
            }
            _ => {}
        }
    }

    fn unroll_once(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.unroll_bytes());
    }
}

/// Describes one measured instruction sequence.
#[cfg_attr(feature = "snapshot", derive(Serialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct TestDescriptor {
    /// A display label.
    pub name: &'static str,
    pub code: TestCode,
    /// The number of bytes of a single logical instruction in the unrolled block.
    pub single_size: u8,
    pub vram: VramDirection,
    /// The nominal cost of the startup code in CPU cycles.
    pub startup_cost: u32,
    /// The nominal cost of a single logical instruction in CPU cycles.
    pub single_cost: u32,
    /// The test always executes from RAM.
    pub force_fast: bool,
    /// The cartridge bank holding the test in the banked variant.
    pub bank: Option<u8>,
    pub groups: TestGroups,
}

impl TestDescriptor {
    /// Returns the size of the unrolled block in bytes.
    #[inline]
    pub fn block_size(&self) -> u8 {
        self.code.unroll_bytes().len() as u8
    }
    /// Returns the number of logical instructions in the unrolled block.
    #[inline]
    pub fn instructions_per_block(&self) -> u8 {
        self.block_size() / self.single_size
    }
    /// Returns the startup code.
    pub fn startup_code(&self, map: &MemoryMap) -> Vec<u8> {
        let mut buf = Vec::new();
        self.code.emit_startup(map, &mut buf);
        buf
    }
}

/// Returns `true` if the test at `index` of a catalog is one of the calibration tests.
#[inline]
pub fn is_calibration(index: usize) -> bool {
    index < CALIBRATION_TESTS
}

macro_rules! test_descriptor {
    ($name:literal, $code:ident, $single:literal, $vram:ident, $startup:literal, $cost:literal,
     $fast:literal, $bank:expr, $groups:expr) => {
        TestDescriptor {
            name: $name,
            code: TestCode::$code,
            single_size: $single,
            vram: VramDirection::$vram,
            startup_cost: $startup,
            single_cost: $cost,
            force_fast: $fast,
            bank: $bank,
            groups: $groups,
        }
    };
}

const fn bank(n: u8) -> Option<u8> {
    Some(TEST_BANK_OFFSET + n)
}

/// The default catalog. Costs include the `M1` wait state of MSX computers.
pub static TESTS: [TestDescriptor; 18] = [
    test_descriptor!("sync1",     Nop,           1, NotApplicable,  0,  5, true,  None,    TestGroups::RAM_FUNDAMENTAL),
    test_descriptor!("sync2",     IncHl,         1, NotApplicable,  0,  7, true,  None,    TestGroups::RAM_FUNDAMENTAL),
    test_descriptor!("out98",     OutVdpData,    2, Write,          0, 12, false, bank(0), TestGroups::VDP_IO),
    test_descriptor!("in98",      InVdpData,     2, Read,           0, 12, false, bank(1), TestGroups::VDP_IO),
    test_descriptor!("in99",      InVdpStatus,   2, NotApplicable, 40, 12, false, bank(2), TestGroups::VDP_IO),
    test_descriptor!("out9A",     OutVdpPalette, 2, NotApplicable, 37, 12, false, bank(3), TestGroups::VDP_IO),
    test_descriptor!("!inc(hl)",  IncHlIndirect, 1, NotApplicable, 11, 12, false, bank(4), TestGroups::ROM_FUNDAMENTAL),
    test_descriptor!("!adca,iy0", AdcIy,         3, NotApplicable, 16, 21, false, bank(5), TestGroups::ROM_FUNDAMENTAL),
    test_descriptor!("!bit0,iy0", BitIy,         4, NotApplicable, 16, 22, false, bank(6), TestGroups::ROM_FUNDAMENTAL),
    test_descriptor!("!cpn",      CpN,           2, NotApplicable,  0,  8, false, bank(7), TestGroups::ROM_FUNDAMENTAL),
    test_descriptor!("outi98",    OutiVdpData,   2, Write,         19, 18, false, bank(8), TestGroups::ROM_REFERENCE),
    test_descriptor!("outi98RAM", OutiVdpData,   2, Write,         19, 18, true,  None,    TestGroups::RAM_REFERENCE),
    test_descriptor!("!in06",     InPlain,       2, NotApplicable,  0, 12, false, bank(9),
                     TestGroups::PLAIN_IO.union(TestGroups::ROM_REFERENCE)),
    test_descriptor!("!in06RAM",  InPlain,       2, NotApplicable,  0, 12, true,  None,    TestGroups::RAM_REFERENCE),
    test_descriptor!("!inca",     IncA,          1, NotApplicable,  0,  5, false, bank(10), TestGroups::ROM_SEGMENT),
    test_descriptor!("!incaRAM",  IncA,          1, NotApplicable,  0,  5, true,  None,    TestGroups::RAM_SEGMENT),
    test_descriptor!("!cpi",      Cpi,           2, NotApplicable, 22, 18, false, bank(11), TestGroups::ROM_REFERENCE),
    test_descriptor!("!cpiRAM",   Cpi,           2, NotApplicable, 22, 18, true,  None,    TestGroups::RAM_REFERENCE),
];

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The catalog has fewer tests than calibration tests.
    MissingCalibration,
    /// The calibration tests must cost 5 and 7 cycles.
    CalibrationCost(&'static str),
    /// The calibration tests must always run from RAM.
    CalibrationNotForcedFast(&'static str),
    NameTooLong(&'static str),
    /// The single instruction size does not divide the unrolled block.
    InvalidSingleSize(&'static str),
    /// A test that is not forced to RAM has no bank in the banked variant.
    MissingBank(&'static str),
}

impl std::error::Error for CatalogError {}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::MissingCalibration => f.write_str("the calibration tests are missing"),
            CatalogError::CalibrationCost(name) => write!(f,
                "calibration test {} has an unexpected cost", name),
            CatalogError::CalibrationNotForcedFast(name) => write!(f,
                "calibration test {} must run from RAM", name),
            CatalogError::NameTooLong(name) => write!(f,
                "test name {} exceeds {} characters", name, MAX_NAME_LEN),
            CatalogError::InvalidSingleSize(name) => write!(f,
                "test {} has an invalid single instruction size", name),
            CatalogError::MissingBank(name) => write!(f, "test {} has no bank", name),
        }
    }
}

/// Checks the catalog invariants. `banked` requires a bank for every test not forced to RAM.
///
/// # Errors
/// Returns the first violated invariant.
pub fn validate(tests: &[TestDescriptor], banked: bool) -> Result<(), CatalogError> {
    if tests.len() < CALIBRATION_TESTS {
        return Err(CatalogError::MissingCalibration)
    }
    for (test, cost) in tests.iter().zip([5, 7].iter()) {
        if test.single_cost != *cost {
            return Err(CatalogError::CalibrationCost(test.name))
        }
        if !test.force_fast {
            return Err(CatalogError::CalibrationNotForcedFast(test.name))
        }
    }
    for test in tests {
        if test.name.len() > MAX_NAME_LEN {
            return Err(CatalogError::NameTooLong(test.name))
        }
        if test.single_size == 0 || test.block_size() % test.single_size != 0 {
            return Err(CatalogError::InvalidSingleSize(test.name))
        }
        if banked && !test.force_fast && test.bank.is_none() {
            return Err(CatalogError::MissingBank(test.name))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_valid() {
        assert_eq!(validate(&TESTS, true), Ok(()));
        let map = MemoryMap::default();
        for test in TESTS.iter() {
            assert_eq!(test.code.has_startup(), !test.startup_code(&map).is_empty(), "{}", test.name);
            assert_eq!(test.code.has_startup(), test.startup_cost != 0, "{}", test.name);
            assert!(test.instructions_per_block() >= 1);
        }
        let mut banks: Vec<_> = TESTS.iter().filter_map(|t| t.bank).collect();
        let count = banks.len();
        banks.dedup();
        assert_eq!(banks.len(), count);
        assert_eq!(banks[0], TEST_BANK_OFFSET);
    }

    #[test]
    fn catalog_validation_works() {
        assert_eq!(validate(&TESTS[..1], false), Err(CatalogError::MissingCalibration));
        let mut tests = TESTS.to_vec();
        tests.swap(0, 1);
        assert_eq!(validate(&tests, false), Err(CatalogError::CalibrationCost("sync2")));
        let mut tests = TESTS.to_vec();
        tests[1].force_fast = false;
        assert_eq!(validate(&tests, false), Err(CatalogError::CalibrationNotForcedFast("sync2")));
        let mut tests = TESTS.to_vec();
        tests[5].single_size = 3;
        assert_eq!(validate(&tests, false), Err(CatalogError::InvalidSingleSize("out9A")));
        let mut tests = TESTS.to_vec();
        tests[2].bank = None;
        assert_eq!(validate(&tests, false), Ok(()));
        assert_eq!(validate(&tests, true), Err(CatalogError::MissingBank("out98")));
        tests[2].name = "out98slow!";
        assert_eq!(validate(&tests, false), Err(CatalogError::NameTooLong("out98slow!")));
    }

    #[test]
    fn test_code_emits() {
        let map = MemoryMap { scratch: 0xD123, ..MemoryMap::default() };
        let mut buf = Vec::new();
        TestCode::Cpi.emit_startup(&map, &mut buf);
        assert_eq!(buf, [0x21, 0x23, 0xD1, 0x01, 0x00, 0x00]);
        buf.clear();
        TestCode::InVdpStatus.emit_startup(&map, &mut buf);
        assert_eq!(buf, [0x3E, 0x02, 0xD3, 0x99, 0x3E, 0x8F, 0xD3, 0x99]);
        buf.clear();
        TestCode::OutVdpPalette.emit_startup(&map, &mut buf);
        assert_eq!(buf, [0xAF, 0xD3, 0x99, 0x3E, 0x90, 0xD3, 0x99]);
        buf.clear();
        TestCode::BitIy.emit_startup(&map, &mut buf);
        TestCode::BitIy.unroll_once(&mut buf);
        assert_eq!(buf, [0xFD, 0x21, 0x23, 0xD1, 0xFD, 0xCB, 0x00, 0x46]);
        assert_eq!(TESTS[5].instructions_per_block(), 2);
        assert_eq!(TESTS[8].instructions_per_block(), 1);
    }
}
