/*
    Copyright (C) 2023  The VDPTEST Authors

    This file is part of VDPTEST, a Rust library for measuring MSX VDP I/O timing.

    For the full copyright notice, see the lib.rs file.
*/
//! Test code materialization.
//!
//! The code of a test occupies the whole window:
//!
//! ```text
//! window_base: [startup][block][block]...[block][tail]
//!                       ^ unroll_base              ^ tail_address
//! ```
//!
//! The tail increments the extra rounds counter and jumps back to `unroll_base`, so a frame outlasting
//! a single pass keeps executing the same instructions.
#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use crate::catalog::{CodeEmitter, TestDescriptor};
use crate::config::{BuildVariant, ConfigError, MemoryMap};
use crate::memory::PAGE_SIZE;
use crate::platform::CodeTarget;

/// The size of the tail sequence in bytes.
pub const TAIL_SIZE: usize = 9;
/// The byte filling unused ROM areas.
pub const ROM_FILL: u8 = 0xFF;

/// Where the materialized code resides.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodeSource {
    Ram,
    Bank(u8),
}

/// The geometry of a materialized test.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Materialized {
    /// The address the preamble jumps to.
    pub entry: u16,
    /// The address of the first unrolled block.
    pub unroll_base: u16,
    /// The number of unrolled blocks.
    pub blocks: u16,
    pub block_size: u8,
    pub single_size: u8,
    pub source: CodeSource,
}

impl Materialized {
    /// Returns the number of bytes of a single pass over the unrolled blocks.
    #[inline]
    pub fn pass_bytes(&self) -> u32 {
        u32::from(self.blocks) * u32::from(self.block_size)
    }
    /// Returns the number of logical instructions executed in a single pass.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.pass_bytes() / u32::from(self.single_size)
    }
    /// Returns the address of the tail sequence.
    #[inline]
    pub fn tail_address(&self) -> u16 {
        self.unroll_base.wrapping_add(self.pass_bytes() as u16)
    }
}

/// Provides executable code of tests.
pub trait TestCodeProvider {
    /// Makes the code of `test` available to the CPU in the test code window.
    fn provide(&self, test: &TestDescriptor, target: &mut dyn CodeTarget) -> Materialized;
}

/// Appends the tail sequence: `PUSH HL; LD HL,extra_rounds; INC (HL); POP HL; JP unroll_base`.
pub fn emit_tail(map: &MemoryMap, unroll_base: u16, buf: &mut Vec<u8>) {
    buf.push(0xE5);
    buf.push(0x21);
    buf.extend_from_slice(&map.extra_rounds.to_le_bytes());
    buf.push(0x34);
    buf.push(0xE1);
    buf.push(0xC3);
    buf.extend_from_slice(&unroll_base.to_le_bytes());
}

/// Returns the maximum number of blocks of `test` fitting in the window.
pub fn max_blocks(test: &TestDescriptor, map: &MemoryMap) -> u16 {
    let startup = test.startup_code(map).len();
    let room = usize::from(map.window_size).saturating_sub(startup + TAIL_SIZE);
    (room / usize::from(test.block_size())) as u16
}

/// Checks that the startup code, the tail and at least one block of every test fit in the window.
///
/// # Errors
/// Returns [ConfigError::InvalidWindow] if the window is too small for any of the `tests`.
pub fn check_window(tests: &[TestDescriptor], map: &MemoryMap) -> Result<(), ConfigError> {
    match tests.iter().find(|test| max_blocks(test, map) == 0) {
        Some(test) => {
            error!("the code of {} does not fit in {} bytes", test.name, map.window_size);
            Err(ConfigError::InvalidWindow)
        }
        None => Ok(())
    }
}

/// Returns the first test executed from a cartridge bank not present in the `target` with its bank.
pub fn find_missing_bank(tests: &[TestDescriptor], target: &dyn CodeTarget) -> Option<(&'static str, u8)> {
    let count = target.bank_count();
    tests.iter()
         .filter(|test| !test.force_fast)
         .find_map(|test| test.bank.filter(|&bank| usize::from(bank) >= count)
                                   .map(|bank| (test.name, bank)))
}

/// Returns the geometry of `test` materialized with the given number of `blocks` or filling the
/// whole window.
///
/// # Panics
/// Panics if the requested number of blocks does not fit in the window.
pub fn layout(test: &TestDescriptor, map: &MemoryMap, blocks: Option<u16>, source: CodeSource) -> Materialized {
    let max = max_blocks(test, map);
    let blocks = match blocks {
        Some(blocks) if blocks > max => panic!(
            "{} blocks of the test {} overflow the code window, {} blocks fit", blocks, test.name, max),
        Some(blocks) => blocks,
        None => max
    };
    let startup = test.startup_code(map).len() as u16;
    Materialized {
        entry: map.window_base,
        unroll_base: map.window_base + startup,
        blocks,
        block_size: test.block_size(),
        single_size: test.single_size,
        source,
    }
}

/// Builds the code image of `test` to be placed at the window base.
///
/// # Panics
/// Panics if the requested number of blocks does not fit in the window.
pub fn build_test_image(
        test: &TestDescriptor,
        map: &MemoryMap,
        blocks: Option<u16>,
        source: CodeSource
    ) -> (Materialized, Vec<u8>)
{
    let geometry = layout(test, map, blocks, source);
    let mut code = Vec::with_capacity(usize::from(map.window_size));
    test.code.emit_startup(map, &mut code);
    for _ in 0..geometry.blocks {
        test.code.unroll_once(&mut code);
    }
    emit_tail(map, geometry.unroll_base, &mut code);
    debug_assert_eq!(code.len(), geometry.tail_address() as usize - map.window_base as usize + TAIL_SIZE);
    (geometry, code)
}

/// Builds the cartridge image holding every test with a bank in its bank.
///
/// Banks below the first test bank and unused areas are filled with [ROM_FILL].
pub fn build_rom_image(tests: &[TestDescriptor], map: &MemoryMap) -> Vec<u8> {
    let banks = tests.iter().filter_map(|t| t.bank).max().map_or(0, |b| usize::from(b) + 1);
    let mut rom = vec![ROM_FILL; banks * PAGE_SIZE];
    for test in tests {
        if let Some(bank) = test.bank {
            let (_, code) = build_test_image(test, map, None, CodeSource::Bank(bank));
            let start = usize::from(bank) * PAGE_SIZE;
            rom[start..start + code.len()].copy_from_slice(&code);
        }
    }
    debug!("ROM image: {} banks", banks);
    rom
}

/// Generates test code in RAM.
#[derive(Clone, Debug, Default)]
pub struct DirectProvider {
    map: MemoryMap,
    blocks: Option<u16>,
}

impl DirectProvider {
    /// Creates a new provider generating the given number of `blocks` or filling the whole window.
    pub fn new(map: MemoryMap, blocks: Option<u16>) -> Self {
        DirectProvider { map, blocks }
    }
}

impl TestCodeProvider for DirectProvider {
    fn provide(&self, test: &TestDescriptor, target: &mut dyn CodeTarget) -> Materialized {
        let (geometry, code) = build_test_image(test, &self.map, self.blocks, CodeSource::Ram);
        target.map_ram_window();
        target.load_code(self.map.window_base, &code);
        trace!("{}: {} bytes in RAM", test.name, code.len());
        geometry
    }
}

/// Selects pre-built cartridge banks, falls back to RAM for tests forced to run from RAM.
#[derive(Clone, Debug, Default)]
pub struct BankedProvider {
    direct: DirectProvider,
}

impl BankedProvider {
    pub fn new(map: MemoryMap, blocks: Option<u16>) -> Self {
        BankedProvider { direct: DirectProvider::new(map, blocks) }
    }
}

impl TestCodeProvider for BankedProvider {
    fn provide(&self, test: &TestDescriptor, target: &mut dyn CodeTarget) -> Materialized {
        match test.bank {
            Some(bank) if !test.force_fast => {
                target.map_code_bank(bank);
                trace!("{}: bank {}", test.name, bank);
                layout(test, &self.direct.map, None, CodeSource::Bank(bank))
            }
            _ => self.direct.provide(test, target)
        }
    }
}

/// Returns the provider of the build `variant`.
pub fn provider_for(variant: BuildVariant, map: MemoryMap, blocks: Option<u16>) -> Box<dyn TestCodeProvider> {
    match variant {
        BuildVariant::Direct => Box::new(DirectProvider::new(map, blocks)),
        BuildVariant::Banked => Box::new(BankedProvider::new(map, blocks)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TESTS;

    #[derive(Default)]
    struct Recorder {
        ram: Vec<(u16, Vec<u8>)>,
        bank: Option<u8>,
        banks: usize,
    }

    impl CodeTarget for Recorder {
        fn load_code(&mut self, address: u16, code: &[u8]) {
            self.ram.push((address, code.to_vec()));
        }
        fn map_ram_window(&mut self) {
            self.bank = None;
        }
        fn map_code_bank(&mut self, bank: u8) {
            self.bank = Some(bank);
        }
        fn bank_count(&self) -> usize {
            self.banks
        }
    }

    fn test_named(name: &str) -> &'static TestDescriptor {
        TESTS.iter().find(|t| t.name == name).unwrap()
    }

    #[test]
    fn direct_provider_fills_window() {
        let map = MemoryMap::default();
        let provider = DirectProvider::new(map, None);
        let mut target = Recorder::default();
        let test = test_named("outi98");
        let code = provider.provide(test, &mut target);
        assert_eq!(code.entry, 0x8000);
        assert_eq!(code.unroll_base, 0x8005);
        assert_eq!(code.blocks, (0x4000 - 5 - 9) / 2);
        assert_eq!(code.capacity(), u32::from(code.blocks));
        assert_eq!(code.source, CodeSource::Ram);
        let (addr, bytes) = &target.ram[0];
        assert_eq!(*addr, 0x8000);
        assert_eq!(bytes.len(), 0x4000);
        assert_eq!(&bytes[..7], &[0x21, 0x00, 0xD0, 0x0E, 0x98, 0xED, 0xA3]);
        let tail = code.tail_address() as usize - 0x8000;
        assert_eq!(&bytes[tail..], &[0xE5, 0x21, 0xF0, 0xC0, 0x34, 0xE1, 0xC3, 0x05, 0x80]);
    }

    #[test]
    fn direct_provider_limits_blocks() {
        let provider = DirectProvider::new(MemoryMap::default(), Some(100));
        let mut target = Recorder::default();
        let code = provider.provide(test_named("out9A"), &mut target);
        assert_eq!(code.blocks, 100);
        assert_eq!(code.capacity(), 200);
        assert_eq!(target.ram[0].1.len(), 7 + 400 + TAIL_SIZE);
    }

    #[test]
    #[should_panic(expected = "overflow the code window")]
    fn direct_provider_traps_overflow() {
        let provider = DirectProvider::new(MemoryMap::default(), Some(0x2000));
        let mut target = Recorder::default();
        provider.provide(test_named("!cpn"), &mut target);
    }

    #[test]
    fn banked_provider_selects_banks() {
        let map = MemoryMap::default();
        let provider = provider_for(BuildVariant::Banked, map, None);
        let mut target = Recorder::default();
        let code = provider.provide(test_named("!in06"), &mut target);
        assert_eq!(target.bank, Some(11));
        assert!(target.ram.is_empty());
        assert_eq!(code.source, CodeSource::Bank(11));
        assert_eq!(code.unroll_base, 0x8000);
        let code = provider.provide(test_named("!in06RAM"), &mut target);
        assert_eq!(target.bank, None);
        assert_eq!(target.ram.len(), 1);
        assert_eq!(code.source, CodeSource::Ram);
        let code = provider.provide(&TESTS[0], &mut target);
        assert_eq!(code.source, CodeSource::Ram);
    }

    #[test]
    fn rom_image_matches_layout() {
        let map = MemoryMap::default();
        let rom = build_rom_image(&TESTS, &map);
        assert_eq!(rom.len(), 14 * PAGE_SIZE);
        assert!(rom[..2 * PAGE_SIZE].iter().all(|&b| b == ROM_FILL));
        for test in TESTS.iter().filter(|t| t.bank.is_some()) {
            let bank = test.bank.unwrap();
            let (geometry, code) = build_test_image(test, &map, None, CodeSource::Bank(bank));
            let start = usize::from(bank) * PAGE_SIZE;
            assert_eq!(&rom[start..start + code.len()], &code[..]);
            assert_eq!(geometry, layout(test, &map, None, CodeSource::Bank(bank)));
        }
    }

    #[test]
    fn window_must_hold_every_test() {
        let map = MemoryMap::default();
        assert_eq!(check_window(&TESTS, &map), Ok(()));
        // out9A: 7 bytes of startup, a 4 byte block and the tail
        let map = MemoryMap { window_size: 20, ..map };
        assert_eq!(check_window(&TESTS, &map), Ok(()));
        let map = MemoryMap { window_size: 19, ..map };
        assert_eq!(max_blocks(test_named("out9A"), &map), 0);
        assert_eq!(max_blocks(test_named("in99"), &map), 1);
        assert_eq!(check_window(&TESTS, &map), Err(ConfigError::InvalidWindow));
    }

    #[test]
    fn missing_banks_are_found() {
        let mut target = Recorder::default();
        assert_eq!(find_missing_bank(&TESTS, &target), Some(("out98", 2)));
        target.banks = 13;
        assert_eq!(find_missing_bank(&TESTS, &target), Some(("!cpi", 13)));
        target.banks = 14;
        assert_eq!(find_missing_bank(&TESTS, &target), None);
        // tests forced to RAM never need a bank
        assert_eq!(find_missing_bank(&TESTS[..2], &Recorder::default()), None);
    }
}
