/*
    Copyright (C) 2023  The VDPTEST Authors

    This file is part of VDPTEST, a Rust library for measuring MSX VDP I/O timing.

    For the full copyright notice, see the lib.rs file.
*/
//! MSX memory: 64 KiB of RAM and an optional ASCII16 mapper cartridge visible in page 2.
use core::fmt;
use core::ops::Range;
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

/// The size of a single memory page and of a single ASCII16 bank.
pub const PAGE_SIZE: usize = 0x4000;
/// The address range of page 2, where the cartridge banks are mapped.
pub const PAGE2: Range<u16> = 0x8000..0xC000;
/// Writes to this address range select the ASCII16 bank mapped in page 2.
pub const ASCII16_PAGE2_SELECT: Range<u16> = 0x7000..0x7800;
/// The maximum number of banks an ASCII16 mapper can address.
pub const MAX_BANKS: usize = 256;

const MEM_SIZE: usize = 0x10000;

#[non_exhaustive]
#[derive(Debug)]
pub enum MsxMemoryError {
    InvalidBankIndex,
    InvalidRomSize,
    UnsupportedAddressRange,
}

impl std::error::Error for MsxMemoryError {}

impl fmt::Display for MsxMemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MsxMemoryError::InvalidBankIndex => "Memory bank index is out of range",
            MsxMemoryError::InvalidRomSize => "ROM size must be a non-zero multiple of the bank size",
            MsxMemoryError::UnsupportedAddressRange => "Address range is not supported",
        })
    }
}

pub type Result<T> = core::result::Result<T, MsxMemoryError>;

/// What is visible in page 2.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Page2Slot {
    Ram,
    Rom(u8),
}

impl Default for Page2Slot {
    fn default() -> Self {
        Page2Slot::Ram
    }
}

/// The memory of the emulated machine.
///
/// The ASCII16 bank select register is decoded whenever a cartridge is inserted, regardless of the
/// slot selected in page 1.
#[derive(Clone)]
pub struct MsxMemory {
    ram: Box<[u8]>,
    rom: Box<[u8]>,
    page2: Page2Slot,
}

impl Default for MsxMemory {
    fn default() -> Self {
        MsxMemory {
            ram: vec![0; MEM_SIZE].into_boxed_slice(),
            rom: Box::default(),
            page2: Page2Slot::Ram,
        }
    }
}

impl fmt::Debug for MsxMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsxMemory")
         .field("ram", &self.ram.len())
         .field("banks", &self.bank_count())
         .field("page2", &self.page2)
         .finish()
    }
}

impl MsxMemory {
    /// Returns the number of cartridge banks.
    pub fn bank_count(&self) -> usize {
        self.rom.len() / PAGE_SIZE
    }
    /// Replaces the cartridge ROM with `data`. Page 2 is switched to RAM.
    ///
    /// # Errors
    /// The size of `data` must be a non-zero multiple of [PAGE_SIZE] not exceeding [MAX_BANKS] banks.
    pub fn load_rom(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() || data.len() % PAGE_SIZE != 0 || data.len() > MAX_BANKS * PAGE_SIZE {
            return Err(MsxMemoryError::InvalidRomSize)
        }
        self.rom = data.into();
        self.page2 = Page2Slot::Ram;
        Ok(())
    }
    /// Removes the cartridge. Page 2 is switched to RAM.
    pub fn eject_rom(&mut self) {
        self.rom = Box::default();
        self.page2 = Page2Slot::Ram;
    }
    /// Returns what is currently mapped in page 2.
    #[inline]
    pub fn page2(&self) -> Page2Slot {
        self.page2
    }
    /// Returns `true` if a ROM bank is currently mapped in page 2.
    #[inline]
    pub fn is_page2_rom(&self) -> bool {
        self.page2 != Page2Slot::Ram
    }
    /// Maps the given slot in page 2.
    ///
    /// # Errors
    /// Returns [MsxMemoryError::InvalidBankIndex] if the bank does not exist.
    pub fn select_page2(&mut self, slot: Page2Slot) -> Result<()> {
        if let Page2Slot::Rom(bank) = slot {
            if usize::from(bank) >= self.bank_count() {
                return Err(MsxMemoryError::InvalidBankIndex)
            }
        }
        self.page2 = slot;
        Ok(())
    }

    #[inline]
    pub fn read(&self, addr: u16) -> u8 {
        match self.page2 {
            Page2Slot::Rom(bank) if PAGE2.contains(&addr) => {
                self.rom[usize::from(bank) * PAGE_SIZE + usize::from(addr - PAGE2.start)]
            }
            _ => self.ram[usize::from(addr)]
        }
    }

    #[inline]
    pub fn read16(&self, addr: u16) -> u16 {
        u16::from_le_bytes([self.read(addr), self.read(addr.wrapping_add(1))])
    }
    /// Writes a byte as the CPU would do it: ROM is not writable and writes to
    /// [ASCII16_PAGE2_SELECT] switch banks when a cartridge is inserted.
    #[inline]
    pub fn write(&mut self, addr: u16, val: u8) {
        let banks = self.bank_count();
        if banks != 0 && ASCII16_PAGE2_SELECT.contains(&addr) {
            self.page2 = Page2Slot::Rom((usize::from(val) % banks) as u8);
        }
        else if !(self.is_page2_rom() && PAGE2.contains(&addr)) {
            self.ram[usize::from(addr)] = val;
        }
    }
    /// Copies `data` into RAM at `addr` regardless of the current mapping.
    ///
    /// # Errors
    /// Returns [MsxMemoryError::UnsupportedAddressRange] if `data` does not fit below `0x10000`.
    pub fn load_ram(&mut self, addr: u16, data: &[u8]) -> Result<()> {
        let start = usize::from(addr);
        let target = self.ram.get_mut(start..start + data.len())
                             .ok_or(MsxMemoryError::UnsupportedAddressRange)?;
        target.copy_from_slice(data);
        Ok(())
    }
    /// Returns a reference to the whole RAM.
    pub fn ram_ref(&self) -> &[u8] {
        &self.ram
    }
    /// Returns a reference to the cartridge bank.
    ///
    /// # Errors
    /// Returns [MsxMemoryError::InvalidBankIndex] if the bank does not exist.
    pub fn rom_bank_ref(&self, bank: u8) -> Result<&[u8]> {
        let start = usize::from(bank) * PAGE_SIZE;
        self.rom.get(start..start + PAGE_SIZE).ok_or(MsxMemoryError::InvalidBankIndex)
    }
}
