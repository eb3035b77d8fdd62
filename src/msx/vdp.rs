use core::fmt;

use crate::platform::VramAccess;

/// The size of the video memory.
pub const VRAM_SIZE: usize = 0x2_0000;
/// The number of palette entries.
pub const PALETTE_SIZE: usize = 16;
/// The number of control registers.
pub const NUM_REGISTERS: usize = 47;
/// The number of status registers.
pub const NUM_STATUS: usize = 10;

const VRAM_MASK: u32 = VRAM_SIZE as u32 - 1;
/// R#1: the frame interrupt enable bit.
const R1_IE0: u8 = 0x20;
/// R#9: the 50 Hz refresh bit.
const R9_PAL: u8 = 0x02;
/// R#17: auto increment disable bit.
const R17_AII: u8 = 0x80;
/// S#0: the frame interrupt flag.
const S0_F: u8 = 0x80;
/// S#2 bits reported by an idle VDP: the transfer ready and the fixed bits.
const S2_IDLE: u8 = 0x8C;

/// The default MSX2 palette in `0bGGG_0RRR_0BBB` format.
pub const DEFAULT_PALETTE: [u16; PALETTE_SIZE] = [
    0x000, 0x000, 0x611, 0x733, 0x117, 0x327, 0x151, 0x627,
    0x171, 0x373, 0x661, 0x664, 0x411, 0x265, 0x555, 0x777,
];

/// A V9938 video display processor reduced to its CPU interface.
///
/// Nothing is rendered. The chip keeps the state observable by the CPU: video memory with the
/// read-ahead latch, control and status registers, the palette and the frame interrupt flag.
#[derive(Clone)]
pub struct Vdp {
    vram: Box<[u8]>,
    regs: [u8; NUM_REGISTERS],
    address: u32,
    read_ahead: u8,
    latch: Option<u8>,
    palette: [u16; PALETTE_SIZE],
    palette_latch: Option<u8>,
    frame_flag: bool,
}

fn new_vram() -> Box<[u8]> {
    vec![0; VRAM_SIZE].into_boxed_slice()
}

impl Default for Vdp {
    fn default() -> Self {
        let mut regs = [0; NUM_REGISTERS];
        regs[1] = 0x40 | R1_IE0;
        Vdp {
            vram: new_vram(),
            regs,
            address: 0,
            read_ahead: 0,
            latch: None,
            palette: DEFAULT_PALETTE,
            palette_latch: None,
            frame_flag: false,
        }
    }
}

impl fmt::Debug for Vdp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vdp")
         .field("regs", &&self.regs[..])
         .field("address", &self.address)
         .field("latch", &self.latch)
         .field("frame_flag", &self.frame_flag)
         .finish()
    }
}

impl Vdp {
    /// Returns `true` if the VDP outputs 50 Hz frames.
    #[inline]
    pub fn is_pal(&self) -> bool {
        self.regs[9] & R9_PAL != 0
    }

    pub fn set_pal(&mut self, pal: bool) {
        if pal {
            self.regs[9] |= R9_PAL;
        }
        else {
            self.regs[9] &= !R9_PAL;
        }
    }
    /// Signals the start of a new frame.
    #[inline]
    pub fn start_frame(&mut self) {
        self.frame_flag = true;
    }
    /// Returns `true` while the interrupt line is asserted.
    #[inline]
    pub fn is_irq(&self) -> bool {
        self.frame_flag && self.regs[1] & R1_IE0 != 0
    }

    #[inline]
    pub fn register(&self, reg: u8) -> u8 {
        self.regs.get(usize::from(reg)).copied().unwrap_or(0xFF)
    }

    pub fn vram_address(&self) -> u32 {
        self.address
    }

    pub fn vram_ref(&self) -> &[u8] {
        &self.vram
    }

    pub fn palette(&self) -> &[u16; PALETTE_SIZE] {
        &self.palette
    }

    pub fn set_palette(&mut self, palette: &[u16; PALETTE_SIZE]) {
        self.palette = *palette;
    }
    /// Arms the address pointer for reading or writing as the BIOS `SETRD`/`SETWRT` routines do.
    pub fn set_vram_address(&mut self, access: VramAccess, address: u32) {
        self.latch = None;
        self.regs[14] = (address >> 14) as u8 & 7;
        self.address = address & VRAM_MASK;
        if access == VramAccess::Read {
            self.prefetch();
        }
    }
    /// Handles a write to one of the ports `0x98..=0x9B`.
    pub fn write_port(&mut self, port: u8, data: u8) {
        match port & 3 {
            0 => self.write_data(data),
            1 => self.write_control(data),
            2 => self.write_palette(data),
            _ => self.write_indirect(data),
        }
    }
    /// Handles a read from one of the ports `0x98..=0x9B`.
    pub fn read_port(&mut self, port: u8) -> u8 {
        match port & 3 {
            0 => self.read_data(),
            1 => self.read_status(),
            _ => 0xFF
        }
    }

    fn prefetch(&mut self) {
        self.read_ahead = self.vram[self.address as usize];
        self.address = (self.address + 1) & VRAM_MASK;
    }

    fn write_data(&mut self, data: u8) {
        self.latch = None;
        self.vram[self.address as usize] = data;
        self.read_ahead = data;
        self.address = (self.address + 1) & VRAM_MASK;
    }

    fn read_data(&mut self) -> u8 {
        self.latch = None;
        let data = self.read_ahead;
        self.prefetch();
        data
    }

    fn write_control(&mut self, data: u8) {
        match self.latch.take() {
            None => self.latch = Some(data),
            Some(value) if data & 0x80 != 0 => self.write_register(data & 0x3F, value),
            Some(low) => {
                self.address = u32::from(self.regs[14] & 7) << 14
                             | u32::from(data & 0x3F) << 8
                             | u32::from(low);
                if data & 0x40 == 0 {
                    self.prefetch();
                }
            }
        }
    }

    fn write_register(&mut self, reg: u8, value: u8) {
        match self.regs.get_mut(usize::from(reg)) {
            Some(r) => *r = value,
            None => return
        }
        if reg == 16 {
            self.palette_latch = None;
        }
    }

    fn write_indirect(&mut self, data: u8) {
        let r17 = self.regs[17];
        let reg = r17 & 0x3F;
        if reg != 17 {
            self.write_register(reg, data);
        }
        if r17 & R17_AII == 0 {
            self.regs[17] = r17 & R17_AII | (reg + 1) & 0x3F;
        }
    }

    fn write_palette(&mut self, data: u8) {
        match self.palette_latch.take() {
            None => self.palette_latch = Some(data),
            Some(red_blue) => {
                let index = usize::from(self.regs[16] & 0x0F);
                self.palette[index] = u16::from(data & 7) << 8
                                    | u16::from(red_blue & 0x70)
                                    | u16::from(red_blue & 7);
                self.regs[16] = (self.regs[16] + 1) & 0x0F;
            }
        }
    }

    fn read_status(&mut self) -> u8 {
        self.latch = None;
        match self.regs[15] & 0x0F {
            0 => {
                let flag = if self.frame_flag { S0_F } else { 0 };
                self.frame_flag = false;
                flag
            }
            2 => S2_IDLE,
            n if usize::from(n) < NUM_STATUS => 0,
            _ => 0xFF
        }
    }
}
