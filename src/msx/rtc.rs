/// The register holding the block selection and the timer enable bit.
const MODE_REGISTER: u8 = 13;
/// The timer enable bit of the mode register.
const MODE_TIMER_ENABLE: u8 = 0x08;

/// An RP5C01 real-time clock reduced to the time of day registers of block 0.
///
/// The time is derived from the number of T-states elapsed since the machine was created, so the
/// clock advances with the emulation and not with the host time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rtc {
    select: u8,
    mode: u8,
    running: bool,
    start_seconds: u32,
    tstates_per_second: u64,
}

impl Rtc {
    /// Creates a clock starting at `start_seconds` past midnight.
    ///
    /// The clock advances by one second every `tstates_per_second` T-states if `running` is `true`.
    pub fn new(start_seconds: u32, tstates_per_second: u64, running: bool) -> Self {
        Rtc {
            select: 0,
            mode: MODE_TIMER_ENABLE,
            running,
            start_seconds,
            tstates_per_second: tstates_per_second.max(1),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_tstates_per_second(&mut self, tstates_per_second: u64) {
        self.tstates_per_second = tstates_per_second.max(1);
    }
    /// Returns the number of seconds past midnight at the absolute time `now` in T-states.
    pub fn seconds(&self, now: u64) -> u32 {
        let elapsed = if self.running && self.mode & MODE_TIMER_ENABLE != 0 {
            (now / self.tstates_per_second) as u32
        }
        else {
            0
        };
        (self.start_seconds + elapsed) % 86400
    }
    /// Handles a write to the register select port `0xB4`.
    pub fn select_register(&mut self, data: u8) {
        self.select = data & 0x0F;
    }
    /// Handles a write to the data port `0xB5`.
    pub fn write_data(&mut self, data: u8) {
        if self.select == MODE_REGISTER {
            self.mode = data & 0x0F;
        }
    }
    /// Handles a read from the data port `0xB5` at the absolute time `now`.
    pub fn read_data(&self, now: u64) -> u8 {
        0xF0 | self.read_register(self.select, now)
    }
    /// Returns the BCD digit of the register `reg` of block 0.
    pub fn read_register(&self, reg: u8, now: u64) -> u8 {
        if reg == MODE_REGISTER {
            return self.mode
        }
        if self.mode & 3 != 0 {
            return 0x0F
        }
        let seconds = self.seconds(now);
        let (hours, minutes, seconds) = (seconds / 3600, seconds / 60 % 60, seconds % 60);
        let digit = match reg {
            0 => seconds % 10,
            1 => seconds / 10,
            2 => minutes % 10,
            3 => minutes / 10,
            4 => hours % 10,
            5 => hours / 10,
            _ => 0
        };
        digit as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtc_counts_seconds() {
        let mut rtc = Rtc::new(13 * 3600 + 59 * 60 + 58, 100, true);
        let digits = |rtc: &Rtc, now| -> Vec<u8> { (0..6).map(|r| rtc.read_register(r, now)).collect() };
        assert_eq!(digits(&rtc, 99), [8, 5, 9, 5, 3, 1]);
        assert_eq!(digits(&rtc, 250), [0, 0, 0, 0, 4, 1]);
        rtc.select_register(1);
        assert_eq!(rtc.read_data(99), 0xF5);
        // block 1 does not hold the time
        rtc.select_register(13);
        rtc.write_data(1 | MODE_TIMER_ENABLE);
        assert_eq!(rtc.read_data(0), 0xF9);
        assert_eq!(rtc.read_register(0, 0), 0x0F);
        // the timer is stopped
        rtc.write_data(0);
        assert_eq!(rtc.seconds(1000), 13 * 3600 + 59 * 60 + 58);
    }

    #[test]
    fn stopped_rtc_does_not_advance() {
        let rtc = Rtc::new(42, 10, false);
        assert!(!rtc.is_running());
        assert_eq!(rtc.seconds(0), rtc.seconds(1_000_000));
    }
}
