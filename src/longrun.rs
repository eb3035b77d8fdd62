/*
    Copyright (C) 2023  The VDPTEST Authors

    This file is part of VDPTEST, a Rust library for measuring MSX VDP I/O timing.

    For the full copyright notice, see the lib.rs file.
*/
//! The long run cross-check timed by the real-time clock.
//!
//! The long run executes a fixed number of `OUT (0x98),A` instructions, which takes several
//! seconds, and compares the elapsed wall clock time with the expected duration. Each VDP wait
//! state shows up as an extra second per 3.58 million instructions.
#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use crate::chip::CpuMode;
use crate::config::{Calibration, MemoryMap};
use crate::platform::{RealTimeClock, TimedExecution, STREAM_DONE_PORT};

/// The size of the long run startup sequence in bytes.
pub const STARTUP_SIZE: usize = 9;
/// The size of the long run tail sequence in bytes.
pub const TAIL_SIZE: usize = 16;
/// The unrolled instruction: `OUT (0x98),A`.
pub const UNROLL: [u8; 2] = [0xD3, 0x98];

const SECONDS_PER_HOUR: u32 = 3600;

/// Seconds and minutes read from the real-time clock.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RtcTimestamp {
    pub minutes: u8,
    pub seconds: u8,
}

impl RtcTimestamp {
    /// Reads the BCD digits of the current seconds and minutes from the clock registers 0 to 3.
    pub fn read<C: RealTimeClock + ?Sized>(clock: &mut C) -> Self {
        let mut digit = |reg| clock.read_clock(reg) & 0x0F;
        let seconds = digit(0) + digit(1) * 10;
        let minutes = digit(2) + digit(3) * 10;
        RtcTimestamp { minutes, seconds }
    }
    /// Returns the number of seconds since the start of the hour.
    #[inline]
    pub fn seconds_of_hour(self) -> u32 {
        u32::from(self.minutes) * 60 + u32::from(self.seconds)
    }
}

/// Returns the number of seconds from `start` to `end`, the hour may wrap once.
pub fn elapsed_seconds(start: RtcTimestamp, end: RtcTimestamp) -> u32 {
    (end.seconds_of_hour() + SECONDS_PER_HOUR - start.seconds_of_hour()) % SECONDS_PER_HOUR
}

/// The result of the long run.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LongRun {
    /// `false` if the real-time clock was not running, the other values are meaningless then.
    pub working: bool,
    /// Elapsed seconds, scaled to the normal CPU speed.
    pub elapsed_seconds: u32,
    /// Elapsed seconds less the expected duration.
    pub deviation: i32,
}

impl LongRun {
    /// The result when the clock is not running.
    pub fn unavailable() -> Self {
        LongRun::default()
    }
    /// Returns the deviation if the clock was working.
    pub fn deviation(&self) -> Option<i32> {
        if self.working { Some(self.deviation) } else { None }
    }
}

/// Evaluates timestamps taken before and after the long run.
///
/// Identical timestamps mean the clock is not working.
pub fn evaluate(start: RtcTimestamp, end: RtcTimestamp, mode: CpuMode, calibration: &Calibration) -> LongRun {
    if start == end {
        return LongRun::unavailable()
    }
    let mut elapsed = elapsed_seconds(start, end);
    if mode.is_turbo() {
        elapsed = (f64::from(elapsed) * calibration.turbo_time_multiplier + 0.5) as u32;
    }
    let deviation = elapsed as i32 - calibration.long_run_seconds as i32;
    LongRun { working: true, elapsed_seconds: elapsed, deviation }
}

/// The geometry of the long run code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LongRunImage {
    /// The address the execution starts at.
    pub start: u16,
    /// The number of passes including the first one.
    pub passes: u16,
    /// The number of unrolled instructions in the window.
    pub unrolled: u16,
    /// The number of instructions executed by the first pass.
    pub first_pass: u16,
    pub code: Vec<u8>,
}

impl LongRunImage {
    /// Returns the total number of unrolled instructions executed.
    pub fn out_count(&self) -> u32 {
        u32::from(self.first_pass) + u32::from(self.passes - 1) * u32::from(self.unrolled)
    }
}

/// Returns the number of instructions unrolled in the code window.
pub fn unrolled_count(map: &MemoryMap) -> u16 {
    let room = usize::from(map.window_size).saturating_sub(STARTUP_SIZE + TAIL_SIZE);
    (room / UNROLL.len()) as u16
}

/// Returns the number of passes executing `out_count` instructions, including the first one.
pub fn pass_count(map: &MemoryMap, out_count: u32) -> u32 {
    out_count / u32::from(unrolled_count(map).max(1)) + 1
}

/// Builds the long run code executing `out_count` unrolled instructions in the code window.
///
/// The startup code loads the pass counter and jumps into the unrolled instructions so the first
/// pass covers the remainder. Each pass ends with the tail decrementing the counter, when it reaches
/// zero the tail writes to the [STREAM_DONE_PORT].
///
/// # Panics
/// Panics if the number of passes does not fit in 16 bits or no instruction fits in the window.
pub fn build_long_run(map: &MemoryMap, out_count: u32) -> LongRunImage {
    let unrolled = unrolled_count(map);
    assert!(unrolled != 0, "the code window of {} bytes is too small", map.window_size);
    let passes = pass_count(map, out_count);
    assert!(passes <= u32::from(u16::MAX), "long run of {} instructions is too long", out_count);
    let passes = passes as u16;
    let first_pass = (out_count % u32::from(unrolled)) as u16;

    let start = map.window_base;
    let unroll_base = start + STARTUP_SIZE as u16;
    let entry = unroll_base + (unrolled - first_pass) * UNROLL.len() as u16;
    let counter = map.long_run_counter.to_le_bytes();

    let mut code = Vec::with_capacity(STARTUP_SIZE + usize::from(unrolled) * UNROLL.len() + TAIL_SIZE);
    code.push(0x21);                                           // LD HL,passes
    code.extend_from_slice(&passes.to_le_bytes());
    code.push(0x22);                                           // LD (counter),HL
    code.extend_from_slice(&counter);
    code.push(0xC3);                                           // JP entry
    code.extend_from_slice(&entry.to_le_bytes());
    for _ in 0..unrolled {
        code.extend_from_slice(&UNROLL);
    }
    code.push(0x2A);                                           // LD HL,(counter)
    code.extend_from_slice(&counter);
    code.push(0x2B);                                           // DEC HL
    code.push(0x22);                                           // LD (counter),HL
    code.extend_from_slice(&counter);
    code.extend_from_slice(&[0x7C, 0xB5]);                     // LD A,H; OR L
    code.push(0xC2);                                           // JP NZ,unroll_base
    code.extend_from_slice(&unroll_base.to_le_bytes());
    code.extend_from_slice(&[0xD3, STREAM_DONE_PORT]);         // OUT (STREAM_DONE_PORT),A
    code.extend_from_slice(&[0x18, 0xFE]);                     // JR $
    LongRunImage { start, passes, unrolled, first_pass, code }
}

/// Executes the long run and evaluates the clock.
///
/// The long run is skipped if the clock has not advanced since the `program_start` timestamp.
pub fn run_long<P>(
        platform: &mut P,
        map: &MemoryMap,
        calibration: &Calibration,
        mode: CpuMode,
        program_start: RtcTimestamp
    ) -> LongRun
    where P: TimedExecution + RealTimeClock + ?Sized
{
    let before = RtcTimestamp::read(platform);
    if before == program_start {
        warn!("the real-time clock is not running");
        return LongRun::unavailable()
    }
    let image = build_long_run(map, calibration.long_run_out_count);
    platform.map_ram_window();
    platform.load_code(image.start, &image.code);
    info!("long run: {} instructions in {} passes", image.out_count(), image.passes);
    platform.run_stream(image.start);
    let after = RtcTimestamp::read(platform);
    let result = evaluate(before, after, mode, calibration);
    info!("long run: {:?} .. {:?} {:?}", before, after, result);
    if !result.working {
        warn!("the real-time clock stopped during the long run");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(minutes: u8, seconds: u8) -> RtcTimestamp {
        RtcTimestamp { minutes, seconds }
    }

    struct Bcd([u8; 4]);

    impl RealTimeClock for Bcd {
        fn read_clock(&mut self, reg: u8) -> u8 {
            0xF0 | self.0[usize::from(reg)]
        }
    }

    #[test]
    fn rtc_timestamp_works() {
        let stamp = RtcTimestamp::read(&mut Bcd([7, 3, 9, 5]));
        assert_eq!(stamp, ts(59, 37));
        assert_eq!(stamp.seconds_of_hour(), 59 * 60 + 37);
        assert_eq!(elapsed_seconds(ts(1, 50), ts(2, 4)), 14);
        assert_eq!(elapsed_seconds(ts(59, 58), ts(0, 10)), 12);
        assert_eq!(elapsed_seconds(ts(3, 3), ts(3, 3)), 0);
    }

    #[test]
    fn evaluate_works() {
        let calibration = Calibration::default();
        let result = evaluate(ts(10, 5), ts(10, 5), CpuMode::Z80, &calibration);
        assert!(!result.working);
        assert_eq!(result.deviation(), None);
        let result = evaluate(ts(10, 5), ts(10, 19), CpuMode::Z80, &calibration);
        assert_eq!(result, LongRun { working: true, elapsed_seconds: 14, deviation: 2 });
        assert_eq!(result.deviation(), Some(2));
        let result = evaluate(ts(59, 55), ts(0, 5), CpuMode::Z80, &calibration);
        assert_eq!(result.deviation(), Some(-2));
        // 9 seconds at 1.5 times the speed
        let result = evaluate(ts(0, 0), ts(0, 9), CpuMode::Z80Turbo, &calibration);
        assert_eq!(result.elapsed_seconds, 14);
        assert_eq!(result.deviation(), Some(2));
        let result = evaluate(ts(0, 0), ts(0, 8), CpuMode::Z80Turbo, &calibration);
        assert_eq!(result.deviation(), Some(0));
    }

    #[test]
    fn long_run_image_works() {
        let map = MemoryMap { window_size: 0x40, ..MemoryMap::default() };
        let image = build_long_run(&map, 50);
        assert_eq!(image.unrolled, 19);
        assert_eq!(image.passes, 3);
        assert_eq!(image.first_pass, 12);
        assert_eq!(image.out_count(), 50);
        assert_eq!(image.code.len(), STARTUP_SIZE + 19 * 2 + TAIL_SIZE);
        assert_eq!(&image.code[..STARTUP_SIZE], &[0x21, 3, 0, 0x22, 0xF2, 0xC0, 0xC3, 0x17, 0x80]);
        let tail = &image.code[STARTUP_SIZE + 38..];
        assert_eq!(tail, &[0x2A, 0xF2, 0xC0, 0x2B, 0x22, 0xF2, 0xC0, 0x7C, 0xB5, 0xC2, 0x09, 0x80,
                           0xD3, 0x2E, 0x18, 0xFE]);

        let image = build_long_run(&map, 38);
        assert_eq!((image.passes, image.first_pass), (3, 0));
        assert_eq!(image.out_count(), 38);
        let image = build_long_run(&MemoryMap::default(), 3_579_545);
        assert_eq!(image.out_count(), 3_579_545);
        assert_eq!(image.code.len(), 0x4000 - 1);
    }

    #[test]
    fn pass_count_follows_window() {
        let map = MemoryMap { window_size: 0x40, ..MemoryMap::default() };
        assert_eq!(unrolled_count(&map), 19);
        assert_eq!(pass_count(&map, 50), 3);
        let map = MemoryMap { window_size: STARTUP_SIZE as u16 + TAIL_SIZE as u16 + 2, ..map };
        assert_eq!(unrolled_count(&map), 1);
        assert_eq!(pass_count(&map, 3_579_545), 3_579_546);
        let map = MemoryMap { window_size: 16, ..map };
        assert_eq!(unrolled_count(&map), 0);
    }

    #[test]
    #[should_panic(expected = "is too small")]
    fn long_run_traps_tiny_window() {
        build_long_run(&MemoryMap { window_size: 16, ..MemoryMap::default() }, 100);
    }
}
