/*
    Copyright (C) 2023  The VDPTEST Authors

    This file is part of VDPTEST, a Rust library for measuring MSX VDP I/O timing.

    For the full copyright notice, see the lib.rs file.
*/
//! Timed trials.
#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use crate::catalog::{TestDescriptor, VramDirection};
use crate::config::MemoryMap;
use crate::materialize::Materialized;
use crate::platform::{TimedExecution, VideoControl, VramAccess, VRAM_SCRATCH_ADDRESS};

/// The result of a single trial.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Trial {
    /// The number of logical instructions executed in one frame.
    pub instructions: u32,
    /// The number of times the test code looped in its window.
    pub extra_rounds: u8,
}

/// Builds the common preamble.
///
/// The preamble synchronizes with the frame interrupt using `HALT`, then resets the extra rounds
/// counter, arms the capture hook and jumps to the test code at the window base.
pub fn build_preamble(map: &MemoryMap) -> Vec<u8> {
    let mut code = Vec::with_capacity(32);
    code.push(0xF3);                                          // DI
    code.push(0x31);                                          // LD SP,stack_top
    code.extend_from_slice(&map.stack_top.to_le_bytes());
    code.extend_from_slice(&[0xED, 0x56]);                    // IM 1
    code.extend_from_slice(&[0xAF, 0xD3, 0x99,                // select S#0
                             0x3E, 0x8F, 0xD3, 0x99]);
    code.extend_from_slice(&[0xDB, 0x99]);                    // acknowledge a pending interrupt
    code.extend_from_slice(&[0xFB, 0x76]);                    // EI; HALT
    code.extend_from_slice(&[0xAF, 0x32]);                    // XOR A; LD (extra_rounds),A
    code.extend_from_slice(&map.extra_rounds.to_le_bytes());
    code.extend_from_slice(&[0x3C, 0x32]);                    // INC A; LD (hook_arm),A
    code.extend_from_slice(&map.hook_arm.to_le_bytes());
    code.push(0xC3);                                          // JP window_base
    code.extend_from_slice(&map.window_base.to_le_bytes());
    code
}

/// Converts the captured program counter into the number of logical instructions executed.
///
/// A marker within the startup code counts as no instructions, a marker within the tail as a full
/// pass. Each extra round adds a full pass.
pub fn count_instructions(pc: u16, code: &Materialized, extra_rounds: u8) -> u32 {
    let capacity = code.capacity();
    let count = if pc < code.unroll_base {
        0
    }
    else {
        (u32::from(pc - code.unroll_base) / u32::from(code.single_size)).min(capacity)
    };
    count + u32::from(extra_rounds) * capacity
}

/// Executes a single timed trial of the materialized `test`.
///
/// The trial is always accepted, a run without a captured interrupt counts as zero instructions.
pub fn run_iteration<P>(platform: &mut P, test: &TestDescriptor, code: &Materialized, map: &MemoryMap) -> Trial
    where P: VideoControl + TimedExecution + ?Sized
{
    match test.vram {
        VramDirection::Write => platform.arm_vram(VramAccess::Write, VRAM_SCRATCH_ADDRESS),
        VramDirection::Read => platform.arm_vram(VramAccess::Read, VRAM_SCRATCH_ADDRESS),
        VramDirection::NotApplicable => {}
    }
    let token = platform.begin_captured_region();
    platform.run_captured(map.preamble);
    let captured = platform.end_captured_region(token);
    let extra_rounds = platform.peek(map.extra_rounds);
    let instructions = match captured {
        Some(pc) => count_instructions(pc, code, extra_rounds),
        None => {
            warn!("{}: the frame interrupt was not captured", test.name);
            0
        }
    };
    trace!("{}: captured: {:04x?} extra rounds: {} count: {}", test.name, captured, extra_rounds, instructions);
    Trial { instructions, extra_rounds }
}
