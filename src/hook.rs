/*
    Copyright (C) 2023  The VDPTEST Authors

    This file is part of VDPTEST, a Rust library for measuring MSX VDP I/O timing.

    For the full copyright notice, see the lib.rs file.
*/
//! The frame interrupt capture hook.
//!
//! A timed run ends when the frame interrupt is accepted while the hook is armed. The program
//! counter of the interrupted code is the marker used to count executed instructions.
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

/// Identifies one captured region. Obtained from [CaptureRegion::begin_captured_region] and
/// consumed by [CaptureRegion::end_captured_region].
#[derive(Debug, PartialEq, Eq)]
pub struct CaptureToken {
    generation: u32,
}

/// The capability of capturing the interrupted program counter during a timed run.
pub trait CaptureRegion {
    /// Starts a new region. Any previous capture is discarded and the hook is disarmed until
    /// the timed code arms it.
    fn begin_captured_region(&mut self) -> CaptureToken;
    /// Ends the region identified by `token` and returns the captured marker if there was one.
    fn end_captured_region(&mut self, token: CaptureToken) -> Option<u16>;
}

/// What happened at the frame interrupt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The program counter was recorded, the interrupted code must not be resumed.
    Captured(u16),
    /// The interrupt should be handled normally.
    PassThrough,
}

/// The state of the capture hook.
///
/// The hook is installed once before all timed runs and restored once afterwards.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PcCaptureHook {
    installed: bool,
    armed: bool,
    open: bool,
    captured: Option<u16>,
    generation: u32,
}

impl PcCaptureHook {
    /// Installs the hook. The hook is left disarmed.
    pub fn install(&mut self) {
        self.installed = true;
        self.armed = false;
        self.captured = None;
    }
    /// Restores the normal interrupt handling. Returns `false` if the hook was not installed.
    pub fn restore(&mut self) -> bool {
        let installed = self.installed;
        self.installed = false;
        self.armed = false;
        self.open = false;
        installed
    }

    #[inline]
    pub fn is_installed(&self) -> bool {
        self.installed
    }

    #[inline]
    pub fn is_armed(&self) -> bool {
        self.armed
    }
    /// Arms the hook, if installed and a region is open.
    pub fn arm(&mut self) {
        if self.installed && self.open {
            self.armed = true;
        }
    }
    /// Handles the frame interrupt accepted at the given program counter.
    pub fn on_tick(&mut self, pc: u16) -> TickOutcome {
        if self.armed {
            self.armed = false;
            self.captured = Some(pc);
            TickOutcome::Captured(pc)
        }
        else {
            TickOutcome::PassThrough
        }
    }
    /// Opens a new region.
    pub fn begin(&mut self) -> CaptureToken {
        self.generation = self.generation.wrapping_add(1);
        self.armed = false;
        self.captured = None;
        self.open = true;
        CaptureToken { generation: self.generation }
    }
    /// Closes the region. A token of a stale region yields `None`.
    pub fn end(&mut self, token: CaptureToken) -> Option<u16> {
        if token.generation != self.generation || !self.open {
            return None
        }
        self.open = false;
        self.armed = false;
        self.captured.take()
    }
}

impl CaptureRegion for PcCaptureHook {
    fn begin_captured_region(&mut self) -> CaptureToken {
        self.begin()
    }

    fn end_captured_region(&mut self, token: CaptureToken) -> Option<u16> {
        self.end(token)
    }
}
