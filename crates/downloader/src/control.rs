// crates/downloader/src/control.rs
//! Run/stop/skip flag shared with the worker

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    /// Keep processing
    Run = 0,
    /// Abandon the queue and let the worker exit
    Stop = 1,
    /// Abandon the current job only
    Skip = 2,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RunState::Run,
            2 => RunState::Skip,
            _ => RunState::Stop,
        }
    }
}

/// Atomic tri-state flag
///
/// Stop and skip are one value, so they can't both be requested. Skip only
/// replaces run, never stop.
#[derive(Debug)]
pub struct ControlFlag(AtomicU8);

impl ControlFlag {
    pub fn new(state: RunState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> RunState {
        RunState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.get() == RunState::Run
    }

    fn transition(&self, from: RunState, to: RunState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// stop -> run; false if a worker is already active
    pub fn start(&self) -> bool {
        self.transition(RunState::Stop, RunState::Run)
    }

    pub fn stop(&self) {
        self.0.store(RunState::Stop as u8, Ordering::Release);
    }

    /// run -> skip
    pub fn skip(&self) -> bool {
        self.transition(RunState::Run, RunState::Skip)
    }

    /// skip -> run
    pub fn resume(&self) -> bool {
        self.transition(RunState::Skip, RunState::Run)
    }
}

impl Default for ControlFlag {
    fn default() -> Self {
        Self::new(RunState::Stop)
    }
}
