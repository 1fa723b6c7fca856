//! Per-process state shared between a process's tasks and the orchestrator

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use coordsim_core::ProcessId;
use coordsim_time::SimulatedClock;

/// Mutable state of one simulated process
#[derive(Clone, Debug)]
pub struct ProcessState {
    pub id: ProcessId,
    pub clock: SimulatedClock,
    /// Cleared once on crash, never set again
    pub alive: bool,
    /// Set by a critical-section request, cleared after the section runs
    pub wants_critical_section: bool,
    pub holds_token: bool,
    /// Only ever true while `holds_token` is true
    pub in_critical_section: bool,
    /// Coordinator as this process last heard it
    pub coordinator: Option<ProcessId>,
    pub critical_section_entries: u64,
}

impl ProcessState {
    pub fn new(id: ProcessId, clock: SimulatedClock) -> Self {
        ProcessState {
            id,
            clock,
            alive: true,
            wants_critical_section: false,
            holds_token: false,
            in_critical_section: false,
            coordinator: None,
            critical_section_entries: 0,
        }
    }
}

/// Observable view of one live process
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessSnapshot {
    pub id: ProcessId,
    pub clock_value: f64,
    pub holds_token: bool,
    pub is_coordinator: bool,
    pub in_critical_section: bool,
}

/// Shared handle to a process's state.
///
/// Each process's state sits behind its own lock, so the drift task, the
/// protocol task and the orchestrator never race on a single process.
#[derive(Clone, Debug)]
pub struct ProcessHandle {
    id: ProcessId,
    state: Arc<Mutex<ProcessState>>,
    killed: Arc<Notify>,
}

impl ProcessHandle {
    pub fn new(state: ProcessState) -> Self {
        ProcessHandle {
            id: state.id,
            state: Arc::new(Mutex::new(state)),
            killed: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Run `f` under the process lock
    pub fn with_state<R>(&self, f: impl FnOnce(&mut ProcessState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn is_alive(&self) -> bool {
        self.state.lock().alive
    }

    /// Advance the clock by `ticks`. `None` once the process is dead.
    pub fn advance_clock(&self, ticks: f64) -> Option<f64> {
        let mut state = self.state.lock();
        if !state.alive {
            return None;
        }
        Some(state.clock.advance(ticks))
    }

    pub fn read_clock(&self) -> f64 {
        self.state.lock().clock.read()
    }

    /// Apply a Berkeley correction. `None` once the process is dead.
    pub fn apply_correction(&self, delta: f64) -> Option<f64> {
        let mut state = self.state.lock();
        if !state.alive {
            return None;
        }
        Some(state.clock.apply_correction(delta))
    }

    pub fn coordinator(&self) -> Option<ProcessId> {
        self.state.lock().coordinator
    }

    pub fn set_coordinator(&self, coordinator: Option<ProcessId>) {
        self.state.lock().coordinator = coordinator;
    }

    /// Flag a pending critical-section request. False if dead.
    pub fn request_critical_section(&self) -> bool {
        let mut state = self.state.lock();
        if state.alive {
            state.wants_critical_section = true;
        }
        state.alive
    }

    /// Mark the process crashed. Returns false if it already was.
    pub fn mark_dead(&self) -> bool {
        let was_alive = {
            let mut state = self.state.lock();
            let was_alive = state.alive;
            state.alive = false;
            state.in_critical_section = false;
            was_alive
        };
        if was_alive {
            self.killed.notify_one();
        }
        was_alive
    }

    /// Resolves once the process has been marked dead
    pub async fn killed(&self) {
        self.killed.notified().await
    }

    pub fn snapshot(&self) -> ProcessSnapshot {
        let state = self.state.lock();
        ProcessSnapshot {
            id: state.id,
            clock_value: state.clock.read(),
            holds_token: state.holds_token,
            is_coordinator: state.coordinator == Some(state.id),
            in_critical_section: state.in_critical_section,
        }
    }
}
