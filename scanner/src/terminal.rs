//! Bounded terminal pool
//!
//! Owns up to a fixed maximum of solvers, keyed by `T<nnn>` ids. Pool
//! exhaustion and unknown ids are plain negative return values; the registry
//! lock guards membership only, so reads never block behind a scan loop.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::solver::{Solver, SolverDeps};
use crate::types::{SolverStats, TerminalSettings, TerminalStatus};

/// Fixed pool maximum - creation beyond this returns `None`, no queuing
pub const MAX_TERMINALS: usize = 10;

struct Terminal {
    id: String,
    solver: Solver,
}

impl Terminal {
    fn status(&self) -> TerminalStatus {
        if self.solver.is_running() {
            if self.solver.is_paused() {
                TerminalStatus::Paused
            } else {
                TerminalStatus::Running
            }
        } else if self.solver.has_started() {
            TerminalStatus::Stopped
        } else {
            TerminalStatus::Created
        }
    }
}

/// Listing row for one terminal
#[derive(Debug, Clone, Serialize)]
pub struct TerminalInfo {
    pub id: String,

    pub status: TerminalStatus,

    pub mode: crate::types::ScanMode,

    pub chains: Vec<String>,
}

struct Registry {
    terminals: BTreeMap<String, Arc<Terminal>>,
    next_seq: u64,
}

/// Bounded pool of scan terminals
pub struct TerminalManager {
    deps: SolverDeps,
    max_terminals: usize,
    registry: RwLock<Registry>,
}

impl TerminalManager {
    pub fn new(deps: SolverDeps) -> Self {
        Self::with_max(deps, MAX_TERMINALS)
    }

    /// Pool with a custom maximum
    pub fn with_max(deps: SolverDeps, max_terminals: usize) -> Self {
        Self {
            deps,
            max_terminals,
            registry: RwLock::new(Registry {
                terminals: BTreeMap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Create a terminal; `None` when the pool is at its maximum.
    ///
    /// Id assignment and the capacity check happen under one write lock, so
    /// racing creators get exactly `max_terminals` unique ids in total.
    pub fn create_terminal(&self, settings: TerminalSettings) -> Option<String> {
        let mut registry = self.registry.write();
        if registry.terminals.len() >= self.max_terminals {
            warn!("Terminal pool full ({} max), creation refused", self.max_terminals);
            return None;
        }
        registry.next_seq += 1;
        let id = format!("T{:03}", registry.next_seq);
        let solver = Solver::new(id.clone(), settings, self.deps.clone());
        registry
            .terminals
            .insert(id.clone(), Arc::new(Terminal { id: id.clone(), solver }));
        info!("Terminal {} created ({}/{})", id, registry.terminals.len(), self.max_terminals);
        Some(id)
    }

    /// Start one terminal's solver; false for unknown ids
    pub fn start_terminal(&self, id: &str) -> bool {
        let Some(terminal) = self.get(id) else {
            return false;
        };
        match terminal.solver.start() {
            Ok(()) => true,
            Err(e) => {
                error!("Terminal {} failed to start: {}", id, e);
                false
            }
        }
    }

    /// Stop one terminal's solver; false for unknown ids
    pub fn stop_terminal(&self, id: &str) -> bool {
        let Some(terminal) = self.get(id) else {
            return false;
        };
        match terminal.solver.stop() {
            Ok(()) => true,
            Err(e) => {
                error!("Terminal {} failed to stop: {}", id, e);
                false
            }
        }
    }

    /// Pause one terminal's solver; false for unknown or not-running ids
    pub fn pause_terminal(&self, id: &str) -> bool {
        self.get(id).map(|t| t.solver.pause()).unwrap_or(false)
    }

    /// Resume one terminal's solver; false for unknown or not-running ids
    pub fn resume_terminal(&self, id: &str) -> bool {
        self.get(id).map(|t| t.solver.resume()).unwrap_or(false)
    }

    /// Remove a terminal. Refused (false) while its solver is running - a
    /// hard precondition, not best-effort.
    pub fn remove_terminal(&self, id: &str) -> bool {
        let mut registry = self.registry.write();
        match registry.terminals.get(id) {
            Some(terminal) if terminal.solver.is_running() => {
                warn!("Terminal {} is running, remove refused", id);
                false
            }
            Some(_) => {
                registry.terminals.remove(id);
                info!("Terminal {} removed", id);
                true
            }
            None => false,
        }
    }

    /// Start every non-running terminal; returns how many actually
    /// transitioned. Idempotent - a second call transitions zero.
    pub fn start_all(&self) -> usize {
        let terminals = self.snapshot();
        let mut started = 0;
        for terminal in terminals {
            if !terminal.solver.is_running() && terminal.solver.start().is_ok() {
                started += 1;
            }
        }
        info!("start_all transitioned {} terminals", started);
        started
    }

    /// Stop every running terminal; returns how many actually transitioned
    pub fn stop_all(&self) -> usize {
        let terminals = self.snapshot();
        let mut stopped = 0;
        for terminal in terminals {
            if terminal.solver.is_running() && terminal.solver.stop().is_ok() {
                stopped += 1;
            }
        }
        info!("stop_all transitioned {} terminals", stopped);
        stopped
    }

    /// All terminals in id order
    pub fn list_terminals(&self) -> Vec<TerminalInfo> {
        self.registry
            .read()
            .terminals
            .values()
            .map(|terminal| TerminalInfo {
                id: terminal.id.clone(),
                status: terminal.status(),
                mode: terminal.solver.settings().mode,
                chains: terminal.solver.settings().chains.clone(),
            })
            .collect()
    }

    /// Stats for one terminal. A created-but-unstarted terminal reports the
    /// zeroed baseline, not `None`; `None` means the id is unknown.
    pub fn get_terminal_stats(&self, id: &str) -> Option<SolverStats> {
        self.get(id).map(|terminal| terminal.solver.get_stats())
    }

    /// Stats for every terminal, keyed by id
    pub fn get_all_stats(&self) -> HashMap<String, SolverStats> {
        self.snapshot()
            .into_iter()
            .map(|terminal| (terminal.id.clone(), terminal.solver.get_stats()))
            .collect()
    }

    /// Number of terminals whose solver is currently running
    pub fn get_active_count(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|terminal| terminal.solver.is_running())
            .count()
    }

    /// Force-stop and clear everything, including the id sequence
    pub fn reset(&self) {
        let stopped = self.stop_all();
        let mut registry = self.registry.write();
        let cleared = registry.terminals.len();
        registry.terminals.clear();
        registry.next_seq = 0;
        warn!("Terminal pool reset: {} stopped, {} cleared", stopped, cleared);
    }

    fn get(&self, id: &str) -> Option<Arc<Terminal>> {
        self.registry.read().terminals.get(id).cloned()
    }

    fn snapshot(&self) -> Vec<Arc<Terminal>> {
        self.registry.read().terminals.values().cloned().collect()
    }
}
