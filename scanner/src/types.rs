//! Core types shared across the scanner: scan modes, terminal settings,
//! stats snapshots and the checkpoint document.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScannerError;

/// What kind of candidates a solver generates.
///
/// Closed set - unknown mode strings fail at construction, never at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Raw private-key integers in the secp256k1 range
    RandomKey,

    /// Mnemonic seed phrases from the key-generation collaborator
    SeedPhrase,

    /// Alternate between keys and seeds within each batch
    Both,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::RandomKey => "random_key",
            ScanMode::SeedPhrase => "seed_phrase",
            ScanMode::Both => "both",
        }
    }

    /// Whether this mode tests private-key candidates
    pub fn tests_keys(&self) -> bool {
        matches!(self, ScanMode::RandomKey | ScanMode::Both)
    }

    /// Whether this mode tests seed-phrase candidates
    pub fn tests_seeds(&self) -> bool {
        matches!(self, ScanMode::SeedPhrase | ScanMode::Both)
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ScanMode {
    type Err = ScannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random_key" => Ok(ScanMode::RandomKey),
            "seed_phrase" => Ok(ScanMode::SeedPhrase),
            "both" => Ok(ScanMode::Both),
            other => Err(ScannerError::InvalidMode(other.to_string())),
        }
    }
}

/// Lifecycle state of a terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Created,
    Running,
    Paused,
    Stopped,
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminalStatus::Created => "created",
            TerminalStatus::Running => "running",
            TerminalStatus::Paused => "paused",
            TerminalStatus::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Per-terminal configuration handed to a solver at construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalSettings {
    /// Candidate generation mode
    pub mode: ScanMode,

    /// Chains to derive addresses for
    pub chains: Vec<String>,

    /// Token symbols passed to the balance checker
    pub tokens: Vec<String>,

    /// Candidates generated per loop iteration
    pub batch_size: usize,

    /// Online balance check cadence (every Nth candidate)
    pub check_every_n: u64,

    /// Checkpoint after this many candidates
    pub checkpoint_every_keys: u64,

    /// Checkpoint after this many seconds regardless of count
    pub checkpoint_every_secs: u64,

    /// Puzzle-hunt mode: restrict candidates to a known bit range
    pub puzzle_enabled: bool,

    /// Puzzle number when puzzle mode is on
    pub puzzle_number: Option<u32>,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            mode: ScanMode::RandomKey,
            chains: vec!["btc".to_string(), "eth".to_string()],
            tokens: Vec::new(),
            batch_size: 32,
            check_every_n: 100,
            checkpoint_every_keys: 10_000,
            checkpoint_every_secs: 60,
            puzzle_enabled: false,
            puzzle_number: None,
        }
    }
}

/// Thread-safe snapshot of one solver's counters.
///
/// Produced by `Solver::get_stats` without blocking the scan loop; a solver
/// that never started reports the zeroed baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverStats {
    /// Owning terminal id
    pub terminal_id: String,

    /// Candidate generation mode
    pub mode: ScanMode,

    /// Private keys tested so far
    pub keys_tested: u64,

    /// Seed phrases tested so far
    pub seeds_tested: u64,

    /// Findings handed to the vault
    pub hits: u64,

    /// Online balance checks performed
    pub online_checks: u64,

    /// Per-candidate failures absorbed by the loop
    pub errors: u64,

    /// Best composite score seen
    pub high_score: f64,

    /// Candidates per second over the running time
    pub speed: f64,

    /// Total running time in seconds (pauses included)
    pub elapsed_secs: f64,

    /// Whether the worker is currently paused
    pub paused: bool,

    pub puzzle_enabled: bool,

    pub puzzle_number: Option<u32>,

    /// Chains this solver derives addresses for
    pub chains: Vec<String>,
}

impl SolverStats {
    /// Zeroed baseline for a terminal whose solver has not started yet
    pub fn baseline(terminal_id: &str, settings: &TerminalSettings) -> Self {
        Self {
            terminal_id: terminal_id.to_string(),
            mode: settings.mode,
            keys_tested: 0,
            seeds_tested: 0,
            hits: 0,
            online_checks: 0,
            errors: 0,
            high_score: 0.0,
            speed: 0.0,
            elapsed_secs: 0.0,
            paused: false,
            puzzle_enabled: settings.puzzle_enabled,
            puzzle_number: settings.puzzle_number,
            chains: settings.chains.clone(),
        }
    }
}

/// Point-in-time snapshot of one solver, written to
/// `<checkpoint_dir>/<terminal_id>.json` and fully overwritten on each save.
///
/// Every field is mandatory: a checkpoint missing any of them fails to parse,
/// which is the intended loud failure for corrupt content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Checkpoint {
    pub terminal_id: String,

    pub mode: ScanMode,

    pub puzzle_enabled: bool,

    pub puzzle_number: Option<u32>,

    /// Strategy name active when the checkpoint was taken
    pub strategy: String,

    pub chains: Vec<String>,

    pub tokens: Vec<String>,

    pub keys_tested: u64,

    pub seeds_tested: u64,

    pub hits: u64,

    pub online_checks: u64,

    pub errors: u64,

    pub high_score: f64,

    pub paused: bool,

    /// When the checkpoint was written
    pub timestamp: DateTime<Utc>,
}

/// One entry in a solver's bounded recent-discoveries feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discovery {
    pub timestamp: DateTime<Utc>,

    pub chain: String,

    pub address: String,

    pub balance: f64,

    pub score: f64,
}

/// Bounded progress report emitted by the scan loop alongside checkpoints
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub terminal_id: String,

    pub stats: SolverStats,

    /// Most recent discoveries, newest last, capped at 20
    pub recent_discoveries: Vec<Discovery>,
}
