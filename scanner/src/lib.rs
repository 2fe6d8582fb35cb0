//! Aurum Scanner Core
//!
//! Multi-chain candidate scanning over the encrypted findings vault:
//!
//! 1. **BrainHandle**: adaptive strategy selection and persistent learning
//! 2. **Solver**: per-worker scan state machine with pause/resume/checkpoint
//! 3. **TerminalManager**: bounded pool of solvers, keyed by terminal id
//! 4. **SessionManager**: lightweight per-terminal session log
//!
//! Key/mnemonic generation, address derivation, balance lookup and scoring
//! are external collaborators behind the traits in [`collaborators`].

pub mod brain;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod session;
pub mod solver;
pub mod terminal;
pub mod types;

pub use brain::{BrainHandle, PatternDiscovery, SessionPlan, Strategy, StrategyRecord};
pub use collaborators::{
    load_rich_list, AddressDeriver, AdvisoryEngine, BalanceChecker, BalanceReport, Candidate,
    KeyGenerator, MomentOracle, ScoreReport, Scorer, SECP256K1_ORDER,
};
pub use config::{BrainConfig, ScannerConfig};
pub use error::{Result, ScannerError};
pub use session::{SessionManager, SessionStats};
pub use solver::{list_checkpoints, ProgressCallback, Solver, SolverDeps};
pub use terminal::{TerminalInfo, TerminalManager, MAX_TERMINALS};
pub use types::{
    Checkpoint, Discovery, ProgressUpdate, ScanMode, SolverStats, TerminalSettings, TerminalStatus,
};

/// Version of the scanner core
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
