//! Per-worker scan state machine
//!
//! One OS thread per running solver. The worker owns a command channel
//! (`Pause`/`Resume`/`Stop`): a paused worker blocks on the channel itself,
//! so `stop()` releasing a paused worker is structural, not a convention.
//! Counters are atomics - stats readers never block behind the scan loop.
//!
//! Per-candidate derivation and balance-check failures are counted and
//! absorbed; the only fatal path in this module is a corrupt checkpoint.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use aurum_vault::VaultHandle;

use crate::brain::{BrainHandle, Strategy};
use crate::collaborators::{AddressDeriver, BalanceChecker, Candidate, KeyGenerator, Scorer};
use crate::error::{Result, ScannerError};
use crate::types::{Checkpoint, Discovery, ProgressUpdate, ScanMode, SolverStats, TerminalSettings};

/// Recent-discoveries feed cap
const RECENT_FEED_CAP: usize = 20;

/// Bounded progress sink invoked alongside each checkpoint
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Commands understood by a solver worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Pause,
    Resume,
    Stop,
}

/// Everything a solver needs from the outside world
#[derive(Clone)]
pub struct SolverDeps {
    pub vault: Arc<VaultHandle>,
    pub brain: Arc<BrainHandle>,
    pub keygen: Arc<dyn KeyGenerator>,
    pub deriver: Arc<dyn AddressDeriver>,
    pub balance: Arc<dyn BalanceChecker>,
    pub scorer: Arc<dyn Scorer>,
    pub rich_list: Arc<HashSet<String>>,
    pub checkpoint_dir: PathBuf,
    pub progress: Option<ProgressCallback>,
}

#[derive(Default)]
struct Counters {
    keys_tested: AtomicU64,
    seeds_tested: AtomicU64,
    hits: AtomicU64,
    online_checks: AtomicU64,
    errors: AtomicU64,
    high_score_bits: AtomicU64,
}

impl Counters {
    fn high_score(&self) -> f64 {
        f64::from_bits(self.high_score_bits.load(Ordering::Relaxed))
    }

    fn raise_high_score(&self, score: f64) {
        let mut current = self.high_score_bits.load(Ordering::Relaxed);
        loop {
            if score <= f64::from_bits(current) {
                return;
            }
            match self.high_score_bits.compare_exchange_weak(
                current,
                score.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

#[derive(Default)]
struct ElapsedClock {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl ElapsedClock {
    fn total(&self) -> Duration {
        self.accumulated
            + self
                .running_since
                .map(|since| since.elapsed())
                .unwrap_or_default()
    }
}

struct Worker {
    tx: Sender<Command>,
    handle: JoinHandle<()>,
}

/// Shared state visible to both the owning handle and the worker thread
struct WorkerCtx {
    terminal_id: String,
    settings: TerminalSettings,
    deps: SolverDeps,
    strategy: Arc<RwLock<Strategy>>,
    counters: Arc<Counters>,
    paused: Arc<AtomicBool>,
    recent: Arc<Mutex<VecDeque<Discovery>>>,
    clock: Arc<Mutex<ElapsedClock>>,
}

impl WorkerCtx {
    fn snapshot_stats(&self) -> SolverStats {
        let elapsed = self.clock.lock().total().as_secs_f64();
        let keys = self.counters.keys_tested.load(Ordering::Relaxed);
        let seeds = self.counters.seeds_tested.load(Ordering::Relaxed);
        SolverStats {
            terminal_id: self.terminal_id.clone(),
            mode: self.settings.mode,
            keys_tested: keys,
            seeds_tested: seeds,
            hits: self.counters.hits.load(Ordering::Relaxed),
            online_checks: self.counters.online_checks.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            high_score: self.counters.high_score(),
            speed: (keys + seeds) as f64 / elapsed.max(1e-6),
            elapsed_secs: elapsed,
            paused: self.paused.load(Ordering::SeqCst),
            puzzle_enabled: self.settings.puzzle_enabled,
            puzzle_number: self.settings.puzzle_number,
            chains: self.settings.chains.clone(),
        }
    }

    fn build_checkpoint(&self) -> Checkpoint {
        Checkpoint {
            terminal_id: self.terminal_id.clone(),
            mode: self.settings.mode,
            puzzle_enabled: self.settings.puzzle_enabled,
            puzzle_number: self.settings.puzzle_number,
            strategy: self.strategy.read().name().to_string(),
            chains: self.settings.chains.clone(),
            tokens: self.settings.tokens.clone(),
            keys_tested: self.counters.keys_tested.load(Ordering::Relaxed),
            seeds_tested: self.counters.seeds_tested.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            online_checks: self.counters.online_checks.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            high_score: self.counters.high_score(),
            paused: self.paused.load(Ordering::SeqCst),
            timestamp: Utc::now(),
        }
    }
}

/// One scan worker. Created → Running ⇄ Paused → Stopped.
pub struct Solver {
    terminal_id: String,
    settings: TerminalSettings,
    deps: SolverDeps,
    strategy: Arc<RwLock<Strategy>>,
    counters: Arc<Counters>,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    started_once: AtomicBool,
    clock: Arc<Mutex<ElapsedClock>>,
    recent: Arc<Mutex<VecDeque<Discovery>>>,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for Solver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Solver")
            .field("terminal_id", &self.terminal_id)
            .finish_non_exhaustive()
    }
}

impl Solver {
    pub fn new<S: Into<String>>(terminal_id: S, settings: TerminalSettings, deps: SolverDeps) -> Self {
        Self {
            terminal_id: terminal_id.into(),
            settings,
            deps,
            strategy: Arc::new(RwLock::new(Strategy::Random)),
            counters: Arc::new(Counters::default()),
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            started_once: AtomicBool::new(false),
            clock: Arc::new(Mutex::new(ElapsedClock::default())),
            recent: Arc::new(Mutex::new(VecDeque::new())),
            worker: Mutex::new(None),
        }
    }

    /// Reconstruct a solver from a checkpoint document.
    ///
    /// Malformed content fails loudly - resuming from garbage is a fatal
    /// operator error, never silently defaulted.
    pub fn resume_from_checkpoint<P: AsRef<Path>>(path: P, deps: SolverDeps) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ScannerError::corrupt_checkpoint(format!("unreadable checkpoint {:?}: {}", path, e))
        })?;
        let checkpoint: Checkpoint = serde_json::from_str(&content).map_err(|e| {
            ScannerError::corrupt_checkpoint(format!("malformed checkpoint {:?}: {}", path, e))
        })?;
        let strategy: Strategy = checkpoint.strategy.parse().map_err(|_| {
            ScannerError::corrupt_checkpoint(format!(
                "checkpoint {:?} names unknown strategy '{}'",
                path, checkpoint.strategy
            ))
        })?;

        let settings = TerminalSettings {
            mode: checkpoint.mode,
            chains: checkpoint.chains.clone(),
            tokens: checkpoint.tokens.clone(),
            puzzle_enabled: checkpoint.puzzle_enabled,
            puzzle_number: checkpoint.puzzle_number,
            ..TerminalSettings::default()
        };
        let solver = Solver::new(checkpoint.terminal_id.clone(), settings, deps);
        *solver.strategy.write() = strategy;
        // restored counters describe past runs, not an unstarted baseline
        solver.started_once.store(true, Ordering::SeqCst);
        solver
            .counters
            .keys_tested
            .store(checkpoint.keys_tested, Ordering::Relaxed);
        solver
            .counters
            .seeds_tested
            .store(checkpoint.seeds_tested, Ordering::Relaxed);
        solver.counters.hits.store(checkpoint.hits, Ordering::Relaxed);
        solver
            .counters
            .online_checks
            .store(checkpoint.online_checks, Ordering::Relaxed);
        solver.counters.errors.store(checkpoint.errors, Ordering::Relaxed);
        solver
            .counters
            .high_score_bits
            .store(checkpoint.high_score.to_bits(), Ordering::Relaxed);

        info!(
            "Solver {} resumed from checkpoint ({} keys, {} seeds, {} hits)",
            solver.terminal_id, checkpoint.keys_tested, checkpoint.seeds_tested, checkpoint.hits
        );
        Ok(solver)
    }

    /// Spawn the worker thread. Idempotent while running - a second call
    /// never spawns a second worker.
    pub fn start(&self) -> Result<()> {
        let mut slot = self.worker.lock();
        if slot.is_some() && self.running.load(Ordering::SeqCst) {
            debug!("Solver {} already running", self.terminal_id);
            return Ok(());
        }
        if let Some(stale) = slot.take() {
            let _ = stale.handle.join();
        }

        let plan = self.deps.brain.start_session(
            self.settings.mode,
            &self.settings.chains,
            &self.settings.tokens,
        );
        *self.strategy.write() = plan.strategy;

        self.paused.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        self.started_once.store(true, Ordering::SeqCst);
        self.clock.lock().running_since = Some(Instant::now());

        let ctx = Arc::new(WorkerCtx {
            terminal_id: self.terminal_id.clone(),
            settings: self.settings.clone(),
            deps: self.deps.clone(),
            strategy: self.strategy.clone(),
            counters: self.counters.clone(),
            paused: self.paused.clone(),
            recent: self.recent.clone(),
            clock: self.clock.clone(),
        });
        let running = self.running.clone();
        let (tx, rx) = unbounded();
        let handle = std::thread::Builder::new()
            .name(format!("solver-{}", self.terminal_id))
            .spawn(move || {
                run_loop(&ctx, &rx);
                running.store(false, Ordering::SeqCst);
            })?;

        *slot = Some(Worker { tx, handle });
        info!(
            "Solver {} started (mode {}, strategy {})",
            self.terminal_id, self.settings.mode, plan.strategy
        );
        Ok(())
    }

    /// Stop the worker and join its thread. Idempotent, never hangs: `Stop`
    /// wakes a paused worker blocked on the command channel.
    pub fn stop(&self) -> Result<()> {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.tx.send(Command::Stop);
            if worker.handle.join().is_err() {
                warn!("Solver {} worker panicked during shutdown", self.terminal_id);
            }
            info!("Solver {} stopped", self.terminal_id);
        }
        self.running.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        let mut clock = self.clock.lock();
        if let Some(since) = clock.running_since.take() {
            clock.accumulated += since.elapsed();
        }
        Ok(())
    }

    /// Ask the worker to pause; false when no worker is running
    pub fn pause(&self) -> bool {
        match &*self.worker.lock() {
            Some(worker) => worker.tx.send(Command::Pause).is_ok(),
            None => false,
        }
    }

    /// Ask a paused worker to resume; false when no worker is running
    pub fn resume(&self) -> bool {
        match &*self.worker.lock() {
            Some(worker) => worker.tx.send(Command::Resume).is_ok(),
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// True once `start()` has succeeded at least once
    pub fn has_started(&self) -> bool {
        self.started_once.load(Ordering::SeqCst)
    }

    pub fn terminal_id(&self) -> &str {
        &self.terminal_id
    }

    pub fn settings(&self) -> &TerminalSettings {
        &self.settings
    }

    /// Thread-safe counter snapshot; never blocks behind the scan loop.
    /// A solver that has never run reports the zeroed baseline.
    pub fn get_stats(&self) -> SolverStats {
        if !self.has_started() {
            return SolverStats::baseline(&self.terminal_id, &self.settings);
        }
        let elapsed = self.clock.lock().total().as_secs_f64();
        let keys = self.counters.keys_tested.load(Ordering::Relaxed);
        let seeds = self.counters.seeds_tested.load(Ordering::Relaxed);
        SolverStats {
            terminal_id: self.terminal_id.clone(),
            mode: self.settings.mode,
            keys_tested: keys,
            seeds_tested: seeds,
            hits: self.counters.hits.load(Ordering::Relaxed),
            online_checks: self.counters.online_checks.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            high_score: self.counters.high_score(),
            speed: (keys + seeds) as f64 / elapsed.max(1e-6),
            elapsed_secs: elapsed,
            paused: self.is_paused(),
            puzzle_enabled: self.settings.puzzle_enabled,
            puzzle_number: self.settings.puzzle_number,
            chains: self.settings.chains.clone(),
        }
    }

    /// Most recent discoveries, oldest first, capped at 20
    pub fn recent_discoveries(&self) -> Vec<Discovery> {
        self.recent.lock().iter().cloned().collect()
    }

    /// Write the checkpoint document, fully overwriting any previous one
    pub fn save_checkpoint(&self) -> Result<PathBuf> {
        let checkpoint = Checkpoint {
            terminal_id: self.terminal_id.clone(),
            mode: self.settings.mode,
            puzzle_enabled: self.settings.puzzle_enabled,
            puzzle_number: self.settings.puzzle_number,
            strategy: self.strategy.read().name().to_string(),
            chains: self.settings.chains.clone(),
            tokens: self.settings.tokens.clone(),
            keys_tested: self.counters.keys_tested.load(Ordering::Relaxed),
            seeds_tested: self.counters.seeds_tested.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            online_checks: self.counters.online_checks.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            high_score: self.counters.high_score(),
            paused: self.is_paused(),
            timestamp: Utc::now(),
        };
        persist_checkpoint(&self.deps.checkpoint_dir, &checkpoint)
    }
}

impl Drop for Solver {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Sorted checkpoint filenames; empty (not an error) for a missing directory
pub fn list_checkpoints<P: AsRef<Path>>(dir: P) -> Result<Vec<String>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .flatten()
        .filter(|entry| entry.path().extension().map(|e| e == "json").unwrap_or(false))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    Ok(names)
}

fn persist_checkpoint(dir: &Path, checkpoint: &Checkpoint) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", checkpoint.terminal_id));
    std::fs::write(&path, serde_json::to_string_pretty(checkpoint)?)?;
    debug!("Checkpoint written for {} at {:?}", checkpoint.terminal_id, path);
    Ok(path)
}

/// Command gate outcome
enum Flow {
    Continue,
    Stop,
}

fn run_loop(ctx: &Arc<WorkerCtx>, rx: &Receiver<Command>) {
    info!("Solver {} worker loop entered", ctx.terminal_id);
    let mut candidate_counter: u64 = 0;
    let mut since_checkpoint: u64 = 0;
    let mut last_checkpoint = Instant::now();

    loop {
        match drain_commands(ctx, rx) {
            Flow::Stop => break,
            Flow::Continue => {}
        }

        for candidate in generate_batch(ctx) {
            candidate_counter += 1;
            since_checkpoint += 1;
            if let Err(e) = process_candidate(ctx, &candidate, candidate_counter) {
                ctx.counters.errors.fetch_add(1, Ordering::Relaxed);
                debug!("Solver {} candidate failed: {}", ctx.terminal_id, e);
            }
        }

        let checkpoint_due = since_checkpoint >= ctx.settings.checkpoint_every_keys
            || last_checkpoint.elapsed().as_secs() >= ctx.settings.checkpoint_every_secs;
        if checkpoint_due {
            since_checkpoint = 0;
            last_checkpoint = Instant::now();
            if let Err(e) = checkpoint_and_report(ctx) {
                warn!("Solver {} periodic checkpoint failed: {}", ctx.terminal_id, e);
            }
        }
    }

    if let Err(e) = checkpoint_and_report(ctx) {
        warn!("Solver {} final checkpoint failed: {}", ctx.terminal_id, e);
    }
    let stats = ctx.snapshot_stats();
    match serde_json::to_value(&stats) {
        Ok(stats_doc) => {
            if let Err(e) = ctx.deps.brain.end_session(&stats_doc) {
                debug!("Solver {} brain session close skipped: {}", ctx.terminal_id, e);
            }
        }
        Err(e) => warn!("Solver {} stats serialization failed: {}", ctx.terminal_id, e),
    }
    info!("Solver {} worker loop exited", ctx.terminal_id);
}

/// Handle pending commands. A paused worker blocks on `recv` here, so `Stop`
/// always releases it immediately.
fn drain_commands(ctx: &WorkerCtx, rx: &Receiver<Command>) -> Flow {
    loop {
        if ctx.paused.load(Ordering::SeqCst) {
            match rx.recv() {
                Ok(Command::Resume) => {
                    ctx.paused.store(false, Ordering::SeqCst);
                    debug!("Solver {} resumed", ctx.terminal_id);
                }
                Ok(Command::Pause) => {}
                Ok(Command::Stop) | Err(_) => return Flow::Stop,
            }
        } else {
            match rx.try_recv() {
                Ok(Command::Pause) => {
                    ctx.paused.store(true, Ordering::SeqCst);
                    debug!("Solver {} paused", ctx.terminal_id);
                }
                Ok(Command::Resume) => {}
                Ok(Command::Stop) => return Flow::Stop,
                Err(TryRecvError::Empty) => return Flow::Continue,
                Err(TryRecvError::Disconnected) => return Flow::Stop,
            }
        }
    }
}

fn generate_batch(ctx: &WorkerCtx) -> Vec<Candidate> {
    let n = ctx.settings.batch_size.max(1);
    let mode = ctx.settings.mode;
    let mut batch = Vec::with_capacity(n);

    if mode.tests_keys() {
        let count = if mode == ScanMode::Both { n / 2 } else { n };
        let strategy = *ctx.strategy.read();
        if strategy == Strategy::Random {
            batch.extend(
                ctx.deps
                    .keygen
                    .generate_keys_batch(count)
                    .into_iter()
                    .map(Candidate::Key),
            );
        } else {
            batch.extend((0..count).map(|_| Candidate::Key(ctx.deps.brain.generate_smart_key())));
        }
    }
    if mode.tests_seeds() {
        let count = n - batch.len();
        batch.extend(
            ctx.deps
                .keygen
                .generate_seeds_batch(count)
                .into_iter()
                .map(Candidate::Seed),
        );
    }
    batch
}

fn process_candidate(ctx: &WorkerCtx, candidate: &Candidate, counter: u64) -> Result<()> {
    match candidate {
        Candidate::Key(_) => ctx.counters.keys_tested.fetch_add(1, Ordering::Relaxed),
        Candidate::Seed(_) => ctx.counters.seeds_tested.fetch_add(1, Ordering::Relaxed),
    };

    let addresses = ctx.deps.deriver.derive_addresses(candidate, &ctx.settings.chains)?;

    // cheap local membership check before any network call
    let mut hit: Option<(String, String, f64)> = None;
    for (chain, address) in &addresses {
        if ctx.deps.rich_list.contains(address) {
            hit = Some((chain.clone(), address.clone(), 0.0));
            break;
        }
    }

    if hit.is_none() && ctx.settings.check_every_n > 0 && counter % ctx.settings.check_every_n == 0 {
        ctx.counters.online_checks.fetch_add(1, Ordering::Relaxed);
        let report = ctx
            .deps
            .balance
            .check_all_balances(&addresses, &ctx.settings.tokens)?;
        if report.any_balance {
            let best = report
                .per_chain
                .iter()
                .filter(|(_, balance)| **balance > 0.0)
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal));
            if let Some((chain, balance)) = best {
                if let Some(address) = addresses.get(chain) {
                    hit = Some((chain.clone(), address.clone(), *balance));
                }
            }
        }
    }

    if let Some((chain, address, balance)) = hit {
        let score = ctx.deps.scorer.hybrid_score(candidate).total;
        ctx.counters.hits.fetch_add(1, Ordering::Relaxed);
        ctx.counters.raise_high_score(score);

        let mut finding = json!({
            "terminal_id": ctx.terminal_id,
            "chain": chain,
            "address": address,
            "balance": balance,
            "score": score,
        });
        finding[candidate.field_name()] = Value::String(candidate.material());

        ctx.deps.vault.record_finding(&finding)?;
        ctx.deps.brain.record_finding(&finding);

        let mut recent = ctx.recent.lock();
        if recent.len() >= RECENT_FEED_CAP {
            recent.pop_front();
        }
        recent.push_back(Discovery {
            timestamp: Utc::now(),
            chain: finding["chain"].as_str().unwrap_or("").to_string(),
            address: finding["address"].as_str().unwrap_or("").to_string(),
            balance,
            score,
        });
        drop(recent);

        info!(
            "💰 Solver {} hit on {}: {} (balance {}, score {:.1})",
            ctx.terminal_id, finding["chain"], finding["address"], balance, score
        );
    }
    Ok(())
}

fn checkpoint_and_report(ctx: &WorkerCtx) -> Result<()> {
    let checkpoint = ctx.build_checkpoint();
    persist_checkpoint(&ctx.deps.checkpoint_dir, &checkpoint)?;

    if let Some(progress) = &ctx.deps.progress {
        let update = ProgressUpdate {
            terminal_id: ctx.terminal_id.clone(),
            stats: ctx.snapshot_stats(),
            recent_discoveries: ctx.recent.lock().iter().cloned().collect(),
        };
        progress(update);
    }
    Ok(())
}
