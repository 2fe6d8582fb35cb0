//! Adaptive strategy brain
//!
//! Tracks the historical effectiveness of each key-generation strategy in a
//! persistent knowledge directory and biases future candidate generation
//! toward what has worked. Selection is epsilon-greedy: explore uniformly
//! with probability `exploration_rate`, otherwise exploit the strategy with
//! the best recency-decayed composite value.
//!
//! The knowledge directory is authoritative - independent handles pointed at
//! the same directory observe each other's persisted state.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use num_bigint::{BigUint, RandBigInt};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::collaborators::{clamp_to_key_range, AdvisoryEngine, MomentOracle, SECP256K1_ORDER};
use crate::error::{Result, ScannerError};
use crate::types::ScanMode;

/// Pattern-discovery log cap; oldest entries are dropped beyond this
const PATTERN_LOG_CAP: usize = 500;

/// High-score threshold counted into a strategy's aggregate record
const HIGH_SCORE_THRESHOLD: f64 = 70.0;

const STRATEGY_LOG_FILE: &str = "strategy_log.json";
const PATTERNS_FILE: &str = "patterns.json";
const INSIGHTS_FILE: &str = "insights.json";

/// Named key-generation heuristics.
///
/// Closed set - unknown names fail at construction. Enum order is the
/// tie-break for strategy selection, so it is part of the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Uniform sampling over the full key range
    Random,

    /// Folds current-moment digits from the oracle into the candidate
    NumerologyGuided,

    /// Perturbs previously recorded high-value candidates
    PatternReplay,

    /// Prefers candidates whose digit entropy falls in a productive band
    EntropyBand,

    /// Derives a harmonic base from today's date
    DateHarmonic,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::Random,
        Strategy::NumerologyGuided,
        Strategy::PatternReplay,
        Strategy::EntropyBand,
        Strategy::DateHarmonic,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Random => "random",
            Strategy::NumerologyGuided => "numerology_guided",
            Strategy::PatternReplay => "pattern_replay",
            Strategy::EntropyBand => "entropy_band",
            Strategy::DateHarmonic => "date_harmonic",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Strategy {
    type Err = ScannerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.name() == s)
            .ok_or_else(|| ScannerError::InvalidStrategy(s.to_string()))
    }
}

/// Per-strategy aggregate, monotonically accumulated across sessions.
///
/// Never reset except through `reset_knowledge`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyRecord {
    /// Completed sessions run under this strategy
    pub runs: u64,

    /// Candidates tested across all runs
    pub total_keys: u64,

    /// Sessions whose high score crossed the threshold
    pub high_scores: u64,

    /// Pattern discoveries recorded under this strategy
    pub patterns: u64,

    /// Findings handed to the vault
    pub hits: u64,

    /// Last session end under this strategy
    pub last_used: Option<DateTime<Utc>>,
}

/// One entry in the capped pattern-discovery log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternDiscovery {
    pub timestamp: DateTime<Utc>,

    /// Candidate material (hex key or seed phrase)
    pub key: String,

    pub score: f64,

    pub strategy: String,

    /// Shannon entropy over the candidate's digits
    pub entropy: f64,
}

/// Tuned parameters handed back when a brain session starts
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub strategy: Strategy,

    pub session_id: String,

    /// Candidates per loop iteration the solver should use
    pub batch_size: usize,

    /// Suggested online-check interval
    pub check_interval_secs: u64,
}

struct BrainSession {
    id: String,
    strategy: Strategy,
    mode: ScanMode,
    chains: Vec<String>,
    tokens: Vec<String>,
    started: DateTime<Utc>,
    findings: Vec<Value>,
}

struct BrainState {
    strategies: HashMap<String, StrategyRecord>,
    patterns: Vec<PatternDiscovery>,
    insights: Value,
    session: Option<BrainSession>,
    loaded: bool,
    dirty: bool,
}

/// Owned context object for the adaptive strategy engine.
///
/// Cheap to share via `Arc`; all methods take `&self`.
pub struct BrainHandle {
    knowledge_dir: PathBuf,
    sessions_dir: PathBuf,
    exploration_rate: f64,
    state: Mutex<BrainState>,
    moment: Option<Arc<dyn MomentOracle>>,
    advisor: Option<Arc<dyn AdvisoryEngine>>,
}

impl BrainHandle {
    /// Create a handle over a knowledge directory. Nothing is read until
    /// first use; persisted state loads lazily.
    pub fn new<P: AsRef<Path>>(knowledge_dir: P) -> Self {
        let knowledge_dir = knowledge_dir.as_ref().to_path_buf();
        let sessions_dir = knowledge_dir.join("sessions");
        Self {
            knowledge_dir,
            sessions_dir,
            exploration_rate: 0.2,
            state: Mutex::new(BrainState {
                strategies: HashMap::new(),
                patterns: Vec::new(),
                insights: json!({}),
                session: None,
                loaded: false,
                dirty: false,
            }),
            moment: None,
            advisor: None,
        }
    }

    /// Attach a moment oracle for the date/numerology-biased strategies
    pub fn with_moment_oracle(mut self, oracle: Arc<dyn MomentOracle>) -> Self {
        self.moment = Some(oracle);
        self
    }

    /// Attach the optional mid-session advisory engine
    pub fn with_advisor(mut self, advisor: Arc<dyn AdvisoryEngine>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    /// Override the default exploration rate used by `start_session`
    pub fn with_exploration_rate(mut self, rate: f64) -> Self {
        self.exploration_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Epsilon-greedy strategy selection.
    ///
    /// With probability `exploration_rate` picks uniformly at random;
    /// otherwise picks the best composite historical value, tie-broken on
    /// enum order. Deterministic at rate 0 with a dominant record.
    pub fn select_strategy(&self, exploration_rate: f64) -> Strategy {
        let mut rng = rand::thread_rng();
        if exploration_rate > 0.0 && rng.gen::<f64>() < exploration_rate {
            let pick = Strategy::ALL[rng.gen_range(0..Strategy::ALL.len())];
            debug!("Strategy selection: exploring -> {}", pick);
            return pick;
        }

        let mut state = self.state.lock();
        self.ensure_loaded(&mut state);

        let now = Utc::now();
        let mut best = Strategy::Random;
        let mut best_value = f64::MIN;
        for strategy in Strategy::ALL {
            let value = state
                .strategies
                .get(strategy.name())
                .map(|record| composite_value(record, now))
                .unwrap_or(0.0);
            if value > best_value {
                best = strategy;
                best_value = value;
            }
        }
        debug!("Strategy selection: exploiting -> {} (value {:.6})", best, best_value);
        best
    }

    /// Generate one candidate key biased by the current session's strategy.
    ///
    /// Always in `[1, secp256k1 order - 1]` regardless of strategy.
    pub fn generate_smart_key(&self) -> BigUint {
        let strategy = self
            .state
            .lock()
            .session
            .as_ref()
            .map(|s| s.strategy)
            .unwrap_or(Strategy::Random);
        self.generate_key_for(strategy)
    }

    /// Generate one candidate key under an explicit strategy
    pub fn generate_key_for(&self, strategy: Strategy) -> BigUint {
        let mut rng = rand::thread_rng();
        let raw = match strategy {
            Strategy::Random => rng.gen_biguint_below(&SECP256K1_ORDER),
            Strategy::NumerologyGuided => {
                let base = rng.gen_biguint_below(&SECP256K1_ORDER);
                match &self.moment {
                    Some(oracle) => {
                        let bias = oracle
                            .moment_digits()
                            .iter()
                            .fold(0u64, |acc, d| acc.wrapping_mul(10).wrapping_add(*d as u64));
                        base + BigUint::from(bias)
                    }
                    // no oracle: degrade to uniform
                    None => base,
                }
            }
            Strategy::PatternReplay => {
                let replay_base = {
                    let mut state = self.state.lock();
                    self.ensure_loaded(&mut state);
                    if state.patterns.is_empty() {
                        None
                    } else {
                        let idx = rng.gen_range(0..state.patterns.len());
                        BigUint::parse_bytes(state.patterns[idx].key.as_bytes(), 16)
                    }
                };
                match replay_base {
                    Some(base) => base + BigUint::from(rng.gen::<u64>()),
                    None => rng.gen_biguint_below(&SECP256K1_ORDER),
                }
            }
            Strategy::EntropyBand => {
                let mut candidate = rng.gen_biguint_below(&SECP256K1_ORDER);
                for _ in 0..16 {
                    if digit_entropy(&format!("{:x}", candidate)) >= 3.0 {
                        break;
                    }
                    candidate = rng.gen_biguint_below(&SECP256K1_ORDER);
                }
                candidate
            }
            Strategy::DateHarmonic => {
                let date_num: u64 = Utc::now()
                    .format("%Y%m%d")
                    .to_string()
                    .parse()
                    .unwrap_or(19700101);
                BigUint::from(date_num) * rng.gen_biguint(192)
            }
        };
        clamp_to_key_range(raw)
    }

    /// Start a brain session: selects a strategy and returns tuned loop
    /// parameters for it.
    pub fn start_session(&self, mode: ScanMode, chains: &[String], tokens: &[String]) -> SessionPlan {
        let strategy = self.select_strategy(self.exploration_rate);
        let session_id = format!(
            "brain_{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );

        let (batch_size, check_interval_secs) = match strategy {
            Strategy::Random => (64, 30),
            Strategy::NumerologyGuided => (32, 45),
            Strategy::PatternReplay => (48, 30),
            Strategy::EntropyBand => (32, 60),
            Strategy::DateHarmonic => (40, 45),
        };

        let mut state = self.state.lock();
        self.ensure_loaded(&mut state);
        state.session = Some(BrainSession {
            id: session_id.clone(),
            strategy,
            mode,
            chains: chains.to_vec(),
            tokens: tokens.to_vec(),
            started: Utc::now(),
            findings: Vec::new(),
        });

        info!("🧠 Brain session {} started with strategy {}", session_id, strategy);
        SessionPlan {
            strategy,
            session_id,
            batch_size,
            check_interval_secs,
        }
    }

    /// Buffer a finding into the session and the capped pattern-discovery
    /// log, attaching a digit-entropy score.
    pub fn record_finding(&self, entry: &Value) {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state);

        let material = entry
            .get("private_key")
            .or_else(|| entry.get("seed_phrase"))
            .or_else(|| entry.get("key"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let entropy = digit_entropy(&material);
        let score = entry.get("score").and_then(Value::as_f64).unwrap_or(0.0);
        let strategy = state
            .session
            .as_ref()
            .map(|s| s.strategy.name().to_string())
            .unwrap_or_else(|| Strategy::Random.name().to_string());

        if state.patterns.len() >= PATTERN_LOG_CAP {
            state.patterns.remove(0);
        }
        state.patterns.push(PatternDiscovery {
            timestamp: Utc::now(),
            key: material,
            score,
            strategy,
            entropy,
        });

        if let Some(session) = state.session.as_mut() {
            let mut enriched = entry.clone();
            if let Some(obj) = enriched.as_object_mut() {
                obj.insert("entropy".to_string(), json!(entropy));
            }
            session.findings.push(enriched);
        }
        state.dirty = true;
    }

    /// Close the session: folds `final_stats` into the strategy's aggregate
    /// record, persists the knowledge store and a dated session snapshot.
    pub fn end_session(&self, final_stats: &Value) -> Result<Value> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state);

        let session = state
            .session
            .take()
            .ok_or_else(|| ScannerError::internal("no active brain session"))?;

        let keys_tested = final_stats.get("keys_tested").and_then(Value::as_u64).unwrap_or(0)
            + final_stats.get("seeds_tested").and_then(Value::as_u64).unwrap_or(0);
        let hits = final_stats.get("hits").and_then(Value::as_u64).unwrap_or(0);
        let high_score = final_stats.get("high_score").and_then(Value::as_f64).unwrap_or(0.0);
        let ended = Utc::now();

        let record = state
            .strategies
            .entry(session.strategy.name().to_string())
            .or_default();
        record.runs += 1;
        record.total_keys += keys_tested;
        record.hits += hits;
        record.patterns += session.findings.len() as u64;
        if high_score >= HIGH_SCORE_THRESHOLD {
            record.high_scores += 1;
        }
        record.last_used = Some(ended);
        let record_snapshot = record.clone();

        // recommendation for the next run: pure exploit over the updated records
        let now = Utc::now();
        let mut recommended = Strategy::Random;
        let mut best_value = f64::MIN;
        for strategy in Strategy::ALL {
            let value = state
                .strategies
                .get(strategy.name())
                .map(|r| composite_value(r, now))
                .unwrap_or(0.0);
            if value > best_value {
                recommended = strategy;
                best_value = value;
            }
        }

        let sessions_seen = state
            .insights
            .get("total_sessions")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        state.insights["total_sessions"] = json!(sessions_seen + 1);
        state.insights["best_strategy"] = json!(recommended.name());
        state.insights["updated_at"] = json!(ended);

        state.dirty = true;
        self.save_knowledge_locked(&mut state)?;

        let session_doc = json!({
            "session_id": session.id,
            "strategy": session.strategy.name(),
            "mode": session.mode,
            "chains": session.chains,
            "tokens": session.tokens,
            "started": session.started,
            "ended": ended,
            "final_stats": final_stats,
            "findings": session.findings,
        });
        let snapshot_path = self.sessions_dir.join(format!("{}.json", session.id));
        std::fs::write(&snapshot_path, serde_json::to_string_pretty(&session_doc)?)?;

        info!(
            "🧠 Brain session {} ended: {} candidates, {} hits under {}",
            session.id, keys_tested, hits, session.strategy
        );

        Ok(json!({
            "session_summary": {
                "session_id": session.id,
                "strategy": session.strategy.name(),
                "started": session.started,
                "ended": ended,
                "keys_tested": keys_tested,
                "hits": hits,
                "high_score": high_score,
                "findings": session.findings.len(),
            },
            "learning_outcomes": {
                "strategy_runs": record_snapshot.runs,
                "strategy_total_keys": record_snapshot.total_keys,
                "strategy_hits": record_snapshot.hits,
                "strategy_high_scores": record_snapshot.high_scores,
                "hit_rate": if keys_tested > 0 { hits as f64 / keys_tested as f64 } else { 0.0 },
            },
            "next_recommendations": {
                "strategy": recommended.name(),
                "exploration_rate": self.exploration_rate,
            },
        }))
    }

    /// Optional mid-session guidance; absent whenever no advisory engine is
    /// attached or it has nothing to say.
    pub fn mid_session_check(&self, stats: &Value) -> Option<Value> {
        let advisor = self.advisor.as_ref()?;
        advisor.advise(stats).map(|guidance| {
            json!({
                "guidance": guidance,
                "checked_at": Utc::now(),
            })
        })
    }

    /// Aggregate record for one strategy, if any sessions ran under it
    pub fn strategy_record(&self, strategy: Strategy) -> Option<StrategyRecord> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state);
        state.strategies.get(strategy.name()).cloned()
    }

    /// Number of entries currently in the pattern-discovery log
    pub fn pattern_count(&self) -> usize {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state);
        state.patterns.len()
    }

    /// Persist the knowledge store to the knowledge directory
    pub fn save_knowledge(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state);
        self.save_knowledge_locked(&mut state)
    }

    /// Explicit knowledge reset: clears memory and removes persisted files
    pub fn reset_knowledge(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.strategies.clear();
        state.patterns.clear();
        state.insights = json!({});
        state.dirty = false;
        state.loaded = true;
        for file in [STRATEGY_LOG_FILE, PATTERNS_FILE, INSIGHTS_FILE] {
            let path = self.knowledge_dir.join(file);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        warn!("Brain knowledge reset at {:?}", self.knowledge_dir);
        Ok(())
    }

    fn ensure_loaded(&self, state: &mut BrainState) {
        if state.loaded {
            return;
        }
        state.strategies = load_json_or_default(&self.knowledge_dir.join(STRATEGY_LOG_FILE));
        state.patterns = load_json_or_default(&self.knowledge_dir.join(PATTERNS_FILE));
        state.insights = load_json_or(&self.knowledge_dir.join(INSIGHTS_FILE), json!({}));
        if !state.insights.is_object() {
            state.insights = json!({});
        }
        state.loaded = true;
        debug!(
            "Brain knowledge loaded: {} strategies, {} patterns",
            state.strategies.len(),
            state.patterns.len()
        );
    }

    fn save_knowledge_locked(&self, state: &mut BrainState) -> Result<()> {
        std::fs::create_dir_all(&self.sessions_dir)?;
        std::fs::write(
            self.knowledge_dir.join(STRATEGY_LOG_FILE),
            serde_json::to_string_pretty(&state.strategies)?,
        )?;
        std::fs::write(
            self.knowledge_dir.join(PATTERNS_FILE),
            serde_json::to_string_pretty(&state.patterns)?,
        )?;
        std::fs::write(
            self.knowledge_dir.join(INSIGHTS_FILE),
            serde_json::to_string_pretty(&state.insights)?,
        )?;
        state.dirty = false;
        Ok(())
    }
}

/// Recency-decayed composite of hit rate, high-score rate and pattern rate.
/// Hit rate dominates (hits per candidate are tiny, so it is rescaled).
fn composite_value(record: &StrategyRecord, now: DateTime<Utc>) -> f64 {
    if record.runs == 0 {
        return 0.0;
    }
    let candidates = record.total_keys.max(1) as f64;
    let runs = record.runs as f64;
    let hit_rate = record.hits as f64 / candidates;
    let high_score_rate = record.high_scores as f64 / runs;
    let pattern_rate = record.patterns as f64 / runs;

    let decay = match record.last_used {
        Some(last) => {
            let days = ((now - last).num_seconds().max(0)) as f64 / 86_400.0;
            0.5f64.powf(days / 7.0)
        }
        None => 1.0,
    };

    (hit_rate * 1_000.0 * 0.5 + high_score_rate * 0.3 + pattern_rate * 0.2) * decay
}

/// Shannon entropy over the characters of a candidate's material
fn digit_entropy(material: &str) -> f64 {
    if material.is_empty() {
        return 0.0;
    }
    let mut counts: HashMap<char, usize> = HashMap::new();
    for c in material.chars() {
        *counts.entry(c).or_insert(0) += 1;
    }
    let len = material.chars().count() as f64;
    counts
        .values()
        .map(|&n| {
            let p = n as f64 / len;
            -p * p.log2()
        })
        .sum()
}

fn load_json_or_default<T: serde::de::DeserializeOwned + Default>(path: &Path) -> T {
    load_json_or(path, T::default())
}

fn load_json_or<T: serde::de::DeserializeOwned>(path: &Path, fallback: T) -> T {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                warn!("Corrupt knowledge file {:?}, starting fresh: {}", path, e);
                fallback
            }
        },
        Err(_) => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{MockAdvisoryEngine, MockMomentOracle};
    use num_traits::One;
    use tempfile::TempDir;

    fn dominant_knowledge(dir: &Path, strategy: Strategy) {
        let mut strategies: HashMap<String, StrategyRecord> = HashMap::new();
        strategies.insert(
            strategy.name().to_string(),
            StrategyRecord {
                runs: 50,
                total_keys: 1_000,
                high_scores: 40,
                patterns: 200,
                hits: 100,
                last_used: Some(Utc::now()),
            },
        );
        strategies.insert(
            Strategy::Random.name().to_string(),
            StrategyRecord {
                runs: 50,
                total_keys: 1_000_000,
                high_scores: 1,
                patterns: 1,
                hits: 1,
                last_used: Some(Utc::now()),
            },
        );
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join(STRATEGY_LOG_FILE),
            serde_json::to_string_pretty(&strategies).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("entropy_band".parse::<Strategy>().unwrap(), Strategy::EntropyBand);
        assert!(matches!(
            "quantum".parse::<Strategy>(),
            Err(ScannerError::InvalidStrategy(s)) if s == "quantum"
        ));
    }

    #[test]
    fn test_selection_deterministic_without_exploration() {
        let dir = TempDir::new().unwrap();
        dominant_knowledge(dir.path(), Strategy::EntropyBand);
        let brain = BrainHandle::new(dir.path());
        for _ in 0..50 {
            assert_eq!(brain.select_strategy(0.0), Strategy::EntropyBand);
        }
    }

    #[test]
    fn test_selection_with_empty_knowledge_falls_back() {
        let dir = TempDir::new().unwrap();
        let brain = BrainHandle::new(dir.path());
        assert_eq!(brain.select_strategy(0.0), Strategy::Random);
    }

    #[test]
    fn test_generated_keys_in_range_for_every_strategy() {
        let dir = TempDir::new().unwrap();
        let brain = BrainHandle::new(dir.path())
            .with_moment_oracle(std::sync::Arc::new(MockMomentOracle));
        for strategy in Strategy::ALL {
            for _ in 0..50 {
                let key = brain.generate_key_for(strategy);
                assert!(key >= BigUint::one(), "{} produced zero", strategy);
                assert!(key < *SECP256K1_ORDER, "{} left the range", strategy);
            }
        }
    }

    #[test]
    fn test_keys_in_range_without_moment_oracle() {
        let dir = TempDir::new().unwrap();
        let brain = BrainHandle::new(dir.path());
        for _ in 0..20 {
            let key = brain.generate_key_for(Strategy::NumerologyGuided);
            assert!(key >= BigUint::one() && key < *SECP256K1_ORDER);
        }
    }

    #[test]
    fn test_pattern_replay_uses_recorded_patterns() {
        let dir = TempDir::new().unwrap();
        let brain = BrainHandle::new(dir.path());
        brain.record_finding(&json!({
            "key": "00000000000000000000000000000000000000000000000000000000000000ff",
            "score": 90.0,
        }));
        assert_eq!(brain.pattern_count(), 1);
        let key = brain.generate_key_for(Strategy::PatternReplay);
        assert!(key >= BigUint::one() && key < *SECP256K1_ORDER);
    }

    #[test]
    fn test_pattern_log_is_capped() {
        let dir = TempDir::new().unwrap();
        let brain = BrainHandle::new(dir.path());
        for i in 0..(PATTERN_LOG_CAP + 10) {
            brain.record_finding(&json!({"key": format!("{:x}", i), "score": 1.0}));
        }
        assert_eq!(brain.pattern_count(), PATTERN_LOG_CAP);
    }

    #[test]
    fn test_session_plan_has_tuned_parameters() {
        let dir = TempDir::new().unwrap();
        let brain = BrainHandle::new(dir.path()).with_exploration_rate(0.0);
        let plan = brain.start_session(ScanMode::RandomKey, &["btc".to_string()], &[]);
        assert!(plan.batch_size > 0);
        assert!(plan.check_interval_secs > 0);
        assert!(plan.session_id.starts_with("brain_"));
    }

    #[test]
    fn test_end_session_folds_into_record_and_persists() {
        let dir = TempDir::new().unwrap();
        let brain = BrainHandle::new(dir.path()).with_exploration_rate(0.0);
        let plan = brain.start_session(ScanMode::RandomKey, &["btc".to_string()], &[]);
        brain.record_finding(&json!({"key": "abc123", "score": 95.0}));

        let outcome = brain
            .end_session(&json!({
                "keys_tested": 500,
                "seeds_tested": 0,
                "hits": 2,
                "high_score": 88.0,
            }))
            .unwrap();

        assert_eq!(outcome["session_summary"]["keys_tested"], 500);
        assert_eq!(outcome["session_summary"]["hits"], 2);
        assert!(outcome["learning_outcomes"]["strategy_runs"].as_u64().unwrap() >= 1);
        assert!(outcome["next_recommendations"]["strategy"].is_string());

        let record = brain.strategy_record(plan.strategy).unwrap();
        assert_eq!(record.runs, 1);
        assert_eq!(record.total_keys, 500);
        assert_eq!(record.hits, 2);
        assert_eq!(record.high_scores, 1);

        assert!(dir.path().join(STRATEGY_LOG_FILE).exists());
        assert!(dir
            .path()
            .join("sessions")
            .join(format!("{}.json", plan.session_id))
            .exists());
    }

    #[test]
    fn test_end_session_without_session_fails() {
        let dir = TempDir::new().unwrap();
        let brain = BrainHandle::new(dir.path());
        assert!(brain.end_session(&json!({})).is_err());
    }

    #[test]
    fn test_knowledge_round_trips_across_instances() {
        let dir = TempDir::new().unwrap();
        let strategy;
        {
            let first = BrainHandle::new(dir.path()).with_exploration_rate(0.0);
            let plan = first.start_session(ScanMode::RandomKey, &["btc".to_string()], &[]);
            strategy = plan.strategy;
            first
                .end_session(&json!({"keys_tested": 100, "hits": 1, "high_score": 10.0}))
                .unwrap();
        }
        let second = BrainHandle::new(dir.path());
        let record = second.strategy_record(strategy).unwrap();
        assert_eq!(record.runs, 1);
        assert_eq!(record.total_keys, 100);
        assert_eq!(record.hits, 1);
    }

    #[test]
    fn test_mid_session_check_absent_without_advisor() {
        let dir = TempDir::new().unwrap();
        let brain = BrainHandle::new(dir.path());
        assert!(brain.mid_session_check(&json!({"hits": 0})).is_none());
    }

    #[test]
    fn test_mid_session_check_with_advisor() {
        let dir = TempDir::new().unwrap();
        let brain = BrainHandle::new(dir.path()).with_advisor(std::sync::Arc::new(
            MockAdvisoryEngine {
                guidance: "rotate strategy".to_string(),
            },
        ));
        let check = brain.mid_session_check(&json!({"hits": 0})).unwrap();
        assert_eq!(check["guidance"], "rotate strategy");
    }

    #[test]
    fn test_reset_knowledge_clears_everything() {
        let dir = TempDir::new().unwrap();
        let brain = BrainHandle::new(dir.path()).with_exploration_rate(0.0);
        brain.start_session(ScanMode::RandomKey, &["btc".to_string()], &[]);
        brain.record_finding(&json!({"key": "ff", "score": 50.0}));
        brain
            .end_session(&json!({"keys_tested": 10, "hits": 0, "high_score": 0.0}))
            .unwrap();

        brain.reset_knowledge().unwrap();
        assert!(brain.strategy_record(Strategy::Random).is_none());
        assert_eq!(brain.pattern_count(), 0);
        assert!(!dir.path().join(STRATEGY_LOG_FILE).exists());
    }

    #[test]
    fn test_digit_entropy() {
        assert_eq!(digit_entropy(""), 0.0);
        assert_eq!(digit_entropy("aaaa"), 0.0);
        assert!(digit_entropy("0123456789abcdef") > 3.9);
        assert!(digit_entropy("ababab") > 0.9 && digit_entropy("ababab") < 1.1);
    }
}
