//! Collaborator interfaces
//!
//! Key/mnemonic generation, address derivation, balance lookup and scoring
//! are implemented outside this core. The scanner consumes them through the
//! traits below; mock implementations back the tests and the CLI's mock mode.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use num_bigint::{BigUint, RandBigInt};
use num_traits::One;
use once_cell::sync::Lazy;
use rand::Rng;
use serde_json::Value;
use tracing::info;

use crate::error::Result;

/// Order of the secp256k1 curve; valid private keys live in `[1, order - 1]`
pub static SECP256K1_ORDER: Lazy<BigUint> = Lazy::new(|| {
    BigUint::parse_bytes(
        b"FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEBAAEDCE6AF48A03BBFD25E8CD0364141",
        16,
    )
    .expect("secp256k1 order constant")
});

/// Clamp any non-negative integer into the valid private-key range
/// `[1, order - 1]`. This is the single funnel every candidate generator
/// goes through.
pub fn clamp_to_key_range(value: BigUint) -> BigUint {
    let span = &*SECP256K1_ORDER - BigUint::one();
    (value % span) + BigUint::one()
}

/// One scan candidate: either a raw private-key integer or a seed phrase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    Key(BigUint),
    Seed(String),
}

impl Candidate {
    /// Material persisted into a finding on a hit (hex key or the phrase)
    pub fn material(&self) -> String {
        match self {
            Candidate::Key(k) => format!("{:064x}", k),
            Candidate::Seed(s) => s.clone(),
        }
    }

    /// Sensitive field name this candidate's material is stored under
    pub fn field_name(&self) -> &'static str {
        match self {
            Candidate::Key(_) => "private_key",
            Candidate::Seed(_) => "seed_phrase",
        }
    }
}

/// Per-chain balance lookup result
#[derive(Debug, Clone, Default)]
pub struct BalanceReport {
    /// Balance per chain, in that chain's native unit
    pub per_chain: HashMap<String, f64>,

    /// True when any chain reported a non-zero balance
    pub any_balance: bool,
}

/// Composite score for a candidate
#[derive(Debug, Clone, Copy)]
pub struct ScoreReport {
    pub total: f64,
}

/// Batch key/mnemonic generation
pub trait KeyGenerator: Send + Sync {
    fn generate_keys_batch(&self, n: usize) -> Vec<BigUint>;

    fn generate_seeds_batch(&self, n: usize) -> Vec<String>;
}

/// Multi-chain address derivation (BIP32/39 and friends live behind this)
pub trait AddressDeriver: Send + Sync {
    /// Derive one address per requested chain. Failures are per-candidate
    /// and the scan loop absorbs them.
    fn derive_addresses(
        &self,
        candidate: &Candidate,
        chains: &[String],
    ) -> Result<HashMap<String, String>>;
}

/// Online balance lookup against the chains
pub trait BalanceChecker: Send + Sync {
    fn check_all_balances(
        &self,
        addresses: &HashMap<String, String>,
        tokens: &[String],
    ) -> Result<BalanceReport>;
}

/// Numeric scoring heuristics
pub trait Scorer: Send + Sync {
    fn hybrid_score(&self, candidate: &Candidate) -> ScoreReport;
}

/// Source of "current moment" digits for the date/numerology-biased
/// strategies. Optional - a missing oracle degrades those strategies to
/// uniform sampling.
pub trait MomentOracle: Send + Sync {
    fn moment_digits(&self) -> Vec<u8>;
}

/// Optional external assist consulted by `mid_session_check`. When absent
/// the check returns nothing rather than failing.
pub trait AdvisoryEngine: Send + Sync {
    fn advise(&self, stats: &Value) -> Option<String>;
}

/// Load a rich list (one address per line, `#` comments and blanks skipped)
/// into an in-memory set for the cheap local pre-check.
pub fn load_rich_list<P: AsRef<Path>>(path: P) -> Result<HashSet<String>> {
    let content = std::fs::read_to_string(&path)?;
    let set: HashSet<String> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect();
    info!("Loaded {} rich-list addresses from {:?}", set.len(), path.as_ref());
    Ok(set)
}

// ---------------------------------------------------------------------------
// Mock implementations (tests and the CLI's mock mode)
// ---------------------------------------------------------------------------

/// Uniform random keys and fixed-wordlist seeds
#[derive(Debug, Default)]
pub struct MockKeyGenerator;

const MOCK_WORDS: &[&str] = &[
    "abandon", "ability", "able", "about", "above", "absent", "absorb",
    "abstract", "absurd", "abuse", "access", "accident",
];

impl KeyGenerator for MockKeyGenerator {
    fn generate_keys_batch(&self, n: usize) -> Vec<BigUint> {
        let mut rng = rand::thread_rng();
        (0..n)
            .map(|_| clamp_to_key_range(rng.gen_biguint_below(&SECP256K1_ORDER)))
            .collect()
    }

    fn generate_seeds_batch(&self, n: usize) -> Vec<String> {
        let mut rng = rand::thread_rng();
        (0..n)
            .map(|_| {
                (0..12)
                    .map(|_| MOCK_WORDS[rng.gen_range(0..MOCK_WORDS.len())])
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }
}

/// Deterministic pseudo-addresses: `<chain>:<first 16 hex chars of material>`
#[derive(Debug, Default)]
pub struct MockAddressDeriver;

impl AddressDeriver for MockAddressDeriver {
    fn derive_addresses(
        &self,
        candidate: &Candidate,
        chains: &[String],
    ) -> Result<HashMap<String, String>> {
        let material = candidate.material();
        let stem: String = material.chars().take(16).collect();
        Ok(chains
            .iter()
            .map(|chain| (chain.clone(), format!("{}:{}", chain, stem)))
            .collect())
    }
}

/// Reports a balance hit on every `hit_every`th call (never, when zero)
#[derive(Debug)]
pub struct MockBalanceChecker {
    hit_every: u64,
    calls: AtomicU64,
}

impl MockBalanceChecker {
    pub fn new(hit_every: u64) -> Self {
        Self {
            hit_every,
            calls: AtomicU64::new(0),
        }
    }

    /// A checker that never reports a balance
    pub fn silent() -> Self {
        Self::new(0)
    }
}

impl BalanceChecker for MockBalanceChecker {
    fn check_all_balances(
        &self,
        addresses: &HashMap<String, String>,
        _tokens: &[String],
    ) -> Result<BalanceReport> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let hit = self.hit_every > 0 && call % self.hit_every == 0;

        let mut per_chain = HashMap::new();
        for chain in addresses.keys() {
            per_chain.insert(chain.clone(), if hit { 0.001 } else { 0.0 });
        }
        Ok(BalanceReport {
            per_chain,
            any_balance: hit,
        })
    }
}

/// Scores by distinct-hex-digit diversity, scaled to 0..100
#[derive(Debug, Default)]
pub struct MockScorer;

impl Scorer for MockScorer {
    fn hybrid_score(&self, candidate: &Candidate) -> ScoreReport {
        let material = candidate.material();
        let distinct: HashSet<char> = material.chars().collect();
        ScoreReport {
            total: (distinct.len() as f64 / 16.0 * 100.0).min(100.0),
        }
    }
}

/// Moment digits taken from the current UTC timestamp
#[derive(Debug, Default)]
pub struct MockMomentOracle;

impl MomentOracle for MockMomentOracle {
    fn moment_digits(&self) -> Vec<u8> {
        chrono::Utc::now()
            .format("%Y%m%d%H%M%S")
            .to_string()
            .bytes()
            .map(|b| b - b'0')
            .collect()
    }
}

/// Canned guidance for tests of the mid-session check
#[derive(Debug)]
pub struct MockAdvisoryEngine {
    pub guidance: String,
}

impl AdvisoryEngine for MockAdvisoryEngine {
    fn advise(&self, _stats: &Value) -> Option<String> {
        Some(self.guidance.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::Zero;

    #[test]
    fn test_clamp_never_leaves_range() {
        assert_eq!(clamp_to_key_range(BigUint::zero()), BigUint::one());
        let clamped = clamp_to_key_range(SECP256K1_ORDER.clone() * 7u32);
        assert!(clamped >= BigUint::one());
        assert!(clamped < *SECP256K1_ORDER);
    }

    #[test]
    fn test_mock_keys_in_range() {
        let keys = MockKeyGenerator.generate_keys_batch(64);
        assert_eq!(keys.len(), 64);
        for key in keys {
            assert!(key >= BigUint::one());
            assert!(key < *SECP256K1_ORDER);
        }
    }

    #[test]
    fn test_mock_seeds_have_twelve_words() {
        for seed in MockKeyGenerator.generate_seeds_batch(8) {
            assert_eq!(seed.split_whitespace().count(), 12);
        }
    }

    #[test]
    fn test_mock_deriver_is_deterministic() {
        let candidate = Candidate::Key(BigUint::from(42u32));
        let chains = vec!["btc".to_string(), "eth".to_string()];
        let a = MockAddressDeriver.derive_addresses(&candidate, &chains).unwrap();
        let b = MockAddressDeriver.derive_addresses(&candidate, &chains).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert!(a["btc"].starts_with("btc:"));
    }

    #[test]
    fn test_mock_balance_checker_cadence() {
        let checker = MockBalanceChecker::new(3);
        let mut addresses = HashMap::new();
        addresses.insert("btc".to_string(), "btc:abc".to_string());

        let hits: Vec<bool> = (0..6)
            .map(|_| checker.check_all_balances(&addresses, &[]).unwrap().any_balance)
            .collect();
        assert_eq!(hits, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn test_load_rich_list_skips_comments() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rich.txt");
        std::fs::write(&path, "# known whales\n1Addr\n\n  2Addr  \n").unwrap();
        let set = load_rich_list(&path).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains("1Addr"));
        assert!(set.contains("2Addr"));
    }
}
