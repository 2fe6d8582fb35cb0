//! Aurum Scanner - Main entry point
//!
//! Wires the vault, brain and terminal pool together and runs a bounded
//! scan. Collaborators run in mock mode unless an external integration is
//! plugged in.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Arg, Command};
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aurum_vault::{SecurityContext, VaultHandle};

use aurum_scanner::{
    collaborators::{MockAddressDeriver, MockBalanceChecker, MockKeyGenerator, MockMomentOracle, MockScorer},
    load_rich_list, BrainHandle, ScannerConfig, SessionManager, SolverDeps, TerminalManager,
    VERSION,
};

fn main() -> anyhow::Result<()> {
    let matches = Command::new("aurum-scanner")
        .version(VERSION)
        .about("Aurum Scanner - adaptive multi-chain key scanning")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("data-dir")
                .short('d')
                .long("data-dir")
                .value_name("PATH")
                .help("Data directory (overrides config)"),
        )
        .arg(
            Arg::new("terminals")
                .short('t')
                .long("terminals")
                .value_name("N")
                .help("Number of terminals to create (overrides config)"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("Scan mode: random_key, seed_phrase or both"),
        )
        .arg(
            Arg::new("duration")
                .long("duration")
                .value_name("SECS")
                .help("How long to scan before shutting down")
                .default_value("30"),
        )
        .arg(
            Arg::new("password")
                .short('p')
                .long("password")
                .value_name("PASSWORD")
                .help("Master password for field encryption (plaintext mode if omitted)"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("OUTPUT")
                .help("Generate example config and exit"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)")
                .default_value("info"),
        )
        .get_matches();

    let log_level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info");
    init_logging(log_level);

    if let Some(output_path) = matches.get_one::<String>("generate-config") {
        let config = ScannerConfig::default();
        config.save_to_file(output_path)?;
        info!("Generated example config at: {}", output_path);
        return Ok(());
    }

    info!(version = VERSION, "🔍 Aurum Scanner starting...");

    // Load configuration, then apply CLI overrides
    let mut config = if let Some(config_path) = matches.get_one::<String>("config") {
        info!("Loading config from: {}", config_path);
        ScannerConfig::from_file(config_path)
            .with_context(|| format!("failed to load config from {}", config_path))?
    } else {
        ScannerConfig::from_env_or_default()
    };
    if let Some(data_dir) = matches.get_one::<String>("data-dir") {
        config.data_dir = data_dir.into();
    }
    if let Some(terminals) = matches.get_one::<String>("terminals") {
        config.terminal_count = terminals
            .parse()
            .with_context(|| format!("invalid terminal count: {}", terminals))?;
    }
    if let Some(mode) = matches.get_one::<String>("mode") {
        config.terminal.mode = mode.parse()?;
    }
    let duration_secs: u64 = matches
        .get_one::<String>("duration")
        .map(String::as_str)
        .unwrap_or("30")
        .parse()
        .context("invalid duration")?;

    // Security + vault
    let security = Arc::new(SecurityContext::new(config.salt_path()));
    if let Some(password) = matches.get_one::<String>("password") {
        if security.set_master_password(password) {
            info!("🔐 Master password set, sensitive fields will be encrypted");
        } else {
            warn!("Master password already set for this process");
        }
    } else {
        warn!("No master password - sensitive fields stored as PLAIN tokens");
    }
    let vault = Arc::new(VaultHandle::open(config.vault_dir(), security).context("failed to open vault")?);
    vault.start_session("scanner");

    // Brain
    let brain = Arc::new(
        BrainHandle::new(config.knowledge_dir())
            .with_moment_oracle(Arc::new(MockMomentOracle))
            .with_exploration_rate(config.brain.exploration_rate),
    );

    // Rich list
    let rich_list = match &config.rich_list_path {
        Some(path) => match load_rich_list(path) {
            Ok(set) => Arc::new(set),
            Err(e) => {
                warn!("Rich list unavailable ({}), continuing without it", e);
                Arc::new(HashSet::new())
            }
        },
        None => Arc::new(HashSet::new()),
    };

    // Collaborators
    let deps = match config.collaborator_mode.as_str() {
        "mock" => {
            warn!("🔶 Using MOCK collaborators for development");
            SolverDeps {
                vault: vault.clone(),
                brain: brain.clone(),
                keygen: Arc::new(MockKeyGenerator),
                deriver: Arc::new(MockAddressDeriver),
                balance: Arc::new(MockBalanceChecker::silent()),
                scorer: Arc::new(MockScorer),
                rich_list,
                checkpoint_dir: config.checkpoint_dir(),
                progress: None,
            }
        }
        other => {
            error!("Unknown collaborator mode: {}", other);
            bail!("unknown collaborator mode: {}", other);
        }
    };

    let sessions = SessionManager::new(config.sessions_dir())?;
    let manager = TerminalManager::new(deps);

    // Create and start terminals
    let settings_doc = serde_json::to_value(&config.terminal)?;
    let mut session_ids = Vec::new();
    for _ in 0..config.terminal_count {
        match manager.create_terminal(config.terminal.clone()) {
            Some(id) => {
                let session_id = sessions.start_session(&id, &settings_doc)?;
                session_ids.push((id, session_id));
            }
            None => {
                warn!("Terminal pool full, requested {} terminals", config.terminal_count);
                break;
            }
        }
    }
    let started = manager.start_all();
    info!("🚀 {} terminals scanning for {}s", started, duration_secs);

    // Scan loop with periodic status reports
    let deadline = Instant::now() + Duration::from_secs(duration_secs);
    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        std::thread::sleep(Duration::from_secs(5).min(remaining));
        let mut total_candidates = 0u64;
        let mut total_hits = 0u64;
        for stats in manager.get_all_stats().values() {
            total_candidates += stats.keys_tested + stats.seeds_tested;
            total_hits += stats.hits;
        }
        info!(
            "⏱ {} active, {} candidates tested, {} hits",
            manager.get_active_count(),
            total_candidates,
            total_hits
        );
    }

    // Shutdown: stop solvers, close sessions, close the vault session
    info!("Shutting down...");
    manager.stop_all();
    for (terminal_id, session_id) in session_ids {
        if let Some(stats) = manager.get_terminal_stats(&terminal_id) {
            let stats_doc = json!({
                "keys_tested": stats.keys_tested,
                "seeds_tested": stats.seeds_tested,
                "hits": stats.hits,
                "high_score": stats.high_score,
            });
            sessions.end_session(&session_id, &stats_doc)?;
        }
    }
    vault.shutdown()?;

    let summary = vault.get_summary()?;
    info!(
        "Aurum Scanner stopped: {} findings recorded ({} with balance)",
        summary.total, summary.with_balance
    );
    Ok(())
}

/// Initialize logging
fn init_logging(log_level: &str) {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => {
            eprintln!("Invalid log level: {}. Using 'info'", log_level);
            tracing::Level::INFO
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("aurum_scanner={},aurum_vault={}", level, level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
