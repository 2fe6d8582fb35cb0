//! Persisted document types for the vault

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate view over the findings log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSummary {
    /// Total findings recorded
    pub total: u64,

    /// Findings with a non-zero balance
    pub with_balance: u64,

    /// Finding counts per chain
    pub by_chain: HashMap<String, u64>,

    /// Number of vault sessions started
    pub sessions: u64,

    /// Size of the live log in bytes
    pub live_log_bytes: u64,

    /// Snapshot timestamp
    pub generated_at: DateTime<Utc>,
}

/// Per-session metadata document written on shutdown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Session identifier (`<label>_<timestamp>`)
    pub session_id: String,

    /// Session start time
    pub started: DateTime<Utc>,

    /// Session end time
    pub ended: DateTime<Utc>,

    /// Duration in seconds
    pub duration: f64,

    /// Findings recorded during the session
    pub findings: u64,
}
