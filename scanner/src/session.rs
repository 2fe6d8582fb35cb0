//! Lightweight per-terminal session log
//!
//! Distinct from vault sessions: this is cross-cutting timing/stats
//! bookkeeping, one JSON document per session under a sessions directory.
//! Documents are written atomically (temp-write-then-rename) so readers
//! never observe a half-written session.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Aggregate over all persisted sessions
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SessionStats {
    pub total_sessions: u64,

    pub total_keys: u64,

    pub total_hits: u64,

    /// Summed duration of ended sessions, seconds
    pub total_duration: f64,
}

/// Session log rooted at one directory
pub struct SessionManager {
    dir: PathBuf,
}

impl SessionManager {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Open a new session for a terminal and persist its document
    pub fn start_session(&self, terminal_id: &str, settings: &Value) -> Result<String> {
        let id = format!(
            "S{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let doc = json!({
            "id": id,
            "terminal_id": terminal_id,
            "started": Utc::now(),
            "ended": null,
            "settings": settings,
            "stats": {},
        });
        self.write_atomic(&id, &doc)?;
        info!("Session {} started for terminal {}", id, terminal_id);
        Ok(id)
    }

    /// Close a session with its final stats. Unknown ids log and no-op.
    pub fn end_session(&self, id: &str, stats: &Value) -> Result<()> {
        let Some(mut doc) = self.get_session(id) else {
            warn!("end_session for unknown session {}, ignoring", id);
            return Ok(());
        };

        let ended = Utc::now();
        let duration = doc
            .get("started")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<DateTime<Utc>>().ok())
            .map(|started| (ended - started).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        doc["ended"] = json!(ended);
        doc["duration"] = json!(duration);
        doc["stats"] = stats.clone();
        self.write_atomic(id, &doc)?;
        info!("Session {} ended ({:.1}s)", id, duration);
        Ok(())
    }

    /// Session document, or `None` for unknown ids and corrupt files
    pub fn get_session(&self, id: &str) -> Option<Value> {
        let path = self.session_path(id);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(doc) => Some(doc),
            Err(e) => {
                debug!("Corrupt session file {:?}: {}", path, e);
                None
            }
        }
    }

    /// Most recent `limit` sessions, newest first
    pub fn list_sessions(&self, limit: usize) -> Vec<Value> {
        let mut sessions = self.load_all();
        sessions.sort_by(|a, b| {
            let started = |v: &Value| {
                v.get("started")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string()
            };
            started(b).cmp(&started(a))
        });
        sessions.truncate(limit);
        sessions
    }

    /// Sums across all persisted sessions; zeroed when none exist
    pub fn get_session_stats(&self) -> SessionStats {
        let mut aggregate = SessionStats {
            total_sessions: 0,
            total_keys: 0,
            total_hits: 0,
            total_duration: 0.0,
        };
        for doc in self.load_all() {
            aggregate.total_sessions += 1;
            if let Some(stats) = doc.get("stats") {
                aggregate.total_keys += stats.get("keys_tested").and_then(Value::as_u64).unwrap_or(0)
                    + stats.get("seeds_tested").and_then(Value::as_u64).unwrap_or(0);
                aggregate.total_hits += stats.get("hits").and_then(Value::as_u64).unwrap_or(0);
            }
            aggregate.total_duration += doc.get("duration").and_then(Value::as_f64).unwrap_or(0.0);
        }
        aggregate
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn write_atomic(&self, id: &str, doc: &Value) -> Result<()> {
        let path = self.session_path(id);
        let tmp = self.dir.join(format!("{}.json.tmp", id));
        std::fs::write(&tmp, serde_json::to_string_pretty(doc)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load_all(&self) -> Vec<Value> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".json")
            })
            .filter_map(|entry| {
                let content = std::fs::read_to_string(entry.path()).ok()?;
                serde_json::from_str(&content).ok()
            })
            .collect()
    }
}
