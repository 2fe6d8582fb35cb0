//! Append-only findings vault
//!
//! Findings are stored as newline-delimited JSON in `vault_live.jsonl`,
//! one object per line, with sensitive fields replaced by their encrypted
//! tokens before the line is written. A single writer lock serializes
//! appends and keeps the total-findings counter exactly equal to the number
//! of persisted lines; reads never go through that lock path.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::security::SecurityContext;
use crate::types::{SessionMeta, VaultSummary};

/// Live findings log file name
const LIVE_LOG: &str = "vault_live.jsonl";

/// Automatic summary cadence (findings since last snapshot)
const SUMMARY_EVERY: u64 = 100;

/// Columns of the CSV export (header is written even for an empty vault)
const CSV_COLUMNS: &[&str] = &["timestamp", "session", "chain", "address", "balance", "score"];

/// Handle to one vault directory.
///
/// Cheap to share via `Arc`; all methods take `&self`.
pub struct VaultHandle {
    root: PathBuf,
    sessions_dir: PathBuf,
    summaries_dir: PathBuf,
    live_log: PathBuf,
    security: Arc<SecurityContext>,

    /// Guards the live log and its counters (single-writer invariant)
    writer: Mutex<WriterState>,

    /// Current vault session, if any
    session: RwLock<Option<SessionState>>,
}

struct WriterState {
    total_findings: u64,
    since_summary: u64,
    sessions_started: u64,
}

struct SessionState {
    id: String,
    started: DateTime<Utc>,
    findings: u64,
}

impl VaultHandle {
    /// Open (and idempotently initialize) a vault directory.
    ///
    /// Restores the total-findings counter from the live log so that the
    /// counter always equals the number of persisted lines, including after
    /// a crash or restart.
    pub fn open<P: AsRef<Path>>(root: P, security: Arc<SecurityContext>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let sessions_dir = root.join("sessions");
        let summaries_dir = root.join("summaries");
        std::fs::create_dir_all(&sessions_dir)?;
        std::fs::create_dir_all(&summaries_dir)?;

        let live_log = root.join(LIVE_LOG);
        let total_findings = count_lines(&live_log)?;
        let sessions_started = count_session_files(&sessions_dir);

        info!(
            "Vault opened at {:?}: {} findings, {} past sessions",
            root, total_findings, sessions_started
        );

        Ok(Self {
            root,
            sessions_dir,
            summaries_dir,
            live_log,
            security,
            writer: Mutex::new(WriterState {
                total_findings,
                since_summary: 0,
                sessions_started,
            }),
            session: RwLock::new(None),
        })
    }

    /// Vault root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a new vault session and make it the current one.
    pub fn start_session(&self, label: &str) -> String {
        let started = Utc::now();
        let id = format!("{}_{}", label, started.format("%Y%m%d_%H%M%S"));
        *self.session.write() = Some(SessionState {
            id: id.clone(),
            started,
            findings: 0,
        });
        self.writer.lock().sessions_started += 1;
        info!("Vault session started: {}", id);
        id
    }

    /// Identifier of the current session, if one is active.
    pub fn current_session(&self) -> Option<String> {
        self.session.read().as_ref().map(|s| s.id.clone())
    }

    /// Record one finding.
    ///
    /// Returns `Ok(false)` for any non-object value (nothing is written).
    /// Otherwise attaches timestamp + session id, encrypts sensitive fields,
    /// and appends exactly one line to the live log. Every 100 findings
    /// since the last snapshot an automatic summary is written.
    pub fn record_finding(&self, finding: &Value) -> Result<bool> {
        let map = match finding.as_object() {
            Some(m) => m.clone(),
            None => {
                debug!("Ignoring non-object finding");
                return Ok(false);
            }
        };

        let mut entry = map;
        entry.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
        let session_id = self.current_session().unwrap_or_else(|| "none".to_string());
        entry.insert("session".to_string(), json!(session_id));

        let encrypted = self.security.encrypt_fields(&Value::Object(entry));
        let line = serde_json::to_string(&encrypted)?;

        {
            let mut state = self.writer.lock();
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.live_log)?;
            writeln!(file, "{}", line)?;
            file.flush()?;

            state.total_findings += 1;
            state.since_summary += 1;
            if state.since_summary >= SUMMARY_EVERY {
                state.since_summary = 0;
                let total = state.total_findings;
                let sessions = state.sessions_started;
                if let Err(e) = self.write_summary(total, sessions) {
                    warn!("Automatic summary write failed: {}", e);
                }
            }
        }

        if let Some(session) = self.session.write().as_mut() {
            session.findings += 1;
        }
        Ok(true)
    }

    /// Return the most recent `limit` findings in insertion order.
    ///
    /// Corrupt lines are skipped, never fatal. With `decrypt` set, sensitive
    /// fields are decrypted; a failed authentication tag is surfaced.
    pub fn get_findings(&self, limit: usize, decrypt: bool) -> Result<Vec<Value>> {
        let entries = self.read_log()?;
        let skip = entries.len().saturating_sub(limit);
        let recent = entries.into_iter().skip(skip);

        if decrypt {
            recent
                .map(|entry| self.security.decrypt_fields(&entry))
                .collect()
        } else {
            Ok(recent.collect())
        }
    }

    /// Aggregate view over the whole findings log.
    pub fn get_summary(&self) -> Result<VaultSummary> {
        let (total, sessions) = {
            let state = self.writer.lock();
            (state.total_findings, state.sessions_started)
        };
        self.compute_summary(total, sessions)
    }

    /// Export all findings as CSV. The header row is always present, even
    /// for an empty vault. Writes to a temporary file and atomically renames
    /// it into place.
    pub fn export_csv(&self, path: Option<PathBuf>) -> Result<PathBuf> {
        let path = path.unwrap_or_else(|| {
            self.root
                .join(format!("vault_export_{}.csv", Utc::now().format("%Y%m%d_%H%M%S")))
        });
        let tmp = temp_sibling(&path);

        {
            let mut file = File::create(&tmp)?;
            writeln!(file, "{}", CSV_COLUMNS.join(","))?;
            for entry in self.read_log()? {
                let row: Vec<String> = CSV_COLUMNS
                    .iter()
                    .map(|col| csv_field(entry.get(*col)))
                    .collect();
                writeln!(file, "{}", row.join(","))?;
            }
            file.flush()?;
        }

        std::fs::rename(&tmp, &path)?;
        info!("Exported findings to {:?}", path);
        Ok(path)
    }

    /// Export all findings as a JSON array (same atomic-replace discipline
    /// as the CSV export).
    pub fn export_json(&self, path: Option<PathBuf>) -> Result<PathBuf> {
        let path = path.unwrap_or_else(|| {
            self.root
                .join(format!("vault_export_{}.json", Utc::now().format("%Y%m%d_%H%M%S")))
        });
        let tmp = temp_sibling(&path);

        let entries = self.read_log()?;
        std::fs::write(&tmp, serde_json::to_string_pretty(&entries)?)?;
        std::fs::rename(&tmp, &path)?;
        info!("Exported findings to {:?}", path);
        Ok(path)
    }

    /// Close the current session: writes its metadata document and a final
    /// summary snapshot.
    pub fn shutdown(&self) -> Result<()> {
        if let Some(session) = self.session.write().take() {
            let ended = Utc::now();
            let meta = SessionMeta {
                session_id: session.id.clone(),
                started: session.started,
                ended,
                duration: (ended - session.started).num_milliseconds() as f64 / 1000.0,
                findings: session.findings,
            };
            let path = self.sessions_dir.join(format!("{}_meta.json", session.id));
            std::fs::write(&path, serde_json::to_string_pretty(&meta)?)?;
            info!("Vault session closed: {} ({} findings)", session.id, session.findings);
        }

        let (total, sessions) = {
            let state = self.writer.lock();
            (state.total_findings, state.sessions_started)
        };
        self.write_summary(total, sessions)?;
        Ok(())
    }

    fn compute_summary(&self, total: u64, sessions: u64) -> Result<VaultSummary> {
        let mut with_balance = 0u64;
        let mut by_chain: HashMap<String, u64> = HashMap::new();
        for entry in self.read_log()? {
            if entry.get("balance").and_then(Value::as_f64).unwrap_or(0.0) > 0.0 {
                with_balance += 1;
            }
            if let Some(chain) = entry.get("chain").and_then(Value::as_str) {
                *by_chain.entry(chain.to_string()).or_insert(0) += 1;
            }
        }
        let live_log_bytes = std::fs::metadata(&self.live_log)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(VaultSummary {
            total,
            with_balance,
            by_chain,
            sessions,
            live_log_bytes,
            generated_at: Utc::now(),
        })
    }

    fn write_summary(&self, total: u64, sessions: u64) -> Result<()> {
        let summary = self.compute_summary(total, sessions)?;
        let path = self.summaries_dir.join(format!(
            "summary_{}.json",
            Utc::now().format("%Y%m%d_%H%M%S%3f")
        ));
        std::fs::write(&path, serde_json::to_string_pretty(&summary)?)?;
        debug!("Summary snapshot written to {:?}", path);
        Ok(())
    }

    fn read_log(&self) -> Result<Vec<Value>> {
        if !self.live_log.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.live_log)?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(&line) {
                Ok(value) => entries.push(value),
                Err(e) => warn!("Skipping corrupt vault line: {}", e),
            }
        }
        Ok(entries)
    }
}

fn count_lines(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let reader = BufReader::new(File::open(path)?);
    Ok(reader.lines().count() as u64)
}

fn count_session_files(dir: &Path) -> u64 {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.file_name().to_string_lossy().ends_with("_meta.json"))
                .count() as u64
        })
        .unwrap_or(0)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "export".to_string());
    name.push_str(".tmp");
    path.with_file_name(name)
}

fn csv_field(value: Option<&Value>) -> String {
    let raw = match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn vault() -> (TempDir, VaultHandle) {
        let dir = TempDir::new().unwrap();
        let security = Arc::new(SecurityContext::new(dir.path().join(".salt")));
        let vault = VaultHandle::open(dir.path().join("findings"), security).unwrap();
        (dir, vault)
    }

    #[test]
    fn test_open_creates_directories() {
        let (dir, _vault) = vault();
        assert!(dir.path().join("findings/sessions").exists());
        assert!(dir.path().join("findings/summaries").exists());
    }

    #[test]
    fn test_start_session_id_format() {
        let (_dir, vault) = vault();
        let id = vault.start_session("test_scan");
        assert!(id.starts_with("test_scan_"));
        assert_eq!(vault.current_session().unwrap(), id);
    }

    #[test]
    fn test_record_finding_appends_one_line() {
        let (dir, vault) = vault();
        vault.start_session("test");
        let ok = vault
            .record_finding(&json!({
                "address": "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa",
                "chain": "btc",
                "balance": 0,
            }))
            .unwrap();
        assert!(ok);

        let content = std::fs::read_to_string(dir.path().join("findings/vault_live.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);
        let entry: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(entry["address"], "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa");
        assert!(entry.get("timestamp").is_some());
        assert!(entry.get("session").is_some());
    }

    #[test]
    fn test_record_finding_rejects_non_object() {
        let (_dir, vault) = vault();
        vault.start_session("invalid");
        assert!(!vault.record_finding(&json!("not a dict")).unwrap());
        assert!(!vault.record_finding(&Value::Null).unwrap());
        assert!(!vault.record_finding(&json!(true)).unwrap());
        assert!(!vault.record_finding(&json!([1, 2, 3])).unwrap());
        assert_eq!(vault.get_summary().unwrap().total, 0);
    }

    #[test]
    fn test_sensitive_fields_encrypted_on_disk() {
        let (dir, vault) = vault();
        vault.security.set_master_password("testpass");
        vault.start_session("enc_test");
        vault
            .record_finding(&json!({
                "address": "1Test",
                "private_key": "5HueCGU8rMjxEXxiPuD5BDku4MkFqeZyd4dZ1jvhTVqvbTLvyTJ",
                "chain": "btc",
            }))
            .unwrap();

        let content = std::fs::read_to_string(dir.path().join("findings/vault_live.jsonl")).unwrap();
        let entry: Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert!(entry["private_key"].as_str().unwrap().starts_with("ENC:"));
        assert_eq!(entry["address"], "1Test");

        let decrypted = vault.get_findings(10, true).unwrap();
        assert_eq!(
            decrypted[0]["private_key"],
            "5HueCGU8rMjxEXxiPuD5BDku4MkFqeZyd4dZ1jvhTVqvbTLvyTJ"
        );
    }

    #[test]
    fn test_get_findings_last_n_in_order() {
        let (_dir, vault) = vault();
        vault.start_session("limit_test");
        for i in 0..10 {
            vault
                .record_finding(&json!({"address": format!("addr_{}", i), "chain": "btc"}))
                .unwrap();
        }
        let findings = vault.get_findings(3, false).unwrap();
        assert_eq!(findings.len(), 3);
        assert_eq!(findings[0]["address"], "addr_7");
        assert_eq!(findings[1]["address"], "addr_8");
        assert_eq!(findings[2]["address"], "addr_9");
    }

    #[test]
    fn test_corrupt_lines_skipped() {
        let (dir, vault) = vault();
        vault.start_session("corrupt");
        vault.record_finding(&json!({"address": "a1", "chain": "btc"})).unwrap();
        let log = dir.path().join("findings/vault_live.jsonl");
        let mut content = std::fs::read_to_string(&log).unwrap();
        content.push_str("{this is not json\n");
        std::fs::write(&log, content).unwrap();
        vault.record_finding(&json!({"address": "a2", "chain": "btc"})).unwrap();

        let findings = vault.get_findings(10, false).unwrap();
        assert_eq!(findings.len(), 2);
    }

    #[test]
    fn test_summary_counts() {
        let (_dir, vault) = vault();
        vault.start_session("summary_test");
        vault.record_finding(&json!({"chain": "btc", "balance": 0})).unwrap();
        vault.record_finding(&json!({"chain": "eth", "balance": 1.5})).unwrap();
        vault.record_finding(&json!({"chain": "btc", "balance": 0.1})).unwrap();

        let summary = vault.get_summary().unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.with_balance, 2);
        assert_eq!(summary.by_chain["btc"], 2);
        assert_eq!(summary.by_chain["eth"], 1);
        assert_eq!(summary.sessions, 1);
        assert!(summary.live_log_bytes > 0);
    }

    #[test]
    fn test_counter_restored_on_reopen() {
        let dir = TempDir::new().unwrap();
        let security = Arc::new(SecurityContext::new(dir.path().join(".salt")));
        let root = dir.path().join("findings");
        {
            let vault = VaultHandle::open(&root, security.clone()).unwrap();
            vault.start_session("restart");
            for _ in 0..5 {
                vault.record_finding(&json!({"chain": "btc"})).unwrap();
            }
        }
        let reopened = VaultHandle::open(&root, security).unwrap();
        assert_eq!(reopened.get_summary().unwrap().total, 5);
    }

    #[test]
    fn test_export_csv_header_and_rows() {
        let (_dir, vault) = vault();
        vault.start_session("csv_test");
        vault
            .record_finding(&json!({"address": "addr1", "chain": "btc", "balance": 0}))
            .unwrap();

        let out = vault.export_csv(None).unwrap();
        let content = std::fs::read_to_string(&out).unwrap();
        assert!(content.starts_with("timestamp,session,chain,address,balance,score"));
        assert!(content.contains("addr1"));
        assert!(!out.with_file_name(format!(
            "{}.tmp",
            out.file_name().unwrap().to_string_lossy()
        ))
        .exists());
    }

    #[test]
    fn test_export_csv_empty_vault_has_header() {
        let (_dir, vault) = vault();
        let out = vault.export_csv(None).unwrap();
        let content = std::fs::read_to_string(&out).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn test_export_json() {
        let (_dir, vault) = vault();
        vault.start_session("json_test");
        vault
            .record_finding(&json!({"address": "addr2", "chain": "eth", "balance": 0}))
            .unwrap();

        let out = vault.export_json(None).unwrap();
        let data: Vec<Value> =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["address"], "addr2");
    }

    #[test]
    fn test_shutdown_writes_session_meta() {
        let (dir, vault) = vault();
        let session_id = vault.start_session("shutdown_test");
        vault.record_finding(&json!({"address": "final", "chain": "btc"})).unwrap();
        vault.shutdown().unwrap();

        let meta_path = dir
            .path()
            .join("findings/sessions")
            .join(format!("{}_meta.json", session_id));
        let meta: SessionMeta =
            serde_json::from_str(&std::fs::read_to_string(meta_path).unwrap()).unwrap();
        assert_eq!(meta.session_id, session_id);
        assert_eq!(meta.findings, 1);
        assert!(meta.ended >= meta.started);
        assert!(vault.current_session().is_none());
    }

    #[test]
    fn test_automatic_summary_after_100() {
        let (dir, vault) = vault();
        vault.start_session("summary_100");
        for i in 0..101 {
            vault
                .record_finding(&json!({"address": format!("a{}", i), "chain": "btc"}))
                .unwrap();
        }
        let summaries: Vec<_> = std::fs::read_dir(dir.path().join("findings/summaries"))
            .unwrap()
            .flatten()
            .collect();
        assert!(!summaries.is_empty());
    }

    #[test]
    fn test_concurrent_writers_exact_total() {
        let dir = TempDir::new().unwrap();
        let security = Arc::new(SecurityContext::new(dir.path().join(".salt")));
        let vault = Arc::new(VaultHandle::open(dir.path().join("findings"), security).unwrap());
        vault.start_session("thread_test");

        let handles: Vec<_> = (0..50)
            .map(|t| {
                let vault = vault.clone();
                std::thread::spawn(move || {
                    for i in 0..10 {
                        let ok = vault
                            .record_finding(&json!({
                                "address": format!("t{}_a{}", t, i),
                                "chain": "btc",
                            }))
                            .unwrap();
                        assert!(ok);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(vault.get_summary().unwrap().total, 500);
        let findings = vault.get_findings(1000, false).unwrap();
        assert_eq!(findings.len(), 500);
    }
}
