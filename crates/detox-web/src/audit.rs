// crates/detox-web/src/audit.rs
// ============================================================================
// Module: Request Audit Logging
// Description: Structured audit events for report request handling.
// Purpose: Emit one JSON line per request without hard logging dependencies.
// Dependencies: detox-core, detox-config, serde, serde_json
// ============================================================================

//! ## Overview
//! Audit events record which cycle a request resolved to, whether its cache
//! was built or reused, and how the request ended. Sinks write JSON lines to
//! stderr or an append-only file so deployments can route them to their own
//! log pipeline.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use detox_config::ServerAuditConfig;
use detox_core::CacheOutcome;
use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Final outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Response carried the requested payload.
    Ok,
    /// Request parameters were rejected.
    Rejected,
    /// Store or runtime failure.
    Failed,
}

/// Cache work attributed to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheAuditEntry {
    /// Cycle whose cache was ensured.
    pub cycle: u64,
    /// `built` when this request populated the cache, `hit` otherwise.
    pub outcome: &'static str,
    /// Rows inserted by the build.
    pub rows_inserted: u64,
}

impl From<&CacheOutcome> for CacheAuditEntry {
    fn from(outcome: &CacheOutcome) -> Self {
        Self {
            cycle: outcome.cycle.get(),
            outcome: if outcome.built { "built" } else { "hit" },
            rows_inserted: outcome.rows_inserted,
        }
    }
}

/// Report request audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Action label of the request.
    pub action: &'static str,
    /// Resolved cycle number (`0` when none resolved).
    pub cycle: u64,
    /// Resolved partition identifier, when resolution ran.
    pub partition: Option<u64>,
    /// Request outcome.
    pub outcome: AuditOutcome,
    /// HTTP status code.
    pub status: u16,
    /// Cache ensure results in call order.
    pub cache: Vec<CacheAuditEntry>,
    /// Handling latency in milliseconds.
    pub latency_ms: u128,
    /// Error message for rejected or failed requests.
    pub error: Option<String>,
}

/// Inputs required to construct an audit event.
pub struct AuditEventParams {
    /// Action label of the request.
    pub action: &'static str,
    /// Resolved cycle number.
    pub cycle: u64,
    /// Resolved partition identifier.
    pub partition: Option<u64>,
    /// Request outcome.
    pub outcome: AuditOutcome,
    /// HTTP status code.
    pub status: u16,
    /// Cache ensure results.
    pub cache: Vec<CacheOutcome>,
    /// Handling latency in milliseconds.
    pub latency_ms: u128,
    /// Error message, when any.
    pub error: Option<String>,
}

impl AuditEvent {
    /// Creates a new audit event with a consistent timestamp.
    #[must_use]
    pub fn new(params: AuditEventParams) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            event: "detox_request",
            timestamp_ms,
            action: params.action,
            cycle: params.cycle,
            partition: params.partition,
            outcome: params.outcome,
            status: params.status,
            cache: params.cache.iter().map(CacheAuditEntry::from).collect(),
            latency_ms: params.latency_ms,
            error: params.error,
        }
    }
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Audit sink for report request events.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: &AuditEvent);
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that logs JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &AuditEvent) {}
}

/// Builds the sink selected by `server.audit`.
///
/// # Errors
///
/// Returns an error when the configured audit file cannot be opened.
pub fn audit_sink_from_config(config: &ServerAuditConfig) -> io::Result<Arc<dyn AuditSink>> {
    if !config.enabled {
        return Ok(Arc::new(NoopAuditSink));
    }
    match config.path.as_deref() {
        Some(path) => Ok(Arc::new(FileAuditSink::new(Path::new(path))?)),
        None => Ok(Arc::new(StderrAuditSink)),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions use unwrap for clarity.")]

    use detox_core::CycleId;

    use super::*;

    #[test]
    fn file_sink_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let sink = FileAuditSink::new(&path).unwrap();
        for status in [200, 400] {
            sink.record(&AuditEvent::new(AuditEventParams {
                action: "summary",
                cycle: 7,
                partition: Some(10),
                outcome: AuditOutcome::Ok,
                status,
                cache: vec![CacheOutcome {
                    cycle: CycleId::from_raw(7).unwrap(),
                    built: status == 200,
                    rows_inserted: 3,
                }],
                latency_ms: 1,
                error: None,
            }));
        }
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> =
            content.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["cache"][0]["outcome"], "built");
        assert_eq!(lines[1]["cache"][0]["outcome"], "hit");
        assert_eq!(lines[1]["status"], 400);
    }

    #[test]
    fn disabled_audit_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let config = ServerAuditConfig {
            enabled: false,
            path: Some(path.to_string_lossy().into_owned()),
        };
        let _sink = audit_sink_from_config(&config).unwrap();
        assert!(!path.exists());
    }
}
