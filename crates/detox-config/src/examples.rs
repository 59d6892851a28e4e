// crates/detox-config/src/examples.rs
// ============================================================================
// Module: Config Examples
// Description: Canonical example configuration payload.
// Purpose: Deterministic example for docs and `config example` output.
// Dependencies: std
// ============================================================================

//! Canonical example configuration payload.

/// Returns a canonical example `detox.toml` configuration.
#[must_use]
pub fn config_toml_example() -> String {
    String::from(
        r#"[server]
bind = "127.0.0.1:8080"
max_body_bytes = 65536
allow_non_loopback = false

[server.audit]
enabled = true
# path = "detox-audit.log"

[store]
path = "detox.sqlite"
busy_timeout_ms = 5000
journal_mode = "wal"
sync_mode = "full"
read_pool_size = 4

[report]
default_partition_id = 10
operation = "deletion"
# page_template = "detox.html"
"#,
    )
}
