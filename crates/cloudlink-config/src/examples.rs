// crates/cloudlink-config/src/examples.rs
// ============================================================================
// Module: Config Examples
// Description: Canonical example configuration payload.
// Purpose: Deterministic example for docs and `cloudlink-sync config example`.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Canonical example for the sync agent configuration. The output is static
//! and is parsed by the crate tests so it stays valid.

/// Returns a canonical example `cloudlink-sync.toml` configuration.
#[must_use]
pub fn config_toml_example() -> String {
    String::from(
        r#"[store]
path = "cloudlink-sync.db"
journal_mode = "wal"
sync_mode = "full"
busy_timeout_ms = 5000
read_pool_size = 2

[worker]
queue_capacity = 2048
max_batch_size = 20
max_batch_count = 5
batch_lifetime_secs = 300
cleanup_first_secs = 60
cleanup_interval_secs = 3600
ack_retention_secs = 600
max_acked_rows = 10000

[logging]
level = "info"

[[nodes]]
node_id = "6f1c3e0a-5b2d-4c8e-9a47-1d2e3f405162"
hostname = "edge-01"
os = "linux"
agent_version = "1.0.0"
labels = { role = "edge" }
"#,
    )
}
