// crates/detox-store-sqlite/src/lib.rs
// ============================================================================
// Module: Detox SQLite Store Library
// Description: SQLite backend for the Detox snapshot store.
// Purpose: Persist cycle facts and serve per-cycle snapshot caches.
// Dependencies: detox-core, rusqlite, serde, thiserror
// ============================================================================

//! ## Overview
//! [`SqliteSnapshotStore`] implements [`detox_core::SnapshotStore`] over a
//! single `SQLite` file: one writer connection for imports and cache builds,
//! a small pool of read connections for report queries.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::ImportSummary;
pub use store::SqliteSnapshotStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
