// crates/detox-core/src/interfaces/mod.rs
// ============================================================================
// Module: Detox Interfaces
// Description: Store seams consumed by the report runtime and HTTP layer.
// Purpose: Keep report logic independent of the database backend.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! The report runtime talks to storage only through these traits. A backend
//! provides cycle lookups ([`CycleCatalog`]), the build-once snapshot cache
//! ([`SnapshotCache`]), and raw cache reads ([`ReportSource`]); report
//! shaping stays in [`crate::core::report`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use thiserror::Error;

use crate::core::identifiers::CycleId;
use crate::core::identifiers::PartitionId;
use crate::core::model::Cycle;
use crate::core::model::CycleOperation;
use crate::core::model::Partition;
use crate::core::pattern::NamePattern;
use crate::core::report::CachedReplica;
use crate::core::report::SiteAggregate;
use crate::core::report::SiteContext;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Snapshot store errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("snapshot store io error: {0}")]
    Io(String),
    /// Database engine error.
    #[error("snapshot store db error: {0}")]
    Db(String),
    /// Stored or supplied data is invalid.
    #[error("snapshot store invalid data: {0}")]
    Invalid(String),
    /// Referenced record does not exist.
    #[error("snapshot store record not found: {0}")]
    NotFound(String),
}

// ============================================================================
// SECTION: Cycle Catalog
// ============================================================================

/// Lookups over cycles and partitions.
pub trait CycleCatalog {
    /// Loads a cycle by identifier, completed or not.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn cycle(&self, id: CycleId) -> Result<Option<Cycle>, StoreError>;

    /// Loads a partition by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn partition_by_id(&self, id: PartitionId) -> Result<Option<Partition>, StoreError>;

    /// Loads a partition by exact name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn partition_by_name(&self, name: &str) -> Result<Option<Partition>, StoreError>;

    /// Returns the completed cycle with the highest id in a partition.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn latest_completed_cycle(
        &self,
        partition: PartitionId,
        operation: CycleOperation,
    ) -> Result<Option<Cycle>, StoreError>;

    /// Returns the completed cycle immediately preceding `cycle` (same
    /// partition and operation).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn previous_completed_cycle(&self, cycle: &Cycle) -> Result<Option<Cycle>, StoreError>;

    /// Lists partitions that have at least one completed cycle of `operation`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn partitions_with_cycles(
        &self,
        operation: CycleOperation,
    ) -> Result<Vec<Partition>, StoreError>;
}

// ============================================================================
// SECTION: Snapshot Cache
// ============================================================================

/// Result of one [`SnapshotCache::ensure_cached`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOutcome {
    /// Cycle the cache was ensured for.
    pub cycle: CycleId,
    /// True when this call computed and inserted the cache.
    pub built: bool,
    /// Rows inserted by this call (zero on a cache hit).
    pub rows_inserted: u64,
}

/// Build-once per-cycle snapshot cache.
pub trait SnapshotCache {
    /// Guarantees the cache for `cycle` exists and records one usage row.
    ///
    /// Idempotent: the first call builds the as-of join of the latest size
    /// snapshot and latest decision at or before `cycle`; later calls only
    /// record usage.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown cycle and other
    /// [`StoreError`] variants when the store is unavailable.
    fn ensure_cached(
        &self,
        cycle: CycleId,
        partition: PartitionId,
    ) -> Result<CacheOutcome, StoreError>;

    /// Returns the number of usage rows recorded for `cycle`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn usage_count(&self, cycle: CycleId) -> Result<u64, StoreError>;
}

// ============================================================================
// SECTION: Report Source
// ============================================================================

/// Raw reads over a cycle's snapshot cache.
///
/// Callers must run [`SnapshotCache::ensure_cached`] first.
pub trait ReportSource {
    /// Sums cached bytes per `(site, decision)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn site_aggregates(&self, cycle: CycleId) -> Result<Vec<SiteAggregate>, StoreError>;

    /// Returns latest quota and status per site as of `cycle`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn site_contexts(
        &self,
        cycle: CycleId,
        partition: PartitionId,
    ) -> Result<Vec<SiteContext>, StoreError>;

    /// Returns cached rows at sites matching `site`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn replicas_at_sites(
        &self,
        cycle: CycleId,
        site: &NamePattern,
    ) -> Result<Vec<CachedReplica>, StoreError>;

    /// Returns cached rows whose dataset matches `dataset`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn replicas_of_datasets(
        &self,
        cycle: CycleId,
        dataset: &NamePattern,
    ) -> Result<Vec<CachedReplica>, StoreError>;

    /// Returns every cached row of the cycle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn all_replicas(&self, cycle: CycleId) -> Result<Vec<CachedReplica>, StoreError>;
}

// ============================================================================
// SECTION: Snapshot Store
// ============================================================================

/// Complete backend for the report runtime.
pub trait SnapshotStore: CycleCatalog + SnapshotCache + ReportSource {
    /// Reports store readiness for liveness/readiness probes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is unavailable.
    fn readiness(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Shared, thread-safe snapshot store handle.
pub type SharedSnapshotStore = Arc<dyn SnapshotStore + Send + Sync>;
