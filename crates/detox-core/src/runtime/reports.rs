// crates/detox-core/src/runtime/reports.rs
// ============================================================================
// Module: Report Runtime
// Description: Ensure snapshot caches, then assemble report responses.
// Purpose: Single entry point per report kind for the HTTP and CLI layers.
// Dependencies: crate::{core, interfaces, runtime::resolve}
// ============================================================================

//! ## Overview
//! Each function takes an already resolved cycle. When no completed cycle
//! exists the report is built from no rows and the store is not touched.
//! Otherwise the cycle's cache is ensured first (and, for the summary, the
//! previous cycle's too) so every read sees a fully built cache.
//! The returned [`Reported::cache`] lists every ensure call for audit logs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::inventory::InventoryCategory;
use crate::core::inventory::InventoryReport;
use crate::core::inventory::build_inventory;
use crate::core::model::Cycle;
use crate::core::model::CycleOperation;
use crate::core::model::Partition;
use crate::core::pattern::NamePattern;
use crate::core::report::CachedReplica;
use crate::core::report::DatasetSearchReport;
use crate::core::report::SiteDetailReport;
use crate::core::report::SiteSummaryReport;
use crate::core::report::build_dataset_search;
use crate::core::report::build_site_detail;
use crate::core::report::build_site_summary;
use crate::core::report::order_partitions;
use crate::core::report::render_deletion_dump;
use crate::interfaces::CacheOutcome;
use crate::interfaces::SnapshotStore;
use crate::interfaces::StoreError;
use crate::runtime::resolve::ResolvedCycle;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Report paired with the cache work done to produce it.
#[derive(Debug, Clone, PartialEq)]
pub struct Reported<T> {
    /// Assembled report.
    pub report: T,
    /// One entry per `ensure_cached` call, in call order.
    pub cache: Vec<CacheOutcome>,
}

impl<T> Reported<T> {
    /// Wraps a report that needed no cache access.
    fn uncached(report: T) -> Self {
        Self {
            report,
            cache: Vec::new(),
        }
    }
}

// ============================================================================
// SECTION: Reports
// ============================================================================

/// Builds the site summary for the resolved cycle and its predecessor.
///
/// # Errors
///
/// Returns [`StoreError`] when a cache build or read fails.
pub fn site_summary<S: SnapshotStore + ?Sized>(
    store: &S,
    resolved: &ResolvedCycle,
) -> Result<Reported<SiteSummaryReport>, StoreError> {
    let header = resolved.header();
    let Some(cycle) = resolved.cycle.as_ref() else {
        return Ok(Reported::uncached(build_site_summary(header, None, Vec::new(), &[], &[])));
    };

    let mut cache = vec![store.ensure_cached(cycle.id, cycle.partition_id)?];
    let current = store.site_aggregates(cycle.id)?;
    let previous = store.previous_completed_cycle(cycle)?;
    let prior = match previous.as_ref() {
        Some(previous) => {
            cache.push(store.ensure_cached(previous.id, previous.partition_id)?);
            store.site_aggregates(previous.id)?
        }
        None => Vec::new(),
    };
    let contexts = store.site_contexts(cycle.id, cycle.partition_id)?;
    let report = build_site_summary(
        header,
        previous.map(|previous| previous.id),
        contexts,
        &current,
        &prior,
    );
    Ok(Reported {
        report,
        cache,
    })
}

/// Lists cached rows at sites matching `site`.
///
/// # Errors
///
/// Returns [`StoreError`] when a cache build or read fails.
pub fn site_detail<S: SnapshotStore + ?Sized>(
    store: &S,
    resolved: &ResolvedCycle,
    site: &NamePattern,
) -> Result<Reported<SiteDetailReport>, StoreError> {
    let (rows, cache) =
        cached_rows(store, resolved, |store, cycle| store.replicas_at_sites(cycle.id, site))?;
    Ok(Reported {
        report: build_site_detail(resolved.cycle_id(), site, rows),
        cache,
    })
}

/// Lists cached rows of datasets matching `dataset`, grouped by site.
///
/// # Errors
///
/// Returns [`StoreError`] when a cache build or read fails.
pub fn dataset_search<S: SnapshotStore + ?Sized>(
    store: &S,
    resolved: &ResolvedCycle,
    dataset: &NamePattern,
) -> Result<Reported<DatasetSearchReport>, StoreError> {
    let (rows, cache) =
        cached_rows(store, resolved, |store, cycle| store.replicas_of_datasets(cycle.id, dataset))?;
    Ok(Reported {
        report: build_dataset_search(resolved.cycle_id(), dataset, rows),
        cache,
    })
}

/// Groups the cycle's cache under `category`.
///
/// # Errors
///
/// Returns [`StoreError`] when a cache build or read fails.
pub fn inventory<S: SnapshotStore + ?Sized>(
    store: &S,
    resolved: &ResolvedCycle,
    category: InventoryCategory,
) -> Result<Reported<InventoryReport>, StoreError> {
    let (rows, cache) = cached_rows(store, resolved, |store, cycle| store.all_replicas(cycle.id))?;
    Ok(Reported {
        report: build_inventory(resolved.cycle_id(), category, &rows),
        cache,
    })
}

/// Renders the tab-separated deletion list of the cycle.
///
/// # Errors
///
/// Returns [`StoreError`] when a cache build or read fails.
pub fn deletion_dump<S: SnapshotStore + ?Sized>(
    store: &S,
    resolved: &ResolvedCycle,
) -> Result<Reported<String>, StoreError> {
    let (rows, cache) = cached_rows(store, resolved, |store, cycle| store.all_replicas(cycle.id))?;
    Ok(Reported {
        report: render_deletion_dump(&rows),
        cache,
    })
}

/// Lists partitions with completed cycles of `operation`, primary first.
///
/// # Errors
///
/// Returns [`StoreError`] when the lookup fails.
pub fn partitions<S: SnapshotStore + ?Sized>(
    store: &S,
    operation: CycleOperation,
) -> Result<Vec<Partition>, StoreError> {
    Ok(order_partitions(store.partitions_with_cycles(operation)?))
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures the resolved cycle's cache, then reads rows with `read`.
fn cached_rows<S, F>(
    store: &S,
    resolved: &ResolvedCycle,
    read: F,
) -> Result<(Vec<CachedReplica>, Vec<CacheOutcome>), StoreError>
where
    S: SnapshotStore + ?Sized,
    F: FnOnce(&S, &Cycle) -> Result<Vec<CachedReplica>, StoreError>,
{
    let Some(cycle) = resolved.cycle.as_ref() else {
        return Ok((Vec::new(), Vec::new()));
    };
    let outcome = store.ensure_cached(cycle.id, cycle.partition_id)?;
    let rows = read(store, cycle)?;
    Ok((rows, vec![outcome]))
}
