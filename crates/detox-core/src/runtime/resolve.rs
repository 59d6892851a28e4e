// crates/detox-core/src/runtime/resolve.rs
// ============================================================================
// Module: Cycle Resolution
// Description: Resolve request parameters to a (partition, cycle) pair.
// Purpose: Apply the explicit-cycle, explicit-partition, default fallback order.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Resolution never fails on bad input: an unknown or unfinished cycle falls
//! back to the latest completed cycle of the requested partition, and an
//! unknown partition falls back to the configured default. Only store
//! failures surface as errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::identifiers::CycleId;
use crate::core::identifiers::PartitionId;
use crate::core::model::Cycle;
use crate::core::model::CycleOperation;
use crate::core::model::Partition;
use crate::core::report::CycleHeader;
use crate::interfaces::CycleCatalog;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Cycle selectors taken from a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleRequest {
    /// Explicit cycle number.
    pub cycle_number: Option<u64>,
    /// Explicit partition identifier.
    pub partition_id: Option<u64>,
    /// Explicit partition name.
    pub partition_name: Option<String>,
}

/// Fallbacks applied when the request does not resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionDefaults {
    /// Partition used when none resolves.
    pub partition_id: PartitionId,
    /// Operation whose cycles are reported.
    pub operation: CycleOperation,
}

/// Outcome of cycle resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCycle {
    /// Partition the request applies to.
    pub partition_id: PartitionId,
    /// Partition record, when it exists in the store.
    pub partition: Option<Partition>,
    /// Completed cycle to report on; `None` when the partition has none.
    pub cycle: Option<Cycle>,
}

impl ResolvedCycle {
    /// Returns the resolved cycle identifier.
    #[must_use]
    pub fn cycle_id(&self) -> Option<CycleId> {
        self.cycle.as_ref().map(|cycle| cycle.id)
    }

    /// Returns the cycle number sent on the wire (`0` for none).
    #[must_use]
    pub fn cycle_number(&self) -> u64 {
        self.cycle_id().map_or(0, CycleId::get)
    }

    /// Returns the cycle header for responses.
    #[must_use]
    pub fn header(&self) -> CycleHeader {
        match &self.cycle {
            Some(cycle) => CycleHeader::for_cycle(cycle, self.partition.as_ref()),
            None => CycleHeader::empty(self.partition_id, self.partition.as_ref()),
        }
    }
}

// ============================================================================
// SECTION: Resolution
// ============================================================================

/// Resolves request selectors against the catalog.
///
/// Order: a completed cycle of the configured operation (belonging to the
/// requested partition, when one is given), then the latest completed cycle
/// of the requested partition, then of the default partition.
///
/// # Errors
///
/// Returns [`StoreError`] only when the catalog fails.
pub fn resolve_cycle<C: CycleCatalog + ?Sized>(
    catalog: &C,
    request: &CycleRequest,
    defaults: &ResolutionDefaults,
) -> Result<ResolvedCycle, StoreError> {
    let requested = requested_partition(catalog, request)?;

    if let Some(id) = request.cycle_number.and_then(CycleId::from_raw)
        && let Some(cycle) = catalog.cycle(id)?
        && cycle.is_completed()
        && cycle.operation == defaults.operation
        && requested.as_ref().is_none_or(|partition| partition.id == cycle.partition_id)
    {
        let partition = match requested {
            Some(partition) => Some(partition),
            None => catalog.partition_by_id(cycle.partition_id)?,
        };
        return Ok(ResolvedCycle {
            partition_id: cycle.partition_id,
            partition,
            cycle: Some(cycle),
        });
    }

    let (partition_id, partition) = match requested {
        Some(partition) => (partition.id, Some(partition)),
        None => (defaults.partition_id, catalog.partition_by_id(defaults.partition_id)?),
    };
    let cycle = catalog.latest_completed_cycle(partition_id, defaults.operation)?;
    Ok(ResolvedCycle {
        partition_id,
        partition,
        cycle,
    })
}

/// Looks up the partition named by the request, id first.
fn requested_partition<C: CycleCatalog + ?Sized>(
    catalog: &C,
    request: &CycleRequest,
) -> Result<Option<Partition>, StoreError> {
    if let Some(id) = request.partition_id.and_then(PartitionId::from_raw)
        && let Some(partition) = catalog.partition_by_id(id)?
    {
        return Ok(Some(partition));
    }
    match request.partition_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => catalog.partition_by_name(name),
        _ => Ok(None),
    }
}
