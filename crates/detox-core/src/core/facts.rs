// crates/detox-core/src/core/facts.rs
// ============================================================================
// Module: Fact Batches
// Description: Serializable batches of cycle facts produced upstream.
// Purpose: Define the import format for partitions, cycles, and snapshots.
// Dependencies: crate::core::{identifiers, model}, serde, serde_json
// ============================================================================

//! ## Overview
//! The decision computation runs elsewhere and hands its output over as a
//! [`FactBatch`]. Sizes are bytes; quotas are TB. Batches are append-only:
//! importing never rewrites an existing fact row.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ConditionId;
use crate::core::identifiers::CycleId;
use crate::core::identifiers::DatasetName;
use crate::core::identifiers::PartitionId;
use crate::core::identifiers::SiteName;
use crate::core::model::Cycle;
use crate::core::model::Decision;
use crate::core::model::Partition;
use crate::core::model::PolicyCondition;
use crate::core::model::SiteActivity;
use crate::core::model::SiteStorageStatus;

// ============================================================================
// SECTION: Fact Rows
// ============================================================================

/// Replica size observed in one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeSnapshot {
    /// Cycle that recorded the size.
    pub run_id: CycleId,
    /// Partition the replica was evaluated in.
    pub partition_id: PartitionId,
    /// Site name.
    pub site: SiteName,
    /// Dataset name.
    pub dataset: DatasetName,
    /// Size in bytes.
    pub size: i64,
    /// Owning group, when known.
    #[serde(default)]
    pub group: Option<String>,
}

/// Decision recorded for one replica in one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Cycle that made the decision.
    pub run_id: CycleId,
    /// Partition the replica was evaluated in.
    pub partition_id: PartitionId,
    /// Site name.
    pub site: SiteName,
    /// Dataset name.
    pub dataset: DatasetName,
    /// Decision.
    pub decision: Decision,
    /// Condition that matched.
    #[serde(default)]
    pub condition_id: Option<ConditionId>,
}

/// Site quota valid from a cycle on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    /// Cycle that recorded the quota.
    pub run_id: CycleId,
    /// Partition the quota applies to.
    pub partition_id: PartitionId,
    /// Site name.
    pub site: SiteName,
    /// Quota in TB; `None` when unset.
    #[serde(default)]
    pub quota_tb: Option<f64>,
}

/// Site state valid from a cycle on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteStatusSnapshot {
    /// Cycle that recorded the state.
    pub run_id: CycleId,
    /// Site name.
    pub site: SiteName,
    /// Storage status.
    #[serde(default)]
    pub status: SiteStorageStatus,
    /// Activity flag.
    #[serde(default)]
    pub activity: SiteActivity,
}

// ============================================================================
// SECTION: Batch
// ============================================================================

/// Batch of facts to import, in dependency order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactBatch {
    /// Partitions.
    pub partitions: Vec<Partition>,
    /// Policy condition texts.
    pub conditions: Vec<PolicyCondition>,
    /// Cycles (insert or complete).
    pub cycles: Vec<Cycle>,
    /// Replica size snapshots.
    pub sizes: Vec<SizeSnapshot>,
    /// Deletion decisions.
    pub decisions: Vec<DecisionRecord>,
    /// Quota snapshots.
    pub quotas: Vec<QuotaSnapshot>,
    /// Site status snapshots.
    pub site_statuses: Vec<SiteStatusSnapshot>,
}

impl FactBatch {
    /// Parses a batch from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] when the payload is not a valid batch.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Returns the total number of rows in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.len()
            + self.conditions.len()
            + self.cycles.len()
            + self.sizes.len()
            + self.decisions.len()
            + self.quotas.len()
            + self.site_statuses.len()
    }

    /// Returns true when the batch holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
