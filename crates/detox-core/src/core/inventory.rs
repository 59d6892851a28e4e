// crates/detox-core/src/core/inventory.rs
// ============================================================================
// Module: Inventory Categories
// Description: Grouping strategies for cached replicas.
// Purpose: Aggregate a cycle's cache by campaign, tier, dataset, site, or group.
// Dependencies: crate::core::report, serde, thiserror
// ============================================================================

//! ## Overview
//! An inventory request names one [`InventoryCategory`]; the category is
//! resolved once per request and supplies the key function used to bucket
//! every cached replica. Dataset names follow `/<primary>/<processed>/<tier>`;
//! the campaign is the processed name up to its first `-`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::CycleId;
use crate::core::model::Decision;
use crate::core::report::CachedReplica;
use crate::core::report::bytes_to_tb;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Key used when a replica has no usable value for the category.
pub const UNKNOWN_KEY: &str = "Unknown";

// ============================================================================
// SECTION: Category
// ============================================================================

/// Unknown inventory category label.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown inventory category: {0}")]
pub struct UnknownCategory(pub String);

/// Grouping strategy for inventory reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InventoryCategory {
    /// Group by acquisition era (processed name prefix).
    Campaigns,
    /// Group by data tier (last name component).
    DataTiers,
    /// Group by full dataset name.
    Datasets,
    /// Group by site name.
    Sites,
    /// Group by owning group.
    Groups,
}

impl InventoryCategory {
    /// Parses a request label (`campaigns`, `dataTiers`, `datasets`, `sites`, `groups`).
    ///
    /// # Errors
    ///
    /// Returns [`UnknownCategory`] for any other label.
    pub fn parse(label: &str) -> Result<Self, UnknownCategory> {
        match label {
            "campaigns" => Ok(Self::Campaigns),
            "dataTiers" => Ok(Self::DataTiers),
            "datasets" => Ok(Self::Datasets),
            "sites" => Ok(Self::Sites),
            "groups" => Ok(Self::Groups),
            other => Err(UnknownCategory(other.to_string())),
        }
    }

    /// Returns the grouping key of `replica` under this category.
    #[must_use]
    pub fn key_of(self, replica: &CachedReplica) -> String {
        match self {
            Self::Campaigns => campaign_of(replica.dataset.as_str()),
            Self::DataTiers => tier_of(replica.dataset.as_str()),
            Self::Datasets => replica.dataset.to_string(),
            Self::Sites => replica.site.to_string(),
            Self::Groups => replica
                .group
                .as_deref()
                .filter(|group| !group.is_empty())
                .unwrap_or(UNKNOWN_KEY)
                .to_string(),
        }
    }
}

/// Splits a dataset name into its three components.
fn dataset_parts(name: &str) -> Option<(&str, &str, &str)> {
    let mut parts = name.strip_prefix('/')?.split('/');
    let primary = parts.next()?;
    let processed = parts.next()?;
    let tier = parts.next()?;
    if parts.next().is_some() || primary.is_empty() || processed.is_empty() || tier.is_empty() {
        return None;
    }
    Some((primary, processed, tier))
}

/// Returns the campaign (acquisition era) of a dataset.
fn campaign_of(name: &str) -> String {
    dataset_parts(name)
        .and_then(|(_, processed, _)| processed.split('-').next())
        .unwrap_or(UNKNOWN_KEY)
        .to_string()
}

/// Returns the data tier of a dataset.
fn tier_of(name: &str) -> String {
    dataset_parts(name).map_or(UNKNOWN_KEY, |(_, _, tier)| tier).to_string()
}

// ============================================================================
// SECTION: Report
// ============================================================================

/// One inventory bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryGroup {
    /// Bucket key.
    pub key: String,
    /// Number of cached replicas in the bucket.
    pub replicas: u64,
    /// Protected volume, TB.
    pub protect: f64,
    /// Kept volume, TB.
    pub keep: f64,
    /// Deleted volume, TB.
    pub delete: f64,
    /// Volume without a decision, TB.
    pub undecided: f64,
}

/// Inventory response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReport {
    /// Cycle number, `0` when no cycle resolved.
    pub cycle_number: u64,
    /// Category used for grouping.
    pub category: InventoryCategory,
    /// Buckets ordered by key.
    pub groups: Vec<InventoryGroup>,
}

/// Byte totals of one bucket.
#[derive(Debug, Default)]
struct BucketBytes {
    /// Replica count.
    replicas: u64,
    /// Protected bytes.
    protect: i64,
    /// Kept bytes.
    keep: i64,
    /// Deleted bytes.
    delete: i64,
    /// Undecided bytes.
    undecided: i64,
}

/// Groups cached replicas under `category`.
#[must_use]
pub fn build_inventory(
    cycle: Option<CycleId>,
    category: InventoryCategory,
    rows: &[CachedReplica],
) -> InventoryReport {
    let mut buckets: BTreeMap<String, BucketBytes> = BTreeMap::new();
    for row in rows {
        let bucket = buckets.entry(category.key_of(row)).or_default();
        bucket.replicas += 1;
        let slot = match row.decision {
            Some(Decision::Protect) => &mut bucket.protect,
            Some(Decision::Keep) => &mut bucket.keep,
            Some(Decision::Delete) => &mut bucket.delete,
            None => &mut bucket.undecided,
        };
        *slot = slot.saturating_add(row.size_bytes);
    }
    let groups = buckets
        .into_iter()
        .map(|(key, bytes)| InventoryGroup {
            key,
            replicas: bytes.replicas,
            protect: bytes_to_tb(bytes.protect),
            keep: bytes_to_tb(bytes.keep),
            delete: bytes_to_tb(bytes.delete),
            undecided: bytes_to_tb(bytes.undecided),
        })
        .collect();
    InventoryReport {
        cycle_number: cycle.map_or(0, CycleId::get),
        category,
        groups,
    }
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::float_cmp,
        reason = "Test-only assertions use unwrap and exact float fixtures."
    )]

    use super::InventoryCategory;
    use super::UNKNOWN_KEY;
    use super::build_inventory;
    use crate::CachedReplica;
    use crate::DatasetName;
    use crate::Decision;
    use crate::SiteName;

    fn replica(site: &str, dataset: &str, group: Option<&str>, decision: Decision) -> CachedReplica {
        CachedReplica {
            site: SiteName::new(site),
            dataset: DatasetName::new(dataset),
            size_bytes: 2_000_000_000_000,
            decision: Some(decision),
            condition: None,
            group: group.map(str::to_string),
        }
    }

    #[test]
    fn parses_request_labels() {
        assert_eq!(InventoryCategory::parse("dataTiers").unwrap(), InventoryCategory::DataTiers);
        assert!(InventoryCategory::parse("tiers").is_err());
    }

    #[test]
    fn keys_follow_dataset_name_layout() {
        let row = replica("T1_A", "/Muon/Run2018A-PromptReco-v1/AOD", Some("AnalysisOps"), Decision::Keep);
        assert_eq!(InventoryCategory::Campaigns.key_of(&row), "Run2018A");
        assert_eq!(InventoryCategory::DataTiers.key_of(&row), "AOD");
        assert_eq!(InventoryCategory::Sites.key_of(&row), "T1_A");
        assert_eq!(InventoryCategory::Groups.key_of(&row), "AnalysisOps");
        let odd = replica("T1_A", "not-a-dataset", None, Decision::Keep);
        assert_eq!(InventoryCategory::Campaigns.key_of(&odd), UNKNOWN_KEY);
        assert_eq!(InventoryCategory::Groups.key_of(&odd), UNKNOWN_KEY);
    }

    #[test]
    fn buckets_sum_terabytes_per_decision() {
        let rows = vec![
            replica("T1_A", "/M/Run2018A-v1/AOD", None, Decision::Keep),
            replica("T2_B", "/M/Run2018A-v1/MINIAOD", None, Decision::Delete),
            replica("T2_B", "/M/Run2017F-v1/AOD", None, Decision::Delete),
        ];
        let report = build_inventory(None, InventoryCategory::Campaigns, &rows);
        assert_eq!(report.groups.len(), 2);
        assert_eq!(report.groups[0].key, "Run2017F");
        assert_eq!(report.groups[1].key, "Run2018A");
        assert_eq!(report.groups[1].replicas, 2);
        assert_eq!(report.groups[1].keep, 2.0);
        assert_eq!(report.groups[1].delete, 2.0);
    }
}
