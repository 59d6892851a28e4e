// crates/detox-core/src/core/report.rs
// ============================================================================
// Module: Report Shapes
// Description: Wire structures and assembly for detox report responses.
// Purpose: Turn cached replica rows and site aggregates into client payloads.
// Dependencies: crate::core::{identifiers, model, pattern}, serde
// ============================================================================

//! ## Overview
//! The store returns raw cache rows (sizes in bytes); this module owns the
//! unit scaling (GB per dataset row, TB per site aggregate), ordering, and
//! grouping that existing clients rely on. Sums are accumulated in bytes and
//! converted once so totals do not drift.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

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
use crate::core::model::SiteStatus;
use crate::core::model::format_unix_seconds;
use crate::core::pattern::NamePattern;

// ============================================================================
// SECTION: Units
// ============================================================================

/// Bytes per gigabyte used for per-dataset rows.
pub const BYTES_PER_GB: f64 = 1e9;
/// Bytes per terabyte used for per-site aggregates.
pub const BYTES_PER_TB: f64 = 1e12;
/// Name of the synthetic aggregate row in the site summary.
pub const TOTAL_ROW_NAME: &str = "Total";

/// Converts bytes to gigabytes.
#[must_use]
#[allow(clippy::cast_precision_loss, reason = "Report sizes are displayed, not re-summed.")]
pub fn bytes_to_gb(bytes: i64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

/// Converts bytes to terabytes.
#[must_use]
#[allow(clippy::cast_precision_loss, reason = "Report sizes are displayed, not re-summed.")]
pub fn bytes_to_tb(bytes: i64) -> f64 {
    bytes as f64 / BYTES_PER_TB
}

// ============================================================================
// SECTION: Cache Rows
// ============================================================================

/// One snapshot cache entry joined with its size and decision facts.
///
/// # Invariants
/// - `size_bytes > 0`; zero-size replicas never enter the cache.
/// - `decision` is `None` when no decision existed as of the cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedReplica {
    /// Site holding the replica.
    pub site: SiteName,
    /// Dataset name.
    pub dataset: DatasetName,
    /// Replica size in bytes.
    pub size_bytes: i64,
    /// Latest decision as of the cycle.
    pub decision: Option<Decision>,
    /// Condition that produced the decision.
    pub condition: Option<PolicyCondition>,
    /// Owning group recorded with the size snapshot.
    pub group: Option<String>,
}

/// Dataset row as sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetRow {
    /// Site holding the replica.
    pub site_name: SiteName,
    /// Dataset name.
    pub name: DatasetName,
    /// Size in GB.
    pub size: f64,
    /// Decision label.
    pub decision: Option<Decision>,
    /// Matched condition identifier.
    pub condition_id: Option<ConditionId>,
}

impl From<&CachedReplica> for DatasetRow {
    fn from(row: &CachedReplica) -> Self {
        Self {
            site_name: row.site.clone(),
            name: row.dataset.clone(),
            size: bytes_to_gb(row.size_bytes),
            decision: row.decision,
            condition_id: row.condition.as_ref().map(|condition| condition.id),
        }
    }
}

/// Collects the distinct condition texts referenced by `rows`.
#[must_use]
pub fn collect_conditions(rows: &[CachedReplica]) -> BTreeMap<ConditionId, String> {
    rows.iter()
        .filter_map(|row| row.condition.as_ref())
        .map(|condition| (condition.id, condition.text.clone()))
        .collect()
}

// ============================================================================
// SECTION: Cycle Header
// ============================================================================

/// Cycle metadata echoed in report responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleHeader {
    /// Cycle number, `0` when no cycle resolved.
    pub cycle_number: u64,
    /// Partition identifier.
    pub partition_id: u64,
    /// Partition name (empty when unknown).
    pub partition: String,
    /// Policy version of the cycle.
    pub policy_version: String,
    /// Operator comment of the cycle.
    pub comment: String,
    /// Cycle start time, `YYYY-MM-DD HH:MM:SS` UTC.
    pub time_start: String,
}

impl CycleHeader {
    /// Builds the header for a resolved cycle.
    #[must_use]
    pub fn for_cycle(cycle: &Cycle, partition: Option<&Partition>) -> Self {
        Self {
            cycle_number: cycle.id.get(),
            partition_id: cycle.partition_id.get(),
            partition: partition.map(|p| p.name.clone()).unwrap_or_default(),
            policy_version: cycle.policy_version.clone(),
            comment: cycle.comment.clone(),
            time_start: format_unix_seconds(cycle.time_start).unwrap_or_default(),
        }
    }

    /// Builds the header used when no cycle resolved.
    #[must_use]
    pub fn empty(partition_id: PartitionId, partition: Option<&Partition>) -> Self {
        Self {
            cycle_number: 0,
            partition_id: partition_id.get(),
            partition: partition.map(|p| p.name.clone()).unwrap_or_default(),
            policy_version: String::new(),
            comment: String::new(),
            time_start: String::new(),
        }
    }
}

// ============================================================================
// SECTION: Site Summary
// ============================================================================

/// Cached bytes for one `(site, decision)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteAggregate {
    /// Site name.
    pub site: SiteName,
    /// Decision bucket.
    pub decision: Decision,
    /// Summed size in bytes.
    pub size_bytes: i64,
}

/// Quota and status of a site as of a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteContext {
    /// Site name.
    pub site: SiteName,
    /// Latest quota in TB, `None` when never recorded.
    pub quota_tb: Option<f64>,
    /// Classified site status.
    pub status: SiteStatus,
}

/// One row of the site summary table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSummaryRow {
    /// Site name, or [`TOTAL_ROW_NAME`].
    pub name: String,
    /// Quota in TB.
    pub quota: f64,
    /// Protected volume in TB.
    pub protect: f64,
    /// Kept volume in TB.
    pub keep: f64,
    /// Deleted volume in TB.
    pub delete: f64,
    /// Protected volume in the previous cycle, TB.
    pub protect_prev: f64,
    /// Kept volume in the previous cycle, TB.
    pub keep_prev: f64,
    /// Site classification.
    pub status: SiteStatus,
}

/// Site summary response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSummaryReport {
    /// Cycle metadata.
    pub cycle: CycleHeader,
    /// Previous completed cycle, `0` when none.
    pub previous_cycle_number: u64,
    /// Total row followed by one row per site, ordered by name.
    pub site_data: Vec<SiteSummaryRow>,
}

/// Per-site byte totals before unit conversion.
#[derive(Debug, Clone, Copy, Default)]
struct ByteTotals {
    /// Protected bytes in the current cycle.
    protect: i64,
    /// Kept bytes in the current cycle.
    keep: i64,
    /// Deleted bytes in the current cycle.
    delete: i64,
    /// Protected bytes in the previous cycle.
    protect_prev: i64,
    /// Kept bytes in the previous cycle.
    keep_prev: i64,
}

impl ByteTotals {
    /// Adds another site's totals.
    const fn absorb(&mut self, other: &Self) {
        self.protect = self.protect.saturating_add(other.protect);
        self.keep = self.keep.saturating_add(other.keep);
        self.delete = self.delete.saturating_add(other.delete);
        self.protect_prev = self.protect_prev.saturating_add(other.protect_prev);
        self.keep_prev = self.keep_prev.saturating_add(other.keep_prev);
    }

    /// Converts to a summary row.
    fn to_row(self, name: String, quota: f64, status: SiteStatus) -> SiteSummaryRow {
        SiteSummaryRow {
            name,
            quota,
            protect: bytes_to_tb(self.protect),
            keep: bytes_to_tb(self.keep),
            delete: bytes_to_tb(self.delete),
            protect_prev: bytes_to_tb(self.protect_prev),
            keep_prev: bytes_to_tb(self.keep_prev),
            status,
        }
    }
}

/// Assembles the site summary.
///
/// Only sites with a positive quota appear. The `Total` row sums every
/// listed site, whatever its status.
#[must_use]
pub fn build_site_summary(
    header: CycleHeader,
    previous: Option<CycleId>,
    contexts: Vec<SiteContext>,
    current: &[SiteAggregate],
    prior: &[SiteAggregate],
) -> SiteSummaryReport {
    let mut totals: BTreeMap<&str, ByteTotals> = BTreeMap::new();
    for aggregate in current {
        let entry = totals.entry(aggregate.site.as_str()).or_default();
        match aggregate.decision {
            Decision::Protect => entry.protect = entry.protect.saturating_add(aggregate.size_bytes),
            Decision::Keep => entry.keep = entry.keep.saturating_add(aggregate.size_bytes),
            Decision::Delete => entry.delete = entry.delete.saturating_add(aggregate.size_bytes),
        }
    }
    for aggregate in prior {
        let entry = totals.entry(aggregate.site.as_str()).or_default();
        match aggregate.decision {
            Decision::Protect => {
                entry.protect_prev = entry.protect_prev.saturating_add(aggregate.size_bytes);
            }
            Decision::Keep => entry.keep_prev = entry.keep_prev.saturating_add(aggregate.size_bytes),
            Decision::Delete => {}
        }
    }

    let mut listed: Vec<&SiteContext> = contexts
        .iter()
        .filter(|context| context.quota_tb.is_some_and(|quota| quota > 0.0))
        .collect();
    listed.sort_by(|a, b| a.site.cmp(&b.site));

    let mut grand = ByteTotals::default();
    let mut quota_sum = 0.0;
    let mut rows = Vec::with_capacity(listed.len() + 1);
    for context in listed {
        let site_totals = totals.get(context.site.as_str()).copied().unwrap_or_default();
        let quota = context.quota_tb.unwrap_or_default();
        grand.absorb(&site_totals);
        quota_sum += quota;
        rows.push(site_totals.to_row(context.site.to_string(), quota, context.status));
    }
    rows.insert(0, grand.to_row(TOTAL_ROW_NAME.to_string(), quota_sum, SiteStatus::Normal));

    SiteSummaryReport {
        cycle: header,
        previous_cycle_number: previous.map_or(0, CycleId::get),
        site_data: rows,
    }
}

// ============================================================================
// SECTION: Site Detail
// ============================================================================

/// Site detail response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteDetailReport {
    /// Cycle number, `0` when no cycle resolved.
    pub cycle_number: u64,
    /// Requested site name or pattern.
    pub site_name: String,
    /// Matching dataset rows, largest first.
    pub datasets: Vec<DatasetRow>,
    /// Texts of the conditions referenced by `datasets`.
    pub conditions: BTreeMap<ConditionId, String>,
}

/// Assembles the site detail response.
#[must_use]
pub fn build_site_detail(
    cycle: Option<CycleId>,
    pattern: &NamePattern,
    mut rows: Vec<CachedReplica>,
) -> SiteDetailReport {
    rows.sort_by(|a, b| {
        b.size_bytes
            .cmp(&a.size_bytes)
            .then_with(|| a.site.cmp(&b.site))
            .then_with(|| a.dataset.cmp(&b.dataset))
    });
    SiteDetailReport {
        cycle_number: cycle.map_or(0, CycleId::get),
        site_name: pattern.as_str().to_string(),
        datasets: rows.iter().map(DatasetRow::from).collect(),
        conditions: collect_conditions(&rows),
    }
}

// ============================================================================
// SECTION: Dataset Search
// ============================================================================

/// Matches found at one site.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteMatches {
    /// Site name.
    pub site_name: SiteName,
    /// Matching dataset rows at the site, ordered by dataset name.
    pub datasets: Vec<DatasetRow>,
}

/// Dataset search response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSearchReport {
    /// Cycle number, `0` when no cycle resolved.
    pub cycle_number: u64,
    /// Requested dataset pattern.
    pub dataset_name: String,
    /// One entry per site with at least one match, ordered by site name.
    pub results: Vec<SiteMatches>,
    /// Texts of the conditions referenced by `results`.
    pub conditions: BTreeMap<ConditionId, String>,
}

/// Assembles the dataset search response.
#[must_use]
pub fn build_dataset_search(
    cycle: Option<CycleId>,
    pattern: &NamePattern,
    rows: Vec<CachedReplica>,
) -> DatasetSearchReport {
    let conditions = collect_conditions(&rows);
    let mut by_site: BTreeMap<SiteName, Vec<DatasetRow>> = BTreeMap::new();
    for row in &rows {
        by_site.entry(row.site.clone()).or_default().push(DatasetRow::from(row));
    }
    let results = by_site
        .into_iter()
        .map(|(site_name, mut datasets)| {
            datasets.sort_by(|a, b| a.name.cmp(&b.name));
            SiteMatches {
                site_name,
                datasets,
            }
        })
        .collect();
    DatasetSearchReport {
        cycle_number: cycle.map_or(0, CycleId::get),
        dataset_name: pattern.as_str().to_string(),
        results,
        conditions,
    }
}

// ============================================================================
// SECTION: Deletion Export
// ============================================================================

/// Renders the tab-separated deletion list: `site`, `dataset`, size in GB
/// with two decimals. No header row; one line per deleted replica.
#[must_use]
pub fn render_deletion_dump(rows: &[CachedReplica]) -> String {
    let mut deletions: Vec<&CachedReplica> =
        rows.iter().filter(|row| row.decision == Some(Decision::Delete)).collect();
    deletions.sort_by(|a, b| a.site.cmp(&b.site).then_with(|| a.dataset.cmp(&b.dataset)));
    let mut output = String::new();
    for row in deletions {
        output.push_str(&tsv_field(row.site.as_str()));
        output.push('\t');
        output.push_str(&tsv_field(row.dataset.as_str()));
        output.push('\t');
        output.push_str(&format!("{:.2}", bytes_to_gb(row.size_bytes)));
        output.push('\n');
    }
    output
}

/// Replaces field and record separators so every line keeps three columns.
fn tsv_field(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}

// ============================================================================
// SECTION: Partitions
// ============================================================================

/// Name of the partition that always lists first.
pub const PRIMARY_PARTITION_NAME: &str = "Physics";

/// Orders partitions for the selector: `Physics` first, then by id.
#[must_use]
pub fn order_partitions(mut partitions: Vec<Partition>) -> Vec<Partition> {
    partitions.sort_by_key(|partition| (partition.name != PRIMARY_PARTITION_NAME, partition.id));
    partitions
}
