// crates/detox-core/src/lib.rs
// ============================================================================
// Module: Detox Core Library
// Description: Domain model, report assembly, and cycle resolution for Detox.
// Purpose: Provide backend-agnostic report logic over per-cycle snapshot caches.
// Dependencies: serde, serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! Detox Core turns the immutable facts of deletion cycles (replica sizes,
//! decisions, quotas, site states) into the reports served to operators.
//! Storage is reached only through [`SnapshotStore`]; every report reads a
//! per-cycle snapshot cache that is built once and never rewritten.
//! Invariants:
//! - Only completed cycles are reported.
//! - A cycle's cache reflects the latest size and decision at or before it.
//! - Sizes are summed in bytes and scaled once (TB in summaries, GB in details).

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crate::core::facts::DecisionRecord;
pub use crate::core::facts::FactBatch;
pub use crate::core::facts::QuotaSnapshot;
pub use crate::core::facts::SiteStatusSnapshot;
pub use crate::core::facts::SizeSnapshot;
pub use crate::core::identifiers::ConditionId;
pub use crate::core::identifiers::CycleId;
pub use crate::core::identifiers::DatasetName;
pub use crate::core::identifiers::PartitionId;
pub use crate::core::identifiers::SiteName;
pub use crate::core::inventory::InventoryCategory;
pub use crate::core::inventory::InventoryGroup;
pub use crate::core::inventory::InventoryReport;
pub use crate::core::inventory::UnknownCategory;
pub use crate::core::model::Cycle;
pub use crate::core::model::CycleOperation;
pub use crate::core::model::Decision;
pub use crate::core::model::Partition;
pub use crate::core::model::PolicyCondition;
pub use crate::core::model::SiteActivity;
pub use crate::core::model::SiteStatus;
pub use crate::core::model::SiteStorageStatus;
pub use crate::core::model::format_unix_seconds;
pub use crate::core::pattern::NamePattern;
pub use crate::core::pattern::PatternError;
pub use crate::core::report::CachedReplica;
pub use crate::core::report::CycleHeader;
pub use crate::core::report::DatasetRow;
pub use crate::core::report::DatasetSearchReport;
pub use crate::core::report::SiteAggregate;
pub use crate::core::report::SiteContext;
pub use crate::core::report::SiteDetailReport;
pub use crate::core::report::SiteMatches;
pub use crate::core::report::SiteSummaryReport;
pub use crate::core::report::SiteSummaryRow;
pub use crate::core::report::order_partitions;
pub use crate::interfaces::CacheOutcome;
pub use crate::interfaces::CycleCatalog;
pub use crate::interfaces::ReportSource;
pub use crate::interfaces::SharedSnapshotStore;
pub use crate::interfaces::SnapshotCache;
pub use crate::interfaces::SnapshotStore;
pub use crate::interfaces::StoreError;
pub use crate::runtime::reports::Reported;
pub use crate::runtime::resolve::CycleRequest;
pub use crate::runtime::resolve::ResolutionDefaults;
pub use crate::runtime::resolve::ResolvedCycle;
pub use crate::runtime::resolve::resolve_cycle;
