// crates/detox-core/src/core/model.rs
// ============================================================================
// Module: Detox Domain Model
// Description: Cycles, partitions, decisions, and site state classification.
// Purpose: Give the store and report layers one vocabulary for fact rows.
// Dependencies: crate::core::identifiers, serde, time
// ============================================================================

//! ## Overview
//! Domain records shared by the snapshot store and the report layer. Cycles
//! are produced by an external decision process; a cycle without an end
//! time is still running and never reported on.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde::Serializer;
use time::OffsetDateTime;
use time::macros::format_description;

use crate::core::identifiers::ConditionId;
use crate::core::identifiers::CycleId;
use crate::core::identifiers::PartitionId;

// ============================================================================
// SECTION: Decisions
// ============================================================================

/// Deletion decision recorded for one replica in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Replica is protected by policy.
    Protect,
    /// Replica is kept.
    Keep,
    /// Replica is scheduled for deletion.
    Delete,
}

impl Decision {
    /// Returns the stored label for the decision.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Protect => "protect",
            Self::Keep => "keep",
            Self::Delete => "delete",
        }
    }

    /// Parses a stored decision label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "protect" => Some(Self::Protect),
            "keep" => Some(Self::Keep),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Policy condition that matched a replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyCondition {
    /// Condition identifier.
    pub id: ConditionId,
    /// Human-readable condition text.
    pub text: String,
}

// ============================================================================
// SECTION: Cycles and Partitions
// ============================================================================

/// Kind of decision run a cycle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOperation {
    /// Production deletion run.
    #[default]
    Deletion,
    /// Dry-run deletion computation.
    DeletionTest,
}

impl CycleOperation {
    /// Returns the stored label for the operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deletion => "deletion",
            Self::DeletionTest => "deletion_test",
        }
    }

    /// Parses a stored operation label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "deletion" => Some(Self::Deletion),
            "deletion_test" => Some(Self::DeletionTest),
            _ => None,
        }
    }
}

/// Named scope that cycles belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Partition identifier.
    pub id: PartitionId,
    /// Partition name.
    pub name: String,
}

/// One run of the deletion-decision computation.
///
/// # Invariants
/// - A cycle with `time_end == None` is in progress and must not be reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    /// Cycle identifier.
    pub id: CycleId,
    /// Owning partition.
    pub partition_id: PartitionId,
    /// Run kind.
    #[serde(default)]
    pub operation: CycleOperation,
    /// Policy version string the run evaluated.
    #[serde(default)]
    pub policy_version: String,
    /// Free-text operator comment.
    #[serde(default)]
    pub comment: String,
    /// Start time in unix seconds.
    pub time_start: i64,
    /// End time in unix seconds, absent while running.
    #[serde(default)]
    pub time_end: Option<i64>,
}

impl Cycle {
    /// Returns true once the cycle has an end time.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.time_end.is_some()
    }
}

/// Formats unix seconds as `YYYY-MM-DD HH:MM:SS` (UTC).
#[must_use]
pub fn format_unix_seconds(seconds: i64) -> Option<String> {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    OffsetDateTime::from_unix_timestamp(seconds).ok()?.format(&format).ok()
}

// ============================================================================
// SECTION: Site State
// ============================================================================

/// Storage status of a site as recorded in a site status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStorageStatus {
    /// Site accepts and serves data.
    Ready,
    /// Site is being commissioned or recovered.
    Waitroom,
    /// Site is decommissioned.
    Morgue,
    /// Status not reported.
    #[default]
    Unknown,
}

impl SiteStorageStatus {
    /// Returns the stored label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Waitroom => "waitroom",
            Self::Morgue => "morgue",
            Self::Unknown => "unknown",
        }
    }

    /// Parses a stored label; unrecognized labels map to `Unknown`.
    #[must_use]
    pub fn parse(label: &str) -> Self {
        match label {
            "ready" => Self::Ready,
            "waitroom" => Self::Waitroom,
            "morgue" => Self::Morgue,
            _ => Self::Unknown,
        }
    }
}

/// Operator activity flag of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteActivity {
    /// Site participates normally.
    #[default]
    Active,
    /// Site is ignored by the policy (reported, flagged special).
    Ignore,
    /// Site is inactive.
    Inactive,
}

impl SiteActivity {
    /// Returns the stored label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Ignore => "ignore",
            Self::Inactive => "inactive",
        }
    }

    /// Parses a stored label; unrecognized labels map to `Active`.
    #[must_use]
    pub fn parse(label: &str) -> Self {
        match label {
            "ignore" => Self::Ignore,
            "inactive" => Self::Inactive,
            _ => Self::Active,
        }
    }
}

/// Tri-state site classification used by the site summary.
///
/// Serializes as its numeric code: `0` excluded, `1` normal, `2` special.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SiteStatus {
    /// Morgue, waitroom, or inactive site.
    Excluded,
    /// Regular site.
    #[default]
    Normal,
    /// Site flagged for special handling.
    Special,
}

impl SiteStatus {
    /// Classifies a site from its latest status snapshot.
    ///
    /// Exclusion wins over the special flag.
    #[must_use]
    pub const fn classify(status: SiteStorageStatus, activity: SiteActivity) -> Self {
        match (status, activity) {
            (SiteStorageStatus::Morgue | SiteStorageStatus::Waitroom, _)
            | (_, SiteActivity::Inactive) => Self::Excluded,
            (_, SiteActivity::Ignore) => Self::Special,
            _ => Self::Normal,
        }
    }

    /// Returns the numeric wire code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Excluded => 0,
            Self::Normal => 1,
            Self::Special => 2,
        }
    }
}

impl Serialize for SiteStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}
