// crates/detox-core/src/runtime/fixture.rs
// ============================================================================
// Module: Runtime Test Fixture
// Description: In-memory snapshot store for runtime unit tests.
// Purpose: Exercise resolution and orchestration without a database.
// Dependencies: crate::{core, interfaces}
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::missing_docs_in_private_items,
    reason = "Test-only fixture uses unwrap on poisoned locks and undocumented helpers."
)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::core::identifiers::CycleId;
use crate::core::identifiers::PartitionId;
use crate::core::model::Cycle;
use crate::core::model::CycleOperation;
use crate::core::model::Partition;
use crate::core::pattern::NamePattern;
use crate::core::report::CachedReplica;
use crate::core::report::SiteAggregate;
use crate::core::report::SiteContext;
use crate::interfaces::CacheOutcome;
use crate::interfaces::CycleCatalog;
use crate::interfaces::ReportSource;
use crate::interfaces::SnapshotCache;
use crate::interfaces::SnapshotStore;
use crate::interfaces::StoreError;

/// Store backed by plain vectors; rows are pre-seeded per cycle.
#[derive(Default)]
pub(crate) struct MemoryStore {
    pub(crate) partitions: Vec<Partition>,
    pub(crate) cycles: Vec<Cycle>,
    pub(crate) rows: BTreeMap<CycleId, Vec<CachedReplica>>,
    pub(crate) contexts: Vec<SiteContext>,
    pub(crate) ensured: Mutex<Vec<CycleId>>,
}

pub(crate) fn partition_id(raw: u64) -> PartitionId {
    PartitionId::from_raw(raw).unwrap()
}

pub(crate) fn cycle_id(raw: u64) -> CycleId {
    CycleId::from_raw(raw).unwrap()
}

pub(crate) fn partition(raw: u64, name: &str) -> Partition {
    Partition {
        id: partition_id(raw),
        name: name.to_string(),
    }
}

pub(crate) fn cycle(raw: u64, partition: u64, completed: bool) -> Cycle {
    Cycle {
        id: cycle_id(raw),
        partition_id: partition_id(partition),
        operation: CycleOperation::Deletion,
        policy_version: "v1".to_string(),
        comment: String::new(),
        time_start: 1_500_000_000,
        time_end: completed.then_some(1_500_003_600),
    }
}

impl MemoryStore {
    fn completed(
        &self,
        partition: PartitionId,
        operation: CycleOperation,
    ) -> impl Iterator<Item = &Cycle> {
        self.cycles.iter().filter(move |cycle| {
            cycle.partition_id == partition && cycle.operation == operation && cycle.is_completed()
        })
    }

    fn rows_of(&self, cycle: CycleId) -> Vec<CachedReplica> {
        self.rows.get(&cycle).cloned().unwrap_or_default()
    }
}

fn matches(pattern: &NamePattern, value: &str) -> bool {
    match pattern.as_str().strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => value == pattern.as_str(),
    }
}

impl CycleCatalog for MemoryStore {
    fn cycle(&self, id: CycleId) -> Result<Option<Cycle>, StoreError> {
        Ok(self.cycles.iter().find(|cycle| cycle.id == id).cloned())
    }

    fn partition_by_id(&self, id: PartitionId) -> Result<Option<Partition>, StoreError> {
        Ok(self.partitions.iter().find(|partition| partition.id == id).cloned())
    }

    fn partition_by_name(&self, name: &str) -> Result<Option<Partition>, StoreError> {
        Ok(self.partitions.iter().find(|partition| partition.name == name).cloned())
    }

    fn latest_completed_cycle(
        &self,
        partition: PartitionId,
        operation: CycleOperation,
    ) -> Result<Option<Cycle>, StoreError> {
        Ok(self.completed(partition, operation).max_by_key(|cycle| cycle.id).cloned())
    }

    fn previous_completed_cycle(&self, cycle: &Cycle) -> Result<Option<Cycle>, StoreError> {
        Ok(self
            .completed(cycle.partition_id, cycle.operation)
            .filter(|candidate| candidate.id < cycle.id)
            .max_by_key(|candidate| candidate.id)
            .cloned())
    }

    fn partitions_with_cycles(
        &self,
        operation: CycleOperation,
    ) -> Result<Vec<Partition>, StoreError> {
        Ok(self
            .partitions
            .iter()
            .filter(|partition| self.completed(partition.id, operation).next().is_some())
            .cloned()
            .collect())
    }
}

impl SnapshotCache for MemoryStore {
    fn ensure_cached(
        &self,
        cycle: CycleId,
        _partition: PartitionId,
    ) -> Result<CacheOutcome, StoreError> {
        let mut ensured = self.ensured.lock().unwrap();
        let built = !ensured.contains(&cycle);
        ensured.push(cycle);
        let rows_inserted = if built { self.rows_of(cycle).len() as u64 } else { 0 };
        Ok(CacheOutcome {
            cycle,
            built,
            rows_inserted,
        })
    }

    fn usage_count(&self, cycle: CycleId) -> Result<u64, StoreError> {
        Ok(self.ensured.lock().unwrap().iter().filter(|id| **id == cycle).count() as u64)
    }
}

impl ReportSource for MemoryStore {
    fn site_aggregates(&self, cycle: CycleId) -> Result<Vec<SiteAggregate>, StoreError> {
        let mut sums: BTreeMap<(String, crate::Decision), i64> = BTreeMap::new();
        for row in self.rows_of(cycle) {
            if let Some(decision) = row.decision {
                *sums.entry((row.site.to_string(), decision)).or_default() += row.size_bytes;
            }
        }
        Ok(sums
            .into_iter()
            .map(|((site, decision), size_bytes)| SiteAggregate {
                site: crate::SiteName::new(site),
                decision,
                size_bytes,
            })
            .collect())
    }

    fn site_contexts(
        &self,
        _cycle: CycleId,
        _partition: PartitionId,
    ) -> Result<Vec<SiteContext>, StoreError> {
        Ok(self.contexts.clone())
    }

    fn replicas_at_sites(
        &self,
        cycle: CycleId,
        site: &NamePattern,
    ) -> Result<Vec<CachedReplica>, StoreError> {
        Ok(self.rows_of(cycle).into_iter().filter(|row| matches(site, row.site.as_str())).collect())
    }

    fn replicas_of_datasets(
        &self,
        cycle: CycleId,
        dataset: &NamePattern,
    ) -> Result<Vec<CachedReplica>, StoreError> {
        Ok(self
            .rows_of(cycle)
            .into_iter()
            .filter(|row| matches(dataset, row.dataset.as_str()))
            .collect())
    }

    fn all_replicas(&self, cycle: CycleId) -> Result<Vec<CachedReplica>, StoreError> {
        Ok(self.rows_of(cycle))
    }
}

impl SnapshotStore for MemoryStore {}
