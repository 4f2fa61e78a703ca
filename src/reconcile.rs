//! Reconciliation of discovered units into the local records of a host.
//!
//! Units are matched by canonical name (without `.service`):
//!
//! - discovered and not stored: created as `discovered` records
//! - discovered and stored: overwritten with the remote state
//! - stored, not discovered: deleted, but only for systemd units that were
//!   themselves discovered; deployed and non-systemd units are left alone
//!
//! [`plan`] is pure; [`apply`] writes a plan to a [`Store`].

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::model::{ManagedUnit, RecordId, UnitSource};
use crate::store::Store;
use crate::synth::base_name;
use crate::systemd::DiscoveredUnit;

/// Record changes for one host.
#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    /// New records, in discovery order
    pub create: Vec<ManagedUnit>,
    /// Existing records with remote state applied, in discovery order
    pub update: Vec<ManagedUnit>,
    /// Ids of records no longer present on the host, ascending
    pub delete: Vec<RecordId>,
}

/// Counts of a reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub discovered: usize,
    pub updated: usize,
    pub removed: usize,
}

impl ManagedUnit {
    /// A new `discovered` record for a unit reported by the host.
    pub fn from_discovered(host_id: RecordId, unit: &DiscoveredUnit, checked_at: DateTime<Utc>) -> Self {
        let mut record = ManagedUnit::new(host_id, unit.name.clone(), UnitSource::Discovered);
        record.apply_discovered(unit, checked_at);
        record
    }

    /// Overwrite runtime state and exec metadata with what the host reported.
    pub fn apply_discovered(&mut self, unit: &DiscoveredUnit, checked_at: DateTime<Utc>) {
        if unit.description.is_some() {
            self.description = unit.description.clone();
        }
        if unit.unit_file_path.is_some() {
            self.unit_file_path = unit.unit_file_path.clone();
        }
        self.status = unit.status;
        self.enablement = unit.enablement;
        self.load_state = unit.load_state.clone();
        self.active_state = unit.active_state.clone();
        self.sub_state = unit.sub_state.clone();
        self.main_pid = unit.main_pid;
        self.exec_start = unit.exec_start.clone();
        self.exec_reload = unit.exec_reload.clone();
        self.exec_stop = unit.exec_stop.clone();
        self.restart_policy = unit.restart_policy.clone();
        self.dependencies = unit.dependencies.clone();
        self.resources.memory_mb = unit.memory_mb;
        self.last_status_check = Some(checked_at);
        self.status_check_error = None;
    }
}

/// Compute the record changes that bring `local` in line with `discovered`.
///
/// A name reported twice by the host is taken from its first occurrence.
pub fn plan(
    host_id: RecordId,
    local: &[ManagedUnit],
    discovered: &[DiscoveredUnit],
    checked_at: DateTime<Utc>,
) -> ReconcilePlan {
    let mut by_name: IndexMap<&str, &ManagedUnit> = IndexMap::new();
    for unit in local {
        by_name.entry(unit.canonical_name()).or_insert(unit);
    }

    let mut seen = HashSet::new();
    let mut result = ReconcilePlan::default();
    for unit in discovered {
        let name = base_name(&unit.name);
        if !seen.insert(name) {
            continue;
        }
        match by_name.get(name) {
            Some(existing) => {
                let mut record = (*existing).clone();
                record.apply_discovered(unit, checked_at);
                result.update.push(record);
            }
            None => result
                .create
                .push(ManagedUnit::from_discovered(host_id, unit, checked_at)),
        }
    }

    let mut stale: Vec<RecordId> = local
        .iter()
        .filter(|u| u.is_reconcilable() && !seen.contains(u.canonical_name()))
        .map(|u| u.id)
        .collect();
    stale.sort_unstable();
    stale.dedup();
    result.delete = stale;
    result
}

/// Persist a plan.
pub async fn apply(store: &dyn Store, plan: ReconcilePlan) -> Result<ReconcileSummary> {
    let mut summary = ReconcileSummary::default();
    for unit in plan.create {
        debug!(unit = %unit.name, "Recording discovered unit");
        store.save_unit(unit).await?;
        summary.discovered += 1;
    }
    for unit in plan.update {
        store.save_unit(unit).await?;
        summary.updated += 1;
    }
    for id in plan.delete {
        if store.delete_unit(id).await? {
            summary.removed += 1;
        }
    }
    Ok(summary)
}
