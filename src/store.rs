//! Persistence of hosts and units.
//!
//! [`Store`] is the seam to whatever database backs the fleet. Saving a
//! record with id `0` inserts it and assigns an id; saving any other id
//! replaces the existing record.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::model::{Host, HostStatus, ManagedUnit, RecordId, UnitKind, UnitSource, UnitStatus};

/// Offset/limit window for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// Every record.
    pub fn all() -> Self {
        Self {
            offset: 0,
            limit: usize::MAX,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(0, 100)
    }
}

/// Host listing filter. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct HostFilter {
    pub status: Option<HostStatus>,
    pub enabled: Option<bool>,
    /// Case-insensitive substring of hostname or display name
    pub search: Option<String>,
}

impl HostFilter {
    fn matches(&self, host: &Host) -> bool {
        self.status.map_or(true, |s| host.status == s)
            && self.enabled.map_or(true, |e| host.enabled == e)
            && self.search.as_deref().map_or(true, |needle| {
                let needle = needle.to_lowercase();
                host.hostname.to_lowercase().contains(&needle)
                    || host
                        .display_name
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            })
    }
}

/// Unit listing filter. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct UnitFilter {
    pub host_id: Option<RecordId>,
    pub status: Option<UnitStatus>,
    pub kind: Option<UnitKind>,
    pub source: Option<UnitSource>,
    pub is_timer: Option<bool>,
    /// Case-insensitive substring of the unit name or description
    pub search: Option<String>,
}

impl UnitFilter {
    pub fn for_host(host_id: RecordId) -> Self {
        Self {
            host_id: Some(host_id),
            ..Self::default()
        }
    }

    fn matches(&self, unit: &ManagedUnit) -> bool {
        self.host_id.map_or(true, |h| unit.host_id == h)
            && self.status.map_or(true, |s| unit.status == s)
            && self.kind.map_or(true, |k| unit.kind == k)
            && self.source.map_or(true, |s| unit.source == s)
            && self.is_timer.map_or(true, |t| unit.is_timer == t)
            && self.search.as_deref().map_or(true, |needle| {
                let needle = needle.to_lowercase();
                unit.name.to_lowercase().contains(&needle)
                    || unit
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            })
    }
}

/// Host and unit records.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_host(&self, id: RecordId) -> Result<Option<Host>>;

    async fn find_host_by_hostname(&self, hostname: &str) -> Result<Option<Host>>;

    async fn list_hosts(&self, filter: &HostFilter, page: Page) -> Result<Vec<Host>>;

    /// Insert or replace a host; returns the stored record.
    async fn save_host(&self, host: Host) -> Result<Host>;

    /// Delete a host and all of its units. Returns false if it did not exist.
    async fn delete_host(&self, id: RecordId) -> Result<bool>;

    async fn get_unit(&self, id: RecordId) -> Result<Option<ManagedUnit>>;

    async fn list_units(&self, filter: &UnitFilter, page: Page) -> Result<Vec<ManagedUnit>>;

    /// Insert or replace a unit; returns the stored record.
    async fn save_unit(&self, unit: ManagedUnit) -> Result<ManagedUnit>;

    async fn delete_unit(&self, id: RecordId) -> Result<bool>;
}

#[derive(Debug, Default)]
struct Tables {
    hosts: BTreeMap<RecordId, Host>,
    units: BTreeMap<RecordId, ManagedUnit>,
    last_id: RecordId,
}

impl Tables {
    fn next_id(&mut self) -> RecordId {
        self.last_id += 1;
        self.last_id
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn window<T: Clone>(items: impl Iterator<Item = T>, page: Page) -> Vec<T> {
    items.skip(page.offset).take(page.limit).collect()
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_host(&self, id: RecordId) -> Result<Option<Host>> {
        Ok(self.tables.read().hosts.get(&id).cloned())
    }

    async fn find_host_by_hostname(&self, hostname: &str) -> Result<Option<Host>> {
        Ok(self
            .tables
            .read()
            .hosts
            .values()
            .find(|h| h.hostname == hostname)
            .cloned())
    }

    async fn list_hosts(&self, filter: &HostFilter, page: Page) -> Result<Vec<Host>> {
        let tables = self.tables.read();
        Ok(window(
            tables.hosts.values().filter(|h| filter.matches(h)).cloned(),
            page,
        ))
    }

    async fn save_host(&self, mut host: Host) -> Result<Host> {
        let mut tables = self.tables.write();
        if tables
            .hosts
            .values()
            .any(|h| h.id != host.id && h.hostname == host.hostname)
        {
            return Err(Error::Conflict(format!(
                "Host '{}' already exists",
                host.hostname
            )));
        }
        if host.id == 0 {
            host.id = tables.next_id();
        } else if !tables.hosts.contains_key(&host.id) {
            return Err(Error::not_found("Host", host.id));
        }
        tables.hosts.insert(host.id, host.clone());
        Ok(host)
    }

    async fn delete_host(&self, id: RecordId) -> Result<bool> {
        let mut tables = self.tables.write();
        if tables.hosts.remove(&id).is_none() {
            return Ok(false);
        }
        tables.units.retain(|_, unit| unit.host_id != id);
        Ok(true)
    }

    async fn get_unit(&self, id: RecordId) -> Result<Option<ManagedUnit>> {
        Ok(self.tables.read().units.get(&id).cloned())
    }

    async fn list_units(&self, filter: &UnitFilter, page: Page) -> Result<Vec<ManagedUnit>> {
        let tables = self.tables.read();
        Ok(window(
            tables.units.values().filter(|u| filter.matches(u)).cloned(),
            page,
        ))
    }

    async fn save_unit(&self, mut unit: ManagedUnit) -> Result<ManagedUnit> {
        unit.check_invariants()?;
        let mut tables = self.tables.write();
        if !tables.hosts.contains_key(&unit.host_id) {
            return Err(Error::not_found("Host", unit.host_id));
        }
        if tables.units.values().any(|u| {
            u.id != unit.id && u.host_id == unit.host_id && u.canonical_name() == unit.canonical_name()
        }) {
            return Err(Error::Conflict(format!(
                "Unit '{}' already exists on host {}",
                unit.name, unit.host_id
            )));
        }
        if unit.id == 0 {
            unit.id = tables.next_id();
        } else if !tables.units.contains_key(&unit.id) {
            return Err(Error::not_found("Unit", unit.id));
        }
        tables.units.insert(unit.id, unit.clone());
        Ok(unit)
    }

    async fn delete_unit(&self, id: RecordId) -> Result<bool> {
        Ok(self.tables.write().units.remove(&id).is_some())
    }
}
