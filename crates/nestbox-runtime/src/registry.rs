//! In-memory registry of live containers.
//!
//! The registry is owned by the orchestrator and only ever touched from
//! the daemon's accept loop, so it carries no locking. A record's
//! presence is the sole source of truth for "this container is running".

use std::collections::{BTreeMap, HashMap};

use nestbox_common::types::ContainerId;
use nix::unistd::Pid;
use thiserror::Error;

use crate::spec::ContainerSpec;

/// Metadata for one live container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    /// Container root directory, the primary key.
    pub id: ContainerId,
    /// Host PID of the process that entered the container's namespaces.
    pub init_pid: Pid,
    /// Policy the container was created with.
    pub spec: ContainerSpec,
}

/// Rejected insertion of an id that already has a record.
#[derive(Debug, Error)]
#[error("container {id} is already registered")]
pub struct DuplicateRecord {
    /// Id of the rejected record.
    pub id: ContainerId,
}

/// Insertion-ordered collection of [`ContainerRecord`]s keyed by id.
#[derive(Debug, Default)]
pub struct Registry {
    records: BTreeMap<u64, ContainerRecord>,
    index: HashMap<ContainerId, u64>,
    next_seq: u64,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateRecord`] and leaves the registry untouched if a
    /// record with the same id exists.
    pub fn insert(&mut self, record: ContainerRecord) -> Result<(), DuplicateRecord> {
        if self.index.contains_key(&record.id) {
            return Err(DuplicateRecord { id: record.id });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let _ = self.index.insert(record.id.clone(), seq);
        let _ = self.records.insert(seq, record);
        Ok(())
    }

    /// Looks up the record for `id`.
    #[must_use]
    pub fn find(&self, id: &ContainerId) -> Option<&ContainerRecord> {
        self.index.get(id).and_then(|seq| self.records.get(seq))
    }

    /// Removes and returns the record for `id`. Unknown ids are a no-op.
    pub fn remove(&mut self, id: &ContainerId) -> Option<ContainerRecord> {
        let seq = self.index.remove(id)?;
        self.records.remove(&seq)
    }

    /// Returns whether a record for `id` exists.
    #[must_use]
    pub fn is_active(&self, id: &ContainerId) -> bool {
        self.index.contains_key(id)
    }

    /// Iterates records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ContainerRecord> {
        self.records.values()
    }

    /// Visits every record in insertion order.
    pub fn for_each<F>(&self, visitor: F)
    where
        F: FnMut(&ContainerRecord),
    {
        self.records.values().for_each(visitor);
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns whether no container is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Removes every record.
    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, pid: i32) -> ContainerRecord {
        ContainerRecord {
            id: ContainerId::parse(path).unwrap(),
            init_pid: Pid::from_raw(pid),
            spec: ContainerSpec::default(),
        }
    }

    fn id(path: &str) -> ContainerId {
        ContainerId::parse(path).unwrap()
    }

    #[test]
    fn insert_then_find() {
        let mut reg = Registry::new();
        reg.insert(record("/c1", 10)).unwrap();
        assert!(reg.is_active(&id("/c1")));
        assert_eq!(reg.find(&id("/c1")).unwrap().init_pid, Pid::from_raw(10));
        assert!(reg.find(&id("/c2")).is_none());
    }

    #[test]
    fn duplicate_insert_is_rejected_and_keeps_original() {
        let mut reg = Registry::new();
        reg.insert(record("/c1", 10)).unwrap();
        let err = reg.insert(record("/c1", 11)).unwrap_err();
        assert_eq!(err.id, id("/c1"));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.find(&id("/c1")).unwrap().init_pid, Pid::from_raw(10));
    }

    #[test]
    fn remove_unknown_is_noop() {
        let mut reg = Registry::new();
        reg.insert(record("/c1", 10)).unwrap();
        assert!(reg.remove(&id("/nope")).is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn iteration_follows_insertion_order_across_removals() {
        let mut reg = Registry::new();
        for (i, path) in ["/b", "/a", "/d", "/c"].iter().enumerate() {
            reg.insert(record(path, i32::try_from(i).unwrap() + 100)).unwrap();
        }
        let _ = reg.remove(&id("/a"));
        reg.insert(record("/a", 200)).unwrap();

        let order: Vec<_> = reg.iter().map(|r| r.id.as_str().to_string()).collect();
        assert_eq!(order, vec!["/b", "/d", "/c", "/a"]);
    }

    #[test]
    fn for_each_visits_every_record() {
        let mut reg = Registry::new();
        reg.insert(record("/c1", 1)).unwrap();
        reg.insert(record("/c2", 2)).unwrap();
        let mut pids = Vec::new();
        reg.for_each(|r| pids.push(r.init_pid.as_raw()));
        assert_eq!(pids, vec![1, 2]);
    }

    #[test]
    fn removed_id_can_be_registered_again() {
        let mut reg = Registry::new();
        reg.insert(record("/c1", 1)).unwrap();
        assert!(reg.remove(&id("/c1")).is_some());
        assert!(!reg.is_active(&id("/c1")));
        reg.insert(record("/c1", 2)).unwrap();
        assert_eq!(reg.find(&id("/c1")).unwrap().init_pid, Pid::from_raw(2));
    }

    #[test]
    fn clear_empties_registry() {
        let mut reg = Registry::new();
        reg.insert(record("/c1", 1)).unwrap();
        reg.clear();
        assert!(reg.is_empty());
        assert!(!reg.is_active(&id("/c1")));
    }
}
