//! StateStore — redb-backed coordination store for the fleet.
//!
//! Provides typed CRUD operations over the node inventory, units, specs,
//! scheduler records, and deployments, plus the atomic conditional
//! updates the scheduling protocol relies on. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Result of a shape-filtered node lookup.
#[derive(Debug, Clone, Default)]
pub struct NodeQuery {
    /// Online nodes that satisfy every placement constraint.
    pub nodes: Vec<NodeInfo>,
    /// Matching nodes skipped because their heartbeat is stale.
    pub offline_count: u32,
    /// Matching nodes skipped because they lack a required mount.
    pub no_mount_count: u32,
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for def in [NODES, ZONES, SHAPES, SPECS, UNITS, SCHEDULERS, DEPLOYMENTS] {
            txn.open_table(def).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Record primitives ──────────────────────────────────────────

    fn put_record<T: Serialize>(&self, def: RecordTable, key: &str, record: &T) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert a record only if the key is absent.
    fn insert_record<T: Serialize>(
        &self,
        def: RecordTable,
        key: &str,
        record: &T,
    ) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let inserted = {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            if table.get(key).map_err(map_err!(Read))?.is_some() {
                false
            } else {
                table
                    .insert(key, value.as_slice())
                    .map_err(map_err!(Write))?;
                true
            }
        };
        if !inserted {
            txn.abort().map_err(map_err!(Transaction))?;
            return Err(StateError::AlreadyExists(key.to_string()));
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_record<T: DeserializeOwned>(
        &self,
        def: RecordTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn list_records<T: DeserializeOwned>(&self, def: RecordTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: T =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    fn delete_record(&self, def: RecordTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Atomic conditional read-modify-write of one record.
    ///
    /// `apply` runs inside the write transaction against the stored
    /// document. It returns `false` when the filter does not match, in
    /// which case nothing is written. Returns the post-update document,
    /// or `None` when the record is missing or the filter rejected it.
    fn update_record<T, F>(&self, def: RecordTable, key: &str, apply: F) -> StateResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> bool,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let current = table
                .get(key)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            match current {
                Some(bytes) => {
                    let mut record: T =
                        serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
                    if apply(&mut record) {
                        let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                        table
                            .insert(key, value.as_slice())
                            .map_err(map_err!(Write))?;
                        Some(record)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        match updated {
            Some(record) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(Some(record))
            }
            None => {
                txn.abort().map_err(map_err!(Transaction))?;
                Ok(None)
            }
        }
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert or update a node.
    pub fn put_node(&self, node: &NodeInfo) -> StateResult<()> {
        self.put_record(NODES, &node.id, node)
    }

    /// Get a node by ID.
    pub fn get_node(&self, node_id: &str) -> StateResult<Option<NodeInfo>> {
        self.get_record(NODES, node_id)
    }

    /// List all nodes.
    pub fn list_nodes(&self) -> StateResult<Vec<NodeInfo>> {
        self.list_records(NODES)
    }

    /// Delete a node by ID. Returns true if it existed.
    pub fn delete_node(&self, node_id: &str) -> StateResult<bool> {
        self.delete_record(NODES, node_id)
    }

    /// Book capacity for a deployment that is now running on `node_id`.
    pub fn reserve_node_capacity(
        &self,
        node_id: &str,
        processors: u32,
        memory_units: f64,
    ) -> StateResult<NodeInfo> {
        let node = self.update_record(NODES, node_id, |node: &mut NodeInfo| {
            node.cpu_units_res += processors;
            node.memory_units_res += memory_units;
            true
        })?;
        let node = node.ok_or_else(|| StateError::NotFound(format!("node {node_id}")))?;
        debug!(
            node = %node_id,
            cpu_units_res = node.cpu_units_res,
            memory_units_res = node.memory_units_res,
            "node capacity reserved"
        );
        Ok(node)
    }

    /// Record a heartbeat. Returns false if the node is not registered.
    pub fn touch_node_heartbeat(&self, node_id: &str, now: u64) -> StateResult<bool> {
        let node = self.update_record(NODES, node_id, |node: &mut NodeInfo| {
            node.last_heartbeat = now;
            true
        })?;
        Ok(node.is_some())
    }

    /// Nodes eligible for a shape, split into usable and skipped counts.
    ///
    /// A node matches when its zone lies in the shape's datacenter (and in
    /// `instance.zone` when set) and it carries one of the shape's roles.
    /// Matching nodes that are offline or miss a mount are only counted.
    pub fn query_shape_nodes(
        &self,
        shape: &Shape,
        instance: &InstanceSpec,
        now: u64,
    ) -> StateResult<NodeQuery> {
        let zones: HashSet<ZoneId> = self
            .list_zones_for_datacenter(&shape.datacenter)?
            .into_iter()
            .map(|z| z.id)
            .filter(|id| instance.zone.as_ref().is_none_or(|zone| zone == id))
            .collect();

        let mut query = NodeQuery::default();
        for node in self.list_nodes()? {
            if !zones.contains(&node.zone) || !node.has_any_role(&shape.roles) {
                continue;
            }
            if !node.is_online(now) {
                query.offline_count += 1;
                continue;
            }
            let mounted = instance
                .mounts
                .iter()
                .all(|mount| mount.nodes.contains(&node.id));
            if !mounted {
                query.no_mount_count += 1;
                continue;
            }
            query.nodes.push(node);
        }
        Ok(query)
    }

    // ── Zones & shapes ─────────────────────────────────────────────

    pub fn put_zone(&self, zone: &Zone) -> StateResult<()> {
        self.put_record(ZONES, &zone.id, zone)
    }

    pub fn list_zones_for_datacenter(&self, datacenter: &str) -> StateResult<Vec<Zone>> {
        let zones: Vec<Zone> = self.list_records(ZONES)?;
        Ok(zones
            .into_iter()
            .filter(|z| z.datacenter == datacenter)
            .collect())
    }

    pub fn put_shape(&self, shape: &Shape) -> StateResult<()> {
        self.put_record(SHAPES, &shape.id, shape)
    }

    pub fn get_shape(&self, shape_id: &str) -> StateResult<Option<Shape>> {
        self.get_record(SHAPES, shape_id)
    }

    // ── Specs ──────────────────────────────────────────────────────

    pub fn put_spec(&self, spec: &Spec) -> StateResult<()> {
        self.put_record(SPECS, &spec.id, spec)
    }

    pub fn get_spec(&self, spec_id: &str) -> StateResult<Option<Spec>> {
        self.get_record(SPECS, spec_id)
    }

    // ── Units ──────────────────────────────────────────────────────

    /// Insert or update a unit.
    pub fn put_unit(&self, unit: &Unit) -> StateResult<()> {
        self.put_record(UNITS, &unit.id, unit)
    }

    pub fn get_unit(&self, unit_id: &str) -> StateResult<Option<Unit>> {
        self.get_record(UNITS, unit_id)
    }

    pub fn list_units(&self) -> StateResult<Vec<Unit>> {
        self.list_records(UNITS)
    }

    pub fn delete_unit(&self, unit_id: &str) -> StateResult<bool> {
        self.delete_record(UNITS, unit_id)
    }

    /// Compare-and-swap push of a deployment onto a unit.
    ///
    /// Succeeds only while the stored unit still belongs to `pod`, has
    /// `expected_count` as its count and exactly `expected_len`
    /// deployments attached. Returns `false` when any of those moved.
    pub fn reserve_unit_deployment(
        &self,
        unit_id: &str,
        pod: &str,
        expected_count: u32,
        expected_len: usize,
        deploy_id: &str,
    ) -> StateResult<bool> {
        let updated = self.update_record(UNITS, unit_id, |unit: &mut Unit| {
            if unit.pod != pod
                || unit.count != expected_count
                || unit.deployments.len() != expected_len
            {
                return false;
            }
            unit.deployments.push(deploy_id.to_string());
            true
        })?;
        Ok(updated.is_some())
    }

    /// Unconditionally append a deployment to a unit.
    pub fn push_unit_deployment(&self, unit_id: &str, deploy_id: &str) -> StateResult<bool> {
        let updated = self.update_record(UNITS, unit_id, |unit: &mut Unit| {
            unit.deployments.push(deploy_id.to_string());
            true
        })?;
        Ok(updated.is_some())
    }

    /// Unconditionally remove every occurrence of a deployment from a unit.
    pub fn pull_unit_deployment(&self, unit_id: &str, deploy_id: &str) -> StateResult<bool> {
        let updated = self.update_record(UNITS, unit_id, |unit: &mut Unit| {
            unit.deployments.retain(|d| d != deploy_id);
            true
        })?;
        Ok(updated.is_some())
    }

    // ── Schedulers ─────────────────────────────────────────────────

    /// Create a scheduler record. Fails with `AlreadyExists` on a duplicate.
    pub fn insert_scheduler(&self, record: &SchedulerRecord) -> StateResult<()> {
        let key = record.id.table_key();
        self.insert_record(SCHEDULERS, &key, record)?;
        debug!(%key, count = record.count, "scheduler inserted");
        Ok(())
    }

    /// Insert or overwrite a scheduler record.
    pub fn put_scheduler(&self, record: &SchedulerRecord) -> StateResult<()> {
        self.put_record(SCHEDULERS, &record.id.table_key(), record)
    }

    /// Persist only the selected fields of `record`.
    ///
    /// Returns false if the stored record no longer exists.
    pub fn commit_scheduler_fields(
        &self,
        record: &SchedulerRecord,
        fields: &[SchedulerField],
    ) -> StateResult<bool> {
        let updated = self.update_record(
            SCHEDULERS,
            &record.id.table_key(),
            |stored: &mut SchedulerRecord| {
                for field in fields {
                    match field {
                        SchedulerField::Count => stored.count = record.count,
                        SchedulerField::OverrideCount => {
                            stored.override_count = record.override_count
                        }
                        SchedulerField::Consumed => stored.consumed = record.consumed,
                        SchedulerField::Tickets => stored.tickets = record.tickets.clone(),
                        SchedulerField::Failures => stored.failures = record.failures.clone(),
                        SchedulerField::Modified => stored.modified_at = record.modified_at,
                    }
                }
                true
            },
        )?;
        Ok(updated.is_some())
    }

    pub fn get_scheduler(&self, id: &SchedulerId) -> StateResult<Option<SchedulerRecord>> {
        self.get_record(SCHEDULERS, &id.table_key())
    }

    pub fn scheduler_exists(&self, id: &SchedulerId) -> StateResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SCHEDULERS).map_err(map_err!(Table))?;
        let exists = table
            .get(id.table_key().as_str())
            .map_err(map_err!(Read))?
            .is_some();
        Ok(exists)
    }

    pub fn list_schedulers(&self) -> StateResult<Vec<SchedulerRecord>> {
        self.list_records(SCHEDULERS)
    }

    /// Scheduler records that still have unconsumed tickets.
    pub fn list_active_schedulers(&self) -> StateResult<Vec<SchedulerRecord>> {
        Ok(self
            .list_schedulers()?
            .into_iter()
            .filter(|s| !s.is_exhausted())
            .collect())
    }

    pub fn delete_scheduler(&self, id: &SchedulerId) -> StateResult<bool> {
        let key = id.table_key();
        let existed = self.delete_record(SCHEDULERS, &key)?;
        debug!(%key, existed, "scheduler deleted");
        Ok(existed)
    }

    /// Claim one ticket: increments `consumed` only while `consumed < count`.
    ///
    /// Returns `None` once the record is exhausted or gone.
    pub fn consume_scheduler(
        &self,
        id: &SchedulerId,
        now: u64,
    ) -> StateResult<Option<SchedulerRecord>> {
        self.update_record(SCHEDULERS, &id.table_key(), |s: &mut SchedulerRecord| {
            if s.consumed >= s.count {
                return false;
            }
            s.consumed += 1;
            s.modified_at = now;
            true
        })
    }

    /// Count a failed deployment attempt by `node_id`.
    ///
    /// When the node's failure count reaches `max_failures` its tickets
    /// are removed in the same transaction.
    pub fn record_scheduler_failure(
        &self,
        id: &SchedulerId,
        node_id: &str,
        max_failures: u32,
    ) -> StateResult<Option<SchedulerRecord>> {
        self.update_record(SCHEDULERS, &id.table_key(), |s: &mut SchedulerRecord| {
            let failures = s.failures.entry(node_id.to_string()).or_insert(0);
            *failures += 1;
            if *failures >= max_failures {
                s.tickets.remove(node_id);
            }
            true
        })
    }

    /// Drop every ticket held by `node_id`.
    pub fn clear_scheduler_tickets(
        &self,
        id: &SchedulerId,
        node_id: &str,
    ) -> StateResult<Option<SchedulerRecord>> {
        self.update_record(SCHEDULERS, &id.table_key(), |s: &mut SchedulerRecord| {
            s.tickets.remove(node_id);
            true
        })
    }

    // ── Deployments ────────────────────────────────────────────────

    pub fn put_deployment(&self, deployment: &DeploymentRecord) -> StateResult<()> {
        self.put_record(DEPLOYMENTS, &deployment.id, deployment)
    }

    pub fn get_deployment(&self, deploy_id: &str) -> StateResult<Option<DeploymentRecord>> {
        self.get_record(DEPLOYMENTS, deploy_id)
    }

    pub fn delete_deployment(&self, deploy_id: &str) -> StateResult<bool> {
        self.delete_record(DEPLOYMENTS, deploy_id)
    }

    pub fn list_deployments_for_unit(&self, unit_id: &str) -> StateResult<Vec<DeploymentRecord>> {
        let deployments: Vec<DeploymentRecord> = self.list_records(DEPLOYMENTS)?;
        Ok(deployments
            .into_iter()
            .filter(|d| d.unit == unit_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_node(id: &str, zone: &str, heartbeat: u64) -> NodeInfo {
        NodeInfo {
            id: id.to_string(),
            name: id.to_string(),
            zone: zone.to_string(),
            roles: vec!["instances".to_string()],
            cpu_units: 16,
            memory_units: 64.0,
            cpu_units_res: 0,
            memory_units_res: 0.0,
            last_heartbeat: heartbeat,
        }
    }

    fn test_unit(id: &str, count: u32) -> Unit {
        Unit {
            id: id.to_string(),
            pod: "pod-1".to_string(),
            name: id.to_string(),
            kind: UnitKind::Instance,
            count,
            deployments: Vec::new(),
            deploy_spec: "spec-1".to_string(),
        }
    }

    fn test_scheduler(unit: &str, count: u32) -> SchedulerRecord {
        let mut tickets = HashMap::new();
        for node in ["node-1", "node-2"] {
            tickets.insert(
                node.to_string(),
                vec![Ticket {
                    node: node.to_string(),
                    offset: 0,
                }],
            );
        }
        SchedulerRecord {
            id: SchedulerId {
                pod: "pod-1".to_string(),
                unit: unit.to_string(),
            },
            round: "round-1".to_string(),
            kind: UnitKind::Instance,
            created_at: 1000,
            modified_at: 1000,
            count,
            spec: "spec-1".to_string(),
            override_count: 0,
            consumed: 0,
            tickets,
            failures: HashMap::new(),
        }
    }

    // ── Inventory ──────────────────────────────────────────────────

    #[test]
    fn node_put_get_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let node = test_node("node-1", "zone-a", 1000);

        store.put_node(&node).unwrap();
        assert_eq!(store.get_node("node-1").unwrap(), Some(node));
        assert_eq!(store.list_nodes().unwrap().len(), 1);

        assert!(store.delete_node("node-1").unwrap());
        assert!(!store.delete_node("node-1").unwrap());
        assert!(store.get_node("node-1").unwrap().is_none());
    }

    #[test]
    fn reserve_node_capacity_accumulates() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_node(&test_node("node-1", "zone-a", 1000)).unwrap();

        store.reserve_node_capacity("node-1", 2, 4.0).unwrap();
        let node = store.reserve_node_capacity("node-1", 2, 4.0).unwrap();

        assert_eq!(node.cpu_units_res, 4);
        assert_eq!(node.memory_units_res, 8.0);
        assert!(store.reserve_node_capacity("missing", 1, 1.0).is_err());
    }

    #[test]
    fn heartbeat_keeps_reserved_capacity() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_node(&test_node("node-1", "zone-a", 1000)).unwrap();
        store.reserve_node_capacity("node-1", 4, 8.0).unwrap();

        assert!(store.touch_node_heartbeat("node-1", 2000).unwrap());
        assert!(!store.touch_node_heartbeat("missing", 2000).unwrap());

        let node = store.get_node("node-1").unwrap().unwrap();
        assert_eq!(node.last_heartbeat, 2000);
        assert_eq!(node.cpu_units_res, 4);
    }

    #[test]
    fn shape_query_filters_zone_role_online_and_mounts() {
        let store = StateStore::open_in_memory().unwrap();
        let now = 10_000;
        for (id, dc) in [("zone-a", "dc-1"), ("zone-b", "dc-1"), ("zone-c", "dc-2")] {
            store
                .put_zone(&Zone {
                    id: id.to_string(),
                    datacenter: dc.to_string(),
                    name: id.to_string(),
                })
                .unwrap();
        }

        store.put_node(&test_node("online-a", "zone-a", now)).unwrap();
        store.put_node(&test_node("online-b", "zone-b", now - 5)).unwrap();
        store.put_node(&test_node("stale", "zone-a", now - 600)).unwrap();
        store.put_node(&test_node("other-dc", "zone-c", now)).unwrap();
        let mut no_role = test_node("no-role", "zone-a", now);
        no_role.roles = vec!["storage".to_string()];
        store.put_node(&no_role).unwrap();

        let shape = Shape {
            id: "shape-1".to_string(),
            name: "small".to_string(),
            datacenter: "dc-1".to_string(),
            roles: vec!["instances".to_string()],
            processors: 2,
            memory: 2048,
            flexible: false,
        };

        let mut instance = InstanceSpec::default();
        let query = store.query_shape_nodes(&shape, &instance, now).unwrap();
        let mut ids: Vec<_> = query.nodes.iter().map(|n| n.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["online-a", "online-b"]);
        assert_eq!(query.offline_count, 1);
        assert_eq!(query.no_mount_count, 0);

        instance.mounts = vec![MountSpec {
            name: "data".to_string(),
            nodes: vec!["online-b".to_string()],
        }];
        let query = store.query_shape_nodes(&shape, &instance, now).unwrap();
        assert_eq!(query.nodes.len(), 1);
        assert_eq!(query.nodes[0].id, "online-b");
        assert_eq!(query.no_mount_count, 1);

        instance.mounts.clear();
        instance.zone = Some("zone-a".to_string());
        let query = store.query_shape_nodes(&shape, &instance, now).unwrap();
        assert_eq!(query.nodes.len(), 1);
        assert_eq!(query.nodes[0].id, "online-a");
    }

    // ── Units ──────────────────────────────────────────────────────

    #[test]
    fn unit_reserve_is_compare_and_swap() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_unit(&test_unit("unit-1", 2)).unwrap();

        assert!(store
            .reserve_unit_deployment("unit-1", "pod-1", 2, 0, "deploy-a")
            .unwrap());
        // Same stale view again: length moved to 1, so the filter misses.
        assert!(!store
            .reserve_unit_deployment("unit-1", "pod-1", 2, 0, "deploy-b")
            .unwrap());
        // Wrong pod and wrong count never match.
        assert!(!store
            .reserve_unit_deployment("unit-1", "pod-2", 2, 1, "deploy-b")
            .unwrap());
        assert!(!store
            .reserve_unit_deployment("unit-1", "pod-1", 3, 1, "deploy-b")
            .unwrap());

        let unit = store.get_unit("unit-1").unwrap().unwrap();
        assert_eq!(unit.deployments, vec!["deploy-a".to_string()]);
    }

    #[test]
    fn unit_push_and_pull_deployment() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_unit(&test_unit("unit-1", 1)).unwrap();

        assert!(store.push_unit_deployment("unit-1", "deploy-a").unwrap());
        assert!(store.push_unit_deployment("unit-1", "deploy-b").unwrap());
        assert!(store.pull_unit_deployment("unit-1", "deploy-a").unwrap());

        let unit = store.get_unit("unit-1").unwrap().unwrap();
        assert_eq!(unit.deployments, vec!["deploy-b".to_string()]);
        assert!(!store.push_unit_deployment("missing", "deploy-c").unwrap());
    }

    // ── Schedulers ─────────────────────────────────────────────────

    #[test]
    fn scheduler_insert_rejects_duplicate() {
        let store = StateStore::open_in_memory().unwrap();
        let record = test_scheduler("unit-1", 2);

        store.insert_scheduler(&record).unwrap();
        let err = store.insert_scheduler(&record).unwrap_err();
        assert!(err.is_duplicate());

        assert!(store.scheduler_exists(&record.id).unwrap());
        assert_eq!(store.get_scheduler(&record.id).unwrap(), Some(record));
    }

    #[test]
    fn consume_stops_at_count() {
        let store = StateStore::open_in_memory().unwrap();
        let record = test_scheduler("unit-1", 2);
        store.insert_scheduler(&record).unwrap();

        let first = store.consume_scheduler(&record.id, 2000).unwrap().unwrap();
        assert_eq!(first.consumed, 1);
        assert_eq!(first.modified_at, 2000);
        let second = store.consume_scheduler(&record.id, 2001).unwrap().unwrap();
        assert_eq!(second.consumed, 2);
        assert!(store.consume_scheduler(&record.id, 2002).unwrap().is_none());

        let stored = store.get_scheduler(&record.id).unwrap().unwrap();
        assert_eq!(stored.consumed, 2);
        assert_eq!(stored.modified_at, 2001);
        assert!(store.list_active_schedulers().unwrap().is_empty());
    }

    #[test]
    fn failure_threshold_unsets_tickets_in_same_update() {
        let store = StateStore::open_in_memory().unwrap();
        let record = test_scheduler("unit-1", 2);
        store.insert_scheduler(&record).unwrap();

        let after = store
            .record_scheduler_failure(&record.id, "node-1", 2)
            .unwrap()
            .unwrap();
        assert_eq!(after.failures_for("node-1"), 1);
        assert!(after.tickets.contains_key("node-1"));

        let after = store
            .record_scheduler_failure(&record.id, "node-1", 2)
            .unwrap()
            .unwrap();
        assert_eq!(after.failures_for("node-1"), 2);
        assert!(!after.tickets.contains_key("node-1"));
        assert!(after.tickets.contains_key("node-2"));
    }

    #[test]
    fn clear_tickets_and_missing_record() {
        let store = StateStore::open_in_memory().unwrap();
        let record = test_scheduler("unit-1", 2);
        store.insert_scheduler(&record).unwrap();

        let after = store
            .clear_scheduler_tickets(&record.id, "node-2")
            .unwrap()
            .unwrap();
        assert_eq!(after.tickets.len(), 1);

        assert!(store.delete_scheduler(&record.id).unwrap());
        assert!(store
            .clear_scheduler_tickets(&record.id, "node-1")
            .unwrap()
            .is_none());
        assert!(store.consume_scheduler(&record.id, 1).unwrap().is_none());
    }

    #[test]
    fn commit_fields_only_touches_selected_fields() {
        let store = StateStore::open_in_memory().unwrap();
        let record = test_scheduler("unit-1", 2);
        store.insert_scheduler(&record).unwrap();

        let mut local = record.clone();
        local.count = 5;
        local.consumed = 1;
        local.tickets.clear();
        assert!(store
            .commit_scheduler_fields(&local, &[SchedulerField::Count])
            .unwrap());

        let stored = store.get_scheduler(&record.id).unwrap().unwrap();
        assert_eq!(stored.count, 5);
        assert_eq!(stored.consumed, 0);
        assert_eq!(stored.tickets.len(), 2);
    }

    // ── Deployments ────────────────────────────────────────────────

    #[test]
    fn deployments_listed_per_unit() {
        let store = StateStore::open_in_memory().unwrap();
        for (id, unit) in [("d1", "unit-1"), ("d2", "unit-1"), ("d3", "unit-2")] {
            store
                .put_deployment(&DeploymentRecord {
                    id: id.to_string(),
                    pod: "pod-1".to_string(),
                    unit: unit.to_string(),
                    spec: "spec-1".to_string(),
                    node: "node-1".to_string(),
                    state: DeploymentState::Reserved,
                    created_at: 1000,
                })
                .unwrap();
        }

        assert_eq!(store.list_deployments_for_unit("unit-1").unwrap().len(), 2);
        assert!(store.delete_deployment("d3").unwrap());
        assert!(store.list_deployments_for_unit("unit-2").unwrap().is_empty());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("fleet.redb");
        let record = test_scheduler("unit-1", 3);

        {
            let store = StateStore::open(&db_path).unwrap();
            store.insert_scheduler(&record).unwrap();
            store.consume_scheduler(&record.id, 1500).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let stored = store.get_scheduler(&record.id).unwrap().unwrap();
        assert_eq!(stored.consumed, 1);
        assert_eq!(stored.ticket_count(), 2);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_nodes().unwrap().is_empty());
        assert!(store.list_units().unwrap().is_empty());
        assert!(store.list_schedulers().unwrap().is_empty());
        assert!(store.get_spec("nope").unwrap().is_none());
        assert!(!store.delete_unit("nope").unwrap());
        assert!(!store
            .reserve_unit_deployment("nope", "pod", 1, 0, "d")
            .unwrap());
    }
}
