/**
 * INVENTORY STORE - Stockage en mémoire de l'inventaire du parc
 *
 * RÔLE :
 * Ce module tient les tables de l'inventaire : enregistrements de base,
 * lignes variantes (asset physique, serveur virtuel, hôte cloud, cluster)
 * et entités liées (services, racks, licences, interfaces réseau...).
 *
 * FONCTIONNEMENT :
 * - Tables HashMap id -> ligne, chargées depuis un snapshot JSON au boot
 * - Fetch batché par variante : un appel par type présent, jamais par id
 * - Compteur de fetchs batchés exposé pour le monitoring et les tests
 * - Persistance fichier JSON (inventory.json) comme le reste du kernel
 *
 * UTILITÉ DANS PARC :
 * 🎯 Résolution polymorphe : le resolver partitionne puis fetch par variante
 * 🎯 Moteur de graphes : projections JSON des enregistrements avec relations
 * 🎯 Write path : mutation des lignes variantes après validation
 */

use crate::models::{
    BaseRecord, CloudHost, Cluster, ClusterType, Environment, Ethernet, Licence,
    LicenceAssignment, PhysicalAsset, Rack, RecordType, Service, ServiceEnvironment,
    VirtualServer,
};
use crate::scope::{ScopeUser, VisibilityScope};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Snapshot sérialisable de l'inventaire complet (format du fichier de données
/// et des fixtures devkit).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventorySnapshot {
    #[serde(default)]
    pub base: Vec<BaseRecord>,
    #[serde(default)]
    pub physical: Vec<PhysicalAsset>,
    #[serde(default)]
    pub virtual_servers: Vec<VirtualServer>,
    #[serde(default)]
    pub cloud_hosts: Vec<CloudHost>,
    #[serde(default)]
    pub clusters: Vec<Cluster>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub environments: Vec<Environment>,
    #[serde(default)]
    pub service_envs: Vec<ServiceEnvironment>,
    #[serde(default)]
    pub racks: Vec<Rack>,
    #[serde(default)]
    pub cluster_types: Vec<ClusterType>,
    #[serde(default)]
    pub ethernets: Vec<Ethernet>,
    #[serde(default)]
    pub licences: Vec<Licence>,
    #[serde(default)]
    pub licence_assignments: Vec<LicenceAssignment>,
    #[serde(default)]
    pub visibility_scopes: Vec<VisibilityScope>,
    #[serde(default)]
    pub users: Vec<ScopeUser>,
}

pub struct InventoryStore {
    base: HashMap<String, BaseRecord>,
    physical: HashMap<String, PhysicalAsset>,
    virtual_servers: HashMap<String, VirtualServer>,
    cloud_hosts: HashMap<String, CloudHost>,
    clusters: HashMap<String, Cluster>,
    services: HashMap<String, Service>,
    environments: HashMap<String, Environment>,
    service_envs: HashMap<String, ServiceEnvironment>,
    racks: HashMap<String, Rack>,
    cluster_types: HashMap<String, ClusterType>,
    ethernets: HashMap<String, Ethernet>,
    licences: HashMap<String, Licence>,
    licence_assignments: HashMap<String, LicenceAssignment>,
    visibility_scopes: Vec<VisibilityScope>,
    users: HashMap<String, ScopeUser>,
    data_file: Option<PathBuf>,
    /// Nombre de fetchs batchés émis (un par variante présente dans une résolution)
    batch_fetches: AtomicU32,
}

impl InventoryStore {
    pub fn new() -> Self {
        Self {
            base: HashMap::new(),
            physical: HashMap::new(),
            virtual_servers: HashMap::new(),
            cloud_hosts: HashMap::new(),
            clusters: HashMap::new(),
            services: HashMap::new(),
            environments: HashMap::new(),
            service_envs: HashMap::new(),
            racks: HashMap::new(),
            cluster_types: HashMap::new(),
            ethernets: HashMap::new(),
            licences: HashMap::new(),
            licence_assignments: HashMap::new(),
            visibility_scopes: Vec::new(),
            users: HashMap::new(),
            data_file: None,
            batch_fetches: AtomicU32::new(0),
        }
    }

    /// Ouvre le store sur un fichier d'inventaire, créé vide s'il n'existe pas.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StoreError> {
        let path = path.into();
        let mut store = Self::new();
        store.data_file = Some(path.clone());
        if !path.exists() {
            std::fs::write(&path, "{}")?;
        }
        let content = std::fs::read_to_string(&path)?;
        let snapshot: InventorySnapshot = serde_json::from_str(&content)?;
        store.load_snapshot(snapshot);
        eprintln!("[store] inventory loaded from {:?} ({} base records)", path, store.base.len());
        Ok(store)
    }

    pub fn load_snapshot(&mut self, snapshot: InventorySnapshot) {
        self.base = snapshot.base.into_iter().map(|r| (r.id.clone(), r)).collect();
        self.physical = snapshot.physical.into_iter().map(|r| (r.id.clone(), r)).collect();
        self.virtual_servers = snapshot.virtual_servers.into_iter().map(|r| (r.id.clone(), r)).collect();
        self.cloud_hosts = snapshot.cloud_hosts.into_iter().map(|r| (r.id.clone(), r)).collect();
        self.clusters = snapshot.clusters.into_iter().map(|r| (r.id.clone(), r)).collect();
        self.services = snapshot.services.into_iter().map(|r| (r.id.clone(), r)).collect();
        self.environments = snapshot.environments.into_iter().map(|r| (r.id.clone(), r)).collect();
        self.service_envs = snapshot.service_envs.into_iter().map(|r| (r.id.clone(), r)).collect();
        self.racks = snapshot.racks.into_iter().map(|r| (r.id.clone(), r)).collect();
        self.cluster_types = snapshot.cluster_types.into_iter().map(|r| (r.id.clone(), r)).collect();
        self.ethernets = snapshot.ethernets.into_iter().map(|r| (r.id.clone(), r)).collect();
        self.licences = snapshot.licences.into_iter().map(|r| (r.id.clone(), r)).collect();
        self.licence_assignments = snapshot.licence_assignments.into_iter().map(|r| (r.id.clone(), r)).collect();
        self.visibility_scopes = snapshot.visibility_scopes;
        self.users = snapshot.users.into_iter().map(|u| (u.username.clone(), u)).collect();
    }

    /// Charge un snapshot depuis une valeur JSON (fixtures de test).
    pub fn load_value(&mut self, value: serde_json::Value) -> Result<(), StoreError> {
        let snapshot: InventorySnapshot = serde_json::from_value(value)?;
        self.load_snapshot(snapshot);
        Ok(())
    }

    pub fn snapshot(&self) -> InventorySnapshot {
        let mut snapshot = InventorySnapshot {
            base: self.base.values().cloned().collect(),
            physical: self.physical.values().cloned().collect(),
            virtual_servers: self.virtual_servers.values().cloned().collect(),
            cloud_hosts: self.cloud_hosts.values().cloned().collect(),
            clusters: self.clusters.values().cloned().collect(),
            services: self.services.values().cloned().collect(),
            environments: self.environments.values().cloned().collect(),
            service_envs: self.service_envs.values().cloned().collect(),
            racks: self.racks.values().cloned().collect(),
            cluster_types: self.cluster_types.values().cloned().collect(),
            ethernets: self.ethernets.values().cloned().collect(),
            licences: self.licences.values().cloned().collect(),
            licence_assignments: self.licence_assignments.values().cloned().collect(),
            visibility_scopes: self.visibility_scopes.clone(),
            users: self.users.values().cloned().collect(),
        };
        // Ordre stable pour un fichier diffable
        snapshot.base.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot.physical.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot.virtual_servers.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot.cloud_hosts.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot.clusters.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot
    }

    pub fn save_to_disk(&self) -> Result<(), StoreError> {
        let Some(path) = &self.data_file else { return Ok(()); };
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    // --- Identités et partitionnement ---

    /// Tag de type concret d'un enregistrement de base (le lookup "type-discovery"
    /// du write path).
    pub fn type_of(&self, id: &str) -> Option<RecordType> {
        self.base.get(id).map(|b| b.object_type)
    }

    pub fn base_record(&self, id: &str) -> Option<&BaseRecord> {
        self.base.get(id)
    }

    pub fn base_record_mut(&mut self, id: &str) -> Option<&mut BaseRecord> {
        self.base.get_mut(id)
    }

    /// Tous les ids d'hôtes, ordre stable.
    pub fn host_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.base.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn host_ids_of(&self, object_type: RecordType) -> Vec<String> {
        let mut ids: Vec<String> = self
            .base
            .values()
            .filter(|b| b.object_type == object_type)
            .map(|b| b.id.clone())
            .collect();
        ids.sort();
        ids
    }

    // --- Fetchs batchés par variante (un appel par type présent) ---

    fn note_batch_fetch(&self) {
        self.batch_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_fetches(&self) -> u32 {
        self.batch_fetches.load(Ordering::Relaxed)
    }

    pub fn fetch_physical_batch(&self, ids: &[String]) -> Vec<&PhysicalAsset> {
        self.note_batch_fetch();
        ids.iter().filter_map(|id| self.physical.get(id)).collect()
    }

    pub fn fetch_virtual_batch(&self, ids: &[String]) -> Vec<&VirtualServer> {
        self.note_batch_fetch();
        ids.iter().filter_map(|id| self.virtual_servers.get(id)).collect()
    }

    pub fn fetch_cloud_batch(&self, ids: &[String]) -> Vec<&CloudHost> {
        self.note_batch_fetch();
        ids.iter().filter_map(|id| self.cloud_hosts.get(id)).collect()
    }

    pub fn fetch_cluster_batch(&self, ids: &[String]) -> Vec<&Cluster> {
        self.note_batch_fetch();
        ids.iter().filter_map(|id| self.clusters.get(id)).collect()
    }

    // --- Accès lignes variantes (write path, lookups unitaires) ---

    pub fn physical_asset(&self, id: &str) -> Option<&PhysicalAsset> {
        self.physical.get(id)
    }

    pub fn virtual_server(&self, id: &str) -> Option<&VirtualServer> {
        self.virtual_servers.get(id)
    }

    pub fn cloud_host(&self, id: &str) -> Option<&CloudHost> {
        self.cloud_hosts.get(id)
    }

    pub fn cluster(&self, id: &str) -> Option<&Cluster> {
        self.clusters.get(id)
    }

    pub fn physical_asset_mut(&mut self, id: &str) -> Option<&mut PhysicalAsset> {
        self.physical.get_mut(id)
    }

    pub fn virtual_server_mut(&mut self, id: &str) -> Option<&mut VirtualServer> {
        self.virtual_servers.get_mut(id)
    }

    pub fn cloud_host_mut(&mut self, id: &str) -> Option<&mut CloudHost> {
        self.cloud_hosts.get_mut(id)
    }

    pub fn cluster_mut(&mut self, id: &str) -> Option<&mut Cluster> {
        self.clusters.get_mut(id)
    }

    // --- Entités liées (cibles des eager-loads) ---

    pub fn service(&self, id: &str) -> Option<&Service> {
        self.services.get(id)
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    pub fn environment(&self, id: &str) -> Option<&Environment> {
        self.environments.get(id)
    }

    pub fn service_env(&self, id: &str) -> Option<&ServiceEnvironment> {
        self.service_envs.get(id)
    }

    pub fn rack(&self, id: &str) -> Option<&Rack> {
        self.racks.get(id)
    }

    pub fn racks(&self) -> impl Iterator<Item = &Rack> {
        self.racks.values()
    }

    pub fn cluster_type(&self, id: &str) -> Option<&ClusterType> {
        self.cluster_types.get(id)
    }

    pub fn licence(&self, id: &str) -> Option<&Licence> {
        self.licences.get(id)
    }

    pub fn ethernets_of(&self, base_id: &str) -> Vec<&Ethernet> {
        let mut out: Vec<&Ethernet> = self
            .ethernets
            .values()
            .filter(|e| e.base_object == base_id)
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn remove_ethernet(&mut self, id: &str) -> Option<Ethernet> {
        self.ethernets.remove(id)
    }

    pub fn licence_assignments_of(&self, base_id: &str) -> Vec<&LicenceAssignment> {
        let mut out: Vec<&LicenceAssignment> = self
            .licence_assignments
            .values()
            .filter(|a| a.base_object == base_id)
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn visibility_scopes(&self) -> &[VisibilityScope] {
        &self.visibility_scopes
    }

    pub fn user(&self, username: &str) -> Option<&ScopeUser> {
        self.users.get(username)
    }

    pub fn counts(&self) -> StoreCounts {
        StoreCounts {
            hosts: self.base.len() as u32,
            services: self.services.len() as u32,
            racks: self.racks.len() as u32,
            licences: self.licences.len() as u32,
        }
    }
}

impl Default for InventoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StoreCounts {
    pub hosts: u32,
    pub services: u32,
    pub racks: u32,
    pub licences: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot_loads() {
        let mut store = InventoryStore::new();
        store.load_value(serde_json::json!({})).unwrap();
        assert!(store.host_ids().is_empty());
        assert_eq!(store.batch_fetches(), 0);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut store = InventoryStore::new();
        store
            .load_value(serde_json::json!({
                "base": [{"id": "pa-1", "object_type": "physical_asset"}],
                "physical": [{"id": "pa-1", "hostname": "db-01", "sn": null, "barcode": "bc-1",
                              "price": 100.0, "delivery_date": "2016-01-01",
                              "rack": null, "position": null, "slot_no": null}],
            }))
            .unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.base.len(), 1);
        assert_eq!(snapshot.physical[0].hostname.as_deref(), Some("db-01"));

        let mut reloaded = InventoryStore::new();
        reloaded.load_snapshot(snapshot);
        assert_eq!(reloaded.type_of("pa-1"), Some(RecordType::PhysicalAsset));
    }

    #[test]
    fn test_batch_fetch_counter() {
        let mut store = InventoryStore::new();
        store
            .load_value(serde_json::json!({
                "base": [
                    {"id": "pa-1", "object_type": "physical_asset"},
                    {"id": "pa-2", "object_type": "physical_asset"},
                ],
                "physical": [
                    {"id": "pa-1", "hostname": null, "sn": null, "barcode": null, "price": null,
                     "rack": null, "position": null, "slot_no": null},
                    {"id": "pa-2", "hostname": null, "sn": null, "barcode": null, "price": null,
                     "rack": null, "position": null, "slot_no": null},
                ],
            }))
            .unwrap();

        let ids = store.host_ids();
        let fetched = store.fetch_physical_batch(&ids);
        assert_eq!(fetched.len(), 2);
        assert_eq!(store.batch_fetches(), 1);
    }
}
