/**
 * HOST RESOLVER - Résolution polymorphe des hôtes du parc
 *
 * RÔLE :
 * Derrière chaque enregistrement de base se cache exactement une variante
 * concrète (asset physique, serveur virtuel, hôte cloud, cluster). Ce module
 * résout le type le plus dérivé pour un lot d'ids et route les écritures vers
 * le chemin de validation de la variante.
 *
 * FONCTIONNEMENT :
 * - resolve_batch : partition des ids par tag de type, UN fetch batché par
 *   variante présente (jamais un par enregistrement), eager-load générique
 *   (service env, ethernets, licences) + supplément par variante (rack,
 *   hyperviseur, type de cluster), fusion dans l'ordre de l'appelant
 * - Id inconnu ou ligne variante manquante -> gap de résolution rapporté
 *   par id, jamais un échec du batch entier
 * - Write path : découverte du type concret (un lookup, mis en cache pour la
 *   requête) puis dispatch vers le validateur de la variante via la table
 *   tag -> (eager-load, validateur)
 */

use crate::models::{
    ClusterType, Environment, Ethernet, HostUpdate, Licence, Rack, RecordType, Service,
};
use crate::store::InventoryStore;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Écriture demandée sur un id dont le type concret est indéterminable
    #[error("host not found: {0}")]
    NotFound(String),
    /// Refus du validateur de la variante, propagé tel quel
    #[error("validation failed: {0}")]
    Validation(String),
}

/// Id irrésoluble dans un batch : rapporté à côté des succès, n'avorte rien.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResolutionGap {
    pub id: String,
    pub reason: GapReason,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    UnknownId,
    MissingVariantRow,
}

#[derive(Debug, Serialize)]
pub struct BatchResolution {
    pub hosts: Vec<HostRecord>,
    pub gaps: Vec<ResolutionGap>,
}

// --- Vues résolues (variante + relations chargées) ---

#[derive(Debug, Clone, Serialize)]
pub struct ServiceEnvView {
    pub id: String,
    pub service: Option<Service>,
    pub environment: Option<Environment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LicenceAssignmentView {
    pub licence: Option<Licence>,
    pub quantity: u32,
}

/// Données communes chargées pour toutes les variantes (jeu d'eager-load générique).
#[derive(Debug, Clone, Serialize)]
pub struct HostCommon {
    pub service_env: Option<ServiceEnvView>,
    pub parent: Option<String>,
    pub tags: Vec<String>,
    pub custom_fields: HashMap<String, String>,
    pub ethernet: Vec<Ethernet>,
    pub licences: Vec<LicenceAssignmentView>,
}

/// Vue d'un asset physique : champs de la ligne variante, la référence rack
/// remplacée par l'objet chargé.
#[derive(Debug, Clone, Serialize)]
pub struct PhysicalHostView {
    pub id: String,
    pub hostname: Option<String>,
    pub sn: Option<String>,
    pub barcode: Option<String>,
    pub price: Option<f64>,
    #[serde(with = "crate::models::iso_date::option")]
    pub delivery_date: Option<time::Date>,
    pub force_depreciation: bool,
    pub position: Option<u16>,
    pub slot_no: Option<String>,
    pub rack: Option<Rack>,
    #[serde(flatten)]
    pub common: HostCommon,
}

#[derive(Debug, Clone, Serialize)]
pub struct VirtualHostView {
    pub id: String,
    pub hostname: Option<String>,
    pub sn: Option<String>,
    #[serde(flatten)]
    pub common: HostCommon,
}

/// Résumé de l'hyperviseur d'un hôte cloud (eager-load supplémentaire).
#[derive(Debug, Clone, Serialize)]
pub struct HypervisorView {
    pub id: String,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CloudHostView {
    pub id: String,
    pub hostname: Option<String>,
    pub image_name: Option<String>,
    pub hypervisor: Option<HypervisorView>,
    #[serde(flatten)]
    pub common: HostCommon,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterHostView {
    pub id: String,
    pub name: String,
    pub hostname: Option<String>,
    pub members: Vec<String>,
    #[serde(rename = "type")]
    pub cluster_type: Option<ClusterType>,
    #[serde(flatten)]
    pub common: HostCommon,
}

/// Enregistrement résolu au type le plus dérivé.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "object_type", rename_all = "snake_case")]
pub enum HostRecord {
    PhysicalAsset(PhysicalHostView),
    VirtualServer(VirtualHostView),
    CloudHost(CloudHostView),
    Cluster(ClusterHostView),
}

impl HostRecord {
    pub fn id(&self) -> &str {
        match self {
            HostRecord::PhysicalAsset(v) => &v.id,
            HostRecord::VirtualServer(v) => &v.id,
            HostRecord::CloudHost(v) => &v.id,
            HostRecord::Cluster(v) => &v.id,
        }
    }

    pub fn record_type(&self) -> RecordType {
        match self {
            HostRecord::PhysicalAsset(_) => RecordType::PhysicalAsset,
            HostRecord::VirtualServer(_) => RecordType::VirtualServer,
            HostRecord::CloudHost(_) => RecordType::CloudHost,
            HostRecord::Cluster(_) => RecordType::Cluster,
        }
    }

    /// Hostname courant ; un cluster sans hostname retombe sur son nom.
    pub fn hostname(&self) -> Option<&str> {
        match self {
            HostRecord::PhysicalAsset(v) => v.hostname.as_deref(),
            HostRecord::VirtualServer(v) => v.hostname.as_deref(),
            HostRecord::CloudHost(v) => v.hostname.as_deref(),
            HostRecord::Cluster(v) => v.hostname.as_deref().or(Some(&v.name)),
        }
    }

    pub fn common(&self) -> &HostCommon {
        match self {
            HostRecord::PhysicalAsset(v) => &v.common,
            HostRecord::VirtualServer(v) => &v.common,
            HostRecord::CloudHost(v) => &v.common,
            HostRecord::Cluster(v) => &v.common,
        }
    }

    pub fn service_name(&self) -> Option<&str> {
        self.common()
            .service_env
            .as_ref()
            .and_then(|se| se.service.as_ref())
            .map(|s| s.name.as_str())
    }
}

// --- Table de dispatch par variante ---

/// Relation supplémentaire chargée avec une variante (pas de round trip par
/// enregistrement ; le jeu générique est dans build_common).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Rack,
    Hypervisor,
    ClusterType,
}

/// Opérations propres à une variante : eager-load supplémentaire + validateur d'écriture.
pub struct VariantOps {
    pub supplemental: &'static [Relation],
    pub validate: fn(&InventoryStore, &str, &HostUpdate) -> Result<(), ResolveError>,
}

pub fn variant_ops(record_type: RecordType) -> &'static VariantOps {
    static PHYSICAL: VariantOps =
        VariantOps { supplemental: &[Relation::Rack], validate: validate_physical };
    static VIRTUAL: VariantOps = VariantOps { supplemental: &[], validate: validate_virtual };
    static CLOUD: VariantOps =
        VariantOps { supplemental: &[Relation::Hypervisor], validate: validate_cloud };
    static CLUSTER: VariantOps =
        VariantOps { supplemental: &[Relation::ClusterType], validate: validate_cluster };
    match record_type {
        RecordType::PhysicalAsset => &PHYSICAL,
        RecordType::VirtualServer => &VIRTUAL,
        RecordType::CloudHost => &CLOUD,
        RecordType::Cluster => &CLUSTER,
    }
}

// --- Résolution batchée ---

/// Résout un lot d'ids : partition par type, un fetch batché par variante
/// présente, fusion dans l'ordre de l'appelant. Les ids irrésolubles sortent
/// en gaps, jamais en erreur.
pub fn resolve_batch(store: &InventoryStore, ids: &[String]) -> BatchResolution {
    let mut by_type: HashMap<RecordType, Vec<String>> = HashMap::new();
    let mut gaps = Vec::new();
    for id in ids {
        match store.type_of(id) {
            Some(record_type) => by_type.entry(record_type).or_default().push(id.clone()),
            None => gaps.push(ResolutionGap { id: id.clone(), reason: GapReason::UnknownId }),
        }
    }

    let mut resolved: HashMap<String, HostRecord> = HashMap::new();
    for (record_type, type_ids) in &by_type {
        resolve_variant(store, *record_type, type_ids, &mut resolved);
        for id in type_ids {
            if !resolved.contains_key(id) {
                gaps.push(ResolutionGap { id: id.clone(), reason: GapReason::MissingVariantRow });
            }
        }
    }

    let hosts = ids.iter().filter_map(|id| resolved.remove(id)).collect();
    BatchResolution { hosts, gaps }
}

pub fn resolve_one(store: &InventoryStore, id: &str) -> Result<HostRecord, ResolveError> {
    let mut batch = resolve_batch(store, &[id.to_string()]);
    batch.hosts.pop().ok_or_else(|| ResolveError::NotFound(id.to_string()))
}

fn resolve_variant(
    store: &InventoryStore,
    record_type: RecordType,
    ids: &[String],
    out: &mut HashMap<String, HostRecord>,
) {
    let ops = variant_ops(record_type);
    match record_type {
        RecordType::PhysicalAsset => {
            for asset in store.fetch_physical_batch(ids) {
                let rack = load_rack(store, ops, asset.rack.as_deref());
                let common = build_common(store, asset.id.as_str());
                out.insert(
                    asset.id.clone(),
                    HostRecord::PhysicalAsset(PhysicalHostView {
                        id: asset.id.clone(),
                        hostname: asset.hostname.clone(),
                        sn: asset.sn.clone(),
                        barcode: asset.barcode.clone(),
                        price: asset.price,
                        delivery_date: asset.delivery_date,
                        force_depreciation: asset.force_depreciation,
                        position: asset.position,
                        slot_no: asset.slot_no.clone(),
                        rack,
                        common,
                    }),
                );
            }
        }
        RecordType::VirtualServer => {
            for server in store.fetch_virtual_batch(ids) {
                let common = build_common(store, server.id.as_str());
                out.insert(
                    server.id.clone(),
                    HostRecord::VirtualServer(VirtualHostView {
                        id: server.id.clone(),
                        hostname: server.hostname.clone(),
                        sn: server.sn.clone(),
                        common,
                    }),
                );
            }
        }
        RecordType::CloudHost => {
            for host in store.fetch_cloud_batch(ids) {
                let hypervisor = load_hypervisor(store, ops, host.hypervisor.as_deref());
                let common = build_common(store, host.id.as_str());
                out.insert(
                    host.id.clone(),
                    HostRecord::CloudHost(CloudHostView {
                        id: host.id.clone(),
                        hostname: host.hostname.clone(),
                        image_name: host.image_name.clone(),
                        hypervisor,
                        common,
                    }),
                );
            }
        }
        RecordType::Cluster => {
            for cluster in store.fetch_cluster_batch(ids) {
                let cluster_type = load_cluster_type(store, ops, cluster.cluster_type.as_deref());
                let common = build_common(store, cluster.id.as_str());
                out.insert(
                    cluster.id.clone(),
                    HostRecord::Cluster(ClusterHostView {
                        id: cluster.id.clone(),
                        name: cluster.name.clone(),
                        hostname: cluster.hostname.clone(),
                        members: cluster.members.clone(),
                        cluster_type,
                        common,
                    }),
                );
            }
        }
    }
}

/// Jeu de jointures générique, appliqué à toutes les variantes : service env,
/// interfaces réseau, licences, champs du socle commun.
fn build_common(store: &InventoryStore, id: &str) -> HostCommon {
    let base = store.base_record(id);
    let service_env = base
        .and_then(|b| b.service_env.as_deref())
        .and_then(|se_id| store.service_env(se_id))
        .map(|se| ServiceEnvView {
            id: se.id.clone(),
            service: store.service(&se.service).cloned(),
            environment: store.environment(&se.environment).cloned(),
        });
    HostCommon {
        service_env,
        parent: base.and_then(|b| b.parent.clone()),
        tags: base.map(|b| b.tags.clone()).unwrap_or_default(),
        custom_fields: base.map(|b| b.custom_fields.clone()).unwrap_or_default(),
        ethernet: store.ethernets_of(id).into_iter().cloned().collect(),
        licences: store
            .licence_assignments_of(id)
            .into_iter()
            .map(|a| LicenceAssignmentView {
                licence: store.licence(&a.licence).cloned(),
                quantity: a.quantity,
            })
            .collect(),
    }
}

fn load_rack(store: &InventoryStore, ops: &VariantOps, rack_id: Option<&str>) -> Option<Rack> {
    if !ops.supplemental.contains(&Relation::Rack) {
        return None;
    }
    rack_id.and_then(|id| store.rack(id)).cloned()
}

fn load_hypervisor(
    store: &InventoryStore,
    ops: &VariantOps,
    hypervisor_id: Option<&str>,
) -> Option<HypervisorView> {
    if !ops.supplemental.contains(&Relation::Hypervisor) {
        return None;
    }
    hypervisor_id
        .and_then(|id| store.physical_asset(id))
        .map(|asset| HypervisorView { id: asset.id.clone(), hostname: asset.hostname.clone() })
}

fn load_cluster_type(
    store: &InventoryStore,
    ops: &VariantOps,
    type_id: Option<&str>,
) -> Option<ClusterType> {
    if !ops.supplemental.contains(&Relation::ClusterType) {
        return None;
    }
    type_id.and_then(|id| store.cluster_type(id)).cloned()
}

// --- Write path ---

/// État capturé avant écriture, embarqué dans l'événement de mise à jour.
#[derive(Debug, Clone, Serialize)]
pub struct PreviousState {
    pub hostname: Option<String>,
}

#[derive(Debug)]
pub struct WriteOutcome {
    pub host: HostRecord,
    pub previous: PreviousState,
}

/// Routeur d'écritures : découvre le type concret (un lookup, mis en cache
/// pour la durée de la requête) puis dispatch vers la variante.
pub struct WriteRouter {
    type_cache: HashMap<String, RecordType>,
    type_lookups: u32,
}

impl WriteRouter {
    pub fn new() -> Self {
        Self { type_cache: HashMap::new(), type_lookups: 0 }
    }

    /// Nombre de lookups de découverte de type réellement émis (hors cache).
    pub fn type_lookups(&self) -> u32 {
        self.type_lookups
    }

    pub fn concrete_type(
        &mut self,
        store: &InventoryStore,
        id: &str,
    ) -> Result<RecordType, ResolveError> {
        if let Some(record_type) = self.type_cache.get(id) {
            return Ok(*record_type);
        }
        self.type_lookups += 1;
        let record_type = store.type_of(id).ok_or_else(|| ResolveError::NotFound(id.to_string()))?;
        self.type_cache.insert(id.to_string(), record_type);
        Ok(record_type)
    }

    pub fn resolve_one_for_write(
        &mut self,
        store: &InventoryStore,
        id: &str,
    ) -> Result<HostRecord, ResolveError> {
        self.concrete_type(store, id)?;
        resolve_one(store, id)
    }

    /// Valide puis applique une mise à jour via le chemin de la variante.
    /// Retourne la vue résolue après écriture et l'état précédent.
    pub fn apply_update(
        &mut self,
        store: &mut InventoryStore,
        id: &str,
        update: &HostUpdate,
    ) -> Result<WriteOutcome, ResolveError> {
        let record_type = self.concrete_type(store, id)?;
        let ops = variant_ops(record_type);
        validate_common(store, update)?;
        (ops.validate)(store, id, update)?;

        let previous = PreviousState { hostname: current_hostname(store, record_type, id) };
        apply_base(store, id, update);
        apply_variant(store, record_type, id, update);

        let host = resolve_one(store, id)?;
        Ok(WriteOutcome { host, previous })
    }
}

impl Default for WriteRouter {
    fn default() -> Self {
        Self::new()
    }
}

fn current_hostname(store: &InventoryStore, record_type: RecordType, id: &str) -> Option<String> {
    match record_type {
        RecordType::PhysicalAsset => store.physical_asset(id).and_then(|a| a.hostname.clone()),
        RecordType::VirtualServer => store.virtual_server(id).and_then(|s| s.hostname.clone()),
        RecordType::CloudHost => store.cloud_host(id).and_then(|h| h.hostname.clone()),
        RecordType::Cluster => store
            .cluster(id)
            .and_then(|c| c.hostname.clone().or_else(|| Some(c.name.clone()))),
    }
}

fn validate_common(store: &InventoryStore, update: &HostUpdate) -> Result<(), ResolveError> {
    if let Some(hostname) = &update.hostname {
        if hostname.trim().is_empty() {
            return Err(ResolveError::Validation("hostname cannot be empty".into()));
        }
    }
    if let Some(service_env) = &update.service_env {
        if store.service_env(service_env).is_none() {
            return Err(ResolveError::Validation(format!(
                "unknown service environment: {service_env}"
            )));
        }
    }
    Ok(())
}

fn reject_fields(record_type: RecordType, fields: &[(&str, bool)]) -> Result<(), ResolveError> {
    for (name, present) in fields {
        if *present {
            return Err(ResolveError::Validation(format!(
                "field '{name}' is not supported for {record_type}"
            )));
        }
    }
    Ok(())
}

fn validate_physical(
    store: &InventoryStore,
    id: &str,
    update: &HostUpdate,
) -> Result<(), ResolveError> {
    reject_fields(
        RecordType::PhysicalAsset,
        &[("hypervisor", update.hypervisor.is_some()), ("members", update.members.is_some())],
    )?;
    let target_rack = update
        .rack
        .clone()
        .or_else(|| store.physical_asset(id).and_then(|a| a.rack.clone()));
    if let Some(rack_id) = &update.rack {
        if store.rack(rack_id).is_none() {
            return Err(ResolveError::Validation(format!("unknown rack: {rack_id}")));
        }
    }
    if let Some(position) = update.position {
        let Some(rack) = target_rack.as_deref().and_then(|r| store.rack(r)) else {
            return Err(ResolveError::Validation("position requires a rack".into()));
        };
        if position == 0 || position > rack.max_u_height {
            return Err(ResolveError::Validation(format!(
                "position {position} outside rack {} (1..={})",
                rack.name, rack.max_u_height
            )));
        }
    }
    Ok(())
}

fn validate_virtual(
    _store: &InventoryStore,
    _id: &str,
    update: &HostUpdate,
) -> Result<(), ResolveError> {
    reject_fields(
        RecordType::VirtualServer,
        &[
            ("rack", update.rack.is_some()),
            ("position", update.position.is_some()),
            ("slot_no", update.slot_no.is_some()),
            ("hypervisor", update.hypervisor.is_some()),
            ("members", update.members.is_some()),
        ],
    )
}

fn validate_cloud(store: &InventoryStore, _id: &str, update: &HostUpdate) -> Result<(), ResolveError> {
    reject_fields(
        RecordType::CloudHost,
        &[
            ("rack", update.rack.is_some()),
            ("position", update.position.is_some()),
            ("slot_no", update.slot_no.is_some()),
            ("members", update.members.is_some()),
        ],
    )?;
    if let Some(hypervisor) = &update.hypervisor {
        if store.type_of(hypervisor) != Some(RecordType::PhysicalAsset)
            || store.physical_asset(hypervisor).is_none()
        {
            return Err(ResolveError::Validation(format!(
                "hypervisor must be a physical asset: {hypervisor}"
            )));
        }
    }
    Ok(())
}

fn validate_cluster(
    store: &InventoryStore,
    _id: &str,
    update: &HostUpdate,
) -> Result<(), ResolveError> {
    reject_fields(
        RecordType::Cluster,
        &[
            ("rack", update.rack.is_some()),
            ("position", update.position.is_some()),
            ("slot_no", update.slot_no.is_some()),
            ("hypervisor", update.hypervisor.is_some()),
        ],
    )?;
    if let Some(members) = &update.members {
        for member in members {
            if store.type_of(member).is_none() {
                return Err(ResolveError::Validation(format!("unknown cluster member: {member}")));
            }
        }
    }
    Ok(())
}

fn apply_base(store: &mut InventoryStore, id: &str, update: &HostUpdate) {
    let Some(base) = store.base_record_mut(id) else { return };
    if let Some(service_env) = &update.service_env {
        base.service_env = Some(service_env.clone());
    }
    if let Some(tags) = &update.tags {
        base.tags = tags.clone();
    }
    if let Some(custom_fields) = &update.custom_fields {
        base.custom_fields = custom_fields.clone();
    }
}

fn apply_variant(store: &mut InventoryStore, record_type: RecordType, id: &str, update: &HostUpdate) {
    match record_type {
        RecordType::PhysicalAsset => {
            if let Some(asset) = store.physical_asset_mut(id) {
                if let Some(hostname) = &update.hostname {
                    asset.hostname = Some(hostname.clone());
                }
                if let Some(rack) = &update.rack {
                    asset.rack = Some(rack.clone());
                }
                if let Some(position) = update.position {
                    asset.position = Some(position);
                }
                if let Some(slot_no) = &update.slot_no {
                    asset.slot_no = Some(slot_no.clone());
                }
            }
        }
        RecordType::VirtualServer => {
            if let Some(server) = store.virtual_server_mut(id) {
                if let Some(hostname) = &update.hostname {
                    server.hostname = Some(hostname.clone());
                }
            }
        }
        RecordType::CloudHost => {
            if let Some(host) = store.cloud_host_mut(id) {
                if let Some(hostname) = &update.hostname {
                    host.hostname = Some(hostname.clone());
                }
                if let Some(hypervisor) = &update.hypervisor {
                    host.hypervisor = Some(hypervisor.clone());
                }
            }
        }
        RecordType::Cluster => {
            if let Some(cluster) = store.cluster_mut(id) {
                if let Some(hostname) = &update.hostname {
                    cluster.hostname = Some(hostname.clone());
                }
                if let Some(members) = &update.members {
                    cluster.members = members.clone();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parc_devkit::fixtures::InventoryFixture;
    use serde_json::json;

    fn store_from(fixture: &InventoryFixture) -> InventoryStore {
        let mut store = InventoryStore::new();
        store.load_value(fixture.build()).expect("fixture snapshot");
        store
    }

    fn mixed_fixture() -> (InventoryFixture, Vec<String>) {
        let mut fx = InventoryFixture::new();
        let pa1 = fx.physical_asset(json!({"hostname": "rack-host-1"}));
        let pa2 = fx.physical_asset(json!({"hostname": "rack-host-2"}));
        let vs = fx.virtual_server(json!({"hostname": "vm-1", "parent": pa1.clone()}));
        let ch = fx.cloud_host(json!({"hostname": "cloud-1", "hypervisor": pa2.clone()}));
        let ids = vec![pa1, vs, pa2, ch];
        (fx, ids)
    }

    #[test]
    fn test_resolve_batch_issues_one_fetch_per_variant() {
        let (fx, ids) = mixed_fixture();
        let store = store_from(&fx);

        let batch = resolve_batch(&store, &ids);

        assert_eq!(batch.hosts.len(), 4);
        assert!(batch.gaps.is_empty());
        // 3 types présents -> 3 fetchs batchés, indépendamment du nombre d'ids
        assert_eq!(store.batch_fetches(), 3);
        // fusion dans l'ordre de l'appelant
        let resolved_ids: Vec<&str> = batch.hosts.iter().map(|h| h.id()).collect();
        assert_eq!(resolved_ids, ids.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn test_resolve_batch_reports_gaps_instead_of_failing() {
        let (fx, mut ids) = mixed_fixture();
        let mut store = store_from(&fx);
        // enregistrement de base sans ligne variante
        let mut snapshot = store.snapshot();
        snapshot.base.push(crate::models::BaseRecord {
            id: "orphan-1".into(),
            object_type: RecordType::Cluster,
            service_env: None,
            parent: None,
            tags: vec![],
            custom_fields: Default::default(),
        });
        store.load_snapshot(snapshot);
        ids.push("orphan-1".into());
        ids.push("missing-1".into());

        let batch = resolve_batch(&store, &ids);

        assert_eq!(batch.hosts.len(), 4);
        assert!(batch.gaps.contains(&ResolutionGap {
            id: "missing-1".into(),
            reason: GapReason::UnknownId
        }));
        assert!(batch.gaps.contains(&ResolutionGap {
            id: "orphan-1".into(),
            reason: GapReason::MissingVariantRow
        }));
    }

    #[test]
    fn test_resolution_loads_variant_specific_relations() {
        let mut fx = InventoryFixture::new();
        let service = fx.service("db", true);
        let environment = fx.environment("prod");
        let service_env = fx.service_env(&service, &environment);
        let rack = fx.rack("R01", Some("top"));
        let pa = fx.physical_asset(json!({
            "hostname": "db-01",
            "service_env": service_env,
            "rack": rack,
        }));
        fx.ethernet(&pa, "aa:bb:cc:dd:ee:ff", Some("10.0.0.4"));
        let ct = fx.cluster_type("application");
        let cl = fx.cluster(json!({"name": "app-cluster", "cluster_type": ct, "members": [pa.clone()]}));
        let ch = fx.cloud_host(json!({"hostname": "cloud-1", "hypervisor": pa.clone()}));
        let store = store_from(&fx);

        let batch = resolve_batch(&store, &[pa.clone(), cl, ch]);
        assert_eq!(batch.hosts.len(), 3);

        let HostRecord::PhysicalAsset(physical) = &batch.hosts[0] else {
            panic!("expected physical asset")
        };
        assert_eq!(physical.rack.as_ref().map(|r| r.name.as_str()), Some("R01"));
        assert_eq!(physical.common.ethernet.len(), 1);
        assert_eq!(
            physical.common.service_env.as_ref().and_then(|se| se.service.as_ref()).map(|s| s.name.as_str()),
            Some("db")
        );

        let HostRecord::Cluster(cluster) = &batch.hosts[1] else { panic!("expected cluster") };
        assert_eq!(cluster.cluster_type.as_ref().map(|t| t.name.as_str()), Some("application"));

        let HostRecord::CloudHost(cloud) = &batch.hosts[2] else { panic!("expected cloud host") };
        assert_eq!(cloud.hypervisor.as_ref().map(|h| h.id.as_str()), Some(pa.as_str()));
    }

    #[test]
    fn test_write_router_caches_type_discovery() {
        let (fx, ids) = mixed_fixture();
        let mut store = store_from(&fx);
        let mut router = WriteRouter::new();

        let host = router.resolve_one_for_write(&store, &ids[0]).unwrap();
        assert_eq!(host.record_type(), RecordType::PhysicalAsset);

        let update = HostUpdate { hostname: Some("renamed-1".into()), ..Default::default() };
        router.apply_update(&mut store, &ids[0], &update).unwrap();
        let update = HostUpdate { hostname: Some("renamed-2".into()), ..Default::default() };
        router.apply_update(&mut store, &ids[0], &update).unwrap();

        assert_eq!(router.type_lookups(), 1);
    }

    #[test]
    fn test_write_to_unknown_id_is_not_found() {
        let (fx, _) = mixed_fixture();
        let mut store = store_from(&fx);
        let mut router = WriteRouter::new();

        let err = router
            .apply_update(&mut store, "missing-1", &HostUpdate::default())
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[test]
    fn test_variant_validators_reject_bad_updates() {
        let mut fx = InventoryFixture::new();
        let rack = fx.rack("R01", None);
        let pa = fx.physical_asset(json!({"rack": rack}));
        let vs = fx.virtual_server(json!({}));
        let ch = fx.cloud_host(json!({}));
        let cl = fx.cluster(json!({"name": "c1"}));
        let mut store = store_from(&fx);
        let mut router = WriteRouter::new();

        let empty_hostname = HostUpdate { hostname: Some("  ".into()), ..Default::default() };
        assert!(matches!(
            router.apply_update(&mut store, &pa, &empty_hostname),
            Err(ResolveError::Validation(_))
        ));

        let bad_rack = HostUpdate { rack: Some("nope".into()), ..Default::default() };
        assert!(matches!(
            router.apply_update(&mut store, &pa, &bad_rack),
            Err(ResolveError::Validation(_))
        ));

        let bad_position = HostUpdate { position: Some(99), ..Default::default() };
        assert!(matches!(
            router.apply_update(&mut store, &pa, &bad_position),
            Err(ResolveError::Validation(_))
        ));

        let rack_on_vm = HostUpdate { rack: Some("R01".into()), ..Default::default() };
        assert!(matches!(
            router.apply_update(&mut store, &vs, &rack_on_vm),
            Err(ResolveError::Validation(_))
        ));

        let bad_hypervisor = HostUpdate { hypervisor: Some(vs.clone()), ..Default::default() };
        assert!(matches!(
            router.apply_update(&mut store, &ch, &bad_hypervisor),
            Err(ResolveError::Validation(_))
        ));

        let bad_members = HostUpdate { members: Some(vec!["ghost".into()]), ..Default::default() };
        assert!(matches!(
            router.apply_update(&mut store, &cl, &bad_members),
            Err(ResolveError::Validation(_))
        ));
    }

    #[test]
    fn test_apply_update_returns_previous_state() {
        let mut fx = InventoryFixture::new();
        let pa = fx.physical_asset(json!({"hostname": "before"}));
        let mut store = store_from(&fx);
        let mut router = WriteRouter::new();

        let update = HostUpdate { hostname: Some("after".into()), ..Default::default() };
        let outcome = router.apply_update(&mut store, &pa, &update).unwrap();

        assert_eq!(outcome.previous.hostname.as_deref(), Some("before"));
        assert_eq!(outcome.host.hostname(), Some("after"));
    }
}
