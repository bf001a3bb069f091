/*!
Fixtures d'inventaire pour les tests du kernel.

Le builder accumule des enregistrements et produit un snapshot JSON au format
attendu par le store (`inventory.json`). Les champs non renseignés restent
absents : le store applique ses propres défauts à la désérialisation.
*/

use serde_json::{json, Map, Value};

/// Champs d'un patch d'hôte qui appartiennent à l'enregistrement de base,
/// pas à la ligne variante.
const BASE_FIELDS: [&str; 4] = ["service_env", "parent", "tags", "custom_fields"];

/// Builder d'inventaire : chaque méthode ajoute un enregistrement et retourne
/// son id (déterministe, séquentiel).
#[derive(Debug, Default)]
pub struct InventoryFixture {
    base: Vec<Value>,
    physical: Vec<Value>,
    virtual_servers: Vec<Value>,
    cloud_hosts: Vec<Value>,
    clusters: Vec<Value>,
    services: Vec<Value>,
    environments: Vec<Value>,
    service_envs: Vec<Value>,
    racks: Vec<Value>,
    cluster_types: Vec<Value>,
    ethernets: Vec<Value>,
    licences: Vec<Value>,
    licence_assignments: Vec<Value>,
    visibility_scopes: Vec<Value>,
    users: Vec<Value>,
    next_id: u32,
}

impl InventoryFixture {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    /// Sépare un patch d'hôte en (champs de base, champs variante).
    fn split_patch(patch: Value) -> (Map<String, Value>, Map<String, Value>) {
        let mut variant = patch.as_object().cloned().unwrap_or_default();
        let mut base = Map::new();
        for field in BASE_FIELDS {
            if let Some(value) = variant.remove(field) {
                base.insert(field.to_string(), value);
            }
        }
        (base, variant)
    }

    fn push_host(&mut self, prefix: &str, object_type: &str, patch: Value) -> (String, Map<String, Value>) {
        let id = self.next_id(prefix);
        let (mut base, mut variant) = Self::split_patch(patch);
        base.insert("id".into(), json!(id));
        base.insert("object_type".into(), json!(object_type));
        self.base.push(Value::Object(base));
        variant.insert("id".into(), json!(id));
        (id, variant)
    }

    // --- Hôtes polymorphes ---

    pub fn physical_asset(&mut self, patch: Value) -> String {
        let (id, variant) = self.push_host("pa", "physical_asset", patch);
        self.physical.push(Value::Object(variant));
        id
    }

    pub fn virtual_server(&mut self, patch: Value) -> String {
        let (id, variant) = self.push_host("vs", "virtual_server", patch);
        self.virtual_servers.push(Value::Object(variant));
        id
    }

    pub fn cloud_host(&mut self, patch: Value) -> String {
        let (id, variant) = self.push_host("ch", "cloud_host", patch);
        self.cloud_hosts.push(Value::Object(variant));
        id
    }

    pub fn cluster(&mut self, patch: Value) -> String {
        let (id, mut variant) = self.push_host("cl", "cluster", patch);
        variant
            .entry("name".to_string())
            .or_insert_with(|| json!(format!("cluster-{id}")));
        self.clusters.push(Value::Object(variant));
        id
    }

    // --- Entités liées ---

    pub fn service(&mut self, name: &str, active: bool) -> String {
        let id = self.next_id("svc");
        self.services.push(json!({
            "id": id,
            "name": name,
            "uid": format!("uid-{id}"),
            "active": active,
        }));
        id
    }

    pub fn environment(&mut self, name: &str) -> String {
        let id = self.next_id("env");
        self.environments.push(json!({ "id": id, "name": name }));
        id
    }

    pub fn service_env(&mut self, service_id: &str, environment_id: &str) -> String {
        let id = self.next_id("se");
        self.service_envs.push(json!({
            "id": id,
            "service": service_id,
            "environment": environment_id,
        }));
        id
    }

    pub fn rack(&mut self, name: &str, orientation: Option<&str>) -> String {
        let id = self.next_id("rack");
        self.racks.push(json!({
            "id": id,
            "name": name,
            "orientation": orientation,
        }));
        id
    }

    pub fn cluster_type(&mut self, name: &str) -> String {
        let id = self.next_id("ct");
        self.cluster_types.push(json!({ "id": id, "name": name }));
        id
    }

    pub fn ethernet(&mut self, base_id: &str, mac: &str, ip: Option<&str>) -> String {
        let id = self.next_id("eth");
        self.ethernets.push(json!({
            "id": id,
            "base_object": base_id,
            "mac": mac,
            "ip": ip,
        }));
        id
    }

    pub fn licence(&mut self, patch: Value) -> String {
        let id = self.next_id("lic");
        let mut licence = patch.as_object().cloned().unwrap_or_default();
        licence.insert("id".into(), json!(id));
        self.licences.push(Value::Object(licence));
        id
    }

    pub fn assign_licence(&mut self, base_id: &str, licence_id: &str) -> String {
        let id = self.next_id("la");
        self.licence_assignments.push(json!({
            "id": id,
            "base_object": base_id,
            "licence": licence_id,
        }));
        id
    }

    pub fn visibility_scope(&mut self, name: &str, services: &[&str], group: Option<&str>) -> String {
        let id = self.next_id("scope");
        self.visibility_scopes.push(json!({
            "id": id,
            "name": name,
            "services": services,
            "group": group,
        }));
        id
    }

    pub fn user(&mut self, username: &str, superuser: bool, groups: &[&str], scopes: &[&str]) {
        self.users.push(json!({
            "username": username,
            "superuser": superuser,
            "groups": groups,
            "scopes": scopes,
        }));
    }

    /// Snapshot JSON au format du store.
    pub fn build(&self) -> Value {
        json!({
            "base": self.base,
            "physical": self.physical,
            "virtual_servers": self.virtual_servers,
            "cloud_hosts": self.cloud_hosts,
            "clusters": self.clusters,
            "services": self.services,
            "environments": self.environments,
            "service_envs": self.service_envs,
            "racks": self.racks,
            "cluster_types": self.cluster_types,
            "ethernets": self.ethernets,
            "licences": self.licences,
            "licence_assignments": self.licence_assignments,
            "visibility_scopes": self.visibility_scopes,
            "users": self.users,
        })
    }

    /// Écrit le snapshot sur disque (seed d'un environnement de dev).
    pub fn build_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.build())?;
        std::fs::write(path.as_ref(), json)?;
        log::info!("fixture written to {:?}", path.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_across_kinds() {
        let mut fx = InventoryFixture::new();
        let pa = fx.physical_asset(json!({}));
        let vs = fx.virtual_server(json!({}));
        let svc = fx.service("db", true);
        assert_ne!(pa, vs);
        assert_ne!(vs, svc);
    }

    #[test]
    fn test_host_patch_splits_base_fields() {
        let mut fx = InventoryFixture::new();
        let id = fx.physical_asset(json!({
            "hostname": "db-01",
            "service_env": "se-9",
            "tags": ["prod"],
        }));
        let snapshot = fx.build();

        let base = &snapshot["base"][0];
        assert_eq!(base["id"], json!(id));
        assert_eq!(base["object_type"], json!("physical_asset"));
        assert_eq!(base["service_env"], json!("se-9"));
        assert_eq!(base["tags"], json!(["prod"]));
        assert!(base.get("hostname").is_none());

        let variant = &snapshot["physical"][0];
        assert_eq!(variant["hostname"], json!("db-01"));
        assert!(variant.get("service_env").is_none());
    }

    #[test]
    fn test_cluster_gets_default_name() {
        let mut fx = InventoryFixture::new();
        fx.cluster(json!({}));
        let snapshot = fx.build();
        assert!(snapshot["clusters"][0]["name"].as_str().is_some());
    }

    #[test]
    fn test_build_to_file_round_trips() {
        let mut fx = InventoryFixture::new();
        fx.physical_asset(json!({"hostname": "db-01"}));
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("inventory.json");

        fx.build_to_file(&path).expect("write fixture");

        let content = std::fs::read_to_string(&path).expect("read back");
        let parsed: Value = serde_json::from_str(&content).expect("valid json");
        assert_eq!(parsed["physical"][0]["hostname"], json!("db-01"));
    }
}
