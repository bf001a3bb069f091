use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use time::Date;

// Sérialisation des dates métier au format "YYYY-MM-DD" (filtrable/groupable tel quel)
time::serde::format_description!(pub iso_date, Date, "[year]-[month]-[day]");

/// Tag polymorphe d'un enregistrement de base. Immuable après création.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    PhysicalAsset,
    VirtualServer,
    CloudHost,
    Cluster,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordType::PhysicalAsset => "physical_asset",
            RecordType::VirtualServer => "virtual_server",
            RecordType::CloudHost => "cloud_host",
            RecordType::Cluster => "cluster",
        };
        f.write_str(s)
    }
}

/// Identité commune à tous les hôtes : un enregistrement de base par hôte,
/// exactement une ligne variante concrète associée (même id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseRecord {
    pub id: String,
    pub object_type: RecordType,
    pub service_env: Option<String>,       // ref ServiceEnvironment
    pub parent: Option<String>,            // ref BaseRecord (hyperviseur d'une VM, etc.)
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_fields: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalAsset {
    pub id: String,
    pub hostname: Option<String>,
    pub sn: Option<String>,
    pub barcode: Option<String>,
    pub price: Option<f64>,
    #[serde(default, with = "iso_date::option")]
    pub delivery_date: Option<Date>,
    #[serde(default)]
    pub force_depreciation: bool,
    pub rack: Option<String>,              // ref Rack
    pub position: Option<u16>,             // position U dans le rack
    pub slot_no: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualServer {
    pub id: String,
    pub hostname: Option<String>,
    pub sn: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudHost {
    pub id: String,
    pub hostname: Option<String>,
    pub hypervisor: Option<String>,        // ref PhysicalAsset
    pub image_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    pub hostname: Option<String>,
    pub cluster_type: Option<String>,      // ref ClusterType
    #[serde(default)]
    pub members: Vec<String>,              // refs BaseRecord
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub uid: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub name: String,
}

/// Couple Service × Environment référencé par les enregistrements de base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEnvironment {
    pub id: String,
    pub service: String,
    pub environment: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RackOrientation {
    Top,
    Bottom,
    Left,
    Right,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rack {
    pub id: String,
    pub name: String,
    pub orientation: Option<RackOrientation>,
    #[serde(default = "default_rack_height")]
    pub max_u_height: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterType {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ethernet {
    pub id: String,
    pub base_object: String,
    pub mac: String,
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Licence {
    pub id: String,
    pub software: Option<String>,
    #[serde(default, with = "iso_date::option")]
    pub valid_thru: Option<Date>,
}

/// Affectation d'une licence à un enregistrement de base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenceAssignment {
    pub id: String,
    pub base_object: String,
    pub licence: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

/// Payload de mise à jour d'un hôte (PATCH /hosts/{id}).
/// Tous les champs sont optionnels ; chaque variante valide ceux qui la concernent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostUpdate {
    pub hostname: Option<String>,
    pub service_env: Option<String>,
    pub tags: Option<Vec<String>>,
    pub custom_fields: Option<HashMap<String, String>>,
    pub rack: Option<String>,
    pub position: Option<u16>,
    pub slot_no: Option<String>,
    pub hypervisor: Option<String>,
    pub members: Option<Vec<String>>,
}

fn default_true() -> bool {
    true
}

fn default_rack_height() -> u16 {
    42
}

fn default_quantity() -> u32 {
    1
}
