/**
 * GRAPH ENGINE - Spécifications de graphes et moteur d'agrégation dynamique
 *
 * RÔLE :
 * Ce module porte les spécifications de graphes des dashboards (modèle cible,
 * fonction d'agrégat, filtres, expressions de label et de série) et le moteur
 * qui les exécute contre les documents projetés par le store.
 *
 * FONCTIONNEMENT :
 * - GraphSpec = configuration nommée persistée (graphs.json), éditée via l'API,
 *   lue seule au moment de la requête
 * - build_queryset : filtres pré-agrégation -> groupage par label (avec
 *   extraction year/month) -> agrégat (count, sum_bool, ratio) -> filtres
 *   post-agrégation sur la série calculée -> tri -> limite
 * - Les expressions label/série sont parsées une fois en petit AST
 *   (chemin + modificateur), jamais re-matchées en chaîne
 *
 * UTILITÉ DANS PARC :
 * 🎯 Dashboards : lignes {label -> valeur, "series" -> agrégat} prêtes à tracer
 * 🎯 API : /graphs CRUD + /graphs/{id}/data pour le frontend
 */

use crate::filters::{
    loose_cmp, lookup_matches, resolve_path, split_lookup, FilterParser, ParseError,
};
use crate::models::RecordType;
use crate::store::InventoryStore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use uuid::Uuid;

/// Nom du champ calculé ; les filtres `series__*` s'appliquent après agrégation.
pub const ANNOTATE_KEY: &str = "series";

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("graph not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateType {
    AggregateCount,
    AggregateSumBoolValues,
    AggregateRatio,
}

/// Modèle cible d'un graphe : un type d'hôte, tous les hôtes, ou une entité liée.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphModel {
    DcHost,
    PhysicalAsset,
    VirtualServer,
    CloudHost,
    Cluster,
    Service,
    Rack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphParams {
    #[serde(default)]
    pub filters: Map<String, Value>,
    pub labels: String,
    pub series: Value,
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Chemin compté à la place des lignes jointes (COUNT(col) : les nulls
    /// ne comptent pas, les groupes vides restent avec 0)
    #[serde(default)]
    pub aggregate_expression: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSpec {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub model: GraphModel,
    pub aggregate_type: AggregateType,
    pub params: GraphParams,
}

/// Ligne de résultat éphémère : clé(s) de label + "series" -> agrégat.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DatePart {
    Year,
    Month,
}

impl DatePart {
    fn key(self) -> &'static str {
        match self {
            DatePart::Year => "year",
            DatePart::Month => "month",
        }
    }
}

/// Expression de label parsée : chemin + extracteur de partie de date optionnel.
#[derive(Debug, Clone)]
struct LabelExpr {
    path: String,
    date_part: Option<DatePart>,
}

impl LabelExpr {
    fn parse(raw: &str) -> Result<Self, ParseError> {
        match raw.split_once('|') {
            None => Ok(Self { path: raw.to_string(), date_part: None }),
            Some((path, "year")) => Ok(Self { path: path.to_string(), date_part: Some(DatePart::Year) }),
            Some((path, "month")) => Ok(Self { path: path.to_string(), date_part: Some(DatePart::Month) }),
            Some(_) => Err(ParseError::Label(raw.to_string())),
        }
    }

    /// Clé portée par la ligne de sortie : le nom de la partie de date si le
    /// label tronque, le chemin brut sinon.
    fn output_key(&self) -> &str {
        match self.date_part {
            Some(part) => part.key(),
            None => &self.path,
        }
    }
}

/// Expression de série parsée : chemin simple (modificateur |distinct) ou
/// paire [champ booléen, champ compté] pour l'agrégat ratio.
#[derive(Debug, Clone)]
enum SeriesExpr {
    Single { path: String, distinct: bool },
    Ratio { bool_path: String },
}

impl SeriesExpr {
    fn parse(raw: &Value) -> Result<Self, ParseError> {
        match raw {
            Value::String(s) => match s.split_once('|') {
                None => Ok(SeriesExpr::Single { path: s.to_string(), distinct: false }),
                Some((path, "distinct")) => {
                    Ok(SeriesExpr::Single { path: path.to_string(), distinct: true })
                }
                Some(_) => Err(ParseError::Series(s.to_string())),
            },
            Value::Array(items) => match items.as_slice() {
                [Value::String(bool_path), Value::String(_count_path)] => {
                    Ok(SeriesExpr::Ratio { bool_path: bool_path.to_string() })
                }
                _ => Err(ParseError::Series(raw.to_string())),
            },
            other => Err(ParseError::Series(other.to_string())),
        }
    }
}

/// Extrait les filtres post-agrégation (clés `series` / `series__*`) du mapping.
/// Fonction pure : retourne (restants, extraits), l'entrée n'est pas modifiée.
pub fn split_annotate_filters(
    filters: &Map<String, Value>,
) -> (Map<String, Value>, Map<String, Value>) {
    let prefix = format!("{ANNOTATE_KEY}__");
    let mut remaining = Map::new();
    let mut removed = Map::new();
    for (key, value) in filters {
        if key == ANNOTATE_KEY || key.starts_with(&prefix) {
            removed.insert(key.clone(), value.clone());
        } else {
            remaining.insert(key.clone(), value.clone());
        }
    }
    (remaining, removed)
}

fn date_part_value(value: &Value, part: DatePart) -> Value {
    let Value::String(s) = value else { return Value::Null };
    match part {
        DatePart::Year => s
            .get(0..4)
            .and_then(|y| y.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or(Value::Null),
        DatePart::Month => s.get(0..7).map(|m| Value::String(m.to_string())).unwrap_or(Value::Null),
    }
}

struct Group<'a> {
    label: Value,
    docs: Vec<&'a Value>,
}

impl GraphSpec {
    /// Exécute la spécification contre un jeu de documents projetés.
    /// Étapes dans l'ordre : filtres pré-agrégation, groupage par label,
    /// agrégat, filtres post-agrégation, tri, limite.
    pub fn build_queryset(&self, records: &[Value]) -> Result<Vec<Row>, ParseError> {
        let (record_filters, annotate_filters) = split_annotate_filters(&self.params.filters);
        let parser = FilterParser::new(records);
        let filtered = parser.get_queryset(&record_filters)?;

        let label = LabelExpr::parse(&self.params.labels)?;
        let series = SeriesExpr::parse(&self.params.series)?;

        // Lignes jointes : un document se déploie en une ligne par valeur de
        // label quand le chemin traverse une relation multi-valuée. Seuls les
        // groupes présents dans le jeu filtré existent (pas de ligne à zéro
        // synthétisée pour des valeurs absentes des données).
        let mut groups: BTreeMap<String, Group> = BTreeMap::new();
        for doc in filtered.iter().copied() {
            for value in resolve_path(doc, &label.path) {
                let label_value = match label.date_part {
                    Some(part) => date_part_value(value, part),
                    None => value.clone(),
                };
                let group_key = label_value.to_string();
                groups
                    .entry(group_key)
                    .or_insert_with(|| Group { label: label_value, docs: Vec::new() })
                    .docs
                    .push(doc);
            }
        }

        let mut rows: Vec<Row> = Vec::with_capacity(groups.len());
        for group in groups.into_values() {
            let series_value = self.aggregate(&series, &group)?;
            let mut row = Row::new();
            row.insert(label.output_key().to_string(), group.label);
            row.insert(ANNOTATE_KEY.to_string(), series_value);
            rows.push(row);
        }

        for (key, value) in &annotate_filters {
            let (path, op) = split_lookup(key);
            if path != ANNOTATE_KEY {
                return Err(ParseError::Lookup(key.clone()));
            }
            rows.retain(|row| {
                lookup_matches(row.get(ANNOTATE_KEY).unwrap_or(&Value::Null), op, value)
            });
        }

        if let Some(sort) = &self.params.sort {
            let (field, descending) = match sort.strip_prefix('-') {
                Some(field) => (field, true),
                None => (sort.as_str(), false),
            };
            rows.sort_by(|a, b| {
                let av = a.get(field).unwrap_or(&Value::Null);
                let bv = b.get(field).unwrap_or(&Value::Null);
                loose_cmp(av, bv).unwrap_or(Ordering::Equal)
            });
            if descending {
                rows.reverse();
            }
        }

        if let Some(limit) = self.params.limit {
            rows.truncate(limit);
        }

        Ok(rows)
    }

    fn aggregate(&self, series: &SeriesExpr, group: &Group) -> Result<Value, ParseError> {
        match self.aggregate_type {
            AggregateType::AggregateCount => {
                if let Some(expr) = &self.params.aggregate_expression {
                    // COUNT(col) : les résolutions nulles ne comptent pas,
                    // le groupe reste présent avec 0
                    let count: usize = group
                        .docs
                        .iter()
                        .map(|doc| resolve_path(doc, expr).iter().filter(|v| !v.is_null()).count())
                        .sum();
                    return Ok(Value::from(count as u64));
                }
                match series {
                    SeriesExpr::Single { distinct: true, .. } => {
                        // identifiants d'enregistrements distincts contribuant
                        // au groupe, pas valeurs de série distinctes
                        let ids: HashSet<String> = group
                            .docs
                            .iter()
                            .map(|doc| doc.get("id").unwrap_or(&Value::Null).to_string())
                            .collect();
                        Ok(Value::from(ids.len() as u64))
                    }
                    SeriesExpr::Single { .. } => Ok(Value::from(group.docs.len() as u64)),
                    SeriesExpr::Ratio { .. } => {
                        Err(ParseError::Series(self.params.series.to_string()))
                    }
                }
            }
            AggregateType::AggregateSumBoolValues => {
                let SeriesExpr::Single { path, .. } = series else {
                    return Err(ParseError::Series(self.params.series.to_string()));
                };
                let count: usize = group
                    .docs
                    .iter()
                    .map(|doc| {
                        resolve_path(doc, path)
                            .iter()
                            .filter(|v| ***v == Value::Bool(true))
                            .count()
                    })
                    .sum();
                Ok(Value::from(count as u64))
            }
            AggregateType::AggregateRatio => {
                let SeriesExpr::Ratio { bool_path } = series else {
                    return Err(ParseError::Series(self.params.series.to_string()));
                };
                let denominator = group.docs.len() as u64;
                let numerator = group
                    .docs
                    .iter()
                    .filter(|doc| {
                        resolve_path(doc, bool_path)
                            .first()
                            .map(|v| **v == Value::Bool(true))
                            .unwrap_or(false)
                    })
                    .count() as u64;
                // pourcentage entier tronqué : 3 sur 6 -> 50, pas 50.0
                let ratio = if denominator == 0 { 0 } else { numerator * 100 / denominator };
                Ok(Value::from(ratio))
            }
        }
    }
}

/// Projections JSON du jeu d'enregistrements ciblé par un graphe.
/// Les modèles hôtes passent par la résolution polymorphe (relations chargées),
/// les entités liées sont projetées telles quelles.
pub fn documents_for(store: &InventoryStore, model: GraphModel) -> Vec<Value> {
    let host_ids = match model {
        GraphModel::Service => {
            return store.services().filter_map(|s| serde_json::to_value(s).ok()).collect();
        }
        GraphModel::Rack => {
            return store.racks().filter_map(|r| serde_json::to_value(r).ok()).collect();
        }
        GraphModel::DcHost => store.host_ids(),
        GraphModel::PhysicalAsset => store.host_ids_of(RecordType::PhysicalAsset),
        GraphModel::VirtualServer => store.host_ids_of(RecordType::VirtualServer),
        GraphModel::CloudHost => store.host_ids_of(RecordType::CloudHost),
        GraphModel::Cluster => store.host_ids_of(RecordType::Cluster),
    };
    let batch = crate::resolver::resolve_batch(store, &host_ids);
    batch.hosts.iter().filter_map(|h| serde_json::to_value(h).ok()).collect()
}

/// Registre des spécifications de graphes, persisté en JSON (graphs.json).
/// Les éditions mutent en place, pas de versionnage.
pub struct GraphRegistry {
    graphs: HashMap<String, GraphSpec>,
    data_file: Option<PathBuf>,
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self { graphs: HashMap::new(), data_file: None }
    }

    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, GraphError> {
        let path = path.into();
        if !path.exists() {
            std::fs::write(&path, "[]")?;
        }
        let content = std::fs::read_to_string(&path)?;
        let specs: Vec<GraphSpec> = serde_json::from_str(&content)?;
        let mut registry = Self { graphs: HashMap::new(), data_file: Some(path.clone()) };
        for spec in specs {
            registry.graphs.insert(spec.id.clone(), spec);
        }
        eprintln!("[graphs] loaded {} graph specs from {:?}", registry.graphs.len(), path);
        Ok(registry)
    }

    pub fn save_to_disk(&self) -> Result<(), GraphError> {
        let Some(path) = &self.data_file else { return Ok(()); };
        let mut specs: Vec<&GraphSpec> = self.graphs.values().collect();
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        std::fs::write(path, serde_json::to_string_pretty(&specs)?)?;
        Ok(())
    }

    pub fn list(&self) -> Vec<&GraphSpec> {
        let mut specs: Vec<&GraphSpec> = self.graphs.values().collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn get(&self, id: &str) -> Option<&GraphSpec> {
        self.graphs.get(id)
    }

    pub fn create(&mut self, mut spec: GraphSpec) -> String {
        if spec.id.is_empty() {
            spec.id = Uuid::new_v4().to_string();
        }
        let id = spec.id.clone();
        self.graphs.insert(id.clone(), spec);
        id
    }

    /// Édition en place : l'id du graphe ne change pas.
    pub fn update(&mut self, id: &str, mut spec: GraphSpec) -> Result<(), GraphError> {
        if !self.graphs.contains_key(id) {
            return Err(GraphError::NotFound(id.to_string()));
        }
        spec.id = id.to_string();
        self.graphs.insert(id.to_string(), spec);
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> Result<(), GraphError> {
        self.graphs
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| GraphError::NotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}

impl Default for GraphRegistry {
    fn default() -> Self {
        Self::new()
    }
}
