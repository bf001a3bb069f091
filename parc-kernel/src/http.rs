/**
 * API REST PARC - Serveur HTTP principal du kernel
 *
 * RÔLE :
 * Expose l'inventaire résolu et les graphes de dashboard via une API JSON.
 * Interface principale entre frontend/CLI et kernel backend.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, routes organisées : /health, /system, /hosts, /graphs
 * - /hosts : vues polymorphes résolues, filtrables, scoping par service
 * - /hosts/{id} PATCH : write path routé par variante + publication d'événement
 * - /graphs : CRUD des spécifications + /graphs/{id}/data pour les lignes
 * - Gestion erreurs HTTP standardisée (400 parse, 404 not found, 422 validation)
 */

use crate::config::ParcConfig;
use crate::filters::ParseError;
use crate::graphs::{documents_for, GraphError, GraphRegistry, GraphSpec, Row};
use crate::health::HealthTracker;
use crate::models::{HostUpdate, RecordType};
use crate::publisher::host_update_event;
use crate::resolver::{resolve_batch, resolve_one, ResolutionGap, ResolveError, WriteRouter};
use crate::scope::scope_clause;
use crate::state::{Shared, UpdateSender};
use crate::store::InventoryStore;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;

#[derive(Clone)]
pub struct AppState {
    pub store: Shared<InventoryStore>,
    pub graphs: Shared<GraphRegistry>,
    pub cfg: Shared<ParcConfig>,
    pub health_tracker: HealthTracker,
    pub updates_tx: UpdateSender,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/hosts", get(get_hosts))
        .route("/hosts/{id}", get(get_host).patch(patch_host))
        .route("/graphs", get(list_graphs).post(create_graph))
        .route(
            "/graphs/{id}",
            get(get_graph).put(update_graph).delete(delete_graph),
        )
        .route("/graphs/{id}/data", get(get_graph_data))
        .with_state(app_state)
}

// GET /system/health (état du kernel)
async fn get_system_health(State(app): State<AppState>) -> Json<crate::health::KernelHealth> {
    Json(app.health_tracker.get_health(&app.store, &app.graphs))
}

#[derive(Debug, Deserialize)]
struct HostsParams {
    object_type: Option<String>,
    hostname: Option<String>,
    service: Option<String>,
    limit: Option<usize>,
}

#[derive(serde::Serialize)]
struct HostsOut {
    hosts: Vec<Value>,
    gaps: Vec<ResolutionGap>,
}

// GET /hosts (liste des vues résolues, scoping par service)
async fn get_hosts(
    State(app): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HostsParams>,
) -> Result<Json<HostsOut>, (StatusCode, Json<Value>)> {
    let store = app.store.lock();

    let ids = match &params.object_type {
        Some(raw) => {
            let record_type: RecordType =
                serde_json::from_value(Value::String(raw.clone())).map_err(|_| {
                    bad_request(format!("unknown object_type: {raw}"))
                })?;
            store.host_ids_of(record_type)
        }
        None => store.host_ids(),
    };

    let batch = resolve_batch(&store, &ids);

    // scoping : l'identité vient du header, le calcul du scope reste côté store
    let clause = headers
        .get("x-parc-user")
        .and_then(|v| v.to_str().ok())
        .and_then(|username| store.user(username).cloned())
        .and_then(|user| scope_clause(&user, store.visibility_scopes()));

    let mut hosts: Vec<Value> = batch
        .hosts
        .iter()
        .filter_map(|h| serde_json::to_value(h).ok())
        .filter(|doc| clause.as_ref().map(|c| c.matches(doc)).unwrap_or(true))
        .filter(|doc| {
            params.hostname.as_deref().map_or(true, |needle| {
                doc.get("hostname")
                    .and_then(Value::as_str)
                    .map(|h| h.to_lowercase().contains(&needle.to_lowercase()))
                    .unwrap_or(false)
            })
        })
        .filter(|doc| {
            params.service.as_deref().map_or(true, |service| {
                doc.pointer("/service_env/service/name").and_then(Value::as_str) == Some(service)
            })
        })
        .collect();

    if let Some(limit) = params.limit {
        hosts.truncate(limit);
    }

    Ok(Json(HostsOut { hosts, gaps: batch.gaps }))
}

// GET /hosts/:id (vue résolue)
async fn get_host(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let store = app.store.lock();
    match resolve_one(&store, &id) {
        Ok(host) => Ok(Json(serde_json::to_value(&host).unwrap_or(Value::Null))),
        Err(_) => Err(StatusCode::NOT_FOUND),
    }
}

// PATCH /hosts/:id (write path routé par variante)
async fn patch_host(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<HostUpdate>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let outcome = {
        let mut store = app.store.lock();
        let mut router = WriteRouter::new();
        let outcome = router.apply_update(&mut store, &id, &update).map_err(resolve_error)?;
        if let Err(e) = store.save_to_disk() {
            eprintln!("[http] failed to persist inventory after update: {}", e);
        }
        outcome
    };

    if app.cfg.lock().publish_updates {
        let event = host_update_event(&outcome.host, &outcome.previous);
        if app.updates_tx.send(event).is_err() {
            eprintln!("[http] update publisher unavailable, event dropped");
        }
    }

    Ok(Json(serde_json::to_value(&outcome.host).unwrap_or(Value::Null)))
}

// GET /graphs (liste)
async fn list_graphs(State(app): State<AppState>) -> Json<Vec<GraphSpec>> {
    Json(app.graphs.lock().list().into_iter().cloned().collect())
}

// POST /graphs (création, id généré si absent)
async fn create_graph(
    State(app): State<AppState>,
    Json(spec): Json<GraphSpec>,
) -> (StatusCode, Json<Value>) {
    let mut graphs = app.graphs.lock();
    let id = graphs.create(spec);
    if let Err(e) = graphs.save_to_disk() {
        eprintln!("[http] failed to persist graphs: {}", e);
    }
    (StatusCode::CREATED, Json(serde_json::json!({ "id": id, "status": "created" })))
}

// GET /graphs/:id (détail)
async fn get_graph(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GraphSpec>, StatusCode> {
    match app.graphs.lock().get(&id) {
        Some(spec) => Ok(Json(spec.clone())),
        None => Err(StatusCode::NOT_FOUND),
    }
}

// PUT /graphs/:id (édition en place)
async fn update_graph(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(spec): Json<GraphSpec>,
) -> Result<Json<Value>, StatusCode> {
    let mut graphs = app.graphs.lock();
    match graphs.update(&id, spec) {
        Ok(()) => {
            if let Err(e) = graphs.save_to_disk() {
                eprintln!("[http] failed to persist graphs: {}", e);
            }
            Ok(Json(serde_json::json!({ "id": id, "status": "updated" })))
        }
        Err(GraphError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

// DELETE /graphs/:id
async fn delete_graph(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let mut graphs = app.graphs.lock();
    match graphs.delete(&id) {
        Ok(()) => {
            if let Err(e) = graphs.save_to_disk() {
                eprintln!("[http] failed to persist graphs: {}", e);
            }
            Ok(Json(serde_json::json!({ "status": "deleted" })))
        }
        Err(_) => Err(StatusCode::NOT_FOUND),
    }
}

// GET /graphs/:id/data (exécution de la spécification)
async fn get_graph_data(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Row>>, (StatusCode, Json<Value>)> {
    let spec = app
        .graphs
        .lock()
        .get(&id)
        .cloned()
        .ok_or((StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "graph not found" }))))?;

    let documents = {
        let store = app.store.lock();
        documents_for(&store, spec.model)
    };

    spec.build_queryset(&documents)
        .map(Json)
        .map_err(|e: ParseError| bad_request(e.to_string()))
}

fn bad_request(message: String) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": message })))
}

fn resolve_error(err: ResolveError) -> (StatusCode, Json<Value>) {
    let code = match &err {
        ResolveError::NotFound(_) => StatusCode::NOT_FOUND,
        ResolveError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (code, Json(serde_json::json!({ "error": err.to_string() })))
}
