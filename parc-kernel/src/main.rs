/**
 * PARC KERNEL - Point d'entrée principal du serveur d'inventaire
 *
 * RÔLE : Orchestration de tous les modules : config, store, graphes, publisher, HTTP.
 * Bootstrap du système complet avec gestion d'erreurs et logging.
 *
 * ARCHITECTURE : Inventaire polymorphe en mémoire + API REST + publication MQTT
 * des mises à jour d'hôtes.
 * UTILITÉ : Source de vérité du parc datacenter, point d'administration unique.
 */

mod config;
mod filters;
mod graphs;
mod health;
mod http;
mod models;
mod publisher;
mod resolver;
mod scope;
mod state;
mod store;

use crate::config::{load_config, ParcConfig};
use crate::graphs::GraphRegistry;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::state::{new_state, update_channel, Shared};
use crate::store::InventoryStore;

use std::net::SocketAddr;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok(); // Ok si .env n'existe pas

    let cfg_loaded: ParcConfig = load_config().await;
    let cfg: Shared<ParcConfig> = new_state(cfg_loaded.clone());

    std::fs::create_dir_all(&cfg_loaded.data_dir).unwrap_or_else(|e| {
        eprintln!("[kernel] warning: failed to create data dir: {}", e);
    });

    // inventaire
    let inventory_path = format!("{}/inventory.json", cfg_loaded.data_dir);
    let store = match InventoryStore::open(&inventory_path) {
        Ok(store) => {
            println!("[kernel] inventory ready ({} hosts)", store.counts().hosts);
            new_state(store)
        }
        Err(e) => {
            eprintln!("[kernel] failed to load inventory: {}", e);
            new_state(InventoryStore::new())
        }
    };

    // spécifications de graphes
    let graphs_path = format!("{}/graphs.json", cfg_loaded.data_dir);
    let graphs = match GraphRegistry::open(&graphs_path) {
        Ok(registry) => {
            println!("[kernel] loaded {} graph specs", registry.len());
            new_state(registry)
        }
        Err(e) => {
            eprintln!("[kernel] failed to load graphs: {}", e);
            new_state(GraphRegistry::new())
        }
    };

    // health tracker
    let health_tracker = HealthTracker::new();

    // publication des mises à jour d'hôtes
    let (updates_tx, updates_rx) = update_channel();
    if cfg_loaded.publish_updates {
        publisher::spawn_update_publisher(updates_rx, cfg.clone(), health_tracker.clone());
    } else {
        println!("[kernel] host update publishing disabled");
        drop(updates_rx);
    }

    // fabrique l'état unique pour Axum
    let app_state = AppState {
        store,
        graphs,
        cfg,
        health_tracker,
        updates_tx,
    };

    // HTTP
    let app = http::build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg_loaded.http_port));
    println!("[kernel] listening on http://{addr}");
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("[kernel] failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("[kernel] server error: {}", e);
        std::process::exit(1);
    }
}
