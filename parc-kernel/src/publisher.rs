/**
 * UPDATE PUBLISHER - Publication des mises à jour d'hôtes sur le bus MQTT
 *
 * RÔLE :
 * Après chaque écriture réussie sur un hôte, le kernel construit un payload
 * décrivant l'état courant (hostname, service, interfaces réseau) et l'état
 * précédent, puis le publie sur le topic versionné parc/inventory/host-update@v1.
 *
 * FONCTIONNEMENT :
 * - Le write path pousse les événements sur un canal interne
 * - Une task dédiée tient le client MQTT et publie au fil de l'eau
 * - La construction du payload est pure : testable sans broker
 */

use crate::config::{MqttConf, ParcConfig};
use crate::health::HealthTracker;
use crate::resolver::{HostRecord, PreviousState};
use crate::state::{Shared, UpdateReceiver};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Serialize;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::task;

pub const HOST_UPDATE_TOPIC: &str = "parc/inventory/host-update@v1";

#[derive(Debug, Clone, Serialize)]
pub struct EthernetOut {
    pub mac: String,
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviousStateOut {
    pub hostname: Option<String>,
}

/// Payload publié après une écriture sur un hôte.
#[derive(Debug, Clone, Serialize)]
pub struct HostUpdateEvent {
    pub host_id: String,
    pub object_type: String,
    pub hostname: Option<String>,
    pub service: Option<String>,
    #[serde(rename = "_previous_state")]
    pub previous_state: PreviousStateOut,
    pub ethernet: Vec<EthernetOut>,
    pub ts: String,
}

/// Construit le payload de mise à jour depuis la vue résolue et l'état capturé
/// avant écriture. MACs normalisées en majuscules pour les consommateurs DHCP.
pub fn host_update_event(host: &HostRecord, previous: &PreviousState) -> HostUpdateEvent {
    let ethernet = host
        .common()
        .ethernet
        .iter()
        .map(|e| EthernetOut { mac: e.mac.to_uppercase(), ip: e.ip.clone() })
        .collect();
    HostUpdateEvent {
        host_id: host.id().to_string(),
        object_type: host.record_type().to_string(),
        hostname: host.hostname().map(str::to_string),
        service: host.service_name().map(str::to_string),
        previous_state: PreviousStateOut { hostname: previous.hostname.clone() },
        ethernet,
        ts: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
    }
}

/// Démarre la task de publication : consomme le canal interne et publie
/// chaque événement sur le bus MQTT.
pub fn spawn_update_publisher(
    mut rx: UpdateReceiver,
    config: Shared<ParcConfig>,
    health_tracker: HealthTracker,
) {
    task::spawn(async move {
        let mqtt_cfg = config
            .lock()
            .mqtt
            .clone()
            .unwrap_or_else(|| MqttConf { host: "localhost".into(), port: 1883 });

        let mut opts = MqttOptions::new("parc-kernel-updates", &mqtt_cfg.host, mqtt_cfg.port);
        opts.set_keep_alive(Duration::from_secs(15));
        let (client, mut eventloop) = AsyncClient::new(opts, 10);

        loop {
            tokio::select! {
                maybe_event = rx.recv() => {
                    let Some(event) = maybe_event else {
                        eprintln!("[publisher] update channel closed, stopping");
                        break;
                    };
                    match serde_json::to_string(&event) {
                        Ok(payload) => {
                            if let Err(e) = client.publish(HOST_UPDATE_TOPIC, QoS::AtLeastOnce, false, payload).await {
                                eprintln!("[publisher] failed to publish update for {}: {:?}", event.host_id, e);
                                health_tracker.note_publish_error();
                            } else {
                                println!("[publisher] published host update for {} ({})",
                                        event.host_id, event.object_type);
                                health_tracker.note_published();
                            }
                        }
                        Err(e) => {
                            eprintln!("[publisher] failed to serialize update: {}", e);
                            health_tracker.note_publish_error();
                        }
                    }
                },
                event = eventloop.poll() => {
                    match event {
                        Ok(_) => {
                            health_tracker.mark_mqtt_connected();
                        }
                        Err(e) => {
                            eprintln!("[publisher] MQTT error: {:?}", e);
                            health_tracker.mark_mqtt_disconnected();
                            tokio::time::sleep(Duration::from_secs(2)).await;
                        }
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HostUpdate;
    use crate::resolver::WriteRouter;
    use crate::store::InventoryStore;
    use parc_devkit::fixtures::InventoryFixture;
    use serde_json::json;

    #[test]
    fn test_host_update_event_carries_previous_state_and_macs() {
        let mut fx = InventoryFixture::new();
        let service = fx.service("backup", true);
        let environment = fx.environment("prod");
        let service_env = fx.service_env(&service, &environment);
        let vs = fx.virtual_server(json!({"hostname": "old-name", "service_env": service_env}));
        let eth = fx.ethernet(&vs, "aa:bb:cc:dd:ee:ff", Some("10.0.0.9"));
        let mut store = InventoryStore::new();
        store.load_value(fx.build()).unwrap();

        let mut router = WriteRouter::new();
        let update = HostUpdate { hostname: Some("hostname".into()), ..Default::default() };
        let outcome = router.apply_update(&mut store, &vs, &update).unwrap();
        let event = host_update_event(&outcome.host, &outcome.previous);

        assert_eq!(event.previous_state.hostname.as_deref(), Some("old-name"));
        assert_eq!(event.hostname.as_deref(), Some("hostname"));
        assert_eq!(event.ethernet[0].mac, "AA:BB:CC:DD:EE:FF");
        assert_eq!(event.service.as_deref(), Some("backup"));

        // la suppression de la dernière interface vide la liste du payload
        store.remove_ethernet(&eth);
        let host = crate::resolver::resolve_one(&store, &vs).unwrap();
        let event = host_update_event(&host, &outcome.previous);
        assert!(event.ethernet.is_empty());
    }
}
