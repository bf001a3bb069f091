use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ParcConfig {
    pub data_dir: String,
    pub http_port: u16,
    pub mqtt: Option<MqttConf>,
    /// Publication des mises à jour d'hôtes sur le bus MQTT
    pub publish_updates: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
}

impl Default for ParcConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".into(),
            http_port: 8080,
            mqtt: Some(MqttConf { host: "localhost".into(), port: 1883 }),
            publish_updates: true,
        }
    }
}

pub async fn load_config() -> ParcConfig {
    let path = std::env::var("PARC_KERNEL_CONFIG").unwrap_or_else(|_| "parc.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() { return ParcConfig::default(); }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            eprintln!("[kernel] config invalide: {e}");
            ParcConfig::default()
        })
    } else {
        eprintln!("[kernel] pas de parc.yaml, usage config par défaut");
        ParcConfig::default()
    }
}
