//! Compose file generation for preview environments

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::DockhandError;
use crate::storage::app_record::AppRecord;

/// TLS certificate resolver configured on the host's reverse proxy
pub const CERT_RESOLVER: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeService {
    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeNetwork {
    pub external: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeFile {
    pub services: BTreeMap<String, ComposeService>,
    pub networks: BTreeMap<String, ComposeNetwork>,
}

impl ComposeFile {
    pub fn to_yaml(&self) -> Result<String, DockhandError> {
        Ok(serde_yaml_ng::to_string(self)?)
    }
}

/// Reverse proxy labels routing `host` to `port` of `service` over TLS
pub fn routing_labels(service: &str, host: &str, port: u16, network: &str) -> Vec<String> {
    vec![
        "traefik.enable=true".to_string(),
        format!("traefik.http.routers.{service}.rule=Host(`{host}`)"),
        format!("traefik.http.services.{service}.loadbalancer.server.port={port}"),
        format!("traefik.http.routers.{service}.tls=true"),
        format!("traefik.http.routers.{service}.tls.certresolver={CERT_RESOLVER}"),
        format!("traefik.docker.network={network}"),
    ]
}

/// Compose file of the preview environment of `record` at `hash`
///
/// `env_keys` are passed through from the environment the compose command
/// runs in, which is where the decrypted env file lands.
pub fn preview_compose(record: &AppRecord, hash: &str, network: &str, env_keys: &[String]) -> ComposeFile {
    let service = record.preview_service(hash);
    let host = record.preview_host(hash);

    let mut compose = ComposeFile::default();
    compose.services.insert(
        service.clone(),
        ComposeService {
            image: record.preview_image(hash),
            labels: routing_labels(&service, &host, record.port, network),
            networks: vec![network.to_string()],
            environment: env_keys.iter().map(|k| format!("{k}=${{{k}}}")).collect(),
        },
    );
    compose
        .networks
        .insert(network.to_string(), ComposeNetwork { external: true });
    compose
}
