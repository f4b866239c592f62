// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Docker runtime adapter.
//!
//! Speaks the Docker Engine HTTP API over the local Unix socket with the
//! hand-rolled client in [`http`]. Supervised containers are identified by
//! the `io.steward.*` labels; listings are pre-filtered server-side so
//! unrelated containers never reach the supervisor.

pub(crate) mod http;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use steward_core::{Network, Service, Volume};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::adapters::{
    resource_labels, service_labels, ContainerDetail, ContainerInfo, ContainerRuntime, ImageInfo,
    NetworkInfo, PullProgress, RuntimeError, RuntimeEvent, VolumeInfo, LABEL_SUPERVISED,
};
use http::{encode_query, DockerClient};

/// Filter expression selecting supervised resources.
fn supervised_filter() -> String {
    encode_query(&format!(r#"{{"label":["{LABEL_SUPERVISED}=true"]}}"#))
}

#[derive(Clone)]
pub struct DockerRuntime {
    client: DockerClient,
}

impl DockerRuntime {
    pub fn new(socket: impl Into<std::path::PathBuf>) -> Self {
        Self { client: DockerClient::new(socket) }
    }

    fn json<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T, RuntimeError> {
        serde_json::from_str(body)
            .map_err(|e| RuntimeError::Request(format!("malformed runtime response: {e}")))
    }

    fn map_not_found(e: RuntimeError, what: &str) -> RuntimeError {
        match e {
            RuntimeError::Response { status: 404, .. } => RuntimeError::NotFound(what.to_string()),
            other => other,
        }
    }
}

#[derive(Deserialize)]
struct ContainerRow {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Names", default)]
    names: Vec<String>,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "Labels", default)]
    labels: BTreeMap<String, String>,
    #[serde(rename = "State", default)]
    state: String,
    /// Epoch seconds.
    #[serde(rename = "Created", default)]
    created: Option<u64>,
}

#[derive(Deserialize)]
struct ImageRow {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "RepoTags", default)]
    repo_tags: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct InspectBody {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
    /// RFC 3339.
    #[serde(rename = "Created", default)]
    created: Option<String>,
    #[serde(rename = "Config")]
    config: InspectConfig,
    #[serde(rename = "State")]
    state: InspectState,
}

#[derive(Deserialize)]
struct InspectConfig {
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "Env", default)]
    env: Vec<String>,
    #[serde(rename = "Labels", default)]
    labels: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct InspectState {
    #[serde(rename = "Status", default)]
    status: String,
}

#[derive(Deserialize)]
struct CreatedBody {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Deserialize)]
struct NetworkRow {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Labels", default)]
    labels: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct VolumeRow {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Labels", default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
struct VolumeListBody {
    #[serde(rename = "Volumes", default)]
    volumes: Option<Vec<VolumeRow>>,
}

#[derive(Deserialize)]
struct PullLine {
    #[serde(rename = "progressDetail", default)]
    progress_detail: Option<PullDetail>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct PullDetail {
    #[serde(default)]
    current: Option<u64>,
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Deserialize)]
struct EventLine {
    #[serde(rename = "Type", default)]
    kind: String,
    #[serde(rename = "Action", default)]
    action: String,
    #[serde(rename = "Actor", default)]
    actor: Option<EventActor>,
}

#[derive(Deserialize, Default)]
struct EventActor {
    #[serde(rename = "ID", default)]
    id: Option<String>,
}

fn parse_env(env: &[String]) -> BTreeMap<String, String> {
    env.iter()
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn parse_created_rfc3339(created: Option<&str>) -> Option<u64> {
    created
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp_millis().max(0) as u64)
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let path = format!("/containers/json?all=true&filters={}", supervised_filter());
        let resp = self.client.get(&path).await?;
        let rows: Vec<ContainerRow> = Self::json(&resp.body)?;
        Ok(rows
            .into_iter()
            .map(|row| ContainerInfo {
                name: row
                    .names
                    .first()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default(),
                id: row.id,
                image: row.image,
                labels: row.labels,
                state: row.state,
                created_at: row.created.map(|secs| secs * 1000),
            })
            .collect())
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>, RuntimeError> {
        let resp = self.client.get("/images/json").await?;
        let rows: Vec<ImageRow> = Self::json(&resp.body)?;
        Ok(rows
            .into_iter()
            .map(|row| ImageInfo { id: row.id, tags: row.repo_tags.unwrap_or_default() })
            .collect())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerDetail, RuntimeError> {
        let resp = self
            .client
            .get(&format!("/containers/{container_id}/json"))
            .await
            .map_err(|e| Self::map_not_found(e, container_id))?;
        let body: InspectBody = Self::json(&resp.body)?;
        Ok(ContainerDetail {
            id: body.id,
            name: body.name.trim_start_matches('/').to_string(),
            image: body.config.image,
            environment: parse_env(&body.config.env),
            labels: body.config.labels,
            state: body.state.status,
            created_at: parse_created_rfc3339(body.created.as_deref()),
        })
    }

    async fn create(&self, service: &Service) -> Result<String, RuntimeError> {
        let env: Vec<String> =
            service.environment.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let body = serde_json::json!({
            "Image": service.image,
            "Env": env,
            "Labels": service_labels(service),
        });
        let path = format!("/containers/create?name={}", encode_query(&service.container_name()));
        let resp = self.client.post(&path, Some(&body.to_string())).await?;
        let created: CreatedBody = Self::json(&resp.body)?;
        debug!(container_id = %created.id, service = %service.service_name, "created container");
        Ok(created.id)
    }

    async fn start(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.client
            .post(&format!("/containers/{container_id}/start"), None)
            .await
            .map(|_| ())
            .map_err(|e| Self::map_not_found(e, container_id))
    }

    async fn stop(&self, container_id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let path = format!("/containers/{container_id}/stop?t={}", timeout.as_secs());
        self.client
            .post(&path, None)
            .await
            .map(|_| ())
            .map_err(|e| Self::map_not_found(e, container_id))
    }

    async fn kill(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.client
            .post(&format!("/containers/{container_id}/kill"), None)
            .await
            .map(|_| ())
            .map_err(|e| Self::map_not_found(e, container_id))
    }

    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.client
            .delete(&format!("/containers/{container_id}?force=true"))
            .await
            .map(|_| ())
            .map_err(|e| Self::map_not_found(e, container_id))
    }

    async fn rename(&self, container_id: &str, name: &str) -> Result<(), RuntimeError> {
        let path = format!("/containers/{container_id}/rename?name={}", encode_query(name));
        self.client
            .post(&path, None)
            .await
            .map(|_| ())
            .map_err(|e| Self::map_not_found(e, container_id))
    }

    async fn pull_image(
        &self,
        name: &str,
        progress: mpsc::Sender<PullProgress>,
    ) -> Result<String, RuntimeError> {
        let (image, tag) = match name.rsplit_once(':') {
            // A ':' inside a registry port is not a tag separator
            Some((img, tag)) if !tag.contains('/') => (img, tag),
            _ => (name, "latest"),
        };
        let path = format!(
            "/images/create?fromImage={}&tag={}",
            encode_query(image),
            encode_query(tag)
        );

        let mut layers: BTreeMap<String, (u64, u64)> = BTreeMap::new();
        let mut pull_error: Option<String> = None;
        self.client
            .stream_lines("POST", &path, |line| {
                let Ok(parsed) = serde_json::from_str::<PullLine>(line) else {
                    return true;
                };
                if let Some(err) = parsed.error {
                    pull_error = Some(err);
                    return false;
                }
                if let (Some(layer), Some(detail)) = (parsed.id, parsed.progress_detail) {
                    if let (Some(current), Some(total)) = (detail.current, detail.total) {
                        if total > 0 {
                            layers.insert(layer, (current, total));
                            let (done, all) = layers
                                .values()
                                .fold((0u64, 0u64), |(c, t), (lc, lt)| (c + lc, t + lt));
                            let pct = ((done * 100) / all.max(1)).min(100) as u8;
                            let _ = progress.try_send(PullProgress { percentage: pct });
                        }
                    }
                }
                true
            })
            .await?;
        if let Some(err) = pull_error {
            return Err(RuntimeError::Request(format!("pull {name}: {err}")));
        }

        let resp = self
            .client
            .get(&format!("/images/{}/json", encode_query(name)))
            .await
            .map_err(|e| Self::map_not_found(e, name))?;
        let body: CreatedBody = Self::json(&resp.body)?;
        Ok(body.id)
    }

    async fn events(&self) -> Result<mpsc::Receiver<RuntimeEvent>, RuntimeError> {
        let (tx, rx) = mpsc::channel(32);
        let client = self.client.clone();
        let path = format!("/events?filters={}", supervised_filter());
        tokio::spawn(async move {
            let result = client
                .stream_lines("GET", &path, |line| {
                    let Ok(parsed) = serde_json::from_str::<EventLine>(line) else {
                        return true;
                    };
                    if parsed.kind != "container" {
                        return true;
                    }
                    let event = RuntimeEvent {
                        action: parsed.action,
                        container_id: parsed.actor.and_then(|a| a.id),
                    };
                    // A closed receiver ends the stream
                    tx.try_send(event).is_ok()
                })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "runtime event stream ended");
            }
        });
        Ok(rx)
    }

    async fn create_network(&self, network: &Network) -> Result<(), RuntimeError> {
        let body = serde_json::json!({
            "Name": network.scoped_name(),
            "Labels": resource_labels(network.app_id, &network.config),
        });
        self.client.post("/networks/create", Some(&body.to_string())).await.map(|_| ())
    }

    async fn remove_network(&self, network: &Network) -> Result<(), RuntimeError> {
        self.client
            .delete(&format!("/networks/{}", encode_query(&network.scoped_name())))
            .await
            .map(|_| ())
            .map_err(|e| Self::map_not_found(e, &network.scoped_name()))
    }

    async fn list_networks(&self) -> Result<Vec<NetworkInfo>, RuntimeError> {
        let path = format!("/networks?filters={}", supervised_filter());
        let resp = self.client.get(&path).await?;
        let rows: Vec<NetworkRow> = Self::json(&resp.body)?;
        Ok(rows.into_iter().map(|r| NetworkInfo { name: r.name, labels: r.labels }).collect())
    }

    async fn create_volume(&self, volume: &Volume) -> Result<(), RuntimeError> {
        let body = serde_json::json!({
            "Name": volume.scoped_name(),
            "Labels": resource_labels(volume.app_id, &volume.config),
        });
        self.client.post("/volumes/create", Some(&body.to_string())).await.map(|_| ())
    }

    async fn remove_volume(&self, volume: &Volume) -> Result<(), RuntimeError> {
        self.client
            .delete(&format!("/volumes/{}", encode_query(&volume.scoped_name())))
            .await
            .map(|_| ())
            .map_err(|e| Self::map_not_found(e, &volume.scoped_name()))
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, RuntimeError> {
        let path = format!("/volumes?filters={}", supervised_filter());
        let resp = self.client.get(&path).await?;
        let body: VolumeListBody = Self::json(&resp.body)?;
        Ok(body
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|r| VolumeInfo { name: r.name, labels: r.labels.unwrap_or_default() })
            .collect())
    }
}
