//! fluxr kubehub: cluster reads (objects, events) and Flux resource location

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Event;
use kube::{
    api::{Api, ListParams},
    core::{ApiResource, DynamicObject},
    Client,
};
use serde_json::Value as Json;
use tracing::debug;

use fluxr_core::{EventRecord, ResourceCoordinates};

pub mod locator;

pub use locator::{resolve, VersionProbe};

/// Read-only view of the cluster used by the prober, locator and event watcher.
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch a namespaced object as a generic JSON document.
    async fn get_object(&self, coords: &ResourceCoordinates, namespace: &str, name: &str) -> Result<Json>;

    /// List events whose involved object matches `namespace/name`, capped at `limit`.
    async fn list_events(&self, namespace: &str, name: &str, limit: u32) -> Result<Vec<EventRecord>>;
}

/// Build a client from the ambient configuration (`KUBECONFIG`, default kubeconfig or in-cluster).
pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("failed to build kube client from kubeconfig")
}

fn api_resource(coords: &ResourceCoordinates) -> ApiResource {
    ApiResource {
        group: coords.group.to_string(),
        version: coords.version.to_string(),
        api_version: coords.api_version(),
        kind: coords.kind.to_string(),
        plural: coords.plural.to_string(),
    }
}

fn involved_object_selector(namespace: &str, name: &str) -> String {
    format!("involvedObject.name={},involvedObject.namespace={}", name, namespace)
}

fn event_record(ev: &Event) -> EventRecord {
    EventRecord {
        reason: ev.reason.clone().unwrap_or_default(),
        event_type: ev.type_.clone().unwrap_or_default(),
        message: ev.message.clone().unwrap_or_default(),
    }
}

/// `ClusterApi` backed by kube-rs.
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(get_kube_client().await?))
    }
}

#[async_trait::async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_object(&self, coords: &ResourceCoordinates, namespace: &str, name: &str) -> Result<Json> {
        let ar = api_resource(coords);
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        let obj = api.get(name).await?;
        serde_json::to_value(&obj).context("serializing DynamicObject")
    }

    async fn list_events(&self, namespace: &str, name: &str, limit: u32) -> Result<Vec<EventRecord>> {
        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().fields(&involved_object_selector(namespace, name)).limit(limit);
        let list = api.list(&lp).await?;
        debug!(ns = %namespace, name = %name, count = list.items.len(), "events listed");
        Ok(list.items.iter().map(event_record).collect())
    }
}
