//! Reads a Flux object and turns its conditions into a verdict.

use std::sync::Arc;

use fluxr_core::{is_ready, summarize, FluxrError, FluxrResult, ResourceCoordinates, StatusSnapshot, StatusVerdict, WatchTarget};
use fluxr_kubehub::ClusterApi;

pub struct StatusProber {
    api: Arc<dyn ClusterApi>,
    target: WatchTarget,
}

impl StatusProber {
    pub fn new(api: Arc<dyn ClusterApi>, target: WatchTarget) -> Self {
        Self { api, target }
    }

    /// Whether the object reports `Ready=True`. Fetch failures come back as `ProbeTransient`.
    pub async fn probe_ready(&self, coords: &ResourceCoordinates) -> FluxrResult<bool> {
        let obj = self
            .api
            .get_object(coords, &self.target.namespace, &self.target.name)
            .await
            .map_err(|e| FluxrError::ProbeTransient(format!("{:#}", e)))?;
        Ok(is_ready(&obj))
    }

    /// Best-effort summary for progress lines; a failed fetch becomes an `Error` verdict.
    pub async fn probe_summary(&self, coords: &ResourceCoordinates) -> StatusSnapshot {
        match self.api.get_object(coords, &self.target.namespace, &self.target.name).await {
            Ok(obj) => summarize(&obj),
            Err(e) => StatusSnapshot::new(StatusVerdict::Error, format!("error getting resource: {:#}", e)),
        }
    }
}
