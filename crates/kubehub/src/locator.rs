//! Maps Flux kinds to API coordinates.
//!
//! HelmRelease is served as `v2` on current controllers and `v2beta1` on older
//! ones. Which one to use is decided once per run by trying the named object
//! against `v2`; any failure there means `v2beta1`.

use tracing::{debug, info};

use fluxr_core::{FluxrError, FluxrResult, ResourceCoordinates, ResourceKind, WatchTarget};

use crate::ClusterApi;

pub const KUSTOMIZATION: ResourceCoordinates =
    ResourceCoordinates::new("kustomize.toolkit.fluxcd.io", "v1", "kustomizations", "Kustomization");
pub const HELMRELEASE_V2: ResourceCoordinates =
    ResourceCoordinates::new("helm.toolkit.fluxcd.io", "v2", "helmreleases", "HelmRelease");
pub const HELMRELEASE_V2BETA1: ResourceCoordinates =
    ResourceCoordinates::new("helm.toolkit.fluxcd.io", "v2beta1", "helmreleases", "HelmRelease");
pub const GIT_REPOSITORY: ResourceCoordinates =
    ResourceCoordinates::new("source.toolkit.fluxcd.io", "v1", "gitrepositories", "GitRepository");
pub const OCI_REPOSITORY: ResourceCoordinates =
    ResourceCoordinates::new("source.toolkit.fluxcd.io", "v1beta2", "ocirepositories", "OCIRepository");

/// Outcome of trying a named object against a candidate API version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionProbe {
    Found,
    Absent,
}

/// Try `coords` for the target. Errors of any kind (404, 403, version not served) are `Absent`.
pub async fn probe_version(api: &dyn ClusterApi, coords: &ResourceCoordinates, target: &WatchTarget) -> VersionProbe {
    match api.get_object(coords, &target.namespace, &target.name).await {
        Ok(_) => VersionProbe::Found,
        Err(e) => {
            debug!(coords = %coords, error = %e, "version probe missed");
            VersionProbe::Absent
        }
    }
}

/// Resolve the coordinates to use for `target` for the rest of the run.
pub async fn resolve(api: &dyn ClusterApi, target: &WatchTarget) -> FluxrResult<ResourceCoordinates> {
    if target.name.is_empty() || target.namespace.is_empty() {
        return Err(FluxrError::Resolution(format!("{} needs a name and a namespace", target.kind.api_kind())));
    }
    let coords = match target.kind {
        ResourceKind::Kustomization => KUSTOMIZATION,
        ResourceKind::GitSource => GIT_REPOSITORY,
        ResourceKind::OciSource => OCI_REPOSITORY,
        ResourceKind::HelmRelease => match probe_version(api, &HELMRELEASE_V2, target).await {
            VersionProbe::Found => HELMRELEASE_V2,
            VersionProbe::Absent => {
                info!(resource = %target, "helm.toolkit.fluxcd.io/v2 not available; using v2beta1");
                HELMRELEASE_V2BETA1
            }
        },
    };
    Ok(coords)
}
