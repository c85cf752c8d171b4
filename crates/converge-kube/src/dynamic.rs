//! Dynamic API resolution shared by the observer and the applier

use kube::{
    Client,
    api::{Api, DynamicObject},
    core::GroupVersionKind,
    discovery::{ApiResource, Discovery, Scope},
};

use crate::error::{KubeError, Result};

/// Split an apiVersion into a GroupVersionKind
pub(crate) fn parse_gvk(api_version: &str, kind: &str) -> GroupVersionKind {
    match api_version.split_once('/') {
        Some((group, version)) => GroupVersionKind::gvk(group, version, kind),
        None => GroupVersionKind::gvk("", api_version, kind),
    }
}

/// Resolve an API handle for one kind, scoped to `namespace` for namespaced
/// kinds
pub(crate) fn resolve_api(
    client: &Client,
    discovery: &Discovery,
    api_version: &str,
    kind: &str,
    namespace: &str,
) -> Result<(Api<DynamicObject>, Scope)> {
    let gvk = parse_gvk(api_version, kind);
    let (api_resource, capabilities): (ApiResource, _) =
        discovery.resolve_gvk(&gvk).ok_or_else(|| KubeError::UnknownKind {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        })?;

    let api = match capabilities.scope {
        Scope::Namespaced => Api::namespaced_with(client.clone(), namespace, &api_resource),
        Scope::Cluster => Api::all_with(client.clone(), &api_resource),
    };
    Ok((api, capabilities.scope))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gvk_grouped() {
        let gvk = parse_gvk("apps/v1", "Deployment");
        assert_eq!(gvk.group, "apps");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.kind, "Deployment");
    }

    #[test]
    fn test_parse_gvk_core_group() {
        let gvk = parse_gvk("v1", "Service");
        assert_eq!(gvk.group, "");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.kind, "Service");
    }
}
