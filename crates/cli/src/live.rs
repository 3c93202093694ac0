//! Read-only access to the cluster for live previews.

use anyhow::{anyhow, Context, Result};
use kube::{
    api::Api,
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client,
};
use serde_json::Value as Json;
use tracing::debug;

/// Where a desired document wants to live.
#[derive(Debug, Clone)]
pub struct Target {
    pub gvk: GroupVersionKind,
    pub name: String,
    pub namespace: Option<String>,
}

pub fn target_of(desired: &Json, ns_override: Option<&str>) -> Result<Target> {
    let api_version = desired.get("apiVersion").and_then(|v| v.as_str()).ok_or_else(|| anyhow!("desired missing apiVersion"))?;
    let kind = desired.get("kind").and_then(|v| v.as_str()).ok_or_else(|| anyhow!("desired missing kind"))?;
    let (group, version) = match api_version.split_once('/') {
        Some((g, v)) => (g, v),
        None => ("", api_version),
    };
    let name = desired
        .get("metadata").and_then(|m| m.get("name")).and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("desired missing metadata.name"))?
        .to_string();
    let namespace = ns_override
        .map(|s| s.to_string())
        .or_else(|| desired.get("metadata").and_then(|m| m.get("namespace")).and_then(|v| v.as_str()).map(|s| s.to_string()));
    Ok(Target { gvk: GroupVersionKind::gvk(group, version, kind), name, namespace })
}

async fn find_api_resource(client: Client, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok((ar.clone(), namespaced));
            }
        }
    }
    Err(anyhow!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind))
}

/// Fetches the current object, `None` if it does not exist yet.
pub async fn fetch_observed(target: &Target) -> Result<Option<DynamicObject>> {
    let client = Client::try_default().await.context("building kube client")?;
    let (ar, namespaced) = find_api_resource(client.clone(), &target.gvk).await?;
    let api: Api<DynamicObject> = if namespaced {
        match target.namespace.as_deref() {
            Some(n) => Api::namespaced_with(client, n, &ar),
            None => return Err(anyhow!("namespace required for namespaced kind")),
        }
    } else {
        Api::all_with(client, &ar)
    };
    let obj = api.get_opt(&target.name).await.with_context(|| format!("fetching {}", target.name))?;
    debug!(name = %target.name, found = obj.is_some(), "fetched observed object");
    Ok(obj)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_errors_are_friendly() {
        let e1 = target_of(&serde_json::json!({ "kind": "Foo", "metadata": { "name": "x" } }), None).unwrap_err().to_string();
        assert!(e1.contains("missing apiVersion"), "e1={}", e1);

        let e2 = target_of(&serde_json::json!({ "apiVersion": "v1", "metadata": { "name": "x" } }), None).unwrap_err().to_string();
        assert!(e2.contains("missing kind"), "e2={}", e2);

        let e3 = target_of(&serde_json::json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": {} }), None).unwrap_err().to_string();
        assert!(e3.contains("missing metadata.name"), "e3={}", e3);
    }

    #[test]
    fn target_splits_group_and_prefers_override() {
        let d = serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web", "namespace": "a" }
        });
        let t = target_of(&d, None).unwrap();
        assert_eq!((t.gvk.group.as_str(), t.gvk.version.as_str(), t.gvk.kind.as_str()), ("apps", "v1", "Deployment"));
        assert_eq!(t.namespace.as_deref(), Some("a"));
        assert_eq!(target_of(&d, Some("b")).unwrap().namespace.as_deref(), Some("b"));

        let core = serde_json::json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "cm" } });
        let t = target_of(&core, None).unwrap();
        assert_eq!(t.gvk.group, "");
        assert_eq!(t.namespace, None);
    }
}
