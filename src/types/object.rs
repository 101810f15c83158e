// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Rendered manifests and their identity.

use crate::constants::crd;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use serde_json::Value;
use std::fmt;

/// Stable identity of a cluster object: `(apiVersion, kind, namespace, name)`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// Identity of a live object; `None` when type information is missing
    pub fn from_dynamic(obj: &DynamicObject) -> Option<Self> {
        let types = obj.types.as_ref()?;
        Some(Self {
            api_version: types.api_version.clone(),
            kind: types.kind.clone(),
            namespace: obj.metadata.namespace.clone(),
            name: obj.metadata.name.clone()?,
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} {}/{}", self.api_version, self.kind, ns, self.name),
            None => write!(f, "{}/{} {}", self.api_version, self.kind, self.name),
        }
    }
}

/// A kind the applier is permitted to manage
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagedKind {
    pub api_version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

impl ManagedKind {
    pub fn new(api_version: &str, kind: &str, plural: &str, namespaced: bool) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
            namespaced,
        }
    }

    /// Kinds rendered by the bundled chart
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("v1", "Namespace", "namespaces", false),
            Self::new("v1", "ServiceAccount", "serviceaccounts", true),
            Self::new("v1", "Secret", "secrets", true),
            Self::new("v1", "ConfigMap", "configmaps", true),
            Self::new("v1", "Service", "services", true),
            Self::new("rbac.authorization.k8s.io/v1", "ClusterRole", "clusterroles", false),
            Self::new("rbac.authorization.k8s.io/v1", "ClusterRoleBinding", "clusterrolebindings", false),
            Self::new("rbac.authorization.k8s.io/v1", "Role", "roles", true),
            Self::new("rbac.authorization.k8s.io/v1", "RoleBinding", "rolebindings", true),
            Self::new("apps/v1", "Deployment", "deployments", true),
            Self::new("cert-manager.io/v1", "Issuer", "issuers", true),
            Self::new("cert-manager.io/v1", "Certificate", "certificates", true),
            Self::new(
                "admissionregistration.k8s.io/v1",
                "MutatingWebhookConfiguration",
                "mutatingwebhookconfigurations",
                false,
            ),
        ]
    }

    /// The RegistryCredentialInjector kind itself, needed for status and finalizer writes
    pub fn injector() -> Self {
        Self::new(
            &format!("{}/{}", crd::GROUP, crd::VERSION),
            crd::KIND,
            crd::PLURAL,
            true,
        )
    }

    pub fn matches(&self, api_version: &str, kind: &str) -> bool {
        self.api_version == api_version && self.kind == kind
    }

    pub fn api_resource(&self) -> ApiResource {
        let (group, version) = match self.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version.as_str()),
        };
        let gvk = GroupVersionKind::gvk(group, version, &self.kind);
        ApiResource::from_gvk_with_plural(&gvk, &self.plural)
    }
}

/// Apply order position of a kind; lower tiers are applied first and deleted last
pub fn dependency_tier(kind: &str) -> u8 {
    match kind {
        "Namespace" | "CustomResourceDefinition" => 0,
        "ServiceAccount" | "Secret" | "ConfigMap" | "ClusterRole" | "Role" | "PriorityClass"
        | "Issuer" | "ClusterIssuer" => 1,
        "ClusterRoleBinding" | "RoleBinding" | "Service" | "Certificate" => 2,
        "MutatingWebhookConfiguration" | "ValidatingWebhookConfiguration" | "APIService" => 4,
        _ => 3,
    }
}

/// One rendered manifest
#[derive(Clone, Debug, PartialEq)]
pub struct ManagedObject {
    pub key: ObjectKey,
    /// Full manifest, including apiVersion, kind and metadata
    pub content: Value,
}

impl ManagedObject {
    /// Build from a manifest; fails if the identity fields are missing
    pub fn from_manifest(content: Value) -> Result<Self, String> {
        let api_version = content
            .get("apiVersion")
            .and_then(Value::as_str)
            .ok_or("manifest has no apiVersion")?;
        let kind = content
            .get("kind")
            .and_then(Value::as_str)
            .ok_or("manifest has no kind")?;
        let metadata = content.get("metadata");
        let name = metadata
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| format!("{} manifest has no metadata.name", kind))?;
        let namespace = metadata
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty());

        Ok(Self {
            key: ObjectKey::new(api_version, kind, namespace, name),
            content,
        })
    }

    pub fn tier(&self) -> u8 {
        dependency_tier(&self.key.kind)
    }

    /// Set the namespace on both key and manifest
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.key.namespace = Some(namespace.to_string());
        if let Some(meta) = self.content.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.insert("namespace".to_string(), Value::String(namespace.to_string()));
        }
        self
    }

    /// Drop the namespace from both key and manifest
    pub fn without_namespace(mut self) -> Self {
        self.key.namespace = None;
        if let Some(meta) = self.content.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.remove("namespace");
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_manifest_reads_identity() {
        let obj = ManagedObject::from_manifest(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "injector", "namespace": "rci"}
        }))
        .unwrap();

        assert_eq!(obj.key, ObjectKey::new("apps/v1", "Deployment", Some("rci"), "injector"));
        assert_eq!(obj.tier(), 3);
    }

    #[test]
    fn test_from_manifest_requires_name() {
        let err = ManagedObject::from_manifest(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {}
        }))
        .unwrap_err();

        assert!(err.contains("metadata.name"));
    }

    #[test]
    fn test_with_namespace_updates_manifest() {
        let obj = ManagedObject::from_manifest(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "cfg"}
        }))
        .unwrap()
        .with_namespace("target");

        assert_eq!(obj.key.namespace.as_deref(), Some("target"));
        assert_eq!(obj.content["metadata"]["namespace"], "target");
    }

    #[test]
    fn test_without_namespace_for_cluster_scoped_kinds() {
        let obj = ManagedObject::from_manifest(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "ClusterRole",
            "metadata": {"name": "role", "namespace": "ignored"}
        }))
        .unwrap()
        .without_namespace();

        assert_eq!(obj.key.namespace, None);
        assert!(obj.content["metadata"].get("namespace").is_none());
    }

    #[test]
    fn test_injector_kind() {
        let kind = ManagedKind::injector();
        assert!(kind.matches("operator.cs.sap.com/v1alpha1", "RegistryCredentialInjector"));
        assert_eq!(kind.api_resource().plural, "registrycredentialinjectors");
    }

    #[test]
    fn test_namespace_precedes_workloads_and_webhooks_come_last() {
        assert!(dependency_tier("Namespace") < dependency_tier("ServiceAccount"));
        assert!(dependency_tier("ClusterRole") < dependency_tier("ClusterRoleBinding"));
        assert!(dependency_tier("Service") < dependency_tier("Deployment"));
        assert!(dependency_tier("Deployment") < dependency_tier("MutatingWebhookConfiguration"));
    }

    #[test]
    fn test_api_resource_for_core_and_grouped_kinds() {
        let ns = ManagedKind::new("v1", "Namespace", "namespaces", false).api_resource();
        assert_eq!(ns.group, "");
        assert_eq!(ns.version, "v1");
        assert_eq!(ns.plural, "namespaces");

        let deploy = ManagedKind::new("apps/v1", "Deployment", "deployments", true).api_resource();
        assert_eq!(deploy.group, "apps");
        assert_eq!(deploy.api_version, "apps/v1");
    }

    #[test]
    fn test_object_key_display() {
        let key = ObjectKey::new("v1", "Namespace", None, "rci");
        assert_eq!(key.to_string(), "v1/Namespace rci");
    }
}
