// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::{crd, FINALIZER};
use crate::types::object::ObjectKey;
use k8s_openapi::api::core::v1::{
    Affinity, PodSecurityContext, ResourceRequirements, SecurityContext, Toleration,
    TopologySpreadConstraint,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, Time};
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[kube(
    group = "operator.cs.sap.com",
    version = "v1alpha1",
    kind = "RegistryCredentialInjector",
    plural = "registrycredentialinjectors",
    shortname = "rci"
)]
#[kube(namespaced)]
#[kube(status = "RegistryCredentialInjectorStatus")]
#[serde(rename_all = "camelCase")]
pub struct RegistryCredentialInjectorSpec {
    /// Target namespace of the rendered objects; defaults to the resource's namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Release name of the rendered objects; defaults to the resource's name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_replica_count")]
    pub replica_count: i32,
    #[serde(default)]
    pub image: ImageSpec,
    #[serde(flatten)]
    pub kubernetes: KubernetesProperties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_selector: Option<LabelSelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_pull_secret: Option<String>,
    #[serde(default)]
    pub log_level: i32,
}

fn default_replica_count() -> i32 {
    1
}

impl Default for RegistryCredentialInjectorSpec {
    fn default() -> Self {
        Self {
            namespace: None,
            name: None,
            replica_count: default_replica_count(),
            image: ImageSpec::default(),
            kubernetes: KubernetesProperties::default(),
            object_selector: None,
            namespace_selector: None,
            default_pull_secret: None,
            log_level: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pull_secrets: Vec<String>,
}

/// Scheduling and pod-level settings passed through to the workload unchanged
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesProperties {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topology_spread_constraints: Vec<TopologySpreadConstraint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_security_context: Option<PodSecurityContext>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
pub enum Phase {
    #[default]
    Pending,
    Processing,
    Ready,
    Error,
    Deleting,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Pending => "Pending",
            Phase::Processing => "Processing",
            Phase::Ready => "Ready",
            Phase::Error => "Error",
            Phase::Deleting => "Deleting",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistryCredentialInjectorStatus {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default = "unobserved_generation")]
    pub observed_generation: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_generation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_applied_at: Option<Time>,
}

fn unobserved_generation() -> i64 {
    -1
}

impl Default for RegistryCredentialInjectorStatus {
    fn default() -> Self {
        Self {
            phase: Phase::Pending,
            conditions: Vec::new(),
            observed_generation: unobserved_generation(),
            applied_generation: None,
            last_applied_at: None,
        }
    }
}

impl RegistryCredentialInjectorStatus {
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
}

impl RegistryCredentialInjector {
    /// Namespace the rendered objects are deployed to
    pub fn deployment_namespace(&self) -> String {
        self.spec
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| self.namespace().unwrap_or_default())
    }

    /// Release name of the rendered objects
    pub fn deployment_name(&self) -> String {
        self.spec
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.name_any())
    }

    /// Identity of this resource in the cluster
    pub fn object_key(&self) -> ObjectKey {
        ObjectKey::new(
            &format!("{}/{}", crd::GROUP, crd::VERSION),
            crd::KIND,
            self.namespace().as_deref(),
            &self.name_any(),
        )
    }

    /// Value of the ownership label stamped on every managed object
    pub fn owner_id(&self) -> Option<String> {
        self.uid()
    }

    /// Value of the owner annotation, `namespace/name`
    pub fn owner_ref_string(&self) -> String {
        format!("{}/{}", self.namespace().unwrap_or_default(), self.name_any())
    }

    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or(0)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == FINALIZER)
    }

    pub fn phase(&self) -> Phase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }
}
