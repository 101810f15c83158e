// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Cluster API boundary: generic object operations keyed by `(apiVersion, kind, namespace, name)`.

pub mod client;
pub mod crd;

pub use client::KubeClusterApi;
pub use crd::wait_for_injector_crd;

use crate::error::ClusterError;
use crate::types::object::{ManagedKind, ObjectKey};
use async_trait::async_trait;
use kube::api::DynamicObject;
use serde_json::Value;

/// The only I/O dependency of the applier, the status tracker and the controller.
///
/// Writes are guarded by resource versions; a stale version yields [`ClusterError::Conflict`].
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch an object; `Ok(None)` when it does not exist
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, ClusterError>;

    /// List objects of one kind across all namespaces matching a label selector
    async fn list(
        &self,
        kind: &ManagedKind,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError>;

    async fn create(&self, key: &ObjectKey, manifest: &Value) -> Result<DynamicObject, ClusterError>;

    /// Replace the managed content of an existing object, if it is still at `resource_version`
    async fn update(
        &self,
        key: &ObjectKey,
        manifest: &Value,
        resource_version: &str,
    ) -> Result<DynamicObject, ClusterError>;

    /// Delete an object; deleting an absent object succeeds
    async fn delete(&self, key: &ObjectKey) -> Result<(), ClusterError>;

    /// Write the status subresource
    async fn patch_status(&self, key: &ObjectKey, status: &Value) -> Result<(), ClusterError>;

    /// Replace the finalizer list, if the object is still at `resource_version`
    async fn set_finalizers(
        &self,
        key: &ObjectKey,
        finalizers: &[String],
        resource_version: &str,
    ) -> Result<DynamicObject, ClusterError>;
}
