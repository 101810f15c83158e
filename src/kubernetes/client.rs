// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! kube-rs backed implementation of the cluster API boundary

use crate::error::ClusterError;
use crate::kubernetes::ClusterApi;
use crate::types::object::{ManagedKind, ObjectKey};
use async_trait::async_trait;
use kube::{
    api::{DeleteParams, DynamicObject, ListParams, Patch, PatchParams, TypeMeta},
    Api, Client,
};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, instrument};

/// Cluster access through `Api<DynamicObject>`, restricted to a fixed set of kinds
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
    kinds: Vec<ManagedKind>,
    field_manager: String,
    request_timeout: Duration,
}

impl KubeClusterApi {
    pub fn new(
        client: Client,
        kinds: Vec<ManagedKind>,
        field_manager: &str,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            kinds,
            field_manager: field_manager.to_string(),
            request_timeout,
        }
    }

    fn kind(&self, api_version: &str, kind: &str) -> Result<&ManagedKind, ClusterError> {
        self.kinds
            .iter()
            .find(|k| k.matches(api_version, kind))
            .ok_or_else(|| ClusterError::UnsupportedKind(format!("{}/{}", api_version, kind)))
    }

    fn api(&self, key: &ObjectKey) -> Result<(Api<DynamicObject>, &ManagedKind), ClusterError> {
        let kind = self.kind(&key.api_version, &key.kind)?;
        let ar = kind.api_resource();
        let api = match (kind.namespaced, key.namespace.as_deref()) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            (true, None) => {
                return Err(ClusterError::Invalid(format!(
                    "{} is namespaced but has no namespace",
                    key
                )))
            }
            (false, _) => Api::all_with(self.client.clone(), &ar),
        };
        Ok((api, kind))
    }

    /// Run one API call under the request timeout
    async fn call<T, F>(&self, fut: F) -> Result<T, ClusterError>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result.map_err(ClusterError::from),
            Err(_) => Err(ClusterError::Transient(format!(
                "request timed out after {:?}",
                self.request_timeout
            ))),
        }
    }
}

/// List responses omit type information on items of built-in kinds
fn with_types(mut obj: DynamicObject, kind: &ManagedKind) -> DynamicObject {
    if obj.types.is_none() {
        obj.types = Some(TypeMeta {
            api_version: kind.api_version.clone(),
            kind: kind.kind.clone(),
        });
    }
    obj
}

fn to_dynamic(manifest: &Value) -> Result<DynamicObject, ClusterError> {
    serde_json::from_value(manifest.clone())
        .map_err(|e| ClusterError::Invalid(format!("manifest is not a valid object: {}", e)))
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    #[instrument(skip(self), fields(object = %key))]
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, ClusterError> {
        let (api, kind) = self.api(key)?;
        let obj = self.call(api.get_opt(&key.name)).await?;
        Ok(obj.map(|o| with_types(o, kind)))
    }

    #[instrument(skip(self, kind), fields(kind = %kind.kind))]
    async fn list(
        &self,
        kind: &ManagedKind,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &kind.api_resource());
        let list = self
            .call(api.list(&ListParams::default().labels(label_selector)))
            .await?;
        debug!("Listed {} {} objects", list.items.len(), kind.kind);
        Ok(list.items.into_iter().map(|o| with_types(o, kind)).collect())
    }

    #[instrument(skip(self, manifest), fields(object = %key))]
    async fn create(&self, key: &ObjectKey, manifest: &Value) -> Result<DynamicObject, ClusterError> {
        let (api, kind) = self.api(key)?;
        let obj = to_dynamic(manifest)?;
        // Applied rather than posted, so later applies by the same manager prune dropped fields.
        // Not forced: a foreign object that appeared meanwhile surfaces as a conflict.
        let pp = PatchParams::apply(&self.field_manager);
        let created = self.call(api.patch(&key.name, &pp, &Patch::Apply(&obj))).await?;
        Ok(with_types(created, kind))
    }

    #[instrument(skip(self, manifest), fields(object = %key))]
    async fn update(
        &self,
        key: &ObjectKey,
        manifest: &Value,
        resource_version: &str,
    ) -> Result<DynamicObject, ClusterError> {
        let (api, kind) = self.api(key)?;
        let mut obj = to_dynamic(manifest)?;
        // Server-side apply honours resourceVersion as a precondition
        obj.metadata.resource_version = Some(resource_version.to_string());
        let pp = PatchParams::apply(&self.field_manager).force();
        let updated = self.call(api.patch(&key.name, &pp, &Patch::Apply(&obj))).await?;
        Ok(with_types(updated, kind))
    }

    #[instrument(skip(self), fields(object = %key))]
    async fn delete(&self, key: &ObjectKey) -> Result<(), ClusterError> {
        let (api, _) = self.api(key)?;
        match self.call(api.delete(&key.name, &DeleteParams::background())).await {
            Ok(_) | Err(ClusterError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, status), fields(object = %key))]
    async fn patch_status(&self, key: &ObjectKey, status: &Value) -> Result<(), ClusterError> {
        let (api, _) = self.api(key)?;
        let patch = json!({ "status": status });
        self.call(api.patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch)))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(object = %key))]
    async fn set_finalizers(
        &self,
        key: &ObjectKey,
        finalizers: &[String],
        resource_version: &str,
    ) -> Result<DynamicObject, ClusterError> {
        let (api, kind) = self.api(key)?;
        let patch = json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": resource_version,
            }
        });
        let patched = self
            .call(api.patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch)))
            .await?;
        Ok(with_types(patched, kind))
    }
}
