// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Injector reconciler - watches RegistryCredentialInjector resources and the objects they own.

use crate::config::{Config, RetryPolicy};
use crate::constants::crd;
use crate::constants::markers::{OWNER_ANNOTATION, OWNER_ID_LABEL};
use crate::error::{InjectorError, Result};
use crate::reconcilers::engine::Engine;
use crate::types::{ObjectKey, RegistryCredentialInjector};
use futures::StreamExt;
use kube::{
    api::DynamicObject,
    runtime::{controller, controller::Action, reflector::ObjectRef, watcher, Controller},
    Api, Client, ResourceExt,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-instance exponential backoff for failed passes
pub struct ErrorBackoff {
    policy: RetryPolicy,
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl ErrorBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            policy: RetryPolicy {
                max_attempts: u32::MAX,
                initial_backoff: base,
                max_backoff: max,
            },
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure and return the delay before the next pass
    pub fn failed(&self, key: &ObjectKey) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let count = failures.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
        self.policy.backoff(*count)
    }

    pub fn reset(&self, key: &ObjectKey) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

pub struct InjectorReconciler {
    client: Client,
    engine: Engine,
    config: Arc<Config>,
    cancel: CancellationToken,
    backoff: ErrorBackoff,
}

impl InjectorReconciler {
    pub fn new(client: Client, engine: Engine, config: Arc<Config>, cancel: CancellationToken) -> Self {
        let backoff = ErrorBackoff::new(config.error_backoff_base, config.error_backoff_max);
        Self {
            client,
            engine,
            config,
            cancel,
            backoff,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let injectors: Api<RegistryCredentialInjector> = match &self.config.watch_namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let shutdown = self.cancel.clone();

        let mut controller = Controller::new(injectors, watcher::Config::default())
            .with_config(controller::Config::default().concurrency(self.config.worker_concurrency))
            .graceful_shutdown_on(async move { shutdown.cancelled().await });

        // Owned objects may live outside the watched namespace
        for kind in &self.config.managed_kinds {
            let resource = kind.api_resource();
            let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
            controller = controller.watches_with(
                api,
                resource,
                watcher::Config::default().labels(OWNER_ID_LABEL),
                owner_of,
            );
        }

        info!(
            "Watching RegistryCredentialInjectors and {} managed kinds",
            self.config.managed_kinds.len()
        );
        let context = Arc::new(self);
        let ctx = context.clone();
        controller
            .run(reconcile, error_policy, context)
            .for_each(|res| {
                let ctx = ctx.clone();
                async move {
                    match res {
                        Ok(o) => debug!("Reconciled injector: {:?}", o),
                        // Deleted without a final pass, e.g. after its finalizer was removed by hand
                        Err(controller::Error::ObjectNotFound(obj_ref)) => {
                            debug!("Injector {} is gone", obj_ref);
                            ctx.backoff.reset(&instance_key(&obj_ref));
                        }
                        Err(e) => warn!("Reconciliation error: {:?}", e),
                    }
                }
            })
            .await;

        info!("Injector controller stopped");
        Ok(())
    }
}

fn instance_key(obj_ref: &ObjectRef<DynamicObject>) -> ObjectKey {
    ObjectKey::new(
        &format!("{}/{}", crd::GROUP, crd::VERSION),
        crd::KIND,
        obj_ref.namespace.as_deref(),
        &obj_ref.name,
    )
}

/// Map a managed object back to the instance named in its owner annotation
fn owner_of(obj: DynamicObject) -> Option<ObjectRef<RegistryCredentialInjector>> {
    let owner = obj.annotations().get(OWNER_ANNOTATION)?;
    let (namespace, name) = owner.split_once('/')?;
    if name.is_empty() {
        return None;
    }
    Some(ObjectRef::new(name).within(namespace))
}

async fn reconcile(
    injector: Arc<RegistryCredentialInjector>,
    ctx: Arc<InjectorReconciler>,
) -> Result<Action> {
    let key = injector.object_key();
    let timeout = ctx.config.reconcile_timeout;

    let requeue = tokio::time::timeout(timeout, ctx.engine.reconcile(&key, &ctx.cancel))
        .await
        .map_err(|_| InjectorError::Timeout(timeout))??;

    ctx.backoff.reset(&key);
    Ok(match requeue {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    })
}

fn error_policy(
    injector: Arc<RegistryCredentialInjector>,
    error: &InjectorError,
    ctx: Arc<InjectorReconciler>,
) -> Action {
    let key = injector.object_key();
    if matches!(error, InjectorError::Canceled) {
        debug!("Pass for {} canceled", key);
        return Action::await_change();
    }
    let delay = ctx.backoff.failed(&key);
    warn!("Reconciliation of {} failed, retrying in {:?}: {}", key, delay, error);
    Action::requeue(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ManagedKind;
    use serde_json::json;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("operator.cs.sap.com/v1alpha1", "RegistryCredentialInjector", Some("ns"), name)
    }

    #[test]
    fn test_backoff_grows_per_instance() {
        let backoff = ErrorBackoff::new(Duration::from_secs(5), Duration::from_secs(300));

        assert_eq!(backoff.failed(&key("a")), Duration::from_secs(5));
        assert_eq!(backoff.failed(&key("a")), Duration::from_secs(10));
        assert_eq!(backoff.failed(&key("a")), Duration::from_secs(20));
        assert_eq!(backoff.failed(&key("b")), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_is_capped_and_reset() {
        let backoff = ErrorBackoff::new(Duration::from_secs(5), Duration::from_secs(30));
        for _ in 0..10 {
            backoff.failed(&key("a"));
        }
        assert_eq!(backoff.failed(&key("a")), Duration::from_secs(30));

        backoff.reset(&key("a"));
        assert_eq!(backoff.failed(&key("a")), Duration::from_secs(5));
    }

    #[test]
    fn test_missing_instance_key_matches_reconciled_key() {
        let injector: RegistryCredentialInjector = serde_json::from_value(json!({
            "apiVersion": "operator.cs.sap.com/v1alpha1",
            "kind": "RegistryCredentialInjector",
            "metadata": {"name": "main", "namespace": "rci-system"},
            "spec": {}
        }))
        .unwrap();
        let obj_ref = ObjectRef::<DynamicObject>::new_with("main", ManagedKind::injector().api_resource())
            .within("rci-system");

        let backoff = ErrorBackoff::new(Duration::from_secs(5), Duration::from_secs(300));
        backoff.failed(&injector.object_key());
        backoff.failed(&injector.object_key());
        backoff.reset(&instance_key(&obj_ref));

        assert_eq!(instance_key(&obj_ref), injector.object_key());
        assert_eq!(backoff.failed(&injector.object_key()), Duration::from_secs(5));
    }

    #[test]
    fn test_owner_of_reads_annotation() {
        let obj: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "injector",
                "namespace": "workloads",
                "annotations": {OWNER_ANNOTATION: "rci-system/main"}
            }
        }))
        .unwrap();

        let owner = owner_of(obj).unwrap();
        assert_eq!(owner.name, "main");
        assert_eq!(owner.namespace.as_deref(), Some("rci-system"));
    }

    #[test]
    fn test_owner_of_ignores_unmarked_objects() {
        let obj: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "other", "annotations": {OWNER_ANNOTATION: "garbage"}}
        }))
        .unwrap();
        assert!(owner_of(obj).is_none());

        let bare: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "bare"}
        }))
        .unwrap();
        assert!(owner_of(bare).is_none());
    }
}
