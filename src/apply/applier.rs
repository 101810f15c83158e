// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Converges the live objects owned by one instance to a desired set.

use crate::apply::diff::{digest, needs_update, stamp_markers, Owner};
use crate::apply::retry::with_retry;
use crate::config::RetryPolicy;
use crate::error::{ClusterError, InjectorError, Result};
use crate::kubernetes::ClusterApi;
use crate::types::object::{dependency_tier, ManagedKind, ManagedObject, ObjectKey};
use futures::{stream, FutureExt, StreamExt};
use kube::api::DynamicObject;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// What happened to one object during a pass
#[derive(Debug, Clone)]
pub enum ObjectOutcome {
    Created(DynamicObject),
    Updated(DynamicObject),
    Unchanged(DynamicObject),
    Deleted,
    /// Already marked for deletion and still finalizing
    DeletionPending,
    /// Not dispatched: the pass was canceled or stopped early
    Skipped,
    Failed(ClusterError),
}

impl ObjectOutcome {
    /// Live state after the pass, for objects that are part of the desired set
    pub fn live(&self) -> Option<&DynamicObject> {
        match self {
            ObjectOutcome::Created(obj) | ObjectOutcome::Updated(obj) | ObjectOutcome::Unchanged(obj) => {
                Some(obj)
            }
            _ => None,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            ObjectOutcome::Created(_) | ObjectOutcome::Updated(_) | ObjectOutcome::Deleted
        )
    }

    pub fn error(&self) -> Option<&ClusterError> {
        match self {
            ObjectOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObjectReport {
    pub key: ObjectKey,
    pub outcome: ObjectOutcome,
}

/// Aggregated result of one apply or delete pass
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// Desired objects in apply order, followed by pruned objects in delete order
    pub objects: Vec<ObjectReport>,
    /// Kinds whose owned objects could not be listed
    pub list_failures: Vec<(String, ClusterError)>,
    /// Number of create, update and delete calls that succeeded
    pub writes: usize,
    /// A transient error exhausted its retries; later tiers and pruning were skipped
    pub incomplete: bool,
    pub canceled: bool,
}

impl ApplyReport {
    fn errors(&self) -> impl Iterator<Item = (String, &ClusterError)> {
        self.list_failures
            .iter()
            .map(|(kind, e)| (format!("list {}", kind), e))
            .chain(
                self.objects
                    .iter()
                    .filter_map(|r| r.outcome.error().map(|e| (r.key.to_string(), e))),
            )
    }

    /// Errors that will not resolve by retrying, as `object: error` messages
    pub fn permanent_failures(&self) -> Vec<String> {
        self.errors()
            .filter(|(_, e)| !e.is_retryable())
            .map(|(what, e)| format!("{}: {}", what, e))
            .collect()
    }

    pub fn transient_failures(&self) -> Vec<String> {
        self.errors()
            .filter(|(_, e)| e.is_retryable())
            .map(|(what, e)| format!("{}: {}", what, e))
            .collect()
    }

    /// Live state of every desired object that was written or found up to date
    pub fn applied(&self) -> impl Iterator<Item = (&ObjectKey, &DynamicObject)> {
        self.objects
            .iter()
            .filter_map(|r| r.outcome.live().map(|obj| (&r.key, obj)))
    }

    pub fn is_complete(&self) -> bool {
        !self.incomplete && !self.canceled
    }

    fn record(&mut self, report: ObjectReport) {
        match &report.outcome {
            ObjectOutcome::Created(_) => info!("Created {}", report.key),
            ObjectOutcome::Updated(_) => info!("Updated {}", report.key),
            ObjectOutcome::Deleted => info!("Deleted {}", report.key),
            ObjectOutcome::Failed(e) => {
                warn!("Failed to converge {}: {}", report.key, e);
                if e.is_retryable() {
                    self.incomplete = true;
                }
            }
            _ => {}
        }
        if report.outcome.is_write() {
            self.writes += 1;
        }
        self.objects.push(report);
    }

    fn halted(&self) -> bool {
        self.incomplete || self.canceled
    }
}

/// Creates, updates and deletes managed objects on behalf of one owner
#[derive(Clone)]
pub struct Applier {
    cluster: Arc<dyn ClusterApi>,
    kinds: Vec<ManagedKind>,
    concurrency: usize,
    retry: RetryPolicy,
}

impl Applier {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        kinds: Vec<ManagedKind>,
        concurrency: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            cluster,
            kinds,
            concurrency: concurrency.max(1),
            retry,
        }
    }

    fn kind_of(&self, key: &ObjectKey) -> Option<&ManagedKind> {
        self.kinds
            .iter()
            .find(|k| k.matches(&key.api_version, &key.kind))
    }

    /// Converge the objects owned by `owner` to `desired`.
    ///
    /// Objects are written tier by tier; owned objects missing from `desired` are deleted
    /// afterwards in reverse tier order. Per-object failures are collected in the report.
    /// Only a duplicate identity in `desired` fails the pass, before anything is written.
    #[instrument(skip(self, desired, cancel), fields(owner = %owner.reference, objects = desired.len()))]
    pub async fn apply(
        &self,
        desired: Vec<ManagedObject>,
        owner: &Owner,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<ApplyReport> {
        let desired = self.normalize(desired, namespace);
        check_unique(&desired)?;

        let mut report = ApplyReport::default();
        let previous = self.list_previous(owner, cancel, &mut report).await;
        if report.halted() {
            return Ok(report);
        }

        let desired_keys: BTreeSet<ObjectKey> = desired.iter().map(|o| o.key.clone()).collect();
        let mut tiers: BTreeMap<u8, Vec<ManagedObject>> = BTreeMap::new();
        for obj in desired {
            tiers.entry(obj.tier()).or_default().push(obj);
        }

        for (tier, objects) in tiers {
            if cancel.is_cancelled() {
                report.canceled = true;
            }
            if report.halted() {
                for obj in objects {
                    report.record(ObjectReport {
                        key: obj.key,
                        outcome: ObjectOutcome::Skipped,
                    });
                }
                continue;
            }

            debug!("Applying tier {} ({} objects)", tier, objects.len());
            let results: Vec<ObjectReport> = stream::iter(objects)
                .map(|obj| self.apply_one(obj, owner, cancel).boxed())
                .buffered(self.concurrency)
                .collect()
                .await;
            for result in results {
                report.record(result);
            }
        }

        if cancel.is_cancelled() {
            report.canceled = true;
        }
        if report.halted() {
            debug!("Skipping prune, pass did not complete");
            return Ok(report);
        }

        let stale = previous
            .into_iter()
            .filter(|obj| ObjectKey::from_dynamic(obj).is_some_and(|key| !desired_keys.contains(&key)))
            .collect();
        self.prune(stale, cancel, &mut report).await;

        Ok(report)
    }

    /// Delete every object owned by `owner`, in reverse tier order
    #[instrument(skip(self, cancel), fields(owner = %owner.reference))]
    pub async fn delete_all(&self, owner: &Owner, cancel: &CancellationToken) -> ApplyReport {
        let mut report = ApplyReport::default();
        let owned = self.list_previous(owner, cancel, &mut report).await;
        if !report.halted() {
            self.prune(owned, cancel, &mut report).await;
        }
        report
    }

    /// All live objects carrying `owner`'s marker
    pub async fn list_owned(
        &self,
        owner: &Owner,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<DynamicObject>, ClusterError> {
        let (owned, failures) = self.list_by_kind(owner, cancel).await;
        match failures.into_iter().next() {
            Some((_, e)) => Err(e),
            None => Ok(owned),
        }
    }

    async fn list_previous(
        &self,
        owner: &Owner,
        cancel: &CancellationToken,
        report: &mut ApplyReport,
    ) -> Vec<DynamicObject> {
        let (owned, failures) = self.list_by_kind(owner, cancel).await;
        for (kind, e) in failures {
            warn!("Failed to list owned {} objects: {}", kind, e);
            if e.is_retryable() {
                report.incomplete = true;
            }
            report.list_failures.push((kind, e));
        }
        debug!("Found {} owned objects", owned.len());
        owned
    }

    async fn list_by_kind(
        &self,
        owner: &Owner,
        cancel: &CancellationToken,
    ) -> (Vec<DynamicObject>, Vec<(String, ClusterError)>) {
        let selector = owner.selector();
        let cluster = self.cluster.as_ref();
        let selector = selector.as_str();

        // Collected up front so the pass future holds no higher-ranked closure and stays `Send`
        let lists: Vec<_> = self
            .kinds
            .iter()
            .map(|kind| {
                async move {
                    let what = format!("list {}", kind.kind);
                    let listed = with_retry(&self.retry, cancel, &what, move || async move {
                        cluster.list(kind, selector).await
                    })
                    .await;
                    (kind, listed)
                }
                .boxed()
            })
            .collect();
        let results: Vec<_> = stream::iter(lists)
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut owned = Vec::new();
        let mut failures = Vec::new();
        for (kind, listed) in results {
            match listed {
                Ok(items) => owned.extend(items.into_iter().filter(|obj| owner.owns(obj))),
                Err(e) => failures.push((kind.kind.clone(), e)),
            }
        }
        (owned, failures)
    }

    fn normalize(&self, desired: Vec<ManagedObject>, namespace: &str) -> Vec<ManagedObject> {
        desired
            .into_iter()
            .map(|obj| match self.kind_of(&obj.key).map(|k| k.namespaced) {
                Some(true) if obj.key.namespace.is_none() => obj.with_namespace(namespace),
                Some(false) if obj.key.namespace.is_some() => obj.without_namespace(),
                _ => obj,
            })
            .collect()
    }

    async fn apply_one(
        &self,
        obj: ManagedObject,
        owner: &Owner,
        cancel: &CancellationToken,
    ) -> ObjectReport {
        let ManagedObject { key, content } = obj;

        if cancel.is_cancelled() {
            return ObjectReport {
                key,
                outcome: ObjectOutcome::Skipped,
            };
        }
        if self.kind_of(&key).is_none() {
            let error = ClusterError::UnsupportedKind(format!("{}/{}", key.api_version, key.kind));
            return ObjectReport {
                key,
                outcome: ObjectOutcome::Failed(error),
            };
        }

        let content_digest = digest(&content);
        let mut manifest = content;
        stamp_markers(&mut manifest, owner, &content_digest);

        let cluster = self.cluster.as_ref();
        let key_ref = &key;
        let manifest = &manifest;
        let content_digest = content_digest.as_str();

        // Every attempt re-reads the live object, so a conflict retries against fresh state
        let result = with_retry(&self.retry, cancel, &format!("apply {}", key), move || async move {
            match cluster.get(key_ref).await? {
                None => cluster
                    .create(key_ref, manifest)
                    .await
                    .map(ObjectOutcome::Created),
                Some(live) if !owner.owns(&live) => {
                    Err(ClusterError::OwnershipConflict(key_ref.to_string()))
                }
                Some(live) if live.metadata.deletion_timestamp.is_some() => Err(
                    ClusterError::Transient(format!("{} is still being deleted", key_ref)),
                ),
                Some(live) if !needs_update(manifest, content_digest, &live) => {
                    Ok(ObjectOutcome::Unchanged(live))
                }
                Some(live) => {
                    let version = live.metadata.resource_version.clone().unwrap_or_default();
                    cluster
                        .update(key_ref, manifest, &version)
                        .await
                        .map(ObjectOutcome::Updated)
                }
            }
        })
        .await;

        ObjectReport {
            key,
            outcome: result.unwrap_or_else(ObjectOutcome::Failed),
        }
    }

    async fn prune(&self, stale: Vec<DynamicObject>, cancel: &CancellationToken, report: &mut ApplyReport) {
        let mut tiers: BTreeMap<u8, Vec<(ObjectKey, DynamicObject)>> = BTreeMap::new();
        for obj in stale {
            if let Some(key) = ObjectKey::from_dynamic(&obj) {
                tiers.entry(dependency_tier(&key.kind)).or_default().push((key, obj));
            }
        }

        for (tier, objects) in tiers.into_iter().rev() {
            if cancel.is_cancelled() {
                report.canceled = true;
            }
            if report.halted() {
                for (key, _) in objects {
                    report.record(ObjectReport {
                        key,
                        outcome: ObjectOutcome::Skipped,
                    });
                }
                continue;
            }

            debug!("Deleting tier {} ({} objects)", tier, objects.len());
            let results: Vec<ObjectReport> = stream::iter(objects)
                .map(|(key, obj)| self.delete_one(key, obj, cancel).boxed())
                .buffered(self.concurrency)
                .collect()
                .await;
            for result in results {
                report.record(result);
            }
        }
    }

    async fn delete_one(&self, key: ObjectKey, obj: DynamicObject, cancel: &CancellationToken) -> ObjectReport {
        if cancel.is_cancelled() {
            return ObjectReport {
                key,
                outcome: ObjectOutcome::Skipped,
            };
        }
        if obj.metadata.deletion_timestamp.is_some() {
            debug!("{} is already being deleted", key);
            return ObjectReport {
                key,
                outcome: ObjectOutcome::DeletionPending,
            };
        }

        let cluster = self.cluster.as_ref();
        let key_ref = &key;
        let result = with_retry(&self.retry, cancel, &format!("delete {}", key), move || async move {
            cluster.delete(key_ref).await
        })
        .await;

        let outcome = match result {
            Ok(()) => ObjectOutcome::Deleted,
            Err(e) => ObjectOutcome::Failed(e),
        };
        ObjectReport { key, outcome }
    }
}

/// Two desired objects with the same identity would overwrite each other
fn check_unique(desired: &[ManagedObject]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for obj in desired {
        if !seen.insert(&obj.key) {
            return Err(InjectorError::Invariant(format!(
                "{} appears more than once in the desired set",
                obj.key
            )));
        }
    }
    Ok(())
}
