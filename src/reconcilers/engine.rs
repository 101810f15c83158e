// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! One reconciliation pass for one RegistryCredentialInjector.

use crate::apply::{Applier, ApplyReport, Owner};
use crate::config::Config;
use crate::constants::FINALIZER;
use crate::error::{InjectorError, Result};
use crate::kubernetes::ClusterApi;
use crate::render::{Release, Renderer};
use crate::status::{PassOutcome, StatusTracker};
use crate::transform::ParameterTransformer;
use crate::types::{ObjectKey, Phase, RegistryCredentialInjector, RegistryCredentialInjectorStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::chrono::Utc;
use kube::api::DynamicObject;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Transform, render, apply and report for a single instance
pub struct Engine {
    cluster: Arc<dyn ClusterApi>,
    transformer: Arc<dyn ParameterTransformer>,
    renderer: Arc<dyn Renderer>,
    applier: Applier,
    tracker: StatusTracker,
    config: Arc<Config>,
}

impl Engine {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        transformer: Arc<dyn ParameterTransformer>,
        renderer: Arc<dyn Renderer>,
        config: Arc<Config>,
    ) -> Self {
        let applier = Applier::new(
            cluster.clone(),
            config.managed_kinds.clone(),
            config.apply_concurrency,
            config.retry,
        );
        Self {
            cluster,
            transformer,
            renderer,
            applier,
            tracker: StatusTracker::default(),
            config,
        }
    }

    /// Run one pass for the instance at `key`.
    ///
    /// `Ok(None)` waits for the next change, `Ok(Some(delay))` asks for a pass after `delay`.
    /// Errors are transient and go through the controller's backoff.
    #[instrument(skip(self, key, cancel), fields(instance = %key))]
    pub async fn reconcile(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<Option<Duration>> {
        let Some(injector) = self.fetch(key).await? else {
            debug!("{} no longer exists", key);
            return Ok(None);
        };
        let owner = match injector.owner_id() {
            Some(id) => Owner::new(&id, &injector.owner_ref_string()),
            None => {
                return Err(InjectorError::Invariant(format!("{} has no uid", key)));
            }
        };

        if injector.is_deleting() {
            return self.finalize(key, &injector, &owner, cancel).await;
        }

        if !injector.has_finalizer() {
            let mut finalizers = injector.finalizers().to_vec();
            finalizers.push(FINALIZER.to_string());
            let version = injector.resource_version().unwrap_or_default();
            self.cluster.set_finalizers(key, &finalizers, &version).await?;
            info!("Added finalizer to {}", key);
        }

        self.converge(key, &injector, &owner, cancel).await
    }

    async fn fetch(&self, key: &ObjectKey) -> Result<Option<RegistryCredentialInjector>> {
        match self.cluster.get(key).await? {
            Some(obj) => Ok(Some(to_injector(obj)?)),
            None => Ok(None),
        }
    }

    async fn converge(
        &self,
        key: &ObjectKey,
        injector: &RegistryCredentialInjector,
        owner: &Owner,
        cancel: &CancellationToken,
    ) -> Result<Option<Duration>> {
        let generation = injector.generation();
        let mut status = injector.status.clone();

        let observed = status.as_ref().map(|s| s.observed_generation);
        if observed != Some(generation) && injector.phase() != Phase::Processing {
            info!("Applying generation {} of {}", generation, key);
            let next = self.status_after(status.as_ref(), generation, PassOutcome::Started);
            status = Some(self.write_status(key, status.as_ref(), next).await?);
        }

        let release = Release {
            name: injector.deployment_name(),
            namespace: injector.deployment_namespace(),
        };
        let desired = self
            .transformer
            .transform(injector)
            .and_then(|params| self.renderer.render(&release, &params));
        let desired = match desired {
            Ok(desired) => desired,
            Err(e) => return self.fail(key, status.as_ref(), generation, e).await,
        };

        let report = match self.applier.apply(desired, owner, &release.namespace, cancel).await {
            Ok(report) => report,
            Err(e) => return self.fail(key, status.as_ref(), generation, e).await,
        };
        if report.canceled {
            return Err(InjectorError::Canceled);
        }

        let next = self.status_after(status.as_ref(), generation, PassOutcome::Applied(&report));
        let next = self.write_status(key, status.as_ref(), next).await?;
        info!(
            "Pass for {} finished: phase {}, {} writes",
            key, next.phase, report.writes
        );

        self.requeue_after(&report, next.phase)
    }

    fn requeue_after(&self, report: &ApplyReport, phase: Phase) -> Result<Option<Duration>> {
        if report.incomplete {
            return Err(InjectorError::Incomplete(report.transient_failures().join("; ")));
        }
        if !report.permanent_failures().is_empty() {
            return Ok(Some(self.config.resync_interval));
        }
        match phase {
            Phase::Ready => Ok(None),
            _ => Ok(Some(self.config.processing_requeue)),
        }
    }

    /// Report a permanent failure and wait for the next change; transient errors propagate
    async fn fail(
        &self,
        key: &ObjectKey,
        status: Option<&RegistryCredentialInjectorStatus>,
        generation: i64,
        error: InjectorError,
    ) -> Result<Option<Duration>> {
        if !error.is_permanent() {
            return Err(error);
        }
        warn!("Generation {} of {} cannot be applied: {}", generation, key, error);
        let next = self.status_after(status, generation, PassOutcome::Failed(&error));
        self.write_status(key, status, next).await?;
        Ok(None)
    }

    /// Delete every owned object, then release the finalizer once none is left
    async fn finalize(
        &self,
        key: &ObjectKey,
        injector: &RegistryCredentialInjector,
        owner: &Owner,
        cancel: &CancellationToken,
    ) -> Result<Option<Duration>> {
        if !injector.has_finalizer() {
            return Ok(None);
        }

        let generation = injector.generation();
        let mut status = injector.status.clone();
        if injector.phase() != Phase::Deleting {
            info!("Deleting managed objects of {}", key);
            let next = self.status_after(
                status.as_ref(),
                generation,
                PassOutcome::Deleting {
                    remaining: None,
                    failures: Vec::new(),
                },
            );
            status = Some(self.write_status(key, status.as_ref(), next).await?);
        }

        let report = self.applier.delete_all(owner, cancel).await;
        if report.canceled {
            return Err(InjectorError::Canceled);
        }
        let mut failures = report.permanent_failures();

        let remaining = match self.applier.list_owned(owner, cancel).await {
            Ok(remaining) => remaining,
            Err(e) => {
                warn!("Cannot list owned objects of {}: {}", key, e);
                failures.push(format!("list owned objects: {}", e));
                let next = self.status_after(
                    status.as_ref(),
                    generation,
                    PassOutcome::Deleting {
                        remaining: None,
                        failures,
                    },
                );
                self.write_status(key, status.as_ref(), next).await?;
                if e.is_retryable() {
                    return Err(e.into());
                }
                return Ok(Some(self.config.resync_interval));
            }
        };
        if remaining.is_empty() {
            return self.release_finalizer(key).await;
        }

        debug!("{} owned objects of {} still exist", remaining.len(), key);
        let permanent = !failures.is_empty();
        let next = self.status_after(
            status.as_ref(),
            generation,
            PassOutcome::Deleting {
                remaining: Some(remaining.len()),
                failures,
            },
        );
        self.write_status(key, status.as_ref(), next).await?;

        if report.incomplete {
            return Err(InjectorError::Incomplete(report.transient_failures().join("; ")));
        }
        if permanent {
            return Ok(Some(self.config.resync_interval));
        }
        Ok(Some(self.config.processing_requeue))
    }

    async fn release_finalizer(&self, key: &ObjectKey) -> Result<Option<Duration>> {
        // Status writes moved the resource version on
        let Some(latest) = self.fetch(key).await? else {
            return Ok(None);
        };
        let finalizers: Vec<String> = latest
            .finalizers()
            .iter()
            .filter(|f| *f != FINALIZER)
            .cloned()
            .collect();
        let version = latest.resource_version().unwrap_or_default();
        self.cluster.set_finalizers(key, &finalizers, &version).await?;
        info!("All managed objects of {} are gone, finalizer released", key);
        Ok(None)
    }

    fn status_after(
        &self,
        current: Option<&RegistryCredentialInjectorStatus>,
        generation: i64,
        outcome: PassOutcome<'_>,
    ) -> RegistryCredentialInjectorStatus {
        self.tracker
            .next_status(current, generation, &outcome, &Time(Utc::now()))
    }

    /// Write `next` if it differs from `current`
    async fn write_status(
        &self,
        key: &ObjectKey,
        current: Option<&RegistryCredentialInjectorStatus>,
        next: RegistryCredentialInjectorStatus,
    ) -> Result<RegistryCredentialInjectorStatus> {
        if current != Some(&next) {
            debug!("Writing status of {}: phase {}", key, next.phase);
            self.cluster
                .patch_status(key, &serde_json::to_value(&next)?)
                .await?;
        }
        Ok(next)
    }
}

fn to_injector(obj: DynamicObject) -> Result<RegistryCredentialInjector> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}
