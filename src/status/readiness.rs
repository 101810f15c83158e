// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-kind readiness checks for applied objects.

use kube::api::DynamicObject;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady(String),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

/// Decides whether one kind of object has converged
pub trait ReadinessCheck: Send + Sync {
    fn check(&self, obj: &DynamicObject) -> Readiness;
}

impl<F> ReadinessCheck for F
where
    F: Fn(&DynamicObject) -> Readiness + Send + Sync,
{
    fn check(&self, obj: &DynamicObject) -> Readiness {
        self(obj)
    }
}

/// Checks keyed by kind, with a generic fallback for everything else
pub struct ReadinessRegistry {
    checks: HashMap<String, Box<dyn ReadinessCheck>>,
}

impl Default for ReadinessRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("Deployment", deployment_ready);
        registry.register("StatefulSet", stateful_set_ready);
        registry.register("DaemonSet", daemon_set_ready);
        registry.register("Job", job_ready);
        registry.register("Namespace", namespace_ready);
        registry.register("CustomResourceDefinition", crd_ready);
        registry
    }
}

impl ReadinessRegistry {
    /// A registry that only applies the generic checks
    pub fn empty() -> Self {
        Self {
            checks: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: &str, check: impl ReadinessCheck + 'static) {
        self.checks.insert(kind.to_string(), Box::new(check));
    }

    pub fn check(&self, obj: &DynamicObject) -> Readiness {
        if let Some(lag) = generation_lag(obj) {
            return lag;
        }
        let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default();
        match self.checks.get(kind) {
            Some(check) => check.check(obj),
            None => conditions_ready(obj),
        }
    }
}

fn status(obj: &DynamicObject) -> &Value {
    &obj.data["status"]
}

fn int(value: &Value) -> i64 {
    value.as_i64().unwrap_or(0)
}

fn condition_status<'a>(obj: &'a DynamicObject, condition_type: &str) -> Option<&'a str> {
    status(obj)["conditions"]
        .as_array()?
        .iter()
        .find(|c| c["type"].as_str() == Some(condition_type))
        .and_then(|c| c["status"].as_str())
}

/// Not ready while the object's controller has not observed the latest generation
fn generation_lag(obj: &DynamicObject) -> Option<Readiness> {
    let observed = status(obj)["observedGeneration"].as_i64()?;
    let generation = obj.metadata.generation?;
    (observed < generation).then(|| {
        Readiness::NotReady(format!(
            "observed generation {} of {}",
            observed, generation
        ))
    })
}

/// Objects exposing a `Ready` condition must report it as `True`
fn conditions_ready(obj: &DynamicObject) -> Readiness {
    match condition_status(obj, "Ready") {
        None | Some("True") => Readiness::Ready,
        Some(other) => Readiness::NotReady(format!("condition Ready is {}", other)),
    }
}

fn desired_replicas(obj: &DynamicObject) -> i64 {
    obj.data["spec"]["replicas"].as_i64().unwrap_or(1)
}

fn deployment_ready(obj: &DynamicObject) -> Readiness {
    let status = status(obj);
    if status.is_null() {
        return Readiness::NotReady("rollout not started".to_string());
    }
    let replicas = desired_replicas(obj);
    let updated = int(&status["updatedReplicas"]);
    let available = int(&status["availableReplicas"]);
    let total = int(&status["replicas"]);

    if updated < replicas {
        Readiness::NotReady(format!("{} of {} replicas updated", updated, replicas))
    } else if total > updated {
        Readiness::NotReady(format!("{} old replicas pending termination", total - updated))
    } else if available < replicas {
        Readiness::NotReady(format!("{} of {} replicas available", available, replicas))
    } else {
        Readiness::Ready
    }
}

fn stateful_set_ready(obj: &DynamicObject) -> Readiness {
    let status = status(obj);
    let replicas = desired_replicas(obj);
    let ready = int(&status["readyReplicas"]);
    let updated = int(&status["updatedReplicas"]);

    if updated < replicas {
        Readiness::NotReady(format!("{} of {} replicas updated", updated, replicas))
    } else if ready < replicas {
        Readiness::NotReady(format!("{} of {} replicas ready", ready, replicas))
    } else {
        Readiness::Ready
    }
}

fn daemon_set_ready(obj: &DynamicObject) -> Readiness {
    let status = status(obj);
    if status.is_null() {
        return Readiness::NotReady("rollout not started".to_string());
    }
    let desired = int(&status["desiredNumberScheduled"]);
    let updated = int(&status["updatedNumberScheduled"]);
    let available = int(&status["numberAvailable"]);

    if updated < desired || available < desired {
        Readiness::NotReady(format!(
            "{} of {} pods updated, {} available",
            updated, desired, available
        ))
    } else {
        Readiness::Ready
    }
}

fn job_ready(obj: &DynamicObject) -> Readiness {
    if condition_status(obj, "Complete") == Some("True") || int(&status(obj)["succeeded"]) > 0 {
        Readiness::Ready
    } else if condition_status(obj, "Failed") == Some("True") {
        Readiness::NotReady("job failed".to_string())
    } else {
        Readiness::NotReady("job has not succeeded yet".to_string())
    }
}

fn namespace_ready(obj: &DynamicObject) -> Readiness {
    match status(obj)["phase"].as_str() {
        Some("Active") => Readiness::Ready,
        Some(phase) => Readiness::NotReady(format!("namespace is {}", phase)),
        None => Readiness::NotReady("namespace phase unknown".to_string()),
    }
}

fn crd_ready(obj: &DynamicObject) -> Readiness {
    match condition_status(obj, "Established") {
        Some("True") => Readiness::Ready,
        _ => Readiness::NotReady("not established".to_string()),
    }
}
