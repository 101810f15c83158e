// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Folds the outcome of a reconciliation pass into the observed status.

use crate::apply::ApplyReport;
use crate::constants::conditions::*;
use crate::error::InjectorError;
use crate::status::readiness::{Readiness, ReadinessRegistry};
use crate::types::{Condition, Phase, RegistryCredentialInjectorStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

/// What a pass did, as far as the status is concerned
#[derive(Debug)]
pub enum PassOutcome<'a> {
    /// A new generation was picked up and is being applied
    Started,
    /// The desired state could not be computed or applied at all
    Failed(&'a InjectorError),
    Applied(&'a ApplyReport),
    /// Owned objects are being deleted; `remaining` is `None` before the first delete pass
    /// or when the owned objects could not be listed
    Deleting {
        remaining: Option<usize>,
        failures: Vec<String>,
    },
}

pub struct StatusTracker {
    readiness: ReadinessRegistry,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new(ReadinessRegistry::default())
    }
}

impl StatusTracker {
    pub fn new(readiness: ReadinessRegistry) -> Self {
        Self { readiness }
    }

    /// `object: reason` for every applied object that has not converged yet
    pub fn not_ready(&self, report: &ApplyReport) -> Vec<String> {
        report
            .applied()
            .filter_map(|(key, obj)| match self.readiness.check(obj) {
                Readiness::Ready => None,
                Readiness::NotReady(reason) => Some(format!("{}: {}", key, reason)),
            })
            .collect()
    }

    /// Compute the status that follows `current` after a pass over `generation`.
    ///
    /// Pure: equal inputs give an equal status, so callers can skip unchanged writes.
    pub fn next_status(
        &self,
        current: Option<&RegistryCredentialInjectorStatus>,
        generation: i64,
        outcome: &PassOutcome,
        now: &Time,
    ) -> RegistryCredentialInjectorStatus {
        let mut next = current.cloned().unwrap_or_default();

        let (phase, ready, reason, message) = match outcome {
            PassOutcome::Started => (
                Phase::Processing,
                false,
                REASON_PROCESSING,
                format!("Applying generation {}", generation),
            ),
            PassOutcome::Failed(error) => {
                next.observed_generation = generation;
                let reason = match error {
                    InjectorError::Validation(_) => REASON_VALIDATION_FAILED,
                    InjectorError::Render(_) => REASON_RENDER_FAILED,
                    _ => REASON_APPLY_FAILED,
                };
                (Phase::Error, false, reason, error.to_string())
            }
            PassOutcome::Applied(report) => self.applied(&mut next, generation, report, now),
            PassOutcome::Deleting {
                remaining,
                failures,
            } => deleting(*remaining, failures),
        };

        next.phase = phase;
        set_condition(&mut next.conditions, READY, ready, reason, message, now);
        next
    }

    fn applied(
        &self,
        next: &mut RegistryCredentialInjectorStatus,
        generation: i64,
        report: &ApplyReport,
        now: &Time,
    ) -> (Phase, bool, &'static str, String) {
        if !report.is_complete() {
            let transient = report.transient_failures();
            let message = if transient.is_empty() {
                "Apply interrupted, retrying".to_string()
            } else {
                format!("Retrying: {}", transient.join("; "))
            };
            return (Phase::Processing, false, REASON_PROCESSING, message);
        }

        next.observed_generation = generation;
        let permanent = report.permanent_failures();
        if !permanent.is_empty() {
            return (Phase::Error, false, REASON_APPLY_FAILED, permanent.join("; "));
        }

        if report.writes > 0 || next.applied_generation != Some(generation) {
            next.last_applied_at = Some(now.clone());
        }
        next.applied_generation = Some(generation);

        let not_ready = self.not_ready(report);
        if not_ready.is_empty() {
            let count = report.applied().count();
            (
                Phase::Ready,
                true,
                REASON_READY,
                format!("All {} managed objects are ready", count),
            )
        } else {
            (Phase::Processing, false, REASON_NOT_READY, not_ready.join("; "))
        }
    }
}

fn deleting(remaining: Option<usize>, failures: &[String]) -> (Phase, bool, &'static str, String) {
    let (reason, message) = match remaining {
        None => (REASON_DELETING, "Deleting managed objects".to_string()),
        Some(remaining) => (
            REASON_DELETION_PENDING,
            format!("Waiting for {} managed objects to be deleted", remaining),
        ),
    };
    if failures.is_empty() {
        (Phase::Deleting, false, reason, message)
    } else {
        let message = format!("{}: {}", message, failures.join("; "));
        (Phase::Deleting, false, REASON_DELETION_FAILED, message)
    }
}

/// Replace the condition of the given type; the transition time moves only when the status flips
fn set_condition(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    ready: bool,
    reason: &str,
    message: String,
    now: &Time,
) {
    let status = if ready { "True" } else { "False" };
    let last_transition_time = conditions
        .iter()
        .find(|c| c.condition_type == condition_type && c.status == status)
        .and_then(|c| c.last_transition_time.clone())
        .unwrap_or_else(|| now.clone());

    let condition = Condition {
        condition_type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message),
        last_transition_time: Some(last_transition_time),
    };

    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition_type)
    {
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}
