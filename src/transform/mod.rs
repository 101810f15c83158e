// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Parameter transformer: maps a RegistryCredentialInjector spec onto chart values.

pub mod validation;

use crate::error::{InjectorError, Result};
use crate::types::injector::RegistryCredentialInjector;
use serde_json::{json, Map, Value};
use validation::{validate_dns_subdomain, validate_label_selector};

/// Values handed to the renderer. Keys are sorted, so equal documents yield equal sets.
pub type ParameterSet = Map<String, Value>;

pub trait ParameterTransformer: Send + Sync {
    fn transform(&self, injector: &RegistryCredentialInjector) -> Result<ParameterSet>;
}

/// Validates the spec and exposes it as chart values
#[derive(Debug, Default, Clone)]
pub struct SpecTransformer;

impl SpecTransformer {
    pub fn new() -> Self {
        Self
    }

    fn validate(&self, injector: &RegistryCredentialInjector) -> Result<()> {
        let spec = &injector.spec;

        if spec.replica_count < 1 {
            return Err(InjectorError::Validation(format!(
                "replicaCount must be at least 1, got {}",
                spec.replica_count
            )));
        }
        if spec.log_level < 0 {
            return Err(InjectorError::Validation(format!(
                "logLevel must not be negative, got {}",
                spec.log_level
            )));
        }
        if let Some(selector) = &spec.object_selector {
            validate_label_selector("objectSelector", selector).map_err(InjectorError::Validation)?;
        }
        if let Some(selector) = &spec.namespace_selector {
            validate_label_selector("namespaceSelector", selector)
                .map_err(InjectorError::Validation)?;
        }
        if let Some(secret) = spec.default_pull_secret.as_deref().filter(|s| !s.is_empty()) {
            validate_dns_subdomain(secret).map_err(|e| {
                InjectorError::Validation(format!("defaultPullSecret {:?} {}", secret, e))
            })?;
        }
        for secret in &spec.image.pull_secrets {
            validate_dns_subdomain(secret).map_err(|e| {
                InjectorError::Validation(format!("image.pullSecrets entry {:?} {}", secret, e))
            })?;
        }

        Ok(())
    }
}

impl ParameterTransformer for SpecTransformer {
    fn transform(&self, injector: &RegistryCredentialInjector) -> Result<ParameterSet> {
        self.validate(injector)?;

        let mut values = match serde_json::to_value(&injector.spec)? {
            Value::Object(map) => map,
            other => {
                return Err(InjectorError::Invariant(format!(
                    "spec serialized to a non-object value: {}",
                    other
                )))
            }
        };

        // Deployment target is carried by the release, not by the values
        values.remove("namespace");
        values.remove("name");
        values.insert(
            "fullnameOverride".to_string(),
            Value::String(injector.deployment_name()),
        );
        values.insert(
            "imagePullSecrets".to_string(),
            Value::Array(
                injector
                    .spec
                    .image
                    .pull_secrets
                    .iter()
                    .map(|name| json!({ "name": name }))
                    .collect(),
            ),
        );

        Ok(values)
    }
}
