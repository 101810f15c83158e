// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Template renderer: turns a parameter set into the ordered desired object set.

pub mod bundle;
pub mod template;

pub use bundle::TemplateBundle;

use crate::error::{InjectorError, Result};
use crate::transform::ParameterSet;
use crate::types::object::ManagedObject;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use template::{is_truthy, lookup, render_value, RENDER_IF_KEY};
use tracing::{debug, instrument};

/// Name and namespace the desired set is rendered for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub name: String,
    pub namespace: String,
}

pub trait Renderer: Send + Sync {
    /// Deterministic for a fixed bundle: equal inputs give equal, equally ordered output
    fn render(&self, release: &Release, params: &ParameterSet) -> Result<Vec<ManagedObject>>;
}

/// Renders the documents of a [`TemplateBundle`]
#[derive(Debug, Clone)]
pub struct ChartRenderer {
    bundle: Arc<TemplateBundle>,
}

impl ChartRenderer {
    pub fn new(bundle: Arc<TemplateBundle>) -> Self {
        Self { bundle }
    }

    fn context(&self, release: &Release, params: &ParameterSet) -> Value {
        let mut values = self.bundle.values.clone();
        merge_values(&mut values, &Value::Object(params.clone()));

        json!({
            "Values": values,
            "Release": {
                "Name": release.name,
                "Namespace": release.namespace,
            },
            "Chart": {
                "Name": self.bundle.name,
                "Version": self.bundle.version,
                "AppVersion": self.bundle.app_version,
            },
        })
    }
}

impl Renderer for ChartRenderer {
    #[instrument(skip(self, params), fields(bundle = %self.bundle.name, version = %self.bundle.version))]
    fn render(&self, release: &Release, params: &ParameterSet) -> Result<Vec<ManagedObject>> {
        let ctx = self.context(release, params);
        let mut objects = Vec::new();

        for template in &self.bundle.templates {
            for (index, document) in serde_yaml::Deserializer::from_str(&template.source).enumerate() {
                let parsed = Value::deserialize(document).map_err(|e| {
                    InjectorError::Render(format!("{}: invalid YAML: {}", template.file, e))
                })?;
                let mut manifest = match parsed {
                    Value::Object(manifest) => manifest,
                    Value::Null => continue,
                    _ => {
                        return Err(InjectorError::Render(format!(
                            "{} document {}: expected a mapping",
                            template.file, index
                        )))
                    }
                };

                if let Some(condition) = manifest.remove(RENDER_IF_KEY) {
                    let path = condition.as_str().unwrap_or_default();
                    if !lookup(path, &ctx).is_some_and(is_truthy) {
                        debug!("Skipping {} document {}: {} is not set", template.file, index, path);
                        continue;
                    }
                }

                let rendered = render_value(&Value::Object(manifest), &ctx)
                    .map_err(|e| InjectorError::Render(format!("{}: {}", template.file, e)))?
                    .unwrap_or(Value::Null);
                let object = ManagedObject::from_manifest(rendered).map_err(|e| {
                    InjectorError::Render(format!("{} document {}: {}", template.file, index, e))
                })?;
                objects.push(object);
            }
        }

        debug!("Rendered {} objects", objects.len());
        Ok(objects)
    }
}

/// Deep merge `overlay` into `base`; maps merge recursively, anything else replaces
pub fn merge_values(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_values(existing, value)
                    }
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}
