// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Template bundle: chart metadata, default values and manifest templates.

use crate::error::{InjectorError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};

const EMBEDDED_CHART: &str =
    include_str!("../../data/charts/registry-credential-injector/Chart.yaml");
const EMBEDDED_VALUES: &str =
    include_str!("../../data/charts/registry-credential-injector/values.yaml");
const EMBEDDED_TEMPLATES: &[(&str, &str)] = &[
    (
        "certificate.yaml",
        include_str!("../../data/charts/registry-credential-injector/templates/certificate.yaml"),
    ),
    (
        "deployment.yaml",
        include_str!("../../data/charts/registry-credential-injector/templates/deployment.yaml"),
    ),
    (
        "rbac.yaml",
        include_str!("../../data/charts/registry-credential-injector/templates/rbac.yaml"),
    ),
    (
        "service.yaml",
        include_str!("../../data/charts/registry-credential-injector/templates/service.yaml"),
    ),
    (
        "serviceaccount.yaml",
        include_str!("../../data/charts/registry-credential-injector/templates/serviceaccount.yaml"),
    ),
    (
        "webhook.yaml",
        include_str!("../../data/charts/registry-credential-injector/templates/webhook.yaml"),
    ),
];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMetadata {
    name: String,
    version: String,
    #[serde(default)]
    app_version: Option<String>,
}

/// A read-only, versioned set of manifest templates
#[derive(Debug, Clone)]
pub struct TemplateBundle {
    pub name: String,
    pub version: String,
    pub app_version: Option<String>,
    /// Defaults the parameters are merged over
    pub values: Value,
    /// Template sources, sorted by file name
    pub templates: Vec<Template>,
}

#[derive(Debug, Clone)]
pub struct Template {
    pub file: String,
    pub source: String,
}

impl TemplateBundle {
    /// The chart compiled into the binary
    pub fn embedded() -> Result<Self> {
        let templates = EMBEDDED_TEMPLATES
            .iter()
            .map(|(file, source)| Template {
                file: file.to_string(),
                source: source.to_string(),
            })
            .collect();
        Self::from_parts(EMBEDDED_CHART, EMBEDDED_VALUES, templates)
    }

    /// Load a chart laid out as `Chart.yaml`, `values.yaml` and `templates/*.yaml`
    #[instrument]
    pub fn from_dir(root: &Path) -> Result<Self> {
        let read = |path: &Path| {
            fs::read_to_string(path).map_err(|e| {
                InjectorError::Render(format!("failed to read {}: {}", path.display(), e))
            })
        };

        let chart = read(&root.join("Chart.yaml"))?;
        let values_path = root.join("values.yaml");
        let values = if values_path.exists() {
            read(&values_path)?
        } else {
            String::new()
        };

        let templates_dir = root.join("templates");
        let entries = fs::read_dir(&templates_dir).map_err(|e| {
            InjectorError::Render(format!("failed to list {}: {}", templates_dir.display(), e))
        })?;

        let mut templates = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| InjectorError::Render(format!("failed to list templates: {}", e)))?
                .path();
            let is_yaml = path
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if !path.is_file() || !is_yaml {
                debug!("Skipping non-template file {}", path.display());
                continue;
            }
            templates.push(Template {
                file: path
                    .file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                source: read(&path)?,
            });
        }

        let bundle = Self::from_parts(&chart, &values, templates)?;
        info!(
            "Loaded template bundle {} {} from {}",
            bundle.name,
            bundle.version,
            root.display()
        );
        Ok(bundle)
    }

    fn from_parts(chart: &str, values: &str, mut templates: Vec<Template>) -> Result<Self> {
        let metadata: ChartMetadata = serde_yaml::from_str(chart)
            .map_err(|e| InjectorError::Render(format!("invalid Chart.yaml: {}", e)))?;

        let values = if values.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_yaml::from_str::<Value>(values)
                .map_err(|e| InjectorError::Render(format!("invalid values.yaml: {}", e)))?
        };
        if !values.is_object() {
            return Err(InjectorError::Render(
                "values.yaml must contain a mapping".to_string(),
            ));
        }

        templates.sort_by(|a, b| a.file.cmp(&b.file));

        Ok(Self {
            name: metadata.name,
            version: metadata.version,
            app_version: metadata.app_version,
            values,
            templates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_bundle_loads() {
        let bundle = TemplateBundle::embedded().unwrap();

        assert_eq!(bundle.name, "registry-credential-injector");
        assert_eq!(bundle.app_version.as_deref(), Some("v0.1.0"));
        assert_eq!(bundle.values["replicaCount"], 1);
        assert_eq!(bundle.templates.len(), 6);
    }

    #[test]
    fn test_embedded_templates_are_sorted() {
        let bundle = TemplateBundle::embedded().unwrap();
        let files: Vec<_> = bundle.templates.iter().map(|t| t.file.as_str()).collect();
        let mut sorted = files.clone();
        sorted.sort();
        assert_eq!(files, sorted);
    }

    #[test]
    fn test_invalid_chart_metadata() {
        let err = TemplateBundle::from_parts("name: [", "", vec![]).unwrap_err();
        assert!(matches!(err, InjectorError::Render(_)));
    }

    #[test]
    fn test_values_must_be_mapping() {
        let err = TemplateBundle::from_parts("name: x\nversion: 1.0.0\n", "- a\n", vec![])
            .unwrap_err();
        assert!(err.to_string().contains("mapping"));
    }

    #[test]
    fn test_from_dir_reads_templates() {
        let root = std::env::temp_dir().join(format!("rci-bundle-{}", std::process::id()));
        fs::create_dir_all(root.join("templates")).unwrap();
        fs::write(root.join("Chart.yaml"), "name: demo\nversion: 1.2.3\n").unwrap();
        fs::write(
            root.join("templates/b.yaml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n",
        )
        .unwrap();
        fs::write(
            root.join("templates/a.yaml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n",
        )
        .unwrap();
        fs::write(root.join("templates/NOTES.txt"), "ignored").unwrap();

        let bundle = TemplateBundle::from_dir(&root).unwrap();
        fs::remove_dir_all(&root).unwrap();

        assert_eq!(bundle.name, "demo");
        assert_eq!(bundle.version, "1.2.3");
        let files: Vec<_> = bundle.templates.iter().map(|t| t.file.as_str()).collect();
        assert_eq!(files, vec!["a.yaml", "b.yaml"]);
    }
}
