// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Ownership markers and change detection between desired and live objects.

use crate::constants::markers::{DIGEST_ANNOTATION, OWNER_ANNOTATION, OWNER_ID_LABEL};
use kube::api::DynamicObject;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// The custom resource instance that owns a set of managed objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    /// UID of the instance, stored in the owner-id label
    pub id: String,
    /// `namespace/name` of the instance, stored in the owner annotation
    pub reference: String,
}

impl Owner {
    pub fn new(id: &str, reference: &str) -> Self {
        Self {
            id: id.to_string(),
            reference: reference.to_string(),
        }
    }

    /// Label selector matching every object owned by this instance
    pub fn selector(&self) -> String {
        format!("{}={}", OWNER_ID_LABEL, self.id)
    }

    pub fn owns(&self, obj: &DynamicObject) -> bool {
        obj.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(OWNER_ID_LABEL))
            .is_some_and(|id| *id == self.id)
    }
}

/// SHA-256 over the canonical JSON form of a manifest.
///
/// `serde_json::Map` keeps keys sorted, so equal content always serializes identically.
pub fn digest(content: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Add the ownership label and the owner and digest annotations to a manifest
pub fn stamp_markers(content: &mut Value, owner: &Owner, digest: &str) {
    let Some(metadata) = child_object(content, "metadata") else {
        return;
    };
    if let Some(labels) = child_object(metadata, "labels").and_then(Value::as_object_mut) {
        labels.insert(OWNER_ID_LABEL.to_string(), Value::String(owner.id.clone()));
    }
    if let Some(annotations) =
        child_object(metadata, "annotations").and_then(Value::as_object_mut)
    {
        annotations.insert(
            OWNER_ANNOTATION.to_string(),
            Value::String(owner.reference.clone()),
        );
        annotations.insert(DIGEST_ANNOTATION.to_string(), Value::String(digest.to_string()));
    }
}

/// The map stored under `key`, replacing a missing or non-map value with an empty map
fn child_object<'a>(value: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    let map = value.as_object_mut()?;
    let entry = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    Some(entry)
}

/// Digest recorded on a live object by the last write
pub fn live_digest(live: &DynamicObject) -> Option<&str> {
    live.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(DIGEST_ANNOTATION))
        .map(String::as_str)
}

/// Whether a stamped desired manifest has to be written over the live object.
///
/// True when the recorded digest differs or a desired field was changed out of band.
pub fn needs_update(desired: &Value, desired_digest: &str, live: &DynamicObject) -> bool {
    if live_digest(live) != Some(desired_digest) {
        return true;
    }
    match serde_json::to_value(live) {
        Ok(live) => !is_subset(desired, &live),
        Err(_) => true,
    }
}

/// Structural comparison: every field set in `desired` has the same value in `live`.
///
/// Fields only present in `live` (server defaults, metadata, status) are ignored; empty
/// maps, empty lists, `null` and `""` in `desired` also match an absent field.
pub fn is_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Object(d), Value::Object(l)) => d.iter().all(|(key, dv)| match l.get(key) {
            Some(lv) => is_subset(dv, lv),
            None => is_empty(dv),
        }),
        (Value::Array(d), Value::Array(l)) => {
            d.len() == l.len() && d.iter().zip(l).all(|(dv, lv)| is_subset(dv, lv))
        }
        (Value::Number(d), Value::Number(l)) => d == l || d.as_f64() == l.as_f64(),
        (Value::String(d), Value::String(l)) => d == l || same_quantity(d, l),
        // Quantities given as plain numbers come back as strings
        (Value::Number(d), Value::String(l)) => match (d.as_f64(), parse_quantity(l)) {
            (Some(d), Some(l)) => close(d, l),
            _ => false,
        },
        (d, Value::Null) => is_empty(d),
        (d, l) => d == l,
    }
}

/// The API server rewrites quantities into canonical form (`0.5` becomes `500m`)
fn same_quantity(desired: &str, live: &str) -> bool {
    match (parse_quantity(desired), parse_quantity(live)) {
        (Some(d), Some(l)) => close(d, l),
        _ => false,
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs())
}

/// Value of a resource quantity such as `250m`, `1.5Gi` or `2e3`
fn parse_quantity(s: &str) -> Option<f64> {
    let split = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '+' || c == '-'))))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);
    if !number.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let number: f64 = number.parse().ok()?;

    let binary = |power: i32| Some(number * 2f64.powi(power));
    let decimal = |exp: i32| {
        if exp < 0 {
            Some(number / 10f64.powi(-exp))
        } else {
            Some(number * 10f64.powi(exp))
        }
    };
    match suffix {
        "Ki" => binary(10),
        "Mi" => binary(20),
        "Gi" => binary(30),
        "Ti" => binary(40),
        "Pi" => binary(50),
        "Ei" => binary(60),
        "n" => decimal(-9),
        "u" => decimal(-6),
        "m" => decimal(-3),
        "" => decimal(0),
        "k" => decimal(3),
        "M" => decimal(6),
        "G" => decimal(9),
        "T" => decimal(12),
        "P" => decimal(15),
        "E" => decimal(18),
        _ => {
            let exp = suffix.strip_prefix(|c: char| c == 'e' || c == 'E')?;
            decimal(exp.parse().ok()?)
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.values().all(is_empty),
        _ => false,
    }
}
