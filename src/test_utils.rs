// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test doubles for the cluster: a mock HTTP backend for the kube client and an
//! in-memory [`ClusterApi`].

use crate::error::ClusterError;
use crate::kubernetes::ClusterApi;
use crate::render::merge_values;
use crate::types::object::{ManagedKind, ManagedObject, ObjectKey};
use async_trait::async_trait;
use http::{Request, Response};
use kube::api::DynamicObject;
use kube::client::Body;
use kube::Client;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

/// A request seen by [`MockService`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub content_type: Option<String>,
}

/// A mock HTTP service that returns predefined responses based on request paths.
#[derive(Clone)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<(String, String), (u16, String)>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), (status, body.to_string()));
        self
    }

    /// Add a response for GET requests matching the exact path
    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    pub fn on_patch(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PATCH", path, status, body)
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "default")
    }

    /// Handle on the requests received so far, usable after `into_client`
    pub fn requests(&self) -> Arc<Mutex<Vec<RecordedRequest>>> {
        self.requests.clone()
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        self.responses
            .lock()
            .unwrap()
            .get(&(method.to_string(), path.to_string()))
            .cloned()
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        self.requests.lock().unwrap().push(RecordedRequest {
            method: method.clone(),
            path: path.clone(),
            query: req.uri().query().unwrap_or_default().to_string(),
            content_type: req
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        });

        let (status, body) = self
            .find_response(&method, &path)
            .unwrap_or_else(|| (404, not_found_json("resource", &path)));

        Box::pin(async move {
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))
                .unwrap())
        })
    }
}

/// Create a 404 not found response
pub fn not_found_json(resource: &str, name: &str) -> String {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": format!("{} \"{}\" not found", resource, name),
        "reason": "NotFound",
        "code": 404
    })
    .to_string()
}

/// Cluster operations a [`FakeCluster`] records and can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    List,
    Create,
    Update,
    Delete,
    PatchStatus,
    SetFinalizers,
}

struct Fault {
    op: Op,
    kind: String,
    remaining: Option<u32>,
    error: ClusterError,
}

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<ObjectKey, Value>,
    version: u64,
    faults: Vec<Fault>,
    log: Vec<(Op, ObjectKey)>,
}

impl FakeState {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn check_fault(&mut self, op: Op, kind: &str) -> Result<(), ClusterError> {
        let Some(index) = self
            .faults
            .iter()
            .position(|f| f.op == op && f.kind == kind)
        else {
            return Ok(());
        };
        let fault = &mut self.faults[index];
        let error = fault.error.clone();
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                self.faults.remove(index);
            }
        }
        Err(error)
    }
}

/// In-memory cluster with resource versions, finalizers and injectable faults
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

fn key_of(manifest: &Value) -> ObjectKey {
    ManagedObject::from_manifest(manifest.clone())
        .expect("fake cluster objects need apiVersion, kind and name")
        .key
}

fn to_dynamic(value: &Value) -> Result<DynamicObject, ClusterError> {
    serde_json::from_value(value.clone()).map_err(|e| ClusterError::Invalid(e.to_string()))
}

fn live_version(value: &Value) -> Option<&str> {
    value["metadata"]["resourceVersion"].as_str()
}

fn matches_selector(value: &Value, selector: &str) -> bool {
    let labels = &value["metadata"]["labels"];
    selector
        .split(',')
        .filter(|req| !req.is_empty())
        .all(|req| match req.split_once('=') {
            Some((k, v)) => labels[k].as_str() == Some(v),
            None => !labels[req].is_null(),
        })
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object as if something else had created it; not recorded as a write
    pub fn insert(&self, mut manifest: Value) -> ObjectKey {
        let key = key_of(&manifest);
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        manifest["metadata"]["resourceVersion"] = json!(version);
        if manifest["metadata"]["uid"].is_null() {
            manifest["metadata"]["uid"] = json!(format!("uid-{}", version));
        }
        state.objects.insert(key.clone(), manifest);
        key
    }

    pub fn get_value(&self, key: &ObjectKey) -> Option<Value> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.state.lock().unwrap().objects.contains_key(key)
    }

    /// Change an object out of band, bumping its resource version
    pub fn edit(&self, key: &ObjectKey, f: impl FnOnce(&mut Value)) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        let obj = state.objects.get_mut(key).expect("edited object must exist");
        f(obj);
        obj["metadata"]["resourceVersion"] = json!(version);
    }

    /// Fail every `op` on `kind` with `error`
    pub fn fail(&self, op: Op, kind: &str, error: ClusterError) {
        self.add_fault(op, kind, error, None);
    }

    /// Fail the next `times` calls of `op` on `kind`
    pub fn fail_times(&self, op: Op, kind: &str, error: ClusterError, times: u32) {
        self.add_fault(op, kind, error, Some(times));
    }

    fn add_fault(&self, op: Op, kind: &str, error: ClusterError, remaining: Option<u32>) {
        self.state.lock().unwrap().faults.push(Fault {
            op,
            kind: kind.to_string(),
            remaining,
            error,
        });
    }

    pub fn clear_faults(&self) {
        self.state.lock().unwrap().faults.clear();
    }

    /// Successful creates, updates and deletes of any object, in call order
    pub fn writes(&self) -> Vec<(Op, ObjectKey)> {
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|(op, _)| matches!(op, Op::Create | Op::Update | Op::Delete))
            .cloned()
            .collect()
    }

    /// Number of successful calls of `op`
    pub fn count(&self, op: Op) -> usize {
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|(o, _)| *o == op)
            .count()
    }

    pub fn clear_log(&self) {
        self.state.lock().unwrap().log.clear();
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.check_fault(Op::Get, &key.kind)?;
        state.objects.get(key).map(to_dynamic).transpose()
    }

    async fn list(
        &self,
        kind: &ManagedKind,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.check_fault(Op::List, &kind.kind)?;
        state
            .objects
            .iter()
            .filter(|(key, value)| {
                kind.matches(&key.api_version, &key.kind) && matches_selector(value, label_selector)
            })
            .map(|(_, value)| to_dynamic(value))
            .collect()
    }

    async fn create(&self, key: &ObjectKey, manifest: &Value) -> Result<DynamicObject, ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.check_fault(Op::Create, &key.kind)?;
        if state.objects.contains_key(key) {
            return Err(ClusterError::AlreadyExists(key.to_string()));
        }

        let version = state.next_version();
        let mut obj = manifest.clone();
        obj["metadata"]["resourceVersion"] = json!(version);
        obj["metadata"]["uid"] = json!(format!("uid-{}", version));
        obj["metadata"]["generation"] = json!(1);
        state.objects.insert(key.clone(), obj.clone());
        state.log.push((Op::Create, key.clone()));
        to_dynamic(&obj)
    }

    async fn update(
        &self,
        key: &ObjectKey,
        manifest: &Value,
        resource_version: &str,
    ) -> Result<DynamicObject, ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.check_fault(Op::Update, &key.kind)?;
        let old = state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(key.to_string()))?;
        if live_version(&old) != Some(resource_version) {
            return Err(ClusterError::Conflict(format!(
                "{} has been modified, expected version {}",
                key, resource_version
            )));
        }

        let version = state.next_version();
        let mut obj = manifest.clone();
        let mut metadata = old["metadata"].clone();
        merge_values(&mut metadata, &manifest["metadata"]);
        let generation = old["metadata"]["generation"].as_i64().unwrap_or(1);
        metadata["generation"] = json!(if old["spec"] != manifest["spec"] {
            generation + 1
        } else {
            generation
        });
        metadata["resourceVersion"] = json!(version);
        obj["metadata"] = metadata;
        if !old["status"].is_null() {
            obj["status"] = old["status"].clone();
        }
        state.objects.insert(key.clone(), obj.clone());
        state.log.push((Op::Update, key.clone()));
        to_dynamic(&obj)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.check_fault(Op::Delete, &key.kind)?;
        let Some(obj) = state.objects.get(key).cloned() else {
            return Ok(());
        };

        let finalizing = obj["metadata"]["finalizers"]
            .as_array()
            .is_some_and(|f| !f.is_empty());
        if finalizing {
            let version = state.next_version();
            if let Some(obj) = state.objects.get_mut(key) {
                obj["metadata"]["deletionTimestamp"] = json!("2026-01-01T00:00:00Z");
                obj["metadata"]["resourceVersion"] = json!(version);
            }
        } else {
            state.objects.remove(key);
        }
        state.log.push((Op::Delete, key.clone()));
        Ok(())
    }

    async fn patch_status(&self, key: &ObjectKey, status: &Value) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.check_fault(Op::PatchStatus, &key.kind)?;
        let version = state.next_version();
        let obj = state
            .objects
            .get_mut(key)
            .ok_or_else(|| ClusterError::NotFound(key.to_string()))?;
        if obj["status"].is_null() {
            obj["status"] = json!({});
        }
        merge_values(&mut obj["status"], status);
        obj["metadata"]["resourceVersion"] = json!(version);
        state.log.push((Op::PatchStatus, key.clone()));
        Ok(())
    }

    async fn set_finalizers(
        &self,
        key: &ObjectKey,
        finalizers: &[String],
        resource_version: &str,
    ) -> Result<DynamicObject, ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.check_fault(Op::SetFinalizers, &key.kind)?;
        let mut obj = state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(key.to_string()))?;
        if live_version(&obj) != Some(resource_version) {
            return Err(ClusterError::Conflict(format!("{} has been modified", key)));
        }

        let version = state.next_version();
        obj["metadata"]["finalizers"] = json!(finalizers);
        obj["metadata"]["resourceVersion"] = json!(version);
        state.log.push((Op::SetFinalizers, key.clone()));

        let released = finalizers.is_empty() && !obj["metadata"]["deletionTimestamp"].is_null();
        if released {
            state.objects.remove(key);
        } else {
            state.objects.insert(key.clone(), obj.clone());
        }
        to_dynamic(&obj)
    }
}
