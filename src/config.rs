// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::OPERATOR_NAME;
use crate::types::object::ManagedKind;
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Field manager and marker prefix
    pub operator_name: String,
    /// Alternate template bundle on disk; the embedded bundle is used when unset
    pub template_dir: Option<PathBuf>,
    /// Restrict the controller to one namespace
    pub watch_namespace: Option<String>,
    /// Number of instances reconciled in parallel
    pub worker_concurrency: u16,
    /// Number of object writes dispatched in parallel within one dependency tier
    pub apply_concurrency: usize,
    pub reconcile_timeout: Duration,
    pub request_timeout: Duration,
    pub processing_requeue: Duration,
    pub resync_interval: Duration,
    pub retry: RetryPolicy,
    pub error_backoff_base: Duration,
    pub error_backoff_max: Duration,
    /// Kinds the applier may create, update and delete
    pub managed_kinds: Vec<ManagedKind>,
}

/// Exponential backoff applied to individual cluster operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before the given retry (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            operator_name: OPERATOR_NAME.to_string(),
            template_dir: None,
            watch_namespace: None,
            worker_concurrency: 4,
            apply_concurrency: 8,
            reconcile_timeout: Duration::from_secs(120),
            request_timeout: Duration::from_secs(30),
            processing_requeue: Duration::from_secs(10),
            resync_interval: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            error_backoff_base: Duration::from_secs(5),
            error_backoff_max: Duration::from_secs(300),
            managed_kinds: ManagedKind::defaults(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let retry = RetryPolicy {
            max_attempts: parse_var("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            initial_backoff: Duration::from_millis(parse_var(
                "RETRY_INITIAL_BACKOFF_MS",
                defaults.retry.initial_backoff.as_millis() as u64,
            )?),
            max_backoff: Duration::from_millis(parse_var(
                "RETRY_MAX_BACKOFF_MS",
                defaults.retry.max_backoff.as_millis() as u64,
            )?),
        };

        let config = Config {
            operator_name: env::var("OPERATOR_NAME").unwrap_or(defaults.operator_name),
            template_dir: env::var("TEMPLATE_DIR").ok().map(PathBuf::from),
            watch_namespace: env::var("WATCH_NAMESPACE").ok().filter(|ns| !ns.is_empty()),
            worker_concurrency: parse_var("WORKER_CONCURRENCY", defaults.worker_concurrency)?,
            apply_concurrency: parse_var("APPLY_CONCURRENCY", defaults.apply_concurrency)?,
            reconcile_timeout: secs_var("RECONCILE_TIMEOUT_SECS", defaults.reconcile_timeout)?,
            request_timeout: secs_var("REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
            processing_requeue: secs_var("PROCESSING_REQUEUE_SECS", defaults.processing_requeue)?,
            resync_interval: secs_var("RESYNC_INTERVAL_SECS", defaults.resync_interval)?,
            retry,
            error_backoff_base: secs_var("ERROR_BACKOFF_BASE_SECS", defaults.error_backoff_base)?,
            error_backoff_max: secs_var("ERROR_BACKOFF_MAX_SECS", defaults.error_backoff_max)?,
            managed_kinds: defaults.managed_kinds,
        };

        anyhow::ensure!(config.worker_concurrency > 0, "WORKER_CONCURRENCY must be at least 1");
        anyhow::ensure!(config.apply_concurrency > 0, "APPLY_CONCURRENCY must be at least 1");
        anyhow::ensure!(config.retry.max_attempts > 0, "RETRY_MAX_ATTEMPTS must be at least 1");

        Ok(config)
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", name, value)),
        Err(_) => Ok(default),
    }
}

fn secs_var(name: &str, default: Duration) -> Result<Duration> {
    parse_var(name, default.as_secs()).map(Duration::from_secs)
}
