// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Status tracker: readiness aggregation into phase, conditions and observed generation.

pub mod readiness;
pub mod tracker;

pub use readiness::{Readiness, ReadinessCheck, ReadinessRegistry};
pub use tracker::{PassOutcome, StatusTracker};
