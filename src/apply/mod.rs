// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Object applier: ownership-scoped create, update and delete of managed objects.

pub mod applier;
pub mod diff;
pub mod retry;

pub use applier::{Applier, ApplyReport, ObjectOutcome, ObjectReport};
pub use diff::Owner;
