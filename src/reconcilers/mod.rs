// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Reconciliation engine and the controller that drives it.

pub mod engine;
pub mod injector;

pub use engine::Engine;
pub use injector::InjectorReconciler;
