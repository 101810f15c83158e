// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resource and managed object types.

pub mod injector;
pub mod object;

pub use injector::{
    Condition, Phase, RegistryCredentialInjector, RegistryCredentialInjectorSpec,
    RegistryCredentialInjectorStatus,
};
pub use object::{ManagedKind, ManagedObject, ObjectKey};
