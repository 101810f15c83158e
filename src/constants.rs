// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// The operator name, used as field manager, finalizer and marker prefix
pub const OPERATOR_NAME: &str = "registry-credential-injector-cop.cs.sap.com";

/// Finalizer placed on every RegistryCredentialInjector before objects are applied
pub const FINALIZER: &str = OPERATOR_NAME;

/// Ownership markers stamped onto managed objects
pub mod markers {
    /// Label holding the owning instance's UID; used as the list selector
    pub const OWNER_ID_LABEL: &str = "registry-credential-injector-cop.cs.sap.com/owner-id";
    /// Annotation holding the owning instance as `namespace/name`
    pub const OWNER_ANNOTATION: &str = "registry-credential-injector-cop.cs.sap.com/owner";
    /// Annotation holding the digest of the last applied desired content
    pub const DIGEST_ANNOTATION: &str = "registry-credential-injector-cop.cs.sap.com/digest";
}

/// Custom resource coordinates
pub mod crd {
    pub const GROUP: &str = "operator.cs.sap.com";
    pub const VERSION: &str = "v1alpha1";
    pub const KIND: &str = "RegistryCredentialInjector";
    pub const PLURAL: &str = "registrycredentialinjectors";
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}

/// Condition types and reasons written to the status
pub mod conditions {
    pub const READY: &str = "Ready";

    pub const REASON_PROCESSING: &str = "Processing";
    pub const REASON_READY: &str = "Ready";
    pub const REASON_VALIDATION_FAILED: &str = "ValidationFailed";
    pub const REASON_RENDER_FAILED: &str = "RenderFailed";
    pub const REASON_APPLY_FAILED: &str = "ApplyFailed";
    pub const REASON_NOT_READY: &str = "ObjectsNotReady";
    pub const REASON_DELETING: &str = "Deleting";
    pub const REASON_DELETION_PENDING: &str = "DeletionPending";
    pub const REASON_DELETION_FAILED: &str = "DeletionFailed";
}
