//! Alternate execution path through the extender SDK.
//!
//! ```text
//! ActionOrchestrator
//!     │  (Sdk-kind actions)
//!     ▼
//! RoutedExecutionBackend
//!     │
//!     ▼
//! SdkOperationRouter  ← gates, variant/fingerprint/capability resolution, guard
//!     │
//!     ▼
//! SdkExecutionBackend  (ExtenderBackend offline)
//! ```

pub mod capability;
pub mod catalog;
pub mod extender;
pub mod gate;
pub mod routed;
pub mod router;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Mutex;

use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::payload::RawPayload;
use crate::types::{CapabilityState, RuntimeMode};

// ─── Context keys ─────────────────────────────────────────────────────────

pub const CONTEXT_PROCESS_PATH: &str = "processPath";
pub const CONTEXT_PROCESS_ID: &str = "processId";
pub const CONTEXT_ANCHORS: &str = "resolvedAnchors";
pub const CONTEXT_RESOLVED_VARIANT: &str = "resolvedVariant";
pub const CONTEXT_VARIANT_CONFIDENCE: &str = "resolvedVariantConfidence";
pub const CONTEXT_FINGERPRINT_ID: &str = "fingerprintId";
pub const CONTEXT_CAPABILITY_STATE: &str = "capabilityState";
pub const CONTEXT_CAPABILITY_REASON: &str = "capabilityReasonCode";

// ─── SdkReasonCode ────────────────────────────────────────────────────────

/// Stable machine-readable outcome of a routed SDK operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SdkReasonCode {
    FeatureFlagDisabled,
    RuntimeNotAttached,
    UnknownSdkOperation,
    ModeMismatch,
    /// A resolution collaborator (variant, fingerprint, capability map) failed.
    ResolutionFailed,
    #[serde(rename = "CAPABILITY_PROBE_PASS")]
    CapabilityProbePass,
    #[serde(rename = "CAPABILITY_REQUIRED_MISSING")]
    CapabilityRequiredMissing,
    #[serde(rename = "CAPABILITY_UNKNOWN")]
    CapabilityUnknown,
    #[serde(rename = "SAFETY_MUTATION_BLOCKED")]
    SafetyMutationBlocked,
    ExecutionFailed,
}

impl SdkReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            SdkReasonCode::FeatureFlagDisabled => "FeatureFlagDisabled",
            SdkReasonCode::RuntimeNotAttached => "RuntimeNotAttached",
            SdkReasonCode::UnknownSdkOperation => "UnknownSdkOperation",
            SdkReasonCode::ModeMismatch => "ModeMismatch",
            SdkReasonCode::ResolutionFailed => "ResolutionFailed",
            SdkReasonCode::CapabilityProbePass => "CAPABILITY_PROBE_PASS",
            SdkReasonCode::CapabilityRequiredMissing => "CAPABILITY_REQUIRED_MISSING",
            SdkReasonCode::CapabilityUnknown => "CAPABILITY_UNKNOWN",
            SdkReasonCode::SafetyMutationBlocked => "SAFETY_MUTATION_BLOCKED",
            SdkReasonCode::ExecutionFailed => "ExecutionFailed",
        }
    }
}

impl fmt::Display for SdkReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Request / result ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdkOperationRequest {
    pub operation_id: String,
    #[serde(default)]
    pub payload: RawPayload,
    #[serde(default)]
    pub is_mutation: bool,
    #[serde(default)]
    pub runtime_mode: RuntimeMode,
    pub profile_id: String,
    #[serde(default)]
    pub context: Diagnostics,
}

impl SdkOperationRequest {
    pub fn new(operation_id: impl Into<String>, profile_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            payload: RawPayload::new(),
            is_mutation: false,
            runtime_mode: RuntimeMode::Unknown,
            profile_id: profile_id.into(),
            context: Diagnostics::new(),
        }
    }

    pub fn with_mode(mut self, mode: RuntimeMode) -> Self {
        self.runtime_mode = mode;
        self
    }

    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdkOperationResult {
    pub succeeded: bool,
    pub message: String,
    pub reason_code: SdkReasonCode,
    pub capability_state: CapabilityState,
    #[serde(default)]
    pub diagnostics: Diagnostics,
}

impl SdkOperationResult {
    pub fn success(
        message: impl Into<String>,
        reason_code: SdkReasonCode,
        capability_state: CapabilityState,
    ) -> Self {
        Self {
            succeeded: true,
            message: message.into(),
            reason_code,
            capability_state,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn failure(
        message: impl Into<String>,
        reason_code: SdkReasonCode,
        capability_state: CapabilityState,
    ) -> Self {
        Self {
            succeeded: false,
            message: message.into(),
            reason_code,
            capability_state,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn with_diagnostic(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.diagnostics.insert(key.to_string(), value.into());
        self
    }
}

// ─── Collaborators ────────────────────────────────────────────────────────

/// The extender that actually performs SDK operations.
#[async_trait]
pub trait SdkExecutionBackend: Send + Sync {
    async fn execute(&self, request: &SdkOperationRequest) -> Result<SdkOperationResult>;
}

/// Receives every terminal router result together with the request that
/// produced it.
#[async_trait]
pub trait SdkDiagnosticsSink: Send + Sync {
    async fn write(&self, request: &SdkOperationRequest, result: &SdkOperationResult) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct TracingDiagnosticsSink;

#[async_trait]
impl SdkDiagnosticsSink for TracingDiagnosticsSink {
    async fn write(&self, request: &SdkOperationRequest, result: &SdkOperationResult) -> Result<()> {
        tracing::info!(
            target: "trainer::sdk",
            operation_id = %request.operation_id,
            profile_id = %request.profile_id,
            succeeded = result.succeeded,
            reason_code = %result.reason_code,
            capability_state = %result.capability_state,
            "sdk operation finished"
        );
        Ok(())
    }
}

/// Keeps `(request, result)` pairs in write order.
#[derive(Debug, Default)]
pub struct MemoryDiagnosticsSink {
    entries: Mutex<Vec<(SdkOperationRequest, SdkOperationResult)>>,
}

impl MemoryDiagnosticsSink {
    pub fn entries(&self) -> Vec<(SdkOperationRequest, SdkOperationResult)> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl SdkDiagnosticsSink for MemoryDiagnosticsSink {
    async fn write(&self, request: &SdkOperationRequest, result: &SdkOperationResult) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((request.clone(), result.clone()));
        Ok(())
    }
}
