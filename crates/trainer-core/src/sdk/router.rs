//! Gated pipeline in front of the SDK execution backend.
//!
//! The synchronous gates run as an ordered list of [`PreflightCheck`]s; the
//! first one that produces a result ends the pipeline. Resolution, guard and
//! dispatch follow. Every terminal result is written to the diagnostics sink
//! exactly once, paired with the request that produced it.

use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::capability::{
    normalize_anchors, BinaryFingerprint, CapabilityMapResolver, CapabilityResolutionResult,
    DefaultExecutionGuard, ExecutionGuard, FileFingerprintService, FingerprintService,
    PassthroughVariantResolver, ProfileVariantResolution, ProfileVariantResolver,
    StaticCapabilityMap,
};
use super::catalog::{SdkOperationCatalog, SdkOperationSpec};
use super::gate::{EnvFeatureGate, SdkFeatureGate};
use super::{
    SdkDiagnosticsSink, SdkExecutionBackend, SdkOperationRequest, SdkOperationResult,
    SdkReasonCode, TracingDiagnosticsSink, CONTEXT_ANCHORS, CONTEXT_CAPABILITY_REASON,
    CONTEXT_CAPABILITY_STATE, CONTEXT_FINGERPRINT_ID, CONTEXT_PROCESS_ID, CONTEXT_PROCESS_PATH,
    CONTEXT_RESOLVED_VARIANT, CONTEXT_VARIANT_CONFIDENCE,
};
use crate::config::TrainerConfig;
use crate::diagnostics::{context_str, context_u32, merge_context, Diagnostics};
use crate::error::{Result, TrainerError};
use crate::types::CapabilityState;

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterStage {
    FeatureGate,
    RuntimeContext,
    CatalogLookup,
    ModeCompatibility,
    Resolution,
    ExecutionGuard,
    Dispatch,
}

impl RouterStage {
    pub fn as_str(self) -> &'static str {
        match self {
            RouterStage::FeatureGate => "feature_gate",
            RouterStage::RuntimeContext => "runtime_context",
            RouterStage::CatalogLookup => "catalog_lookup",
            RouterStage::ModeCompatibility => "mode_compatibility",
            RouterStage::Resolution => "resolution",
            RouterStage::ExecutionGuard => "execution_guard",
            RouterStage::Dispatch => "dispatch",
        }
    }
}

pub struct Preflight<'a> {
    pub request: &'a SdkOperationRequest,
    pub gate_enabled: bool,
    pub operation: Option<&'static SdkOperationSpec>,
}

/// A synchronous gate: `Some(result)` refuses the request.
pub struct PreflightCheck {
    pub stage: RouterStage,
    pub check: fn(&Preflight) -> Option<SdkOperationResult>,
}

fn refused(message: String, reason: SdkReasonCode) -> SdkOperationResult {
    SdkOperationResult::failure(message, reason, CapabilityState::Unavailable)
}

fn unknown_operation(request: &SdkOperationRequest) -> SdkOperationResult {
    refused(
        format!("'{}' is not an SDK v1 operation", request.operation_id),
        SdkReasonCode::UnknownSdkOperation,
    )
    .with_diagnostic("operationId", request.operation_id.as_str())
}

fn default_preflight() -> Vec<PreflightCheck> {
    vec![
        PreflightCheck {
            stage: RouterStage::FeatureGate,
            check: |p| {
                (!p.gate_enabled).then(|| {
                    refused(
                        "SDK execution path is disabled".to_string(),
                        SdkReasonCode::FeatureFlagDisabled,
                    )
                })
            },
        },
        PreflightCheck {
            stage: RouterStage::RuntimeContext,
            check: |p| {
                context_str(&p.request.context, CONTEXT_PROCESS_PATH)
                    .is_none()
                    .then(|| {
                        refused(
                            "no attached runtime: processPath missing from context".to_string(),
                            SdkReasonCode::RuntimeNotAttached,
                        )
                    })
            },
        },
        PreflightCheck {
            stage: RouterStage::CatalogLookup,
            check: |p| p.operation.is_none().then(|| unknown_operation(p.request)),
        },
        PreflightCheck {
            stage: RouterStage::ModeCompatibility,
            check: |p| {
                let op = p.operation?;
                (!op.allows(p.request.runtime_mode)).then(|| {
                    refused(
                        format!(
                            "'{}' is not allowed in {} mode",
                            op.id, p.request.runtime_mode
                        ),
                        SdkReasonCode::ModeMismatch,
                    )
                    .with_diagnostic("allowedModes", json!(op.allowed_mode_names()))
                    .with_diagnostic("runtimeMode", p.request.runtime_mode.as_str())
                })
            },
        },
    ]
}

struct Resolved {
    variant: ProfileVariantResolution,
    fingerprint: BinaryFingerprint,
    capability: CapabilityResolutionResult,
}

// ---------------------------------------------------------------------------
// SdkOperationRouter
// ---------------------------------------------------------------------------

pub struct SdkOperationRouter {
    gate: Arc<dyn SdkFeatureGate>,
    variants: Arc<dyn ProfileVariantResolver>,
    fingerprints: Arc<dyn FingerprintService>,
    capabilities: Arc<dyn CapabilityMapResolver>,
    guard: Arc<dyn ExecutionGuard>,
    backend: Arc<dyn SdkExecutionBackend>,
    diagnostics: Arc<dyn SdkDiagnosticsSink>,
    catalog: SdkOperationCatalog,
    preflight: Vec<PreflightCheck>,
}

impl SdkOperationRouter {
    /// Router with the env gate from `config` and reference collaborators.
    pub fn new(backend: Arc<dyn SdkExecutionBackend>, config: &TrainerConfig) -> Self {
        Self {
            gate: Arc::new(EnvFeatureGate::new(config.sdk_gate_env.clone())),
            variants: Arc::new(PassthroughVariantResolver),
            fingerprints: Arc::new(FileFingerprintService),
            capabilities: Arc::new(StaticCapabilityMap::default()),
            guard: Arc::new(DefaultExecutionGuard),
            backend,
            diagnostics: Arc::new(TracingDiagnosticsSink),
            catalog: SdkOperationCatalog::v1(),
            preflight: default_preflight(),
        }
    }

    pub fn with_feature_gate(mut self, gate: Arc<dyn SdkFeatureGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_variant_resolver(mut self, variants: Arc<dyn ProfileVariantResolver>) -> Self {
        self.variants = variants;
        self
    }

    pub fn with_fingerprint_service(mut self, fingerprints: Arc<dyn FingerprintService>) -> Self {
        self.fingerprints = fingerprints;
        self
    }

    pub fn with_capability_map(mut self, capabilities: Arc<dyn CapabilityMapResolver>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_guard(mut self, guard: Arc<dyn ExecutionGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_diagnostics_sink(mut self, diagnostics: Arc<dyn SdkDiagnosticsSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn catalog(&self) -> &SdkOperationCatalog {
        &self.catalog
    }

    /// Pipeline stages in evaluation order.
    pub fn stages(&self) -> Vec<RouterStage> {
        self.preflight
            .iter()
            .map(|c| c.stage)
            .chain([
                RouterStage::Resolution,
                RouterStage::ExecutionGuard,
                RouterStage::Dispatch,
            ])
            .collect()
    }

    pub async fn route(
        &self,
        request: SdkOperationRequest,
        cancel: &CancellationToken,
    ) -> Result<SdkOperationResult> {
        if cancel.is_cancelled() {
            return Err(TrainerError::Cancelled);
        }

        let operation = self.catalog.get(&request.operation_id);
        let preflight = Preflight {
            request: &request,
            gate_enabled: self.gate.is_enabled(),
            operation,
        };
        for gate in &self.preflight {
            if let Some(result) = (gate.check)(&preflight) {
                tracing::warn!(
                    operation_id = %request.operation_id,
                    stage = gate.stage.as_str(),
                    reason_code = %result.reason_code,
                    "sdk operation refused"
                );
                return Ok(self.finish(&request, result).await);
            }
            tracing::debug!(stage = gate.stage.as_str(), "sdk stage passed");
        }

        let Some(operation) = operation else {
            let result = unknown_operation(&request);
            return Ok(self.finish(&request, result).await);
        };

        let resolved = match self.resolve(&request, operation).await {
            Ok(resolved) => resolved,
            Err(TrainerError::Cancelled) => return Err(TrainerError::Cancelled),
            Err(e) => {
                let result = SdkOperationResult::failure(
                    format!("capability resolution failed: {e}"),
                    SdkReasonCode::ResolutionFailed,
                    CapabilityState::Unknown,
                );
                return Ok(self.finish(&request, result).await);
            }
        };

        let capability = &resolved.capability;
        let decision = self.guard.evaluate(capability, operation.is_mutation);
        if !decision.allowed {
            tracing::warn!(
                operation_id = operation.id,
                capability_state = %capability.state,
                reason_code = %decision.reason_code,
                "sdk operation denied by execution guard"
            );
            let mut result = SdkOperationResult::failure(
                format!(
                    "'{}' denied: capability is {} ({})",
                    operation.id, capability.state, decision.reason_code
                ),
                decision.reason_code,
                capability.state,
            );
            result.diagnostics = denial_diagnostics(&resolved);
            return Ok(self.finish(&request, result).await);
        }

        if cancel.is_cancelled() {
            return Err(TrainerError::Cancelled);
        }

        let rewritten = rewrite(&request, operation, &resolved);
        tracing::debug!(
            operation_id = operation.id,
            variant = %resolved.variant.resolved_profile_id,
            fingerprint_id = %resolved.fingerprint.fingerprint_id,
            "dispatching sdk operation"
        );
        let result = match self.backend.execute(&rewritten).await {
            Ok(result) => result,
            Err(TrainerError::Cancelled) => return Err(TrainerError::Cancelled),
            Err(e) => SdkOperationResult::failure(
                format!("sdk backend failed: {e}"),
                SdkReasonCode::ExecutionFailed,
                capability.state,
            ),
        };
        Ok(self.finish(&rewritten, result).await)
    }

    async fn resolve(
        &self,
        request: &SdkOperationRequest,
        operation: &SdkOperationSpec,
    ) -> Result<Resolved> {
        let variant = self.variants.resolve(&request.profile_id).await?;
        let path = context_str(&request.context, CONTEXT_PROCESS_PATH).unwrap_or_default();
        let process_id = context_u32(&request.context, CONTEXT_PROCESS_ID);
        let fingerprint = self.fingerprints.capture_from_path(path, process_id).await?;
        let anchors = normalize_anchors(request.context.get(CONTEXT_ANCHORS));
        let capability = self
            .capabilities
            .resolve(&fingerprint, &variant.resolved_profile_id, operation.id, &anchors)
            .await?;
        Ok(Resolved {
            variant,
            fingerprint,
            capability,
        })
    }

    async fn finish(
        &self,
        request: &SdkOperationRequest,
        result: SdkOperationResult,
    ) -> SdkOperationResult {
        if let Err(e) = self.diagnostics.write(request, &result).await {
            tracing::warn!(operation_id = %request.operation_id, error = %e, "sdk diagnostics write failed");
        }
        result
    }
}

fn denial_diagnostics(resolved: &Resolved) -> Diagnostics {
    let capability = &resolved.capability;
    let mut diagnostics = Diagnostics::new();
    diagnostics.insert(
        CONTEXT_RESOLVED_VARIANT.into(),
        Value::from(resolved.variant.resolved_profile_id.as_str()),
    );
    diagnostics.insert(
        CONTEXT_FINGERPRINT_ID.into(),
        Value::from(resolved.fingerprint.fingerprint_id.as_str()),
    );
    diagnostics.insert(
        CONTEXT_CAPABILITY_REASON.into(),
        Value::from(capability.reason_code.as_str()),
    );
    diagnostics.insert(
        "capabilitySourceReasonCode".into(),
        Value::from(capability.metadata.source_reason_code.as_str()),
    );
    diagnostics.insert(
        "capabilitySourceState".into(),
        Value::from(capability.metadata.source_state.as_str()),
    );
    diagnostics.insert(
        "capabilityDeclaredAvailable".into(),
        Value::from(capability.metadata.declared_available),
    );
    if !capability.metadata.missing_anchors.is_empty() {
        diagnostics.insert(
            "missingAnchors".into(),
            json!(capability.metadata.missing_anchors),
        );
    }
    diagnostics
}

fn rewrite(
    request: &SdkOperationRequest,
    operation: &SdkOperationSpec,
    resolved: &Resolved,
) -> SdkOperationRequest {
    let mut overlay = Diagnostics::new();
    overlay.insert(
        CONTEXT_RESOLVED_VARIANT.into(),
        Value::from(resolved.variant.resolved_profile_id.as_str()),
    );
    overlay.insert(
        CONTEXT_VARIANT_CONFIDENCE.into(),
        Value::from(resolved.variant.confidence),
    );
    overlay.insert(
        CONTEXT_FINGERPRINT_ID.into(),
        Value::from(resolved.fingerprint.fingerprint_id.as_str()),
    );
    overlay.insert(
        CONTEXT_CAPABILITY_STATE.into(),
        Value::from(resolved.capability.state.as_str()),
    );
    overlay.insert(
        CONTEXT_CAPABILITY_REASON.into(),
        Value::from(resolved.capability.reason_code.as_str()),
    );

    SdkOperationRequest {
        operation_id: request.operation_id.clone(),
        payload: request.payload.clone(),
        is_mutation: operation.is_mutation,
        runtime_mode: request.runtime_mode,
        profile_id: resolved.variant.resolved_profile_id.clone(),
        context: merge_context(&request.context, &overlay),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
