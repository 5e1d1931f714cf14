//! Single entry point for executing catalog actions.
//!
//! Input and policy failures come back as unsuccessful
//! [`ActionExecutionResult`]s with a stable reason code and never reach the
//! backend, the audit sink or telemetry. `Err` is reserved for a failing
//! profile repository and cancellation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::audit::{ActionAuditRecord, AuditSink, TracingAuditSink};
use crate::diagnostics::{merge_context, Diagnostics};
use crate::error::{Result, TrainerError};
use crate::freeze::FreezeService;
use crate::payload::{
    first_missing_field, ActionPayload, FreezeDirective, FreezePayload, RawPayload, ScalarValue,
    PAYLOAD_SCHEMA_VERSION,
};
use crate::profile::{ActionSpec, ProfileRepository, TrainerProfile};
use crate::session::SessionState;
use crate::telemetry::ActionTelemetry;
use crate::types::{RuntimeMode, SymbolSource, ValueType};

// ---------------------------------------------------------------------------
// Request / result
// ---------------------------------------------------------------------------

/// A validated action handed to the execution backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionExecutionRequest {
    pub profile_id: String,
    pub action: ActionSpec,
    pub payload: ActionPayload,
    /// Schema version `payload` was parsed under.
    #[serde(default = "current_payload_version")]
    pub payload_version: u32,
    pub runtime_mode: RuntimeMode,
    #[serde(default)]
    pub context: Diagnostics,
}

fn current_payload_version() -> u32 {
    PAYLOAD_SCHEMA_VERSION
}

impl ActionExecutionRequest {
    /// Failure a backend should return instead of executing, if any.
    ///
    /// Catches requests built by hand whose payload variant does not match
    /// the action's execution kind or whose schema version is not ours.
    pub fn envelope_error(&self) -> Option<ActionExecutionResult> {
        if self.payload_version != PAYLOAD_SCHEMA_VERSION {
            return Some(
                ActionExecutionResult::failure(
                    format!(
                        "payload schema version {} is not supported (expected {PAYLOAD_SCHEMA_VERSION})",
                        self.payload_version
                    ),
                    "payload_version_unsupported",
                )
                .with_diagnostic("payloadVersion", self.payload_version),
            );
        }
        let kind = self.payload.kind();
        if kind != self.action.execution_kind {
            return Some(
                ActionExecutionResult::failure(
                    format!(
                        "{kind} payload cannot drive {} action '{}'",
                        self.action.execution_kind, self.action.id
                    ),
                    "payload_kind_mismatch",
                )
                .with_diagnostic("payloadKind", kind.as_str()),
            );
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionExecutionResult {
    pub succeeded: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    #[serde(default)]
    pub address_source: SymbolSource,
    #[serde(default)]
    pub diagnostics: Diagnostics,
}

impl ActionExecutionResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            message: message.into(),
            reason_code: None,
            address_source: SymbolSource::None,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn failure(message: impl Into<String>, reason_code: &str) -> Self {
        Self {
            succeeded: false,
            message: message.into(),
            reason_code: Some(reason_code.to_string()),
            address_source: SymbolSource::None,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn with_reason(mut self, reason_code: &str) -> Self {
        self.reason_code = Some(reason_code.to_string());
        self
    }

    pub fn with_source(mut self, source: SymbolSource) -> Self {
        self.address_source = source;
        self
    }

    pub fn with_diagnostic(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.diagnostics.insert(key.to_string(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// ExecutionBackend
// ---------------------------------------------------------------------------

/// Runtime adapter that owns the attach session and performs process I/O.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn session(&self) -> SessionState;

    async fn execute(
        &self,
        request: &ActionExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<ActionExecutionResult>;

    async fn read(&self, symbol: &str, value_type: ValueType) -> Result<ScalarValue>;
}

// ---------------------------------------------------------------------------
// ActionOrchestrator
// ---------------------------------------------------------------------------

pub struct ActionOrchestrator {
    profiles: Arc<dyn ProfileRepository>,
    backend: Arc<dyn ExecutionBackend>,
    freeze: Arc<dyn FreezeService>,
    audit: Arc<dyn AuditSink>,
    telemetry: Arc<ActionTelemetry>,
}

impl ActionOrchestrator {
    pub fn new(
        profiles: Arc<dyn ProfileRepository>,
        backend: Arc<dyn ExecutionBackend>,
        freeze: Arc<dyn FreezeService>,
    ) -> Self {
        Self {
            profiles,
            backend,
            freeze,
            audit: Arc::new(TracingAuditSink),
            telemetry: Arc::new(ActionTelemetry::new()),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<ActionTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn backend(&self) -> &Arc<dyn ExecutionBackend> {
        &self.backend
    }

    pub fn telemetry(&self) -> &Arc<ActionTelemetry> {
        &self.telemetry
    }

    /// Validate and run one action.
    ///
    /// Mode enforcement only applies when both the caller's mode and the
    /// action's declared mode are concrete.
    pub async fn execute(
        &self,
        profile_id: &str,
        action_id: &str,
        payload: &RawPayload,
        runtime_mode: RuntimeMode,
        context: &Diagnostics,
        cancel: &CancellationToken,
    ) -> Result<ActionExecutionResult> {
        if cancel.is_cancelled() {
            return Err(TrainerError::Cancelled);
        }

        let profile = self.profiles.resolve_inherited_profile(profile_id).await?;
        let Some(action) = profile.action(action_id) else {
            return Ok(ActionExecutionResult::failure(
                format!("action '{action_id}' not found in profile '{}'", profile.id),
                "action_not_found",
            ));
        };

        if let Some(required) = action.enforced_mode() {
            if runtime_mode.is_known() && required != runtime_mode {
                tracing::warn!(action_id, %required, %runtime_mode, "action refused: mode not allowed");
                return Ok(ActionExecutionResult::failure(
                    format!("action '{action_id}' requires {required} mode, current mode is {runtime_mode}"),
                    "mode_not_allowed",
                )
                .with_diagnostic("requiredMode", required.as_str())
                .with_diagnostic("runtimeMode", runtime_mode.as_str()));
            }
        }

        if let Some(field) = first_missing_field(action, payload) {
            return Ok(ActionExecutionResult::failure(
                format!("payload is missing required field '{field}'"),
                "payload_missing_field",
            )
            .with_diagnostic("missingField", field));
        }

        let parsed = match ActionPayload::parse(action, payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                return Ok(ActionExecutionResult::failure(e.to_string(), "payload_invalid"));
            }
        };

        let session = self.backend.session();
        let mut result = match &parsed {
            ActionPayload::Freeze(freeze) => self.execute_freeze(freeze, &session).await,
            _ => {
                let request = ActionExecutionRequest {
                    profile_id: profile.id.clone(),
                    action: action.clone(),
                    payload: parsed.clone(),
                    payload_version: PAYLOAD_SCHEMA_VERSION,
                    runtime_mode,
                    context: context.clone(),
                };
                match self.backend.execute(&request, cancel).await {
                    Ok(result) => result,
                    Err(TrainerError::Cancelled) => return Err(TrainerError::Cancelled),
                    Err(e) => ActionExecutionResult::failure(
                        format!("backend failure: {e}"),
                        "backend_error",
                    ),
                }
            }
        };

        result.diagnostics = merge_context(&result.diagnostics, context);

        tracing::info!(
            action_id,
            kind = %action.execution_kind,
            succeeded = result.succeeded,
            address_source = %result.address_source,
            reason_code = result.reason_code.as_deref().unwrap_or(""),
            "action executed"
        );

        self.record(&profile, action, &session, &result).await;
        Ok(result)
    }

    async fn execute_freeze(
        &self,
        payload: &FreezePayload,
        session: &SessionState,
    ) -> ActionExecutionResult {
        let symbol = payload.symbol.as_str();
        let source = session
            .attached()
            .and_then(|s| s.symbol(symbol))
            .map(|s| s.source)
            .unwrap_or_default();

        let result = match &payload.directive {
            FreezeDirective::Pin { value } => match self.freeze.freeze(symbol, *value).await {
                Ok(()) => ActionExecutionResult::success(format!("'{symbol}' frozen to {value}"))
                    .with_reason("freeze_applied")
                    .with_diagnostic("frozenValue", value.to_json()),
                Err(e) => ActionExecutionResult::failure(
                    format!("failed to freeze '{symbol}': {e}"),
                    "freeze_failed",
                ),
            },
            FreezeDirective::Release => match self.freeze.unfreeze(symbol).await {
                Ok(true) => ActionExecutionResult::success(format!("'{symbol}' unfrozen"))
                    .with_reason("freeze_released"),
                Ok(false) => ActionExecutionResult::success(format!("'{symbol}' was not frozen"))
                    .with_reason("freeze_not_active"),
                Err(e) => ActionExecutionResult::failure(
                    format!("failed to unfreeze '{symbol}': {e}"),
                    "freeze_failed",
                ),
            },
        };
        result
            .with_source(source)
            .with_diagnostic("symbol", symbol)
    }

    /// Audit and count an executed action. Only attached sessions are recorded.
    async fn record(
        &self,
        profile: &TrainerProfile,
        action: &ActionSpec,
        session: &SessionState,
        result: &ActionExecutionResult,
    ) {
        let Some(attached) = session.attached() else {
            return;
        };

        let record = ActionAuditRecord {
            timestamp: chrono::Utc::now(),
            profile_id: profile.id.clone(),
            process_id: attached.process_id,
            action_id: action.id.clone(),
            address_source: result.address_source,
            succeeded: result.succeeded,
            message: result.message.clone(),
            diagnostics: result.diagnostics.clone(),
        };
        if let Err(e) = self.audit.write(&record).await {
            tracing::warn!(action_id = %action.id, error = %e, "audit write failed");
        }

        self.telemetry
            .record(&action.id, result.address_source, result.succeeded);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::freeze::FreezeRegistry;
    use crate::memory_backend::InMemoryBackend;
    use crate::profile::InMemoryProfileRepository;
    use crate::session::{AttachSession, SymbolInfo};
    use crate::types::ExecutionKind;
    use serde_json::json;

    struct Harness {
        orchestrator: ActionOrchestrator,
        backend: Arc<InMemoryBackend>,
        freeze: Arc<FreezeRegistry>,
        audit: Arc<MemoryAuditSink>,
    }

    fn profile() -> TrainerProfile {
        TrainerProfile::new("base")
            .with_action(
                ActionSpec::new("set_credits", ExecutionKind::Memory)
                    .with_mode(RuntimeMode::Galactic)
                    .with_required(&["symbol", "intValue"]),
            )
            .with_action(
                ActionSpec::new("set_credits_any_mode", ExecutionKind::Memory)
                    .with_mode(RuntimeMode::Unknown)
                    .with_required(&["symbol", "intValue"]),
            )
            .with_action(
                ActionSpec::new("freeze_symbol", ExecutionKind::Freeze).with_required(&["symbol"]),
            )
            .with_action(
                ActionSpec::new("unfreeze_symbol", ExecutionKind::Freeze).with_required(&["symbol"]),
            )
    }

    fn harness(session: SessionState) -> Harness {
        let backend = Arc::new(InMemoryBackend::new(session));
        let freeze = Arc::new(FreezeRegistry::new());
        let audit = Arc::new(MemoryAuditSink::default());
        let orchestrator = ActionOrchestrator::new(
            Arc::new(InMemoryProfileRepository::new([profile()])),
            backend.clone(),
            freeze.clone(),
        )
        .with_audit_sink(audit.clone());
        Harness {
            orchestrator,
            backend,
            freeze,
            audit,
        }
    }

    fn attached() -> SessionState {
        SessionState::Attached(
            AttachSession::new(4242, RuntimeMode::Galactic)
                .with_symbol(SymbolInfo::healthy_signature("credits", 0x10, ValueType::Int)),
        )
    }

    fn raw(v: Value) -> RawPayload {
        v.as_object().cloned().unwrap()
    }

    async fn run(h: &Harness, action: &str, payload: Value, mode: RuntimeMode) -> ActionExecutionResult {
        h.orchestrator
            .execute(
                "base",
                action,
                &raw(payload),
                mode,
                &Diagnostics::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn unknown_action_has_no_side_effects() {
        let h = harness(attached());
        let result = run(&h, "nope", json!({}), RuntimeMode::Galactic).await;
        assert!(!result.succeeded);
        assert_eq!(result.reason_code.as_deref(), Some("action_not_found"));
        assert!(h.audit.records().is_empty());
        assert!(h.backend.writes().is_empty());
    }

    #[tokio::test]
    async fn unknown_profile_is_an_error() {
        let h = harness(attached());
        let err = h
            .orchestrator
            .execute(
                "missing",
                "set_credits",
                &RawPayload::new(),
                RuntimeMode::Galactic,
                &Diagnostics::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TrainerError::ProfileNotFound(_)));
    }

    #[tokio::test]
    async fn declared_unknown_mode_runs_in_any_mode() {
        let h = harness(attached());
        for mode in [RuntimeMode::Galactic, RuntimeMode::Tactical] {
            let result = run(
                &h,
                "set_credits_any_mode",
                json!({"symbol": "credits", "intValue": 5}),
                mode,
            )
            .await;
            assert!(result.succeeded, "{mode}: {}", result.message);
        }
        assert_eq!(h.backend.writes().len(), 2);
    }

    #[tokio::test]
    async fn concrete_mode_mismatch_is_refused() {
        let h = harness(attached());
        let result = run(
            &h,
            "set_credits",
            json!({"symbol": "credits", "intValue": 5}),
            RuntimeMode::Tactical,
        )
        .await;
        assert_eq!(result.reason_code.as_deref(), Some("mode_not_allowed"));
        assert!(h.backend.writes().is_empty());
    }

    #[tokio::test]
    async fn unknown_caller_mode_skips_mode_check() {
        let h = harness(attached());
        let result = run(
            &h,
            "set_credits",
            json!({"symbol": "credits", "intValue": 5}),
            RuntimeMode::Unknown,
        )
        .await;
        assert!(result.succeeded, "{}", result.message);
        assert_eq!(h.backend.value("credits"), Some(ScalarValue::Int(5)));
    }

    #[tokio::test]
    async fn missing_field_names_first_missing() {
        let h = harness(attached());
        let result = run(&h, "set_credits", json!({"symbol": "credits"}), RuntimeMode::Galactic).await;
        assert_eq!(result.reason_code.as_deref(), Some("payload_missing_field"));
        assert!(result.message.contains("intValue"));
    }

    #[tokio::test]
    async fn executed_action_is_audited_and_counted_with_merged_context() {
        let h = harness(attached());
        let mut context = Diagnostics::new();
        context.insert("operator".into(), json!("ui"));
        let result = h
            .orchestrator
            .execute(
                "base",
                "set_credits",
                &raw(json!({"symbol": "credits", "intValue": 900})),
                RuntimeMode::Galactic,
                &context,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.succeeded);
        assert_eq!(result.diagnostics["operator"], json!("ui"));

        let records = h.audit.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].process_id, 4242);
        assert_eq!(records[0].address_source, SymbolSource::Signature);
        assert_eq!(
            h.orchestrator
                .telemetry()
                .count("set_credits", SymbolSource::Signature, true),
            1
        );
    }

    #[tokio::test]
    async fn detached_session_skips_audit() {
        let h = harness(SessionState::Detached);
        let result = run(
            &h,
            "set_credits",
            json!({"symbol": "credits", "intValue": 1}),
            RuntimeMode::Galactic,
        )
        .await;
        assert!(result.succeeded);
        assert!(h.audit.records().is_empty());
    }

    #[tokio::test]
    async fn freeze_pins_until_unfrozen() {
        let h = harness(attached());
        let frozen = run(
            &h,
            "freeze_symbol",
            json!({"symbol": "credits", "intValue": 500, "freeze": true}),
            RuntimeMode::Galactic,
        )
        .await;
        assert!(frozen.succeeded);
        assert_eq!(h.freeze.pinned("credits"), Some(ScalarValue::Int(500)));
        assert!(h.backend.writes().is_empty());

        let released = run(
            &h,
            "freeze_symbol",
            json!({"symbol": "credits", "freeze": false}),
            RuntimeMode::Galactic,
        )
        .await;
        assert!(released.succeeded);
        assert_eq!(h.freeze.pinned("credits"), None);
    }

    #[tokio::test]
    async fn unfreezing_never_frozen_symbol_succeeds() {
        let h = harness(attached());
        let result = run(&h, "unfreeze_symbol", json!({"symbol": "credits"}), RuntimeMode::Galactic).await;
        assert!(result.succeeded);
        assert!(result.message.contains("was not frozen"));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let h = harness(attached());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = h
            .orchestrator
            .execute(
                "base",
                "set_credits",
                &raw(json!({"symbol": "credits", "intValue": 1})),
                RuntimeMode::Galactic,
                &Diagnostics::new(),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TrainerError::Cancelled));
        assert!(h.backend.writes().is_empty());
    }

    #[tokio::test]
    async fn backend_failure_becomes_failed_result() {
        let h = harness(attached());
        h.backend.fail_writes_to("credits");
        let result = run(
            &h,
            "set_credits",
            json!({"symbol": "credits", "intValue": 1}),
            RuntimeMode::Galactic,
        )
        .await;
        assert!(!result.succeeded);
        assert_eq!(h.audit.records().len(), 1);
        assert_eq!(
            h.orchestrator
                .telemetry()
                .count("set_credits", SymbolSource::Signature, false),
            1
        );
    }
}
