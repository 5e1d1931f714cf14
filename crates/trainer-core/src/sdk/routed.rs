use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::router::SdkOperationRouter;
use super::{
    SdkOperationRequest, CONTEXT_CAPABILITY_STATE, CONTEXT_PROCESS_ID, CONTEXT_PROCESS_PATH,
};
use crate::diagnostics::context_str;
use crate::error::Result;
use crate::orchestrator::{ActionExecutionRequest, ActionExecutionResult, ExecutionBackend};
use crate::payload::{ActionPayload, RawPayload, ScalarValue};
use crate::session::SessionState;
use crate::types::{SymbolSource, ValueType};

/// Sends `Sdk`-kind actions through the [`SdkOperationRouter`] and every
/// other kind to the raw backend.
pub struct RoutedExecutionBackend {
    raw: Arc<dyn ExecutionBackend>,
    router: Arc<SdkOperationRouter>,
}

impl RoutedExecutionBackend {
    pub fn new(raw: Arc<dyn ExecutionBackend>, router: Arc<SdkOperationRouter>) -> Self {
        Self { raw, router }
    }

    /// Build the SDK request, filling process identity from the session when
    /// the caller's context lacks it.
    fn sdk_request(&self, request: &ActionExecutionRequest, arguments: &RawPayload) -> SdkOperationRequest {
        let operation_id = arguments
            .get("operationId")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(request.action.id.as_str())
            .to_string();

        let mut context = request.context.clone();
        if let SessionState::Attached(session) = self.raw.session() {
            if context_str(&context, CONTEXT_PROCESS_PATH).is_none() && !session.process_path.is_empty() {
                context.insert(CONTEXT_PROCESS_PATH.into(), Value::from(session.process_path));
            }
            context
                .entry(CONTEXT_PROCESS_ID.into())
                .or_insert_with(|| Value::from(session.process_id));
        }

        SdkOperationRequest {
            operation_id,
            payload: arguments.clone(),
            is_mutation: request.action.is_mutation,
            runtime_mode: request.runtime_mode,
            profile_id: request.profile_id.clone(),
            context,
        }
    }
}

#[async_trait]
impl ExecutionBackend for RoutedExecutionBackend {
    fn session(&self) -> SessionState {
        self.raw.session()
    }

    async fn execute(
        &self,
        request: &ActionExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<ActionExecutionResult> {
        let ActionPayload::Sdk(sdk) = &request.payload else {
            return self.raw.execute(request, cancel).await;
        };

        let routed = self
            .router
            .route(self.sdk_request(request, &sdk.arguments), cancel)
            .await?;

        let mut diagnostics = routed.diagnostics;
        diagnostics.insert(
            CONTEXT_CAPABILITY_STATE.into(),
            Value::from(routed.capability_state.as_str()),
        );
        Ok(ActionExecutionResult {
            succeeded: routed.succeeded,
            message: routed.message,
            reason_code: Some(routed.reason_code.as_str().to_string()),
            address_source: SymbolSource::None,
            diagnostics,
        })
    }

    async fn read(&self, symbol: &str, value_type: ValueType) -> Result<ScalarValue> {
        self.raw.read(symbol, value_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainerConfig;
    use crate::memory_backend::InMemoryBackend;
    use crate::payload::{MemoryPayload, SdkPayload, PAYLOAD_SCHEMA_VERSION};
    use crate::profile::ActionSpec;
    use crate::sdk::gate::StaticFeatureGate;
    use crate::sdk::{
        MemoryDiagnosticsSink, SdkExecutionBackend, SdkOperationResult, SdkReasonCode,
    };
    use crate::diagnostics::Diagnostics;
    use crate::session::AttachSession;
    use crate::types::{CapabilityState, ExecutionKind, RuntimeMode};

    struct NeverCalled;

    #[async_trait]
    impl SdkExecutionBackend for NeverCalled {
        async fn execute(&self, _request: &SdkOperationRequest) -> Result<SdkOperationResult> {
            panic!("sdk backend must not be reached");
        }
    }

    fn routed(gate: bool) -> (RoutedExecutionBackend, Arc<InMemoryBackend>, Arc<MemoryDiagnosticsSink>) {
        let mut session = AttachSession::new(9, RuntimeMode::Tactical);
        session.process_path = "/games/swfoc.exe".into();
        let raw = Arc::new(InMemoryBackend::new(SessionState::Attached(session)));
        let sink = Arc::new(MemoryDiagnosticsSink::default());
        let router = SdkOperationRouter::new(Arc::new(NeverCalled), &TrainerConfig::default())
            .with_feature_gate(Arc::new(StaticFeatureGate(gate)))
            .with_diagnostics_sink(sink.clone());
        (
            RoutedExecutionBackend::new(raw.clone(), Arc::new(router)),
            raw,
            sink,
        )
    }

    fn request(action: ActionSpec, payload: ActionPayload) -> ActionExecutionRequest {
        ActionExecutionRequest {
            profile_id: "base".into(),
            action,
            payload,
            payload_version: PAYLOAD_SCHEMA_VERSION,
            runtime_mode: RuntimeMode::Tactical,
            context: Diagnostics::new(),
        }
    }

    #[tokio::test]
    async fn memory_actions_go_to_raw_backend() {
        let (backend, raw, sink) = routed(false);
        let req = request(
            ActionSpec::new("set_credits", ExecutionKind::Memory),
            ActionPayload::Memory(MemoryPayload {
                symbol: "credits".into(),
                value: ScalarValue::Int(10),
            }),
        );
        let result = backend.execute(&req, &CancellationToken::new()).await.unwrap();
        assert!(result.succeeded);
        assert_eq!(raw.value("credits"), Some(ScalarValue::Int(10)));
        assert!(sink.entries().is_empty());
    }

    #[tokio::test]
    async fn sdk_actions_go_through_router_with_session_identity() {
        let (backend, raw, sink) = routed(false);
        let req = request(
            ActionSpec::new("toggle_ai", ExecutionKind::Sdk),
            ActionPayload::Sdk(SdkPayload {
                arguments: Default::default(),
            }),
        );
        let result = backend.execute(&req, &CancellationToken::new()).await.unwrap();
        assert!(!result.succeeded);
        assert_eq!(result.reason_code.as_deref(), Some("FeatureFlagDisabled"));
        assert_eq!(
            result.diagnostics[CONTEXT_CAPABILITY_STATE],
            Value::from(CapabilityState::Unavailable.as_str())
        );
        assert!(raw.writes().is_empty());

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0.operation_id, "toggle_ai");
        assert!(entries[0].0.is_mutation);
        assert_eq!(entries[0].0.context[CONTEXT_PROCESS_PATH], Value::from("/games/swfoc.exe"));
        assert_eq!(entries[0].1.reason_code, SdkReasonCode::FeatureFlagDisabled);
    }
}
