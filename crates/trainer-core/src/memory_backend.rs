//! In-memory [`ExecutionBackend`] over a symbol value table.
//!
//! Used for offline dry runs of profiles and as the test double for every
//! component that drives a backend. Writes land in the table and in an
//! ordered write log; individual symbols can be made to fail.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TrainerError};
use crate::orchestrator::{ActionExecutionRequest, ActionExecutionResult, ExecutionBackend};
use crate::payload::{ActionPayload, ScalarValue};
use crate::session::SessionState;
use crate::types::{SymbolSource, ValueType};

#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub action_id: String,
    pub symbol: String,
    pub value: ScalarValue,
}

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    session: SessionState,
    values: Mutex<BTreeMap<String, ScalarValue>>,
    writes: Mutex<Vec<WriteRecord>>,
    /// Symbol -> writes still allowed before every later write fails.
    failing: Mutex<BTreeMap<String, usize>>,
}

impl InMemoryBackend {
    pub fn new(session: SessionState) -> Self {
        Self {
            session,
            ..Default::default()
        }
    }

    pub fn set_value(&self, symbol: &str, value: ScalarValue) {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(symbol.to_string(), value);
    }

    pub fn value(&self, symbol: &str) -> Option<ScalarValue> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(symbol)
            .copied()
    }

    /// Every write that reached the table, in order.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Make every later write to `symbol` fail.
    pub fn fail_writes_to(&self, symbol: &str) {
        self.fail_writes_after(symbol, 0);
    }

    /// Let `allowed` more writes to `symbol` through, then fail the rest.
    pub fn fail_writes_after(&self, symbol: &str, allowed: usize) {
        self.failing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(symbol.to_string(), allowed);
    }

    pub fn clear_failures(&self) {
        self.failing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    fn source_for(&self, symbol: &str) -> SymbolSource {
        self.session
            .attached()
            .and_then(|s| s.symbol(symbol))
            .map(|s| s.source)
            .unwrap_or_default()
    }

    fn write(&self, action_id: &str, symbol: &str, value: ScalarValue) -> ActionExecutionResult {
        let source = self.source_for(symbol);
        let failing = match self
            .failing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get_mut(symbol)
        {
            Some(0) => true,
            Some(allowed) => {
                *allowed -= 1;
                false
            }
            None => false,
        };
        if failing {
            return ActionExecutionResult::failure(
                format!("write to '{symbol}' failed"),
                "write_failed",
            )
            .with_source(source);
        }

        self.set_value(symbol, value);
        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(WriteRecord {
                action_id: action_id.to_string(),
                symbol: symbol.to_string(),
                value,
            });
        ActionExecutionResult::success(format!("'{symbol}' set to {value}"))
            .with_source(source)
            .with_diagnostic("symbol", symbol)
    }
}

#[async_trait]
impl ExecutionBackend for InMemoryBackend {
    fn session(&self) -> SessionState {
        self.session.clone()
    }

    async fn execute(
        &self,
        request: &ActionExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<ActionExecutionResult> {
        if cancel.is_cancelled() {
            return Err(TrainerError::Cancelled);
        }
        if let Some(rejected) = request.envelope_error() {
            return Ok(rejected);
        }
        let action_id = request.action.id.as_str();
        let result = match &request.payload {
            ActionPayload::Memory(p) => self.write(action_id, &p.symbol, p.value),
            ActionPayload::CodePatch(p) => self.write(action_id, &p.symbol, ScalarValue::Bool(p.enable)),
            ActionPayload::Helper(p) => ActionExecutionResult::success(format!(
                "helper '{}' accepted",
                p.helper_hook_id.as_deref().unwrap_or(action_id)
            )),
            ActionPayload::Freeze(_) => ActionExecutionResult::failure(
                "freeze actions are handled by the orchestrator",
                "freeze_not_routed",
            ),
            ActionPayload::Sdk(_) => ActionExecutionResult::failure(
                "sdk actions require a routed backend",
                "sdk_not_routed",
            ),
        };
        Ok(result)
    }

    async fn read(&self, symbol: &str, _value_type: ValueType) -> Result<ScalarValue> {
        self.value(symbol)
            .ok_or_else(|| TrainerError::Backend(format!("symbol '{symbol}' has no value")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{MemoryPayload, SdkPayload, PAYLOAD_SCHEMA_VERSION};
    use crate::profile::ActionSpec;
    use crate::session::AttachSession;
    use crate::types::{ExecutionKind, RuntimeMode};

    fn set(symbol: &str, value: i64) -> ActionExecutionRequest {
        ActionExecutionRequest {
            profile_id: "base".into(),
            action: ActionSpec::new("set_credits", ExecutionKind::Memory),
            payload: ActionPayload::Memory(MemoryPayload {
                symbol: symbol.into(),
                value: ScalarValue::Int(value),
            }),
            payload_version: PAYLOAD_SCHEMA_VERSION,
            runtime_mode: RuntimeMode::Galactic,
            context: Default::default(),
        }
    }

    fn backend() -> InMemoryBackend {
        InMemoryBackend::new(SessionState::Attached(AttachSession::new(1, RuntimeMode::Galactic)))
    }

    #[tokio::test]
    async fn writes_land_in_table_and_log() {
        let b = backend();
        let r = b.execute(&set("credits", 7), &CancellationToken::new()).await.unwrap();
        assert!(r.succeeded);
        assert_eq!(b.read("credits", ValueType::Int).await.unwrap(), ScalarValue::Int(7));
        assert_eq!(b.writes().len(), 1);
    }

    #[tokio::test]
    async fn fail_after_lets_allowed_writes_through() {
        let b = backend();
        b.fail_writes_after("credits", 1);
        let cancel = CancellationToken::new();
        assert!(b.execute(&set("credits", 1), &cancel).await.unwrap().succeeded);
        let second = b.execute(&set("credits", 2), &cancel).await.unwrap();
        assert!(!second.succeeded);
        assert_eq!(second.reason_code.as_deref(), Some("write_failed"));
        assert_eq!(b.value("credits"), Some(ScalarValue::Int(1)));

        b.clear_failures();
        assert!(b.execute(&set("credits", 3), &cancel).await.unwrap().succeeded);
    }

    #[tokio::test]
    async fn mismatched_payload_kind_is_refused_without_writing() {
        let b = backend();
        let mut request = set("credits", 7);
        request.payload = ActionPayload::Sdk(SdkPayload {
            arguments: Default::default(),
        });
        let r = b.execute(&request, &CancellationToken::new()).await.unwrap();
        assert!(!r.succeeded);
        assert_eq!(r.reason_code.as_deref(), Some("payload_kind_mismatch"));
        assert_eq!(r.diagnostics["payloadKind"], "sdk");
        assert!(b.writes().is_empty());
    }

    #[tokio::test]
    async fn foreign_payload_version_is_refused() {
        let b = backend();
        let mut request = set("credits", 7);
        request.payload_version = PAYLOAD_SCHEMA_VERSION + 1;
        let r = b.execute(&request, &CancellationToken::new()).await.unwrap();
        assert_eq!(r.reason_code.as_deref(), Some("payload_version_unsupported"));
        assert!(b.writes().is_empty());
    }

    #[test]
    fn serialized_request_carries_payload_version() {
        let json = serde_json::to_value(set("credits", 7)).unwrap();
        assert_eq!(json["payload_version"], PAYLOAD_SCHEMA_VERSION);
        assert_eq!(json["payload"]["kind"], "memory");

        let mut stripped = json.clone();
        stripped.as_object_mut().unwrap().remove("payload_version");
        let back: ActionExecutionRequest = serde_json::from_value(stripped).unwrap();
        assert_eq!(back.payload_version, PAYLOAD_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn missing_value_is_a_backend_error() {
        let err = backend().read("nothing", ValueType::Int).await.unwrap_err();
        assert!(matches!(err, TrainerError::Backend(_)));
    }
}
