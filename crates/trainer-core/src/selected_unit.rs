//! Transactional updates to the currently selected unit.
//!
//! Each apply diffs a draft against a fresh snapshot, writes only the fields
//! that changed, one at a time and in field order, and on the first failed
//! write rolls every applied change back in reverse order. Committed
//! transactions go on a [`TransactionStack`]; `revert_last` pops it.
//!
//! The service is not internally synchronized. Callers serialize access per
//! attach session and call [`SelectedUnitTransactionService::reset`] on
//! detach.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::TrainerConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{Result, TrainerError};
use crate::orchestrator::ActionOrchestrator;
use crate::payload::{RawPayload, ScalarValue};
use crate::types::{RuntimeMode, ValueType};

// ---------------------------------------------------------------------------
// SelectedUnitField
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectedUnitField {
    Hp,
    Shield,
    Speed,
    DamageMultiplier,
    CooldownMultiplier,
    Veterancy,
    OwnerFaction,
}

impl SelectedUnitField {
    /// Write order for every apply.
    pub const ALL: [SelectedUnitField; 7] = [
        SelectedUnitField::Hp,
        SelectedUnitField::Shield,
        SelectedUnitField::Speed,
        SelectedUnitField::DamageMultiplier,
        SelectedUnitField::CooldownMultiplier,
        SelectedUnitField::Veterancy,
        SelectedUnitField::OwnerFaction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SelectedUnitField::Hp => "hp",
            SelectedUnitField::Shield => "shield",
            SelectedUnitField::Speed => "speed",
            SelectedUnitField::DamageMultiplier => "damage_multiplier",
            SelectedUnitField::CooldownMultiplier => "cooldown_multiplier",
            SelectedUnitField::Veterancy => "veterancy",
            SelectedUnitField::OwnerFaction => "owner_faction",
        }
    }

    pub fn action_id(self) -> &'static str {
        match self {
            SelectedUnitField::Hp => "set_selected_hp",
            SelectedUnitField::Shield => "set_selected_shield",
            SelectedUnitField::Speed => "set_selected_speed",
            SelectedUnitField::DamageMultiplier => "set_selected_damage_multiplier",
            SelectedUnitField::CooldownMultiplier => "set_selected_cooldown_multiplier",
            SelectedUnitField::Veterancy => "set_selected_veterancy",
            SelectedUnitField::OwnerFaction => "set_selected_owner_faction",
        }
    }

    /// Symbol used when the config has no binding for the backing action.
    pub fn default_symbol(self) -> &'static str {
        match self {
            SelectedUnitField::Hp => "selected_hp",
            SelectedUnitField::Shield => "selected_shield",
            SelectedUnitField::Speed => "selected_speed",
            SelectedUnitField::DamageMultiplier => "selected_damage_multiplier",
            SelectedUnitField::CooldownMultiplier => "selected_cooldown_multiplier",
            SelectedUnitField::Veterancy => "selected_veterancy",
            SelectedUnitField::OwnerFaction => "selected_owner_faction",
        }
    }

    pub fn is_float(self) -> bool {
        !matches!(
            self,
            SelectedUnitField::Veterancy | SelectedUnitField::OwnerFaction
        )
    }

    pub fn value_type(self) -> ValueType {
        if self.is_float() {
            ValueType::Float
        } else {
            ValueType::Int
        }
    }
}

impl std::fmt::Display for SelectedUnitField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Snapshot / draft / change
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedUnitSnapshot {
    pub hp: f64,
    pub shield: f64,
    pub speed: f64,
    pub damage_multiplier: f64,
    pub cooldown_multiplier: f64,
    pub veterancy: i64,
    pub owner_faction: i64,
    pub captured_at: DateTime<Utc>,
}

impl SelectedUnitSnapshot {
    pub fn get(&self, field: SelectedUnitField) -> ScalarValue {
        match field {
            SelectedUnitField::Hp => ScalarValue::Float(self.hp),
            SelectedUnitField::Shield => ScalarValue::Float(self.shield),
            SelectedUnitField::Speed => ScalarValue::Float(self.speed),
            SelectedUnitField::DamageMultiplier => ScalarValue::Float(self.damage_multiplier),
            SelectedUnitField::CooldownMultiplier => ScalarValue::Float(self.cooldown_multiplier),
            SelectedUnitField::Veterancy => ScalarValue::Int(self.veterancy),
            SelectedUnitField::OwnerFaction => ScalarValue::Int(self.owner_faction),
        }
    }

    fn set(&mut self, field: SelectedUnitField, value: ScalarValue) {
        match field {
            SelectedUnitField::Hp => self.hp = value.as_f64(),
            SelectedUnitField::Shield => self.shield = value.as_f64(),
            SelectedUnitField::Speed => self.speed = value.as_f64(),
            SelectedUnitField::DamageMultiplier => self.damage_multiplier = value.as_f64(),
            SelectedUnitField::CooldownMultiplier => self.cooldown_multiplier = value.as_f64(),
            SelectedUnitField::Veterancy => self.veterancy = value.as_i64(),
            SelectedUnitField::OwnerFaction => self.owner_faction = value.as_i64(),
        }
    }

    /// Snapshot with `changes` applied, stamped now.
    fn after(&self, changes: &[SelectedUnitChange]) -> Self {
        let mut next = self.clone();
        for change in changes {
            next.set(change.field, change.new_value);
        }
        next.captured_at = Utc::now();
        next
    }
}

/// Requested values; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectedUnitDraft {
    pub hp: Option<f64>,
    pub shield: Option<f64>,
    pub speed: Option<f64>,
    pub damage_multiplier: Option<f64>,
    pub cooldown_multiplier: Option<f64>,
    pub veterancy: Option<i64>,
    pub owner_faction: Option<i64>,
}

impl SelectedUnitDraft {
    pub fn get(&self, field: SelectedUnitField) -> Option<ScalarValue> {
        match field {
            SelectedUnitField::Hp => self.hp.map(ScalarValue::Float),
            SelectedUnitField::Shield => self.shield.map(ScalarValue::Float),
            SelectedUnitField::Speed => self.speed.map(ScalarValue::Float),
            SelectedUnitField::DamageMultiplier => self.damage_multiplier.map(ScalarValue::Float),
            SelectedUnitField::CooldownMultiplier => {
                self.cooldown_multiplier.map(ScalarValue::Float)
            }
            SelectedUnitField::Veterancy => self.veterancy.map(ScalarValue::Int),
            SelectedUnitField::OwnerFaction => self.owner_faction.map(ScalarValue::Int),
        }
    }

    pub fn is_empty(&self) -> bool {
        SelectedUnitField::ALL.iter().all(|f| self.get(*f).is_none())
    }

    /// First float field holding NaN or an infinity.
    pub fn first_non_finite(&self) -> Option<SelectedUnitField> {
        SelectedUnitField::ALL
            .into_iter()
            .find(|f| matches!(self.get(*f), Some(ScalarValue::Float(v)) if !v.is_finite()))
    }
}

impl From<&SelectedUnitSnapshot> for SelectedUnitDraft {
    fn from(snapshot: &SelectedUnitSnapshot) -> Self {
        Self {
            hp: Some(snapshot.hp),
            shield: Some(snapshot.shield),
            speed: Some(snapshot.speed),
            damage_multiplier: Some(snapshot.damage_multiplier),
            cooldown_multiplier: Some(snapshot.cooldown_multiplier),
            veterancy: Some(snapshot.veterancy),
            owner_faction: Some(snapshot.owner_faction),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedUnitChange {
    pub field: SelectedUnitField,
    pub symbol: String,
    pub action_id: String,
    pub old_value: ScalarValue,
    pub new_value: ScalarValue,
    pub is_float: bool,
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedUnitTransactionRecord {
    pub transaction_id: String,
    pub timestamp: DateTime<Utc>,
    pub before: SelectedUnitSnapshot,
    pub after: SelectedUnitSnapshot,
    /// Set on compensating transactions (`restore_baseline`).
    pub is_rollback: bool,
    pub operation: String,
    pub applied_actions: Vec<String>,
}

/// Append/pop-only transaction log.
#[derive(Debug, Clone, Default)]
pub struct TransactionStack {
    records: Vec<SelectedUnitTransactionRecord>,
}

impl TransactionStack {
    pub fn push(&mut self, record: SelectedUnitTransactionRecord) {
        self.records.push(record);
    }

    pub fn pop(&mut self) -> Option<SelectedUnitTransactionRecord> {
        self.records.pop()
    }

    pub fn peek(&self) -> Option<&SelectedUnitTransactionRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in append order.
    pub fn as_slice(&self) -> &[SelectedUnitTransactionRecord] {
        &self.records
    }

    fn clear(&mut self) {
        self.records.clear();
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedUnitTransactionResult {
    pub succeeded: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    /// Whether any applied change had to be undone.
    pub rolled_back: bool,
    /// Whether every rollback write succeeded. `None` when nothing failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_succeeded: Option<bool>,
    pub applied_changes: usize,
    #[serde(default)]
    pub diagnostics: Diagnostics,
}

impl SelectedUnitTransactionResult {
    fn refused(message: impl Into<String>, reason_code: &str) -> Self {
        Self {
            succeeded: false,
            message: message.into(),
            reason_code: Some(reason_code.to_string()),
            transaction_id: None,
            rolled_back: false,
            rollback_succeeded: None,
            applied_changes: 0,
            diagnostics: Diagnostics::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct SelectedUnitTransactionService {
    orchestrator: Arc<ActionOrchestrator>,
    profile_id: String,
    config: TrainerConfig,
    baseline: Option<SelectedUnitSnapshot>,
    history: TransactionStack,
}

impl SelectedUnitTransactionService {
    pub fn new(
        orchestrator: Arc<ActionOrchestrator>,
        profile_id: impl Into<String>,
        config: TrainerConfig,
    ) -> Self {
        Self {
            orchestrator,
            profile_id: profile_id.into(),
            config,
            baseline: None,
            history: TransactionStack::default(),
        }
    }

    pub fn baseline(&self) -> Option<&SelectedUnitSnapshot> {
        self.baseline.as_ref()
    }

    pub fn history(&self) -> &[SelectedUnitTransactionRecord] {
        self.history.as_slice()
    }

    /// Forget baseline and history. Called when the session detaches.
    pub fn reset(&mut self) {
        self.baseline = None;
        self.history.clear();
    }

    fn symbol(&self, field: SelectedUnitField) -> String {
        self.config
            .symbol_for(field.action_id())
            .unwrap_or(field.default_symbol())
            .to_string()
    }

    /// Read every tracked field. The first capture becomes the baseline.
    pub async fn capture(&mut self, cancel: &CancellationToken) -> Result<SelectedUnitSnapshot> {
        let backend = self.orchestrator.backend();
        let mut values = Vec::with_capacity(SelectedUnitField::ALL.len());
        for field in SelectedUnitField::ALL {
            if cancel.is_cancelled() {
                return Err(TrainerError::Cancelled);
            }
            values.push(backend.read(&self.symbol(field), field.value_type()).await?);
        }

        let mut snapshot = SelectedUnitSnapshot {
            hp: 0.0,
            shield: 0.0,
            speed: 0.0,
            damage_multiplier: 0.0,
            cooldown_multiplier: 0.0,
            veterancy: 0,
            owner_faction: 0,
            captured_at: Utc::now(),
        };
        for (field, value) in SelectedUnitField::ALL.into_iter().zip(values) {
            snapshot.set(field, value);
        }

        if self.baseline.is_none() {
            tracing::debug!("selected unit baseline captured");
            self.baseline = Some(snapshot.clone());
        }
        Ok(snapshot)
    }

    pub async fn apply(
        &mut self,
        draft: &SelectedUnitDraft,
        cancel: &CancellationToken,
    ) -> Result<SelectedUnitTransactionResult> {
        if let Some(refused) = self.mode_gate() {
            return Ok(refused);
        }
        if draft.is_empty() {
            return Ok(SelectedUnitTransactionResult::refused(
                "draft has no fields to apply",
                "draft_empty",
            ));
        }
        if let Some(field) = draft.first_non_finite() {
            let mut refused = SelectedUnitTransactionResult::refused(
                format!("{field} must be a finite number"),
                "draft_invalid",
            );
            refused
                .diagnostics
                .insert("field".into(), Value::from(field.as_str()));
            return Ok(refused);
        }
        self.apply_labeled(draft, "apply", true, cancel).await
    }

    /// Re-apply the latest transaction's `before` snapshot and pop it.
    pub async fn revert_last(&mut self, cancel: &CancellationToken) -> Result<SelectedUnitTransactionResult> {
        if let Some(refused) = self.mode_gate() {
            return Ok(refused);
        }
        let Some(last) = self.history.peek() else {
            return Ok(SelectedUnitTransactionResult::refused(
                "no transaction to revert",
                "history_empty",
            ));
        };
        let draft = SelectedUnitDraft::from(&last.before);
        let reverted_id = last.transaction_id.clone();

        let mut result = self.apply_labeled(&draft, "revert_last", false, cancel).await?;
        if result.succeeded {
            self.history.pop();
            result
                .diagnostics
                .insert("revertedTransactionId".into(), Value::from(reverted_id));
        }
        Ok(result)
    }

    pub async fn restore_baseline(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<SelectedUnitTransactionResult> {
        if let Some(refused) = self.mode_gate() {
            return Ok(refused);
        }
        let Some(baseline) = self.baseline.as_ref() else {
            return Ok(SelectedUnitTransactionResult::refused(
                "no baseline captured yet",
                "baseline_missing",
            ));
        };
        let draft = SelectedUnitDraft::from(baseline);
        self.apply_labeled(&draft, "restore_baseline", true, cancel).await
    }

    fn mode_gate(&self) -> Option<SelectedUnitTransactionResult> {
        let mode = self.orchestrator.backend().session().mode();
        let required = self.config.tactical_mode;
        if mode == required {
            return None;
        }
        let (message, reason) = if mode == RuntimeMode::Unknown {
            (
                format!("runtime mode is unknown; {required} mode is required"),
                "tactical_mode_unknown",
            )
        } else {
            (
                format!("runtime mode is {mode}; {required} mode is required"),
                "tactical_mode_required",
            )
        };
        tracing::warn!(%mode, %required, reason_code = reason, "selected unit update refused");
        let mut refused = SelectedUnitTransactionResult::refused(message, reason);
        refused
            .diagnostics
            .insert("runtimeMode".into(), Value::from(mode.as_str()));
        Some(refused)
    }

    fn plan(&self, before: &SelectedUnitSnapshot, draft: &SelectedUnitDraft) -> Vec<SelectedUnitChange> {
        let epsilon = self.config.float_epsilon;
        SelectedUnitField::ALL
            .into_iter()
            .filter_map(|field| {
                let new_value = draft.get(field)?;
                let old_value = before.get(field);
                let differs = if field.is_float() {
                    (new_value.as_f64() - old_value.as_f64()).abs() > epsilon
                } else {
                    new_value.as_i64() != old_value.as_i64()
                };
                differs.then(|| SelectedUnitChange {
                    field,
                    symbol: self.symbol(field),
                    action_id: field.action_id().to_string(),
                    old_value,
                    new_value,
                    is_float: field.is_float(),
                })
            })
            .collect()
    }

    async fn apply_labeled(
        &mut self,
        draft: &SelectedUnitDraft,
        operation: &str,
        record: bool,
        cancel: &CancellationToken,
    ) -> Result<SelectedUnitTransactionResult> {
        let before = self.capture(cancel).await?;
        let changes = self.plan(&before, draft);
        if changes.is_empty() {
            return Ok(SelectedUnitTransactionResult {
                succeeded: true,
                message: "no effective changes".to_string(),
                reason_code: None,
                transaction_id: None,
                rolled_back: false,
                rollback_succeeded: None,
                applied_changes: 0,
                diagnostics: Diagnostics::new(),
            });
        }

        let transaction_id = Uuid::new_v4().to_string();
        let mut applied: Vec<&SelectedUnitChange> = Vec::with_capacity(changes.len());

        for change in &changes {
            let outcome = self
                .write(change, change.new_value, &transaction_id, operation, cancel)
                .await;
            let failure = match outcome {
                Ok(None) => {
                    applied.push(change);
                    continue;
                }
                Ok(Some(message)) => message,
                Err(TrainerError::Cancelled) => {
                    tracing::warn!(
                        transaction_id = %transaction_id,
                        applied = applied.len(),
                        "selected unit transaction cancelled; applied writes left in place"
                    );
                    return Err(TrainerError::Cancelled);
                }
                Err(e) => e.to_string(),
            };

            let rollback_ok = self.rollback(&applied, &transaction_id).await;
            tracing::warn!(
                transaction_id = %transaction_id,
                action_id = %change.action_id,
                rolled_back = applied.len(),
                rollback_ok,
                "selected unit transaction failed"
            );
            let mut diagnostics = Diagnostics::new();
            diagnostics.insert("failedAction".into(), Value::from(change.action_id.as_str()));
            diagnostics.insert("rollbackSteps".into(), Value::from(applied.len()));
            return Ok(SelectedUnitTransactionResult {
                succeeded: false,
                message: format!(
                    "'{}' failed: {failure}; rollback {}",
                    change.action_id,
                    if rollback_ok { "succeeded" } else { "failed" }
                ),
                reason_code: Some("transaction_step_failed".to_string()),
                transaction_id: Some(transaction_id),
                rolled_back: !applied.is_empty(),
                rollback_succeeded: Some(rollback_ok),
                applied_changes: 0,
                diagnostics,
            });
        }

        let applied_actions: Vec<String> = changes.iter().map(|c| c.action_id.clone()).collect();
        if record {
            self.history.push(SelectedUnitTransactionRecord {
                transaction_id: transaction_id.clone(),
                timestamp: Utc::now(),
                after: before.after(&changes),
                before,
                is_rollback: operation == "restore_baseline",
                operation: operation.to_string(),
                applied_actions,
            });
        }

        tracing::info!(
            transaction_id = %transaction_id,
            operation,
            changes = changes.len(),
            "selected unit transaction committed"
        );
        Ok(SelectedUnitTransactionResult {
            succeeded: true,
            message: format!("applied {} change(s)", changes.len()),
            reason_code: None,
            transaction_id: Some(transaction_id),
            rolled_back: false,
            rollback_succeeded: None,
            applied_changes: changes.len(),
            diagnostics: Diagnostics::new(),
        })
    }

    /// Undo `applied` in reverse order. Runs to completion even when a step
    /// fails; returns whether every step succeeded.
    async fn rollback(&self, applied: &[&SelectedUnitChange], transaction_id: &str) -> bool {
        // Rollback is not cancellable.
        let never = CancellationToken::new();
        let mut all_ok = true;
        for change in applied.iter().rev() {
            match self
                .write(change, change.old_value, transaction_id, "rollback", &never)
                .await
            {
                Ok(None) => {}
                Ok(Some(message)) => {
                    tracing::warn!(action_id = %change.action_id, %message, "rollback step failed");
                    all_ok = false;
                }
                Err(e) => {
                    tracing::warn!(action_id = %change.action_id, error = %e, "rollback step failed");
                    all_ok = false;
                }
            }
        }
        all_ok
    }

    /// One field write. `Ok(Some(message))` is a failed step.
    async fn write(
        &self,
        change: &SelectedUnitChange,
        value: ScalarValue,
        transaction_id: &str,
        operation: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let mut payload = RawPayload::new();
        payload.insert("symbol".into(), Value::from(change.symbol.as_str()));
        payload.insert(value.payload_key().into(), value.to_json());

        let mut context = Diagnostics::new();
        context.insert("transactionId".into(), Value::from(transaction_id));
        context.insert("operation".into(), Value::from(operation));

        let result = self
            .orchestrator
            .execute(
                &self.profile_id,
                &change.action_id,
                &payload,
                self.config.tactical_mode,
                &context,
                cancel,
            )
            .await?;
        Ok((!result.succeeded).then_some(result.message))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freeze::FreezeRegistry;
    use crate::memory_backend::InMemoryBackend;
    use crate::orchestrator::{ActionExecutionRequest, ActionExecutionResult, ExecutionBackend};
    use crate::profile::{ActionSpec, InMemoryProfileRepository, TrainerProfile};
    use crate::session::{AttachSession, SessionState};
    use crate::types::ExecutionKind;

    fn profile() -> TrainerProfile {
        SelectedUnitField::ALL
            .into_iter()
            .fold(TrainerProfile::new("base"), |profile, field| {
                let value_key = if field.is_float() { "floatValue" } else { "intValue" };
                profile.with_action(
                    ActionSpec::new(field.action_id(), ExecutionKind::Memory)
                        .with_mode(RuntimeMode::Tactical)
                        .with_required(&["symbol", value_key]),
                )
            })
    }

    fn seed(backend: &InMemoryBackend) {
        backend.set_value("selected_hp", ScalarValue::Float(100.0));
        backend.set_value("selected_shield", ScalarValue::Float(50.0));
        backend.set_value("selected_speed", ScalarValue::Float(1.0));
        backend.set_value("selected_damage_multiplier", ScalarValue::Float(1.0));
        backend.set_value("selected_cooldown_multiplier", ScalarValue::Float(1.0));
        backend.set_value("selected_veterancy", ScalarValue::Int(0));
        backend.set_value("selected_owner_faction", ScalarValue::Int(1));
    }

    fn service(mode: RuntimeMode) -> (SelectedUnitTransactionService, Arc<InMemoryBackend>) {
        let backend = Arc::new(InMemoryBackend::new(SessionState::Attached(AttachSession::new(
            7, mode,
        ))));
        seed(&backend);
        let orchestrator = Arc::new(ActionOrchestrator::new(
            Arc::new(InMemoryProfileRepository::new([profile()])),
            backend.clone(),
            Arc::new(FreezeRegistry::new()),
        ));
        (
            SelectedUnitTransactionService::new(orchestrator, "base", TrainerConfig::default()),
            backend,
        )
    }

    fn go() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn first_capture_becomes_baseline() {
        let (mut svc, backend) = service(RuntimeMode::Tactical);
        let first = svc.capture(&go()).await.unwrap();
        backend.set_value("selected_hp", ScalarValue::Float(5.0));
        let second = svc.capture(&go()).await.unwrap();
        assert_eq!(second.hp, 5.0);
        assert_eq!(svc.baseline().unwrap().hp, first.hp);
    }

    #[tokio::test]
    async fn identical_draft_writes_nothing() {
        let (mut svc, backend) = service(RuntimeMode::Tactical);
        let draft = SelectedUnitDraft {
            hp: Some(100.00001),
            veterancy: Some(0),
            ..Default::default()
        };
        let result = svc.apply(&draft, &go()).await.unwrap();
        assert!(result.succeeded);
        assert_eq!(result.message, "no effective changes");
        assert!(backend.writes().is_empty());
        assert!(svc.history().is_empty());
    }

    #[tokio::test]
    async fn apply_writes_only_changed_fields_in_order() {
        let (mut svc, backend) = service(RuntimeMode::Tactical);
        let draft = SelectedUnitDraft {
            owner_faction: Some(2),
            hp: Some(250.0),
            shield: Some(50.0),
            ..Default::default()
        };
        let result = svc.apply(&draft, &go()).await.unwrap();
        assert!(result.succeeded, "{}", result.message);
        assert_eq!(result.applied_changes, 2);

        let actions: Vec<String> = backend.writes().into_iter().map(|w| w.action_id).collect();
        assert_eq!(actions, vec!["set_selected_hp", "set_selected_owner_faction"]);
        assert_eq!(svc.history().len(), 1);
        assert_eq!(svc.history()[0].after.hp, 250.0);
    }

    #[tokio::test]
    async fn apply_then_revert_restores_values_and_pops_history() {
        let (mut svc, backend) = service(RuntimeMode::Tactical);
        let draft = SelectedUnitDraft {
            hp: Some(10.0),
            speed: Some(3.5),
            veterancy: Some(4),
            ..Default::default()
        };
        assert!(svc.apply(&draft, &go()).await.unwrap().succeeded);
        assert_eq!(svc.history().len(), 1);

        let reverted = svc.revert_last(&go()).await.unwrap();
        assert!(reverted.succeeded, "{}", reverted.message);
        assert!(svc.history().is_empty());
        assert_eq!(backend.value("selected_hp"), Some(ScalarValue::Float(100.0)));
        assert_eq!(backend.value("selected_speed"), Some(ScalarValue::Float(1.0)));
        assert_eq!(backend.value("selected_veterancy"), Some(ScalarValue::Int(0)));
    }

    #[tokio::test]
    async fn failed_step_rolls_back_in_reverse_order() {
        let (mut svc, backend) = service(RuntimeMode::Tactical);
        backend.fail_writes_to("selected_veterancy");
        let draft = SelectedUnitDraft {
            hp: Some(1.0),
            shield: Some(2.0),
            speed: Some(3.0),
            veterancy: Some(9),
            ..Default::default()
        };
        let result = svc.apply(&draft, &go()).await.unwrap();
        assert!(!result.succeeded);
        assert!(result.rolled_back);
        assert_eq!(result.rollback_succeeded, Some(true));
        assert_eq!(result.reason_code.as_deref(), Some("transaction_step_failed"));
        assert!(svc.history().is_empty());

        let symbols: Vec<String> = backend.writes().into_iter().map(|w| w.symbol).collect();
        assert_eq!(
            symbols,
            vec![
                "selected_hp",
                "selected_shield",
                "selected_speed",
                "selected_speed",
                "selected_shield",
                "selected_hp",
            ]
        );
        assert_eq!(backend.value("selected_hp"), Some(ScalarValue::Float(100.0)));
        assert_eq!(backend.value("selected_shield"), Some(ScalarValue::Float(50.0)));
        assert_eq!(backend.value("selected_speed"), Some(ScalarValue::Float(1.0)));
    }

    #[tokio::test]
    async fn first_step_failure_needs_no_rollback() {
        let (mut svc, backend) = service(RuntimeMode::Tactical);
        backend.fail_writes_to("selected_hp");
        let result = svc
            .apply(&SelectedUnitDraft { hp: Some(1.0), ..Default::default() }, &go())
            .await
            .unwrap();
        assert!(!result.succeeded);
        assert!(!result.rolled_back);
        assert!(backend.writes().is_empty());
    }

    #[tokio::test]
    async fn unknown_and_wrong_mode_have_distinct_reasons() {
        let (mut unknown, _) = service(RuntimeMode::Unknown);
        let draft = SelectedUnitDraft { hp: Some(1.0), ..Default::default() };
        let r = unknown.apply(&draft, &go()).await.unwrap();
        assert_eq!(r.reason_code.as_deref(), Some("tactical_mode_unknown"));

        let (mut galactic, _) = service(RuntimeMode::Galactic);
        let r = galactic.apply(&draft, &go()).await.unwrap();
        assert_eq!(r.reason_code.as_deref(), Some("tactical_mode_required"));
        let r = galactic.revert_last(&go()).await.unwrap();
        assert_eq!(r.reason_code.as_deref(), Some("tactical_mode_required"));
        let r = galactic.restore_baseline(&go()).await.unwrap();
        assert_eq!(r.reason_code.as_deref(), Some("tactical_mode_required"));
    }

    #[tokio::test]
    async fn restore_baseline_requires_capture() {
        let (mut svc, _) = service(RuntimeMode::Tactical);
        let r = svc.restore_baseline(&go()).await.unwrap();
        assert_eq!(r.reason_code.as_deref(), Some("baseline_missing"));
    }

    #[tokio::test]
    async fn restore_baseline_reapplies_first_capture() {
        let (mut svc, backend) = service(RuntimeMode::Tactical);
        svc.capture(&go()).await.unwrap();
        svc.apply(&SelectedUnitDraft { hp: Some(1.0), ..Default::default() }, &go())
            .await
            .unwrap();
        svc.apply(&SelectedUnitDraft { shield: Some(0.0), ..Default::default() }, &go())
            .await
            .unwrap();

        let r = svc.restore_baseline(&go()).await.unwrap();
        assert!(r.succeeded);
        assert_eq!(backend.value("selected_hp"), Some(ScalarValue::Float(100.0)));
        assert_eq!(backend.value("selected_shield"), Some(ScalarValue::Float(50.0)));
        let last = svc.history().last().unwrap();
        assert_eq!(last.operation, "restore_baseline");
        assert!(last.is_rollback);
    }

    #[tokio::test]
    async fn revert_with_empty_history_is_refused() {
        let (mut svc, _) = service(RuntimeMode::Tactical);
        let r = svc.revert_last(&go()).await.unwrap();
        assert_eq!(r.reason_code.as_deref(), Some("history_empty"));
    }

    #[tokio::test]
    async fn reset_clears_baseline_and_history() {
        let (mut svc, _) = service(RuntimeMode::Tactical);
        svc.apply(&SelectedUnitDraft { hp: Some(1.0), ..Default::default() }, &go())
            .await
            .unwrap();
        svc.reset();
        assert!(svc.baseline().is_none());
        assert!(svc.history().is_empty());
    }

    #[tokio::test]
    async fn cancellation_before_apply_leaves_state_untouched() {
        let (mut svc, backend) = service(RuntimeMode::Tactical);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = svc
            .apply(&SelectedUnitDraft { hp: Some(1.0), ..Default::default() }, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TrainerError::Cancelled));
        assert!(backend.writes().is_empty());
    }

    #[tokio::test]
    async fn non_finite_draft_value_is_rejected_before_any_write() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let (mut svc, backend) = service(RuntimeMode::Tactical);
            let draft = SelectedUnitDraft {
                hp: Some(250.0),
                speed: Some(bad),
                ..Default::default()
            };
            let r = svc.apply(&draft, &go()).await.unwrap();
            assert!(!r.succeeded);
            assert_eq!(r.reason_code.as_deref(), Some("draft_invalid"));
            assert_eq!(r.diagnostics["field"], "speed");
            assert!(backend.writes().is_empty());
            assert!(svc.history().is_empty());
            assert!(svc.baseline().is_none());
        }
    }

    /// Cancels `token` once `after` writes have reached the table.
    struct CancelAfterWrites {
        inner: Arc<InMemoryBackend>,
        token: CancellationToken,
        after: usize,
    }

    #[async_trait::async_trait]
    impl ExecutionBackend for CancelAfterWrites {
        fn session(&self) -> SessionState {
            self.inner.session()
        }

        async fn execute(
            &self,
            request: &ActionExecutionRequest,
            cancel: &CancellationToken,
        ) -> Result<ActionExecutionResult> {
            let result = self.inner.execute(request, cancel).await?;
            if self.inner.writes().len() >= self.after {
                self.token.cancel();
            }
            Ok(result)
        }

        async fn read(&self, symbol: &str, value_type: ValueType) -> Result<ScalarValue> {
            self.inner.read(symbol, value_type).await
        }
    }

    #[tokio::test]
    async fn cancellation_mid_transaction_keeps_applied_writes() {
        let inner = Arc::new(InMemoryBackend::new(SessionState::Attached(AttachSession::new(
            7,
            RuntimeMode::Tactical,
        ))));
        seed(&inner);
        let cancel = CancellationToken::new();
        let backend = Arc::new(CancelAfterWrites {
            inner: inner.clone(),
            token: cancel.clone(),
            after: 2,
        });
        let orchestrator = Arc::new(ActionOrchestrator::new(
            Arc::new(InMemoryProfileRepository::new([profile()])),
            backend,
            Arc::new(FreezeRegistry::new()),
        ));
        let mut svc = SelectedUnitTransactionService::new(orchestrator, "base", TrainerConfig::default());

        let draft = SelectedUnitDraft {
            hp: Some(1.0),
            shield: Some(2.0),
            speed: Some(3.0),
            veterancy: Some(9),
            ..Default::default()
        };
        let err = svc.apply(&draft, &cancel).await.unwrap_err();
        assert!(matches!(err, TrainerError::Cancelled));

        let symbols: Vec<String> = inner.writes().into_iter().map(|w| w.symbol).collect();
        assert_eq!(symbols, vec!["selected_hp", "selected_shield"]);
        assert_eq!(inner.value("selected_hp"), Some(ScalarValue::Float(1.0)));
        assert_eq!(inner.value("selected_shield"), Some(ScalarValue::Float(2.0)));
        assert_eq!(inner.value("selected_speed"), Some(ScalarValue::Float(1.0)));
        assert_eq!(inner.value("selected_veterancy"), Some(ScalarValue::Int(0)));
        assert!(svc.history().is_empty());
    }
}
