//! In-process extender: the [`SdkExecutionBackend`] used for offline runs.
//!
//! Operations are served by feature plugins. A [`CapabilityProbe`] records
//! which features the loaded plugins advertise and a [`HookLifecycle`]
//! tracks the hook each feature installs in the target.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use super::capability::normalize_anchors;
use super::{
    SdkExecutionBackend, SdkOperationRequest, SdkOperationResult, SdkReasonCode, CONTEXT_ANCHORS,
    CONTEXT_PROCESS_ID,
};
use crate::diagnostics::{context_u32, Diagnostics};
use crate::error::Result;
use crate::types::CapabilityState;

pub const MIN_UNIT_CAP: i64 = 1;
pub const MAX_UNIT_CAP: i64 = 100_000;

// ─── Capability probe ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeEntry {
    pub available: bool,
    pub state: CapabilityState,
    pub reason_code: SdkReasonCode,
}

/// Features the extender has confirmed it can serve.
#[derive(Debug, Default)]
pub struct CapabilityProbe {
    entries: Mutex<BTreeMap<String, ProbeEntry>>,
}

impl CapabilityProbe {
    pub fn mark_available(&self, feature_id: &str, reason_code: SdkReasonCode) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                feature_id.to_ascii_lowercase(),
                ProbeEntry {
                    available: true,
                    state: CapabilityState::Verified,
                    reason_code,
                },
            );
    }

    pub fn is_available(&self, feature_id: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&feature_id.to_ascii_lowercase())
            .is_some_and(|e| e.available)
    }

    pub fn snapshot(&self) -> BTreeMap<String, ProbeEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

// ─── Hook lifecycle ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookState {
    #[default]
    NotInstalled,
    Installed,
    Failed,
    RolledBack,
}

impl HookState {
    pub fn as_str(self) -> &'static str {
        match self {
            HookState::NotInstalled => "not_installed",
            HookState::Installed => "installed",
            HookState::Failed => "failed",
            HookState::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for HookState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookRecord {
    pub state: HookState,
    pub reason_code: String,
}

impl Default for HookRecord {
    fn default() -> Self {
        Self {
            state: HookState::NotInstalled,
            reason_code: "HOOK_NOT_INSTALLED".to_string(),
        }
    }
}

/// Last known state of every hook, keyed by hook id.
#[derive(Debug, Default)]
pub struct HookLifecycle {
    hooks: Mutex<BTreeMap<String, HookRecord>>,
}

impl HookLifecycle {
    fn set(&self, hook_id: &str, state: HookState, reason_code: &str) {
        self.hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                hook_id.to_string(),
                HookRecord {
                    state,
                    reason_code: reason_code.to_string(),
                },
            );
    }

    pub fn mark_installed(&self, hook_id: &str) {
        self.set(hook_id, HookState::Installed, "HOOK_OK");
    }

    pub fn mark_failed(&self, hook_id: &str, reason_code: &str) {
        self.set(hook_id, HookState::Failed, reason_code);
    }

    pub fn mark_rolled_back(&self, hook_id: &str) {
        self.set(hook_id, HookState::RolledBack, "ROLLBACK_SUCCESS");
    }

    pub fn get(&self, hook_id: &str) -> HookRecord {
        self.hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(hook_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Hook ids currently installed.
    pub fn installed(&self) -> Vec<String> {
        self.hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|(_, r)| r.state == HookState::Installed)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

// ─── Plugins ──────────────────────────────────────────────────────────────

/// What a plugin sees of a routed request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginRequest {
    pub feature_id: String,
    /// `None` when the caller did not supply a usable process id.
    pub process_id: Option<u32>,
    pub int_value: Option<i64>,
    pub bool_value: Option<bool>,
    pub enable: Option<bool>,
    pub lock_value: bool,
    /// Lowercase anchor names resolved for the target.
    pub anchors: BTreeSet<String>,
}

impl PluginRequest {
    fn from_sdk(feature_id: &str, request: &SdkOperationRequest) -> Self {
        let payload = &request.payload;
        Self {
            feature_id: feature_id.to_string(),
            process_id: context_u32(&request.context, CONTEXT_PROCESS_ID).filter(|pid| *pid > 0),
            int_value: payload.get("intValue").and_then(Value::as_i64),
            bool_value: payload.get("boolValue").and_then(Value::as_bool),
            enable: payload.get("enable").and_then(Value::as_bool),
            lock_value: payload
                .get("lockCredits")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            anchors: normalize_anchors(request.context.get(CONTEXT_ANCHORS)),
        }
    }

    /// First of `candidates` present among the resolved anchors.
    fn find_anchor(&self, candidates: &[&'static str]) -> Option<&'static str> {
        candidates.iter().copied().find(|a| self.anchors.contains(*a))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PluginOutcome {
    pub succeeded: bool,
    pub reason_code: SdkReasonCode,
    pub hook_state: &'static str,
    pub message: String,
    pub diagnostics: Diagnostics,
}

impl PluginOutcome {
    fn accepted(hook_state: &'static str, message: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            reason_code: SdkReasonCode::CapabilityProbePass,
            hook_state,
            message: message.into(),
            diagnostics: Diagnostics::new(),
        }
    }

    fn denied(reason_code: SdkReasonCode, message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            reason_code,
            hook_state: "DENIED",
            message: message.into(),
            diagnostics: Diagnostics::new(),
        }
    }

    fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.diagnostics.insert(key.to_string(), value.into());
        self
    }
}

/// One extender plugin. Each serves a fixed set of feature ids.
pub trait ExtenderPlugin: Send + Sync {
    fn id(&self) -> &'static str;
    fn features(&self) -> &'static [&'static str];
    fn execute(&self, request: &PluginRequest) -> PluginOutcome;
}

fn missing_process(request: &PluginRequest) -> PluginOutcome {
    PluginOutcome::denied(
        SdkReasonCode::CapabilityRequiredMissing,
        format!("processId is required for {}", request.feature_id),
    )
    .with("requiredField", "processId")
}

/// `set_credits`, one-shot or locked.
#[derive(Debug, Default)]
pub struct EconomyPlugin;

impl ExtenderPlugin for EconomyPlugin {
    fn id(&self) -> &'static str {
        "economy"
    }

    fn features(&self) -> &'static [&'static str] {
        &["set_credits"]
    }

    fn execute(&self, request: &PluginRequest) -> PluginOutcome {
        let Some(value) = request.int_value else {
            return PluginOutcome::denied(
                SdkReasonCode::CapabilityRequiredMissing,
                "set_credits requires intValue",
            )
            .with("requiredField", "intValue");
        };
        if value < 0 {
            return PluginOutcome::denied(
                SdkReasonCode::SafetyMutationBlocked,
                "intValue must be non-negative for set_credits",
            )
            .with("intValue", value);
        }
        let (hook_state, message) = if request.lock_value {
            ("HOOK_LOCK", "credits lock activated")
        } else {
            ("HOOK_ONESHOT", "credits one-shot applied")
        };
        PluginOutcome::accepted(hook_state, message)
            .with("intValue", value)
            .with("lockCredits", request.lock_value)
    }
}

/// Boolean world toggles. Each needs its anchor resolved.
#[derive(Debug, Default)]
pub struct GlobalTogglePlugin;

impl GlobalTogglePlugin {
    fn anchor_candidates(feature_id: &str) -> &'static [&'static str] {
        match feature_id {
            "freeze_timer" => &["game_timer_freeze", "freeze_timer"],
            "toggle_fog" => &["fog_reveal", "toggle_fog"],
            _ => &["ai_enabled", "toggle_ai"],
        }
    }
}

impl ExtenderPlugin for GlobalTogglePlugin {
    fn id(&self) -> &'static str {
        "global_toggle"
    }

    fn features(&self) -> &'static [&'static str] {
        &["freeze_timer", "toggle_fog", "toggle_ai"]
    }

    fn execute(&self, request: &PluginRequest) -> PluginOutcome {
        if request.process_id.is_none() {
            return missing_process(request);
        }
        let Some(anchor) = request.find_anchor(Self::anchor_candidates(&request.feature_id)) else {
            return PluginOutcome::denied(
                SdkReasonCode::CapabilityRequiredMissing,
                format!("no resolved anchor for {}", request.feature_id),
            )
            .with("requiredField", "anchors")
            .with("anchorCount", request.anchors.len());
        };
        let enabled = request.bool_value.unwrap_or(false);
        PluginOutcome::accepted(
            if enabled { "HOOK_ENABLED" } else { "HOOK_DISABLED" },
            format!("{} set to {enabled}", request.feature_id),
        )
        .with("anchorKey", anchor)
        .with("boolValue", enabled)
    }
}

/// Unit-cap patch. The cap is bounded whenever the patch is enabled.
#[derive(Debug, Default)]
pub struct BuildPatchPlugin;

impl ExtenderPlugin for BuildPatchPlugin {
    fn id(&self) -> &'static str {
        "build_patch"
    }

    fn features(&self) -> &'static [&'static str] {
        &["set_unit_cap"]
    }

    fn execute(&self, request: &PluginRequest) -> PluginOutcome {
        if request.process_id.is_none() {
            return missing_process(request);
        }
        let enable = request.enable.or(request.bool_value).unwrap_or(true);
        let value = request.int_value.unwrap_or(0);
        if enable && !(MIN_UNIT_CAP..=MAX_UNIT_CAP).contains(&value) {
            return PluginOutcome::denied(
                SdkReasonCode::SafetyMutationBlocked,
                format!("unit cap must be within {MIN_UNIT_CAP}..={MAX_UNIT_CAP}"),
            )
            .with("intValue", value)
            .with("minIntValue", MIN_UNIT_CAP)
            .with("maxIntValue", MAX_UNIT_CAP);
        }
        let anchor = request.find_anchor(&["unit_cap", "set_unit_cap"]);
        PluginOutcome::accepted(
            if enable { "HOOK_PATCH_ENABLED" } else { "HOOK_PATCH_DISABLED" },
            if enable {
                format!("unit cap patched to {value}")
            } else {
                "unit cap patch disabled".to_string()
            },
        )
        .with("anchorKey", anchor.unwrap_or("none"))
        .with("enable", enable)
        .with("intValue", value)
    }
}

// ─── Backend ──────────────────────────────────────────────────────────────

/// Dispatches SDK operations to the plugin that serves them.
pub struct ExtenderBackend {
    plugins: Vec<Arc<dyn ExtenderPlugin>>,
    probe: CapabilityProbe,
    hooks: HookLifecycle,
}

impl Default for ExtenderBackend {
    fn default() -> Self {
        Self::new(vec![
            Arc::new(EconomyPlugin),
            Arc::new(GlobalTogglePlugin),
            Arc::new(BuildPatchPlugin),
        ])
    }
}

impl ExtenderBackend {
    /// Load `plugins` and probe every feature they advertise.
    pub fn new(plugins: Vec<Arc<dyn ExtenderPlugin>>) -> Self {
        let probe = CapabilityProbe::default();
        for plugin in &plugins {
            for feature in plugin.features() {
                probe.mark_available(feature, SdkReasonCode::CapabilityProbePass);
            }
        }
        Self {
            plugins,
            probe,
            hooks: HookLifecycle::default(),
        }
    }

    pub fn probe(&self) -> &CapabilityProbe {
        &self.probe
    }

    pub fn hook(&self, feature_id: &str) -> HookRecord {
        self.hooks.get(&feature_id.to_ascii_lowercase())
    }

    /// Roll back every installed hook. Returns the rolled-back hook ids.
    pub fn roll_back_all(&self) -> Vec<String> {
        let installed = self.hooks.installed();
        for hook_id in &installed {
            self.hooks.mark_rolled_back(hook_id);
        }
        if !installed.is_empty() {
            tracing::info!(hooks = installed.len(), "extender hooks rolled back");
        }
        installed
    }

    fn plugin_for(&self, feature_id: &str) -> Option<&Arc<dyn ExtenderPlugin>> {
        self.plugins
            .iter()
            .find(|p| p.features().contains(&feature_id))
    }
}

#[async_trait]
impl SdkExecutionBackend for ExtenderBackend {
    async fn execute(&self, request: &SdkOperationRequest) -> Result<SdkOperationResult> {
        let feature_id = request.operation_id.trim().to_ascii_lowercase();
        let Some(plugin) = self.plugin_for(&feature_id) else {
            return Ok(SdkOperationResult::failure(
                format!("no extender plugin serves '{feature_id}'"),
                SdkReasonCode::CapabilityRequiredMissing,
                CapabilityState::Unavailable,
            ));
        };
        if !self.probe.is_available(&feature_id) {
            return Ok(SdkOperationResult::failure(
                format!("'{feature_id}' has not passed its capability probe"),
                SdkReasonCode::CapabilityUnknown,
                CapabilityState::Unknown,
            ));
        }

        let outcome = plugin.execute(&PluginRequest::from_sdk(&feature_id, request));
        if outcome.succeeded {
            self.hooks.mark_installed(&feature_id);
        } else {
            self.hooks.mark_failed(&feature_id, outcome.reason_code.as_str());
        }
        tracing::debug!(
            plugin = plugin.id(),
            feature_id = %feature_id,
            succeeded = outcome.succeeded,
            hook_state = outcome.hook_state,
            "extender plugin executed"
        );

        let capability_state = if outcome.succeeded {
            CapabilityState::Verified
        } else {
            CapabilityState::Unavailable
        };
        let mut result = if outcome.succeeded {
            SdkOperationResult::success(outcome.message, outcome.reason_code, capability_state)
        } else {
            SdkOperationResult::failure(outcome.message, outcome.reason_code, capability_state)
        };
        result.diagnostics = outcome.diagnostics;
        Ok(result
            .with_diagnostic("plugin", plugin.id())
            .with_diagnostic("featureId", feature_id.as_str())
            .with_diagnostic("hookState", outcome.hook_state))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
