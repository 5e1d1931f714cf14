//! Advisory reliability scoring for every action in a profile.
//!
//! Scoring never executes anything. Each action is run through a
//! priority-ordered list of [`Rule`]s and the first matching rule decides the
//! verdict, so an early `Unavailable` can never be overridden by a later rule.

pub mod rules;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::TrainerConfig;
use crate::profile::{ActionSpec, TrainerProfile};
use crate::session::{AttachSession, ExternalCatalog, SymbolInfo};
use crate::types::ReliabilityState;

// ---------------------------------------------------------------------------
// EvalContext
// ---------------------------------------------------------------------------

pub struct EvalContext<'a> {
    pub action: &'a ActionSpec,
    pub profile: &'a TrainerProfile,
    pub session: &'a AttachSession,
    pub config: &'a TrainerConfig,
    pub catalog: Option<&'a ExternalCatalog>,
    pub dependency_disabled: &'a BTreeSet<String>,
    pub critical_symbols: &'a BTreeSet<String>,
}

impl<'a> EvalContext<'a> {
    /// Registered symbol name for the action, if any.
    pub fn symbol_name(&self) -> Option<&'a str> {
        self.config.symbol_for(&self.action.id)
    }

    pub fn symbol(&self) -> Option<&'a SymbolInfo> {
        self.symbol_name().and_then(|name| self.session.symbol(name))
    }

    /// Resolver confidence clamped to `[0, 1]`; non-finite values become 0.5.
    pub fn symbol_confidence(&self) -> f64 {
        self.symbol()
            .map(|s| clamp_confidence(s.confidence))
            .unwrap_or(0.0)
    }
}

pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.5
    }
}

// ---------------------------------------------------------------------------
// ActionReliabilityInfo (output)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionReliabilityInfo {
    pub action_id: String,
    pub state: ReliabilityState,
    /// Stable identifier, never prose.
    pub reason_code: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ActionReliabilityInfo {
    pub fn new(
        action_id: impl Into<String>,
        state: ReliabilityState,
        reason_code: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            state,
            reason_code: reason_code.into(),
            confidence,
            note: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// A fn-pointer rule: predicate plus the verdict it produces.
pub struct Rule {
    pub id: &'static str,
    pub condition: fn(&EvalContext) -> bool,
    pub state: ReliabilityState,
    pub reason_code: fn(&EvalContext) -> &'static str,
    pub confidence: fn(&EvalContext) -> f64,
    pub note: Option<fn(&EvalContext) -> String>,
}

// ---------------------------------------------------------------------------
// ReliabilityEvaluator
// ---------------------------------------------------------------------------

pub struct ReliabilityEvaluator {
    rules: Vec<Rule>,
    config: TrainerConfig,
}

impl ReliabilityEvaluator {
    pub fn new(rules: Vec<Rule>, config: TrainerConfig) -> Self {
        Self { rules, config }
    }

    pub fn with_default_rules(config: TrainerConfig) -> Self {
        Self::new(rules::default_rules(), config)
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Rule ids in evaluation order.
    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id).collect()
    }

    /// Score every action in `profile`, ordered case-insensitively by id.
    pub fn evaluate(
        &self,
        profile: &TrainerProfile,
        session: &AttachSession,
        catalog: Option<&ExternalCatalog>,
    ) -> Vec<ActionReliabilityInfo> {
        let dependency_disabled = session.dependency_disabled_actions(&self.config);
        let critical_symbols = profile.critical_symbols(&self.config);

        let mut actions: Vec<&ActionSpec> = profile.actions.values().collect();
        sort_case_insensitive(&mut actions, |a| a.id.as_str());

        actions
            .into_iter()
            .map(|action| {
                let ctx = EvalContext {
                    action,
                    profile,
                    session,
                    config: &self.config,
                    catalog,
                    dependency_disabled: &dependency_disabled,
                    critical_symbols: &critical_symbols,
                };
                self.evaluate_action(&ctx)
            })
            .collect()
    }

    pub fn evaluate_action(&self, ctx: &EvalContext) -> ActionReliabilityInfo {
        for rule in &self.rules {
            if (rule.condition)(ctx) {
                tracing::debug!(
                    action_id = %ctx.action.id,
                    rule = rule.id,
                    state = %rule.state,
                    "reliability rule matched"
                );
                return ActionReliabilityInfo {
                    action_id: ctx.action.id.clone(),
                    state: rule.state,
                    reason_code: (rule.reason_code)(ctx).to_string(),
                    confidence: (rule.confidence)(ctx),
                    note: rule.note.map(|f| f(ctx)),
                };
            }
        }

        // No rule claimed the action: refuse rather than guess.
        ActionReliabilityInfo {
            action_id: ctx.action.id.clone(),
            state: ReliabilityState::Unavailable,
            reason_code: "no_rule_matched".to_string(),
            confidence: 0.0,
            note: None,
        }
    }
}

/// Sort by lowercase key, breaking ties on the original key so the order is
/// total and deterministic.
pub(crate) fn sort_case_insensitive<T>(items: &mut [T], key: impl Fn(&T) -> &str) {
    items.sort_by(|a, b| {
        let (ka, kb) = (key(a), key(b));
        ka.to_lowercase()
            .cmp(&kb.to_lowercase())
            .then_with(|| ka.cmp(kb))
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
