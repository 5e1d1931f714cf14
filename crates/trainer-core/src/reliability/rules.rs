use super::{EvalContext, Rule};
use crate::types::{ExecutionKind, ReliabilityState, SymbolHealth, SymbolSource};

// ---------------------------------------------------------------------------
// Helper macro for concise rule definitions
// ---------------------------------------------------------------------------

macro_rules! rule {
    (
        id: $id:expr,
        condition: $cond:expr,
        state: $state:expr,
        reason: $reason:expr,
        confidence: $conf:expr
        $(, note: $note:expr)?
    ) => {
        Rule {
            id: $id,
            condition: $cond,
            state: $state,
            reason_code: $reason,
            confidence: $conf,
            note: {
                #[allow(unused_assignments, unused_mut)]
                let mut v: Option<fn(&EvalContext) -> String> = None;
                $(v = Some($note);)?
                v
            },
        }
    };
}

// ---------------------------------------------------------------------------
// Condition helpers
// ---------------------------------------------------------------------------

fn is_fallback(ctx: &EvalContext) -> bool {
    ctx.config.fallback_flag(&ctx.action.id).is_some()
}

fn fallback_flag_enabled(ctx: &EvalContext) -> bool {
    ctx.config
        .fallback_flag(&ctx.action.id)
        .is_some_and(|flag| ctx.profile.flag_enabled(flag))
}

fn session_mode_unknown(ctx: &EvalContext) -> bool {
    !ctx.session.mode.is_known()
}

fn declares_mode(ctx: &EvalContext) -> bool {
    ctx.action.enforced_mode().is_some()
}

fn mode_differs(ctx: &EvalContext) -> bool {
    ctx.action
        .enforced_mode()
        .is_some_and(|required| required != ctx.session.mode)
}

fn symbol_unusable(ctx: &EvalContext) -> bool {
    ctx.symbol().map_or(true, |s| s.is_unusable())
}

fn symbol_is_critical(ctx: &EvalContext) -> bool {
    ctx.symbol_name()
        .is_some_and(|name| ctx.critical_symbols.contains(name))
}

fn symbol_health(ctx: &EvalContext) -> Option<SymbolHealth> {
    ctx.symbol().map(|s| s.health)
}

fn symbol_source(ctx: &EvalContext) -> Option<SymbolSource> {
    ctx.symbol().map(|s| s.source)
}

fn mode_note(ctx: &EvalContext) -> String {
    match ctx.action.enforced_mode() {
        Some(required) => format!(
            "requires {required} mode, session is {}",
            ctx.session.mode
        ),
        None => format!("session mode is {}", ctx.session.mode),
    }
}

fn symbol_note(ctx: &EvalContext) -> String {
    match (ctx.symbol_name(), ctx.symbol()) {
        (Some(name), Some(sym)) => format!(
            "symbol '{name}' health={} source={} address=0x{:x}",
            sym.health, sym.source, sym.address
        ),
        (Some(name), None) => format!("symbol '{name}' missing from session"),
        (None, _) => "no symbol binding".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Default rules (priority-ordered)
// ---------------------------------------------------------------------------

pub fn default_rules() -> Vec<Rule> {
    vec![
        // 1. Fallback whose enabling flag is off
        rule! {
            id: "fallback_disabled",
            condition: |ctx| is_fallback(ctx) && !fallback_flag_enabled(ctx),
            state: ReliabilityState::Unavailable,
            reason: |_| "fallback_disabled",
            confidence: |_| 1.0,
            note: |ctx| format!(
                "enable feature flag '{}' to allow this fallback",
                ctx.config.fallback_flag(&ctx.action.id).unwrap_or_default()
            )
        },
        // 2. Enabled fallbacks are never promoted automatically
        rule! {
            id: "fallback_enabled",
            condition: is_fallback,
            state: ReliabilityState::Experimental,
            reason: |_| "fallback_experimental",
            confidence: |_| 0.45
        },
        // 3. Dependency validation disabled the action for this session
        rule! {
            id: "dependency_disabled",
            condition: |ctx| ctx.dependency_disabled.contains(&ctx.action.id),
            state: ReliabilityState::Unavailable,
            reason: |_| "dependency_disabled",
            confidence: |_| 0.99
        },
        // 4. Strict bundle refuses to run without concrete mode detection
        rule! {
            id: "strict_mode_unknown",
            condition: |ctx| ctx.config.is_strict(&ctx.action.id) && session_mode_unknown(ctx),
            state: ReliabilityState::Unavailable,
            reason: |_| "mode_unknown_strict_gate",
            confidence: |_| 0.90,
            note: mode_note
        },
        // 5a. Declared mode, undetected session mode
        rule! {
            id: "declared_mode_unknown",
            condition: |ctx| declares_mode(ctx) && session_mode_unknown(ctx),
            state: ReliabilityState::Unavailable,
            reason: |_| "mode_unknown",
            confidence: |_| 0.90,
            note: mode_note
        },
        // 5b. Declared mode differs from the session's concrete mode
        rule! {
            id: "declared_mode_mismatch",
            condition: mode_differs,
            state: ReliabilityState::Unavailable,
            reason: |_| "mode_mismatch",
            confidence: |_| 1.0,
            note: mode_note
        },
        // 6a. Helper actions with a populated external catalog
        rule! {
            id: "helper_catalog_present",
            condition: |ctx| ctx.action.execution_kind == ExecutionKind::Helper
                && ctx.catalog.is_some_and(|c| c.has_entries()),
            state: ReliabilityState::Stable,
            reason: |_| "helper_catalog_available",
            confidence: |_| 0.85
        },
        // 6b. Helper actions without one
        rule! {
            id: "helper_catalog_missing",
            condition: |ctx| ctx.action.execution_kind == ExecutionKind::Helper,
            state: ReliabilityState::Experimental,
            reason: |_| "helper_catalog_missing",
            confidence: |_| 0.60
        },
        // 7. No address resolution involved
        rule! {
            id: "no_symbol_required",
            condition: |ctx| !ctx.action.requires_symbol(),
            state: ReliabilityState::Stable,
            reason: |_| "no_symbol_required",
            confidence: |_| 0.85
        },
        // 8. Needs a symbol but none is registered for the action
        rule! {
            id: "symbol_mapping_missing",
            condition: |ctx| ctx.symbol_name().is_none(),
            state: ReliabilityState::Experimental,
            reason: |_| "symbol_mapping_missing",
            confidence: |_| 0.45
        },
        // 9. Mapped symbol absent, zero or unresolved
        rule! {
            id: "symbol_unresolved",
            condition: symbol_unusable,
            state: ReliabilityState::Unavailable,
            reason: |_| "symbol_unresolved",
            confidence: |_| 0.95,
            note: symbol_note
        },
        // 10. Critical symbols must be healthy
        rule! {
            id: "critical_symbol_unhealthy",
            condition: |ctx| symbol_is_critical(ctx)
                && symbol_health(ctx) != Some(SymbolHealth::Healthy),
            state: ReliabilityState::Unavailable,
            reason: |_| "critical_symbol_unhealthy",
            confidence: |ctx| ctx.symbol_confidence(),
            note: symbol_note
        },
        // 11. Degraded or fallback-sourced resolution
        rule! {
            id: "symbol_degraded_or_fallback",
            condition: |ctx| symbol_health(ctx) == Some(SymbolHealth::Degraded)
                || symbol_source(ctx) == Some(SymbolSource::Fallback),
            state: ReliabilityState::Experimental,
            reason: |ctx| if symbol_health(ctx) == Some(SymbolHealth::Degraded) {
                "symbol_degraded"
            } else {
                "symbol_fallback_offset"
            },
            confidence: |ctx| ctx.symbol_confidence(),
            note: symbol_note
        },
        // 12. Healthy resolution
        rule! {
            id: "symbol_healthy",
            condition: |_| true,
            state: ReliabilityState::Stable,
            reason: |ctx| if symbol_source(ctx) == Some(SymbolSource::Signature) {
                "healthy_signature"
            } else {
                "healthy_other_source"
            },
            confidence: |ctx| ctx.symbol_confidence()
        },
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
