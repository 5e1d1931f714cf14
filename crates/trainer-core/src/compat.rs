//! Promotion-readiness report for a profile.

use serde::{Deserialize, Serialize};

use crate::profile::TrainerProfile;
use crate::reliability::{sort_case_insensitive, ActionReliabilityInfo, ReliabilityEvaluator};
use crate::session::{ExternalCatalog, SessionState};
use crate::types::{DependencyValidationStatus, ReliabilityState, SymbolHealth};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityReport {
    pub profile_id: String,
    pub session_attached: bool,
    pub runtime_mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_status: Option<DependencyValidationStatus>,
    pub unresolved_critical_symbols: usize,
    pub promotion_ready: bool,
    pub actions: Vec<ActionReliabilityInfo>,
    pub notes: Vec<String>,
}

/// Pure aggregation over the reliability evaluator. Never executes.
pub struct CompatibilityReporter {
    evaluator: ReliabilityEvaluator,
}

impl CompatibilityReporter {
    pub fn new(evaluator: ReliabilityEvaluator) -> Self {
        Self { evaluator }
    }

    pub fn build(
        &self,
        profile: &TrainerProfile,
        session: &SessionState,
        dependency_status: Option<DependencyValidationStatus>,
        catalog: Option<&ExternalCatalog>,
    ) -> CompatibilityReport {
        let critical = profile.critical_symbols(self.evaluator.config());
        let mut notes = Vec::new();

        let (actions, unresolved) = match session {
            SessionState::Attached(attached) => {
                // A critical symbol the resolver never reported counts as unresolved.
                let unresolved = critical
                    .iter()
                    .filter(|name| {
                        attached
                            .symbol(name)
                            .map_or(true, |s| s.health == SymbolHealth::Unresolved)
                    })
                    .count();
                (self.evaluator.evaluate(profile, attached, catalog), unresolved)
            }
            SessionState::Detached => {
                notes.push("no session attached; all actions reported unavailable".to_string());
                let mut actions: Vec<ActionReliabilityInfo> = profile
                    .actions
                    .keys()
                    .map(|id| {
                        ActionReliabilityInfo::new(
                            id.clone(),
                            ReliabilityState::Unavailable,
                            "session_unavailable",
                            0.0,
                        )
                    })
                    .collect();
                sort_case_insensitive(&mut actions, |a| a.action_id.as_str());
                (actions, critical.len())
            }
        };

        match dependency_status {
            Some(DependencyValidationStatus::SoftFail) => notes.push(
                "dependency validation soft-failed; some actions are disabled".to_string(),
            ),
            Some(DependencyValidationStatus::HardFail) => notes.push(
                "dependency validation hard-failed; profile cannot be promoted".to_string(),
            ),
            _ => {}
        }
        if unresolved > 0 {
            notes.push(format!("{unresolved} critical symbol(s) unresolved"));
        }

        let any_unavailable = actions
            .iter()
            .any(|a| a.state == ReliabilityState::Unavailable);
        let promotion_ready = dependency_status != Some(DependencyValidationStatus::HardFail)
            && unresolved == 0
            && !any_unavailable;

        tracing::debug!(
            profile_id = %profile.id,
            unresolved,
            promotion_ready,
            "compatibility report built"
        );

        CompatibilityReport {
            profile_id: profile.id.clone(),
            session_attached: session.is_attached(),
            runtime_mode: session.mode().as_str().to_string(),
            dependency_status,
            unresolved_critical_symbols: unresolved,
            promotion_ready,
            actions,
            notes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainerConfig;
    use crate::profile::ActionSpec;
    use crate::session::{AttachSession, SymbolInfo};
    use crate::types::{ExecutionKind, RuntimeMode, ValueType};

    fn reporter() -> CompatibilityReporter {
        CompatibilityReporter::new(ReliabilityEvaluator::with_default_rules(TrainerConfig::default()))
    }

    fn profile() -> TrainerProfile {
        TrainerProfile::new("base")
            .with_action(ActionSpec::new("set_credits", ExecutionKind::Memory))
            .with_metadata("criticalSymbols", "credits")
    }

    fn attached(health: SymbolHealth) -> SessionState {
        let mut credits = SymbolInfo::healthy_signature("credits", 0x1000, ValueType::Int);
        credits.health = health;
        SessionState::Attached(AttachSession::new(4, RuntimeMode::Galactic).with_symbol(credits))
    }

    #[test]
    fn healthy_session_is_promotion_ready() {
        let report = reporter().build(
            &profile(),
            &attached(SymbolHealth::Healthy),
            Some(DependencyValidationStatus::Pass),
            None,
        );
        assert_eq!(report.unresolved_critical_symbols, 0);
        assert!(report.promotion_ready, "{report:?}");
        assert!(report.notes.is_empty());
    }

    #[test]
    fn unresolved_critical_symbol_blocks_promotion() {
        let report = reporter().build(&profile(), &attached(SymbolHealth::Unresolved), None, None);
        assert_eq!(report.unresolved_critical_symbols, 1);
        assert!(!report.promotion_ready);
        assert!(report.notes.iter().any(|n| n.contains("critical symbol")));
    }

    #[test]
    fn hard_fail_blocks_promotion_with_note() {
        let report = reporter().build(
            &profile(),
            &attached(SymbolHealth::Healthy),
            Some(DependencyValidationStatus::HardFail),
            None,
        );
        assert!(!report.promotion_ready);
        assert!(report.notes.iter().any(|n| n.contains("hard-failed")));
    }

    #[test]
    fn soft_fail_is_noted_but_not_blocking() {
        let report = reporter().build(
            &profile(),
            &attached(SymbolHealth::Healthy),
            Some(DependencyValidationStatus::SoftFail),
            None,
        );
        assert!(report.promotion_ready);
        assert!(report.notes.iter().any(|n| n.contains("soft-failed")));
    }

    #[test]
    fn detached_session_forces_every_action_unavailable() {
        let report = reporter().build(&profile(), &SessionState::Detached, None, None);
        assert!(!report.session_attached);
        assert_eq!(report.runtime_mode, "unknown");
        assert!(report
            .actions
            .iter()
            .all(|a| a.state == ReliabilityState::Unavailable && a.reason_code == "session_unavailable"));
        assert_eq!(report.unresolved_critical_symbols, 1);
        assert!(!report.promotion_ready);
        assert!(report.notes[0].contains("no session"));
    }

    #[test]
    fn missing_critical_symbol_counts_as_unresolved() {
        let session = SessionState::Attached(AttachSession::new(4, RuntimeMode::Galactic));
        let report = reporter().build(&profile(), &session, None, None);
        assert_eq!(report.unresolved_critical_symbols, 1);
    }

    #[test]
    fn unavailable_action_alone_blocks_promotion() {
        let profile = profile().with_action(
            ActionSpec::new("set_selected_hp", ExecutionKind::Memory)
                .with_mode(RuntimeMode::Tactical)
                .with_required(&["symbol", "floatValue"]),
        );
        let report = reporter().build(
            &profile,
            &attached(SymbolHealth::Healthy),
            Some(DependencyValidationStatus::Pass),
            None,
        );
        assert_eq!(report.unresolved_critical_symbols, 0);
        let hp = report
            .actions
            .iter()
            .find(|a| a.action_id == "set_selected_hp")
            .unwrap();
        assert_eq!(hp.state, ReliabilityState::Unavailable);
        assert_eq!(hp.reason_code, "mode_mismatch");
        assert!(!report.promotion_ready);
        assert!(report.notes.is_empty());
    }
}
