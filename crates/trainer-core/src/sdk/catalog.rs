use serde::Serialize;

use crate::types::RuntimeMode;

const ANY: &[RuntimeMode] = &[];
const TACTICAL: &[RuntimeMode] = &[RuntimeMode::Tactical];
const GALACTIC: &[RuntimeMode] = &[RuntimeMode::Galactic];
const TACTICAL_OR_GALACTIC: &[RuntimeMode] = &[RuntimeMode::Tactical, RuntimeMode::Galactic];
const GALACTIC_OR_TACTICAL: &[RuntimeMode] = &[RuntimeMode::Galactic, RuntimeMode::Tactical];

/// One operation the SDK backend understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SdkOperationSpec {
    pub id: &'static str,
    pub is_mutation: bool,
    /// Empty means any mode.
    pub allowed_modes: &'static [RuntimeMode],
}

impl SdkOperationSpec {
    const fn new(id: &'static str, is_mutation: bool, allowed_modes: &'static [RuntimeMode]) -> Self {
        Self {
            id,
            is_mutation,
            allowed_modes,
        }
    }

    pub fn allows(&self, mode: RuntimeMode) -> bool {
        self.allowed_modes.is_empty() || self.allowed_modes.contains(&mode)
    }

    pub fn allowed_mode_names(&self) -> Vec<&'static str> {
        self.allowed_modes.iter().map(|m| m.as_str()).collect()
    }
}

const V1_OPERATIONS: &[SdkOperationSpec] = &[
    SdkOperationSpec::new("list_selected", false, ANY),
    SdkOperationSpec::new("list_nearby", false, ANY),
    SdkOperationSpec::new("spawn", true, TACTICAL),
    SdkOperationSpec::new("kill", true, TACTICAL),
    SdkOperationSpec::new("set_owner", true, TACTICAL),
    SdkOperationSpec::new("set_hp", true, TACTICAL),
    SdkOperationSpec::new("set_shield", true, TACTICAL),
    SdkOperationSpec::new("set_cooldown", true, TACTICAL),
    SdkOperationSpec::new("freeze_timer", true, TACTICAL_OR_GALACTIC),
    SdkOperationSpec::new("toggle_fog", true, TACTICAL_OR_GALACTIC),
    SdkOperationSpec::new("toggle_ai", true, TACTICAL_OR_GALACTIC),
    SdkOperationSpec::new("set_credits", true, GALACTIC_OR_TACTICAL),
    SdkOperationSpec::new("set_unit_cap", true, GALACTIC),
];

/// Static v1 operation table. Lookup ignores case.
#[derive(Debug, Clone, Copy)]
pub struct SdkOperationCatalog {
    operations: &'static [SdkOperationSpec],
}

impl SdkOperationCatalog {
    pub fn v1() -> Self {
        Self {
            operations: V1_OPERATIONS,
        }
    }

    pub fn get(&self, operation_id: &str) -> Option<&'static SdkOperationSpec> {
        let wanted = operation_id.trim();
        self.operations
            .iter()
            .find(|op| op.id.eq_ignore_ascii_case(wanted))
    }

    pub fn operations(&self) -> &'static [SdkOperationSpec] {
        self.operations
    }
}

impl Default for SdkOperationCatalog {
    fn default() -> Self {
        Self::v1()
    }
}
