use crate::error::{Result, TrainerError};
use crate::types::RuntimeMode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// TrainerConfig
// ---------------------------------------------------------------------------

/// Policy knobs shared by the evaluator, router and transaction service.
///
/// Every field has a default, so an empty YAML document (or a missing file)
/// yields a fully usable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Environment variable that opts into the SDK execution path.
    #[serde(default = "default_sdk_gate_env")]
    pub sdk_gate_env: String,
    /// Mode the selected-unit transaction service targets.
    #[serde(default = "default_tactical_mode")]
    pub tactical_mode: RuntimeMode,
    /// Actions that refuse to run without concrete mode detection.
    #[serde(default = "default_strict_bundle")]
    pub strict_bundle: BTreeSet<String>,
    /// Fallback action id → feature flag that enables it.
    #[serde(default = "default_fallback_actions")]
    pub fallback_actions: BTreeMap<String, String>,
    /// Action id → symbol name the action writes through.
    #[serde(default = "default_symbol_bindings")]
    pub symbol_bindings: BTreeMap<String, String>,
    #[serde(default = "default_float_epsilon")]
    pub float_epsilon: f64,
    /// Profile metadata key holding the CSV of critical symbol names.
    #[serde(default = "default_critical_symbols_key")]
    pub critical_symbols_key: String,
    /// Session metadata key holding the CSV of dependency-disabled actions.
    #[serde(default = "default_dependency_disabled_key")]
    pub dependency_disabled_key: String,
}

fn default_sdk_gate_env() -> String {
    "TRAINER_EXPERIMENTAL_SDK".to_string()
}

fn default_tactical_mode() -> RuntimeMode {
    RuntimeMode::Tactical
}

fn default_strict_bundle() -> BTreeSet<String> {
    [
        "set_selected_hp",
        "set_selected_shield",
        "set_selected_speed",
        "set_selected_damage_multiplier",
        "set_selected_cooldown_multiplier",
        "set_selected_veterancy",
        "set_selected_owner_faction",
        "spawn_unit_helper",
        "toggle_tactical_god_mode",
        "toggle_tactical_one_hit_mode",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_fallback_actions() -> BTreeMap<String, String> {
    [
        ("set_unit_cap_patch_fallback", "allow_unit_cap_patch_fallback"),
        ("toggle_instant_build_patch_fallback", "allow_build_patch_fallback"),
    ]
    .iter()
    .map(|(a, f)| (a.to_string(), f.to_string()))
    .collect()
}

fn default_symbol_bindings() -> BTreeMap<String, String> {
    [
        ("set_credits", "credits"),
        ("freeze_timer", "game_timer_freeze"),
        ("toggle_fog_reveal", "fog_reveal"),
        ("toggle_ai", "ai_enabled"),
        ("set_unit_cap", "unit_cap"),
        ("toggle_instant_build", "instant_build"),
        ("toggle_tactical_god_mode", "tactical_god_mode"),
        ("toggle_tactical_one_hit_mode", "tactical_one_hit_mode"),
        ("set_selected_hp", "selected_hp"),
        ("set_selected_shield", "selected_shield"),
        ("set_selected_speed", "selected_speed"),
        ("set_selected_damage_multiplier", "selected_damage_multiplier"),
        ("set_selected_cooldown_multiplier", "selected_cooldown_multiplier"),
        ("set_selected_veterancy", "selected_veterancy"),
        ("set_selected_owner_faction", "selected_owner_faction"),
    ]
    .iter()
    .map(|(a, s)| (a.to_string(), s.to_string()))
    .collect()
}

fn default_float_epsilon() -> f64 {
    1e-4
}

fn default_critical_symbols_key() -> String {
    "criticalSymbols".to_string()
}

fn default_dependency_disabled_key() -> String {
    "dependencyDisabledActions".to_string()
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            sdk_gate_env: default_sdk_gate_env(),
            tactical_mode: default_tactical_mode(),
            strict_bundle: default_strict_bundle(),
            fallback_actions: default_fallback_actions(),
            symbol_bindings: default_symbol_bindings(),
            float_epsilon: default_float_epsilon(),
            critical_symbols_key: default_critical_symbols_key(),
            dependency_disabled_key: default_dependency_disabled_key(),
        }
    }
}

impl TrainerConfig {
    /// Load from a YAML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: TrainerConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// Load and reject configurations carrying any `WarnLevel::Error`.
    pub fn load_validated(path: &Path) -> Result<Self> {
        let cfg = Self::load(path)?;
        let errors: Vec<String> = cfg
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect();
        if !errors.is_empty() {
            return Err(TrainerError::Config(errors.join("; ")));
        }
        Ok(cfg)
    }

    pub fn is_strict(&self, action_id: &str) -> bool {
        self.strict_bundle.contains(action_id)
    }

    pub fn fallback_flag(&self, action_id: &str) -> Option<&str> {
        self.fallback_actions.get(action_id).map(String::as_str)
    }

    pub fn symbol_for(&self, action_id: &str) -> Option<&str> {
        self.symbol_bindings.get(action_id).map(String::as_str)
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.sdk_gate_env.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "sdk_gate_env must name an environment variable".to_string(),
            });
        }

        if !self.float_epsilon.is_finite() || self.float_epsilon <= 0.0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "float_epsilon must be a positive finite number (got {})",
                    self.float_epsilon
                ),
            });
        }

        if !self.tactical_mode.is_known() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "tactical_mode cannot be 'unknown'".to_string(),
            });
        }

        for action_id in &self.strict_bundle {
            if self.fallback_actions.contains_key(action_id) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "action '{action_id}' is both strict and a fallback; the fallback rule wins"
                    ),
                });
            }
        }

        for (action_id, flag) in &self.fallback_actions {
            if flag.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("fallback action '{action_id}' has an empty feature flag"),
                });
            }
        }

        warnings
    }
}

/// Split a comma-separated metadata value into trimmed, non-empty entries.
pub fn parse_csv(value: Option<&str>) -> BTreeSet<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        let cfg: TrainerConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.sdk_gate_env, "TRAINER_EXPERIMENTAL_SDK");
        assert_eq!(cfg.tactical_mode, RuntimeMode::Tactical);
        assert!(cfg.is_strict("spawn_unit_helper"));
        assert_eq!(cfg.symbol_for("set_credits"), Some("credits"));
        assert!((cfg.float_epsilon - 1e-4).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_yaml_overrides_single_field() {
        let yaml = "float_epsilon: 0.01\nstrict_bundle: [spawn_unit_helper]\n";
        let cfg: TrainerConfig = serde_yaml::from_str(yaml).unwrap();
        assert!((cfg.float_epsilon - 0.01).abs() < f64::EPSILON);
        assert_eq!(cfg.strict_bundle.len(), 1);
        assert!(!cfg.is_strict("set_selected_hp"));
        assert_eq!(cfg.dependency_disabled_key, "dependencyDisabledActions");
    }

    #[test]
    fn load_missing_file_returns_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = TrainerConfig::load(&dir.path().join("trainer.yaml")).unwrap();
        assert_eq!(cfg.critical_symbols_key, "criticalSymbols");
    }

    #[test]
    fn load_validated_rejects_bad_epsilon() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("trainer.yaml");
        std::fs::write(&path, "float_epsilon: -1.0\n").unwrap();
        let err = TrainerConfig::load_validated(&path).unwrap_err();
        assert!(err.to_string().contains("float_epsilon"));
    }

    #[test]
    fn validate_warns_on_strict_fallback_overlap() {
        let mut cfg = TrainerConfig::default();
        cfg.fallback_actions
            .insert("spawn_unit_helper".to_string(), "allow_spawn".to_string());
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, WarnLevel::Warning);
        assert!(warnings[0].message.contains("spawn_unit_helper"));
    }

    #[test]
    fn default_config_has_no_warnings() {
        assert!(TrainerConfig::default().validate().is_empty());
    }

    #[test]
    fn parse_csv_trims_and_skips_blanks() {
        let set = parse_csv(Some(" set_credits, ,toggle_ai ,"));
        assert_eq!(set.len(), 2);
        assert!(set.contains("set_credits"));
        assert!(set.contains("toggle_ai"));
        assert!(parse_csv(None).is_empty());
    }
}
