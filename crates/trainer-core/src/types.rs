use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TrainerError;

// ---------------------------------------------------------------------------
// RuntimeMode
// ---------------------------------------------------------------------------

/// Execution context the target process is currently in.
///
/// `Unknown` means mode detection has not produced a concrete answer. It is
/// never equal to a concrete mode and is treated as "do not enforce" by the
/// orchestrator, but as "refuse" by strict gates.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    #[default]
    Unknown,
    Menu,
    Galactic,
    Tactical,
}

impl RuntimeMode {
    pub fn is_known(self) -> bool {
        !matches!(self, RuntimeMode::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeMode::Unknown => "unknown",
            RuntimeMode::Menu => "menu",
            RuntimeMode::Galactic => "galactic",
            RuntimeMode::Tactical => "tactical",
        }
    }
}

impl fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RuntimeMode {
    type Err = TrainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unknown" | "" => Ok(RuntimeMode::Unknown),
            "menu" => Ok(RuntimeMode::Menu),
            "galactic" => Ok(RuntimeMode::Galactic),
            "tactical" | "land" | "space" => Ok(RuntimeMode::Tactical),
            _ => Err(TrainerError::InvalidMode(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionKind
// ---------------------------------------------------------------------------

/// Which backend executes an action. Fixed for the lifetime of a loaded spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    Memory,
    Freeze,
    Helper,
    Sdk,
    CodePatch,
}

impl ExecutionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionKind::Memory => "memory",
            ExecutionKind::Freeze => "freeze",
            ExecutionKind::Helper => "helper",
            ExecutionKind::Sdk => "sdk",
            ExecutionKind::CodePatch => "code_patch",
        }
    }
}

impl fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionKind {
    type Err = TrainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(ExecutionKind::Memory),
            "freeze" => Ok(ExecutionKind::Freeze),
            "helper" => Ok(ExecutionKind::Helper),
            "sdk" => Ok(ExecutionKind::Sdk),
            "code_patch" => Ok(ExecutionKind::CodePatch),
            _ => Err(TrainerError::InvalidExecutionKind(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// SymbolSource / SymbolHealth / ValueType
// ---------------------------------------------------------------------------

/// How a symbol's address was found.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SymbolSource {
    Signature,
    Fallback,
    #[default]
    None,
}

impl SymbolSource {
    pub fn as_str(self) -> &'static str {
        match self {
            SymbolSource::Signature => "signature",
            SymbolSource::Fallback => "fallback",
            SymbolSource::None => "none",
        }
    }
}

impl fmt::Display for SymbolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SymbolSource {
    type Err = TrainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signature" => Ok(SymbolSource::Signature),
            "fallback" => Ok(SymbolSource::Fallback),
            "none" => Ok(SymbolSource::None),
            _ => Err(TrainerError::InvalidSymbolSource(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolHealth {
    Healthy,
    Degraded,
    Unresolved,
}

impl SymbolHealth {
    pub fn as_str(self) -> &'static str {
        match self {
            SymbolHealth::Healthy => "healthy",
            SymbolHealth::Degraded => "degraded",
            SymbolHealth::Unresolved => "unresolved",
        }
    }
}

impl fmt::Display for SymbolHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SymbolHealth {
    type Err = TrainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(SymbolHealth::Healthy),
            "degraded" => Ok(SymbolHealth::Degraded),
            "unresolved" => Ok(SymbolHealth::Unresolved),
            _ => Err(TrainerError::InvalidHealth(s.to_string())),
        }
    }
}

/// Declared width/kind of the value stored at a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Int,
    Float,
    Bool,
    Byte,
    Pointer,
}

impl ValueType {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Bool => "bool",
            ValueType::Byte => "byte",
            ValueType::Pointer => "pointer",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ValueType {
    type Err = TrainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int" => Ok(ValueType::Int),
            "float" => Ok(ValueType::Float),
            "bool" => Ok(ValueType::Bool),
            "byte" => Ok(ValueType::Byte),
            "pointer" => Ok(ValueType::Pointer),
            _ => Err(TrainerError::InvalidValueType(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ReliabilityState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReliabilityState {
    Stable,
    Experimental,
    Unavailable,
}

impl ReliabilityState {
    pub fn as_str(self) -> &'static str {
        match self {
            ReliabilityState::Stable => "stable",
            ReliabilityState::Experimental => "experimental",
            ReliabilityState::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for ReliabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReliabilityState {
    type Err = TrainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stable" => Ok(ReliabilityState::Stable),
            "experimental" => Ok(ReliabilityState::Experimental),
            "unavailable" => Ok(ReliabilityState::Unavailable),
            _ => Err(TrainerError::InvalidReliabilityState(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// CapabilityState
// ---------------------------------------------------------------------------

/// Whether the alternate SDK backend may run an operation on a given binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityState {
    Verified,
    Experimental,
    Unknown,
    Unavailable,
}

impl CapabilityState {
    pub fn as_str(self) -> &'static str {
        match self {
            CapabilityState::Verified => "verified",
            CapabilityState::Experimental => "experimental",
            CapabilityState::Unknown => "unknown",
            CapabilityState::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for CapabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CapabilityState {
    type Err = TrainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verified" => Ok(CapabilityState::Verified),
            "experimental" => Ok(CapabilityState::Experimental),
            "unknown" => Ok(CapabilityState::Unknown),
            "unavailable" => Ok(CapabilityState::Unavailable),
            _ => Err(TrainerError::InvalidCapabilityState(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// DependencyValidationStatus
// ---------------------------------------------------------------------------

/// Outcome of the external mod-dependency validation for a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyValidationStatus {
    Pass,
    SoftFail,
    HardFail,
}

impl DependencyValidationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DependencyValidationStatus::Pass => "pass",
            DependencyValidationStatus::SoftFail => "soft_fail",
            DependencyValidationStatus::HardFail => "hard_fail",
        }
    }
}

impl fmt::Display for DependencyValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DependencyValidationStatus {
    type Err = TrainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pass" => Ok(DependencyValidationStatus::Pass),
            "soft_fail" | "softfail" => Ok(DependencyValidationStatus::SoftFail),
            "hard_fail" | "hardfail" => Ok(DependencyValidationStatus::HardFail),
            _ => Err(TrainerError::InvalidDependencyStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_mode_parses_aliases() {
        assert_eq!("Tactical".parse::<RuntimeMode>().unwrap(), RuntimeMode::Tactical);
        assert_eq!("land".parse::<RuntimeMode>().unwrap(), RuntimeMode::Tactical);
        assert_eq!("".parse::<RuntimeMode>().unwrap(), RuntimeMode::Unknown);
        assert!("orbit".parse::<RuntimeMode>().is_err());
    }

    #[test]
    fn unknown_mode_is_not_known() {
        assert!(!RuntimeMode::Unknown.is_known());
        assert!(RuntimeMode::Galactic.is_known());
    }

    #[test]
    fn execution_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ExecutionKind::CodePatch).unwrap();
        assert_eq!(json, "\"code_patch\"");
        assert_eq!(
            "code_patch".parse::<ExecutionKind>().unwrap(),
            ExecutionKind::CodePatch
        );
    }

    #[test]
    fn defaults_are_the_undetected_values() {
        assert_eq!(RuntimeMode::default(), RuntimeMode::Unknown);
        assert_eq!(SymbolSource::default(), SymbolSource::None);
    }

    #[test]
    fn state_enums_round_trip_through_display() {
        for state in [
            ReliabilityState::Stable,
            ReliabilityState::Experimental,
            ReliabilityState::Unavailable,
        ] {
            assert_eq!(state.to_string().parse::<ReliabilityState>().unwrap(), state);
        }
        for state in [
            CapabilityState::Verified,
            CapabilityState::Experimental,
            CapabilityState::Unknown,
            CapabilityState::Unavailable,
        ] {
            assert_eq!(state.to_string().parse::<CapabilityState>().unwrap(), state);
        }
        assert_eq!("fallback".parse::<SymbolSource>().unwrap(), SymbolSource::Fallback);
        assert_eq!("pointer".parse::<ValueType>().unwrap(), ValueType::Pointer);
        assert_eq!(ValueType::Float.to_string(), "float");
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!(matches!(
            "solid".parse::<ReliabilityState>(),
            Err(TrainerError::InvalidReliabilityState(_))
        ));
        assert!(matches!(
            "maybe".parse::<CapabilityState>(),
            Err(TrainerError::InvalidCapabilityState(_))
        ));
        assert!(matches!("heap".parse::<SymbolSource>(), Err(TrainerError::InvalidSymbolSource(_))));
        assert!(matches!("i128".parse::<ValueType>(), Err(TrainerError::InvalidValueType(_))));
    }

    #[test]
    fn dependency_status_accepts_dashes() {
        assert_eq!(
            "hard-fail".parse::<DependencyValidationStatus>().unwrap(),
            DependencyValidationStatus::HardFail
        );
        assert_eq!(DependencyValidationStatus::SoftFail.to_string(), "soft_fail");
    }
}
