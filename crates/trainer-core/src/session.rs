use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::{parse_csv, TrainerConfig};
use crate::types::{RuntimeMode, SymbolHealth, SymbolSource, ValueType};

// ---------------------------------------------------------------------------
// SymbolInfo
// ---------------------------------------------------------------------------

/// A resolved (or unresolved) named memory location in the target.
///
/// Produced by the external resolver on every attach; read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    #[serde(default)]
    pub address: u64,
    pub value_type: ValueType,
    #[serde(default)]
    pub source: SymbolSource,
    #[serde(default)]
    pub confidence: f64,
    pub health: SymbolHealth,
    #[serde(default)]
    pub diagnostics: String,
}

impl SymbolInfo {
    pub fn healthy_signature(name: impl Into<String>, address: u64, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            address,
            value_type,
            source: SymbolSource::Signature,
            confidence: 1.0,
            health: SymbolHealth::Healthy,
            diagnostics: String::new(),
        }
    }

    /// True when the symbol cannot be used at all.
    pub fn is_unusable(&self) -> bool {
        self.address == 0 || self.health == SymbolHealth::Unresolved
    }
}

pub type SymbolMap = BTreeMap<String, SymbolInfo>;

// ---------------------------------------------------------------------------
// AttachSession / SessionState
// ---------------------------------------------------------------------------

/// One attach/detach cycle against a target process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachSession {
    pub process_id: u32,
    #[serde(default)]
    pub process_name: String,
    #[serde(default)]
    pub process_path: String,
    #[serde(default)]
    pub mode: RuntimeMode,
    #[serde(default)]
    pub symbols: SymbolMap,
    /// Free-form policy signals, e.g. dependency-disabled action CSV.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl AttachSession {
    pub fn new(process_id: u32, mode: RuntimeMode) -> Self {
        Self {
            process_id,
            mode,
            ..Default::default()
        }
    }

    pub fn with_symbol(mut self, symbol: SymbolInfo) -> Self {
        self.symbols.insert(symbol.name.clone(), symbol);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn symbol(&self, name: &str) -> Option<&SymbolInfo> {
        self.symbols.get(name)
    }

    pub fn dependency_disabled_actions(&self, config: &TrainerConfig) -> BTreeSet<String> {
        parse_csv(
            self.metadata
                .get(&config.dependency_disabled_key)
                .map(String::as_str),
        )
    }
}

/// Whether a target process is currently attached.
#[derive(Debug, Clone, Default)]
pub enum SessionState {
    Attached(AttachSession),
    #[default]
    Detached,
}

impl SessionState {
    pub fn attached(&self) -> Option<&AttachSession> {
        match self {
            SessionState::Attached(session) => Some(session),
            SessionState::Detached => None,
        }
    }

    pub fn is_attached(&self) -> bool {
        matches!(self, SessionState::Attached(_))
    }

    /// Current mode; a detached session has no concrete mode.
    pub fn mode(&self) -> RuntimeMode {
        self.attached()
            .map(|s| s.mode)
            .unwrap_or(RuntimeMode::Unknown)
    }
}

impl From<Option<AttachSession>> for SessionState {
    fn from(value: Option<AttachSession>) -> Self {
        match value {
            Some(session) => SessionState::Attached(session),
            None => SessionState::Detached,
        }
    }
}

// ---------------------------------------------------------------------------
// ExternalCatalog
// ---------------------------------------------------------------------------

/// Lists of known game entities keyed by category (e.g. `unit_ids`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalCatalog(pub BTreeMap<String, Vec<String>>);

impl ExternalCatalog {
    pub fn has_entries(&self) -> bool {
        self.0.values().any(|entries| !entries.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_address_is_unusable() {
        let mut sym = SymbolInfo::healthy_signature("credits", 0, ValueType::Int);
        assert!(sym.is_unusable());
        sym.address = 0x1000;
        assert!(!sym.is_unusable());
        sym.health = SymbolHealth::Unresolved;
        assert!(sym.is_unusable());
    }

    #[test]
    fn detached_session_has_unknown_mode() {
        assert_eq!(SessionState::Detached.mode(), RuntimeMode::Unknown);
        let state = SessionState::Attached(AttachSession::new(42, RuntimeMode::Galactic));
        assert_eq!(state.mode(), RuntimeMode::Galactic);
    }

    #[test]
    fn dependency_disabled_actions_from_metadata() {
        let cfg = TrainerConfig::default();
        let session = AttachSession::new(1, RuntimeMode::Galactic)
            .with_metadata("dependencyDisabledActions", "set_credits,toggle_ai");
        let disabled = session.dependency_disabled_actions(&cfg);
        assert!(disabled.contains("set_credits"));
        assert!(disabled.contains("toggle_ai"));
    }

    #[test]
    fn catalog_with_only_empty_lists_has_no_entries() {
        let mut catalog = ExternalCatalog::default();
        assert!(!catalog.has_entries());
        catalog.0.insert("unit_ids".to_string(), Vec::new());
        assert!(!catalog.has_entries());
        catalog.0.insert("hero_ids".to_string(), vec!["luke".to_string()]);
        assert!(catalog.has_entries());
    }

    #[test]
    fn session_json_defaults() {
        let json = r#"{"process_id": 7, "symbols": {"credits": {"name": "credits", "address": 4096, "value_type": "int", "health": "healthy"}}}"#;
        let session: AttachSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.mode, RuntimeMode::Unknown);
        assert_eq!(session.symbol("credits").unwrap().source, SymbolSource::None);
    }
}
