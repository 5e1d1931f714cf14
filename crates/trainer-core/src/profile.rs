//! Trainer profiles and their action catalogs.
//!
//! A profile arrives already flattened: inheritance between profiles is
//! resolved by the repository before anything here sees it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use crate::config::{parse_csv, TrainerConfig};
use crate::error::{Result, TrainerError};
use crate::types::{ExecutionKind, RuntimeMode};

// ---------------------------------------------------------------------------
// ActionSpec
// ---------------------------------------------------------------------------

/// Required payload field names for an action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadSchema {
    #[serde(default)]
    pub required: Vec<String>,
}

impl PayloadSchema {
    pub fn requires(&self, field: &str) -> bool {
        self.required.iter().any(|f| f == field)
    }
}

/// One entry in a profile's action catalog. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub id: String,
    #[serde(default)]
    pub category: String,
    /// `None` means the action runs in any mode.
    #[serde(default)]
    pub required_mode: Option<RuntimeMode>,
    pub execution_kind: ExecutionKind,
    #[serde(default)]
    pub payload_schema: PayloadSchema,
    #[serde(default = "default_mutation")]
    pub is_mutation: bool,
}

fn default_mutation() -> bool {
    true
}

impl ActionSpec {
    pub fn new(id: impl Into<String>, kind: ExecutionKind) -> Self {
        Self {
            id: id.into(),
            category: String::new(),
            required_mode: None,
            execution_kind: kind,
            payload_schema: PayloadSchema::default(),
            is_mutation: true,
        }
    }

    pub fn with_mode(mut self, mode: RuntimeMode) -> Self {
        self.required_mode = Some(mode);
        self
    }

    pub fn with_required(mut self, fields: &[&str]) -> Self {
        self.payload_schema.required = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn read_only(mut self) -> Self {
        self.is_mutation = false;
        self
    }

    /// The mode this action is gated on. A declared `unknown` gates nothing.
    pub fn enforced_mode(&self) -> Option<RuntimeMode> {
        self.required_mode.filter(|mode| mode.is_known())
    }

    pub fn requires_symbol(&self) -> bool {
        self.payload_schema.requires("symbol")
    }
}

// ---------------------------------------------------------------------------
// TrainerProfile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainerProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionSpec>,
    #[serde(default)]
    pub feature_flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl TrainerProfile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Insert an action keyed by its own id.
    pub fn with_action(mut self, spec: ActionSpec) -> Self {
        self.actions.insert(spec.id.clone(), spec);
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>, enabled: bool) -> Self {
        self.feature_flags.insert(flag.into(), enabled);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn action(&self, id: &str) -> Option<&ActionSpec> {
        self.actions.get(id)
    }

    pub fn flag_enabled(&self, flag: &str) -> bool {
        self.feature_flags.get(flag).copied().unwrap_or(false)
    }

    /// Symbol names declared critical through profile metadata.
    pub fn critical_symbols(&self, config: &TrainerConfig) -> BTreeSet<String> {
        parse_csv(
            self.metadata
                .get(&config.critical_symbols_key)
                .map(String::as_str),
        )
    }
}

// ---------------------------------------------------------------------------
// ProfileRepository
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Return the profile with inheritance already flattened.
    async fn resolve_inherited_profile(&self, profile_id: &str) -> Result<TrainerProfile>;
}

/// Repository over profiles that are already flattened in memory.
#[derive(Default)]
pub struct InMemoryProfileRepository {
    profiles: RwLock<HashMap<String, TrainerProfile>>,
}

impl InMemoryProfileRepository {
    pub fn new(profiles: impl IntoIterator<Item = TrainerProfile>) -> Self {
        Self {
            profiles: RwLock::new(profiles.into_iter().map(|p| (p.id.clone(), p)).collect()),
        }
    }

}

#[async_trait]
impl ProfileRepository for InMemoryProfileRepository {
    async fn resolve_inherited_profile(&self, profile_id: &str) -> Result<TrainerProfile> {
        let guard = self
            .profiles
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .get(profile_id)
            .cloned()
            .ok_or_else(|| TrainerError::ProfileNotFound(profile_id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
