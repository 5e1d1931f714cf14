//! Typed action payloads.
//!
//! Callers hand over a loose JSON object. It is checked against the action's
//! required-field schema, then parsed exactly once into the variant matching
//! the action's execution kind. Everything past the orchestrator boundary
//! works with [`ActionPayload`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, TrainerError};
use crate::profile::ActionSpec;
use crate::types::ExecutionKind;

/// Bumped whenever a variant's required fields change.
pub const PAYLOAD_SCHEMA_VERSION: u32 = 1;

pub type RawPayload = Map<String, Value>;

const INT_KEY: &str = "intValue";
const FLOAT_KEY: &str = "floatValue";
const BOOL_KEY: &str = "boolValue";

// ---------------------------------------------------------------------------
// ScalarValue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ScalarValue {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ScalarValue {
    /// Extract exactly one of `intValue` / `floatValue` / `boolValue`.
    pub fn from_payload(action_id: &str, raw: &RawPayload) -> Result<Self> {
        let present: Vec<&str> = [INT_KEY, FLOAT_KEY, BOOL_KEY]
            .into_iter()
            .filter(|k| raw.get(*k).is_some_and(|v| !v.is_null()))
            .collect();

        match present.as_slice() {
            [] => Err(invalid(
                action_id,
                "expected one of intValue, floatValue or boolValue",
            )),
            [key] => Self::parse_field(action_id, key, &raw[*key]),
            _ => Err(invalid(
                action_id,
                &format!("ambiguous value fields: {}", present.join(", ")),
            )),
        }
    }

    fn parse_field(action_id: &str, key: &str, value: &Value) -> Result<Self> {
        let parsed = match key {
            INT_KEY => value.as_i64().map(ScalarValue::Int),
            FLOAT_KEY => value.as_f64().map(ScalarValue::Float),
            _ => value.as_bool().map(ScalarValue::Bool),
        };
        parsed.ok_or_else(|| invalid(action_id, &format!("{key} has the wrong type")))
    }

    pub fn payload_key(&self) -> &'static str {
        match self {
            ScalarValue::Int(_) => INT_KEY,
            ScalarValue::Float(_) => FLOAT_KEY,
            ScalarValue::Bool(_) => BOOL_KEY,
        }
    }

    pub fn to_json(&self) -> Value {
        match *self {
            ScalarValue::Int(v) => Value::from(v),
            ScalarValue::Float(v) => Value::from(v),
            ScalarValue::Bool(v) => Value::from(v),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            ScalarValue::Int(v) => v as f64,
            ScalarValue::Float(v) => v,
            ScalarValue::Bool(v) => f64::from(u8::from(v)),
        }
    }

    pub fn as_i64(&self) -> i64 {
        match *self {
            ScalarValue::Int(v) => v,
            ScalarValue::Float(v) => v as i64,
            ScalarValue::Bool(v) => i64::from(v),
        }
    }
}

impl std::fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarValue::Int(v) => write!(f, "{v}"),
            ScalarValue::Float(v) => write!(f, "{v}"),
            ScalarValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryPayload {
    pub symbol: String,
    pub value: ScalarValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FreezeDirective {
    Pin { value: ScalarValue },
    Release,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreezePayload {
    pub symbol: String,
    pub directive: FreezeDirective,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelperPayload {
    pub helper_hook_id: Option<String>,
    pub unit_id: Option<String>,
    pub arguments: RawPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdkPayload {
    pub arguments: RawPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodePatchPayload {
    pub symbol: String,
    pub enable: bool,
}

/// Closed union of payloads, one strict struct per execution kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionPayload {
    Memory(MemoryPayload),
    Freeze(FreezePayload),
    Helper(HelperPayload),
    Sdk(SdkPayload),
    CodePatch(CodePatchPayload),
}

impl ActionPayload {
    /// Parse `raw` into the variant for `spec.execution_kind`.
    ///
    /// Run [`first_missing_field`] first; this only checks kind-specific shape.
    pub fn parse(spec: &ActionSpec, raw: &RawPayload) -> Result<Self> {
        let id = spec.id.as_str();
        match spec.execution_kind {
            ExecutionKind::Memory => Ok(ActionPayload::Memory(MemoryPayload {
                symbol: required_symbol(id, raw)?,
                value: ScalarValue::from_payload(id, raw)?,
            })),
            ExecutionKind::Freeze => {
                let symbol = required_symbol(id, raw)?;
                let default_freeze = id != "unfreeze_symbol";
                let freeze = match raw.get("freeze") {
                    None | Some(Value::Null) => default_freeze,
                    Some(v) => v
                        .as_bool()
                        .ok_or_else(|| invalid(id, "freeze must be a boolean"))?,
                };
                let directive = if freeze {
                    FreezeDirective::Pin {
                        value: ScalarValue::from_payload(id, raw)?,
                    }
                } else {
                    FreezeDirective::Release
                };
                Ok(ActionPayload::Freeze(FreezePayload { symbol, directive }))
            }
            ExecutionKind::Helper => Ok(ActionPayload::Helper(HelperPayload {
                helper_hook_id: optional_str(raw, "helperHookId"),
                unit_id: optional_str(raw, "unitId"),
                arguments: raw.clone(),
            })),
            ExecutionKind::Sdk => Ok(ActionPayload::Sdk(SdkPayload {
                arguments: raw.clone(),
            })),
            ExecutionKind::CodePatch => {
                let enable = match raw.get("enable") {
                    None | Some(Value::Null) => true,
                    Some(v) => v
                        .as_bool()
                        .ok_or_else(|| invalid(id, "enable must be a boolean"))?,
                };
                Ok(ActionPayload::CodePatch(CodePatchPayload {
                    symbol: required_symbol(id, raw)?,
                    enable,
                }))
            }
        }
    }

    pub fn kind(&self) -> ExecutionKind {
        match self {
            ActionPayload::Memory(_) => ExecutionKind::Memory,
            ActionPayload::Freeze(_) => ExecutionKind::Freeze,
            ActionPayload::Helper(_) => ExecutionKind::Helper,
            ActionPayload::Sdk(_) => ExecutionKind::Sdk,
            ActionPayload::CodePatch(_) => ExecutionKind::CodePatch,
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        match self {
            ActionPayload::Memory(p) => Some(&p.symbol),
            ActionPayload::Freeze(p) => Some(&p.symbol),
            ActionPayload::CodePatch(p) => Some(&p.symbol),
            ActionPayload::Helper(_) | ActionPayload::Sdk(_) => None,
        }
    }
}

/// First schema field that is absent or null, in schema order.
pub fn first_missing_field<'a>(spec: &'a ActionSpec, raw: &RawPayload) -> Option<&'a str> {
    spec.payload_schema
        .required
        .iter()
        .find(|field| raw.get(field.as_str()).map_or(true, Value::is_null))
        .map(String::as_str)
}

fn required_symbol(action_id: &str, raw: &RawPayload) -> Result<String> {
    optional_str(raw, "symbol").ok_or_else(|| invalid(action_id, "symbol is required"))
}

fn optional_str(raw: &RawPayload, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn invalid(action_id: &str, reason: &str) -> TrainerError {
    TrainerError::InvalidPayload {
        action: action_id.to_string(),
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
