//! Binary fingerprinting, profile-variant resolution, capability maps and
//! the execution guard that turns a capability record into allow/deny.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::Path;

use super::SdkReasonCode;
use crate::error::Result;
use crate::types::CapabilityState;

pub const WILDCARD: &str = "*";

// ─── Fingerprint ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryFingerprint {
    /// `<module stem>_<first 16 hex chars of sha256>`
    pub fingerprint_id: String,
    pub sha256: String,
    pub module_name: String,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
}

impl BinaryFingerprint {
    pub fn from_bytes(module_name: &str, bytes: &[u8], process_id: Option<u32>) -> Self {
        let sha256 = hex::encode(Sha256::digest(bytes));
        let stem = Path::new(module_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(module_name)
            .to_ascii_lowercase();
        Self {
            fingerprint_id: format!("{stem}_{}", &sha256[..16]),
            sha256,
            module_name: module_name.to_string(),
            file_size: bytes.len() as u64,
            process_id,
        }
    }
}

#[async_trait]
pub trait FingerprintService: Send + Sync {
    async fn capture_from_path(&self, path: &str, process_id: Option<u32>) -> Result<BinaryFingerprint>;
}

/// Hashes the target image on disk.
#[derive(Debug, Default)]
pub struct FileFingerprintService;

#[async_trait]
impl FingerprintService for FileFingerprintService {
    async fn capture_from_path(&self, path: &str, process_id: Option<u32>) -> Result<BinaryFingerprint> {
        let bytes = tokio::fs::read(path).await?;
        let module_name = Path::new(path)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(path);
        let fingerprint = BinaryFingerprint::from_bytes(module_name, &bytes, process_id);
        tracing::debug!(path, fingerprint_id = %fingerprint.fingerprint_id, "binary fingerprinted");
        Ok(fingerprint)
    }
}

// ─── Profile variant ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileVariantResolution {
    pub requested_profile_id: String,
    pub resolved_profile_id: String,
    pub reason_code: String,
    pub confidence: f64,
}

#[async_trait]
pub trait ProfileVariantResolver: Send + Sync {
    async fn resolve(&self, profile_id: &str) -> Result<ProfileVariantResolution>;
}

/// Treats the requested profile as the variant.
#[derive(Debug, Default)]
pub struct PassthroughVariantResolver;

#[async_trait]
impl ProfileVariantResolver for PassthroughVariantResolver {
    async fn resolve(&self, profile_id: &str) -> Result<ProfileVariantResolution> {
        Ok(ProfileVariantResolution {
            requested_profile_id: profile_id.to_string(),
            resolved_profile_id: profile_id.to_string(),
            reason_code: "explicit_profile_selection".to_string(),
            confidence: 1.0,
        })
    }
}

// ─── Capability map ───────────────────────────────────────────────────────

/// What the capability map author declared for the matched entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityMetadata {
    pub source_reason_code: String,
    pub source_state: CapabilityState,
    pub declared_available: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_anchors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResolutionResult {
    pub fingerprint_id: String,
    pub state: CapabilityState,
    pub reason_code: SdkReasonCode,
    pub metadata: CapabilityMetadata,
}

#[async_trait]
pub trait CapabilityMapResolver: Send + Sync {
    async fn resolve(
        &self,
        fingerprint: &BinaryFingerprint,
        variant: &str,
        operation_id: &str,
        anchors: &BTreeSet<String>,
    ) -> Result<CapabilityResolutionResult>;
}

fn wildcard() -> String {
    WILDCARD.to_string()
}

fn default_true() -> bool {
    true
}

fn default_source_reason() -> String {
    SdkReasonCode::CapabilityProbePass.as_str().to_string()
}

/// One declared capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityEntry {
    #[serde(default = "wildcard")]
    pub fingerprint_id: String,
    #[serde(default = "wildcard")]
    pub variant: String,
    pub operation_id: String,
    pub state: CapabilityState,
    #[serde(default = "default_true")]
    pub available: bool,
    /// Lowercase anchor names that must all be resolved.
    #[serde(default)]
    pub required_anchors: BTreeSet<String>,
    #[serde(default = "default_source_reason")]
    pub reason_code: String,
}

impl CapabilityEntry {
    pub fn new(operation_id: impl Into<String>, state: CapabilityState) -> Self {
        Self {
            fingerprint_id: wildcard(),
            variant: wildcard(),
            operation_id: operation_id.into(),
            state,
            available: true,
            required_anchors: BTreeSet::new(),
            reason_code: default_source_reason(),
        }
    }

    pub fn for_fingerprint(mut self, fingerprint_id: impl Into<String>) -> Self {
        self.fingerprint_id = fingerprint_id.into();
        self
    }

    pub fn for_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = variant.into();
        self
    }

    pub fn requiring(mut self, anchors: &[&str]) -> Self {
        self.required_anchors = anchors.iter().map(|a| a.to_ascii_lowercase()).collect();
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Match specificity, or `None` when the entry does not apply.
    fn specificity(&self, fingerprint_id: &str, variant: &str, operation_id: &str) -> Option<u8> {
        if !self.operation_id.eq_ignore_ascii_case(operation_id) {
            return None;
        }
        let fp = match self.fingerprint_id.as_str() {
            WILDCARD => 0,
            id if id == fingerprint_id => 2,
            _ => return None,
        };
        let var = match self.variant.as_str() {
            WILDCARD => 0,
            v if v.eq_ignore_ascii_case(variant) => 1,
            _ => return None,
        };
        Some(fp + var)
    }
}

/// Capability map declared up front. The most specific matching entry wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticCapabilityMap {
    entries: Vec<CapabilityEntry>,
}

impl StaticCapabilityMap {
    pub fn new(entries: Vec<CapabilityEntry>) -> Self {
        Self { entries }
    }

    pub fn with_entry(mut self, entry: CapabilityEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn lookup(
        &self,
        fingerprint: &BinaryFingerprint,
        variant: &str,
        operation_id: &str,
        anchors: &BTreeSet<String>,
    ) -> CapabilityResolutionResult {
        let matched = self
            .entries
            .iter()
            .filter_map(|e| {
                e.specificity(&fingerprint.fingerprint_id, variant, operation_id)
                    .map(|s| (s, e))
            })
            .max_by_key(|(s, _)| *s)
            .map(|(_, e)| e);

        let Some(entry) = matched else {
            return CapabilityResolutionResult {
                fingerprint_id: fingerprint.fingerprint_id.clone(),
                state: CapabilityState::Unknown,
                reason_code: SdkReasonCode::CapabilityUnknown,
                metadata: CapabilityMetadata {
                    source_reason_code: SdkReasonCode::CapabilityUnknown.as_str().to_string(),
                    source_state: CapabilityState::Unknown,
                    declared_available: false,
                    missing_anchors: Vec::new(),
                },
            };
        };

        let missing: Vec<String> = entry
            .required_anchors
            .iter()
            .filter(|a| !anchors.contains(a.as_str()))
            .cloned()
            .collect();

        let (state, reason_code) = if !entry.available || !missing.is_empty() {
            (CapabilityState::Unavailable, SdkReasonCode::CapabilityRequiredMissing)
        } else {
            (entry.state, SdkReasonCode::CapabilityProbePass)
        };

        CapabilityResolutionResult {
            fingerprint_id: fingerprint.fingerprint_id.clone(),
            state,
            reason_code,
            metadata: CapabilityMetadata {
                source_reason_code: entry.reason_code.clone(),
                source_state: entry.state,
                declared_available: entry.available,
                missing_anchors: missing,
            },
        }
    }
}

#[async_trait]
impl CapabilityMapResolver for StaticCapabilityMap {
    async fn resolve(
        &self,
        fingerprint: &BinaryFingerprint,
        variant: &str,
        operation_id: &str,
        anchors: &BTreeSet<String>,
    ) -> Result<CapabilityResolutionResult> {
        Ok(self.lookup(fingerprint, variant, operation_id, anchors))
    }
}

/// Normalize resolved anchors from request context into a lowercase set.
///
/// Accepts a list, a JSON-encoded string holding a list, a comma-separated
/// string, or an anchor map (keys with a non-empty value count).
pub fn normalize_anchors(value: Option<&Value>) -> BTreeSet<String> {
    let normalize = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_ascii_lowercase())
    };

    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(normalize)
            .collect(),
        Some(Value::String(raw)) => {
            let trimmed = raw.trim();
            if trimmed.starts_with('[') {
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(parsed @ Value::Array(_)) => normalize_anchors(Some(&parsed)),
                    _ => {
                        tracing::debug!(raw = trimmed, "ignoring malformed anchor list");
                        BTreeSet::new()
                    }
                }
            } else {
                trimmed.split(',').filter_map(normalize).collect()
            }
        }
        Some(Value::Object(map)) => map
            .iter()
            .filter(|(_, v)| match v {
                Value::Null => false,
                Value::String(s) => !s.trim().is_empty(),
                _ => true,
            })
            .filter_map(|(k, _)| normalize(k.as_str()))
            .collect(),
        _ => BTreeSet::new(),
    }
}

// ─── Execution guard ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GuardDecision {
    pub allowed: bool,
    pub reason_code: SdkReasonCode,
}

/// Policy applied to a capability record before dispatch.
pub trait ExecutionGuard: Send + Sync {
    fn evaluate(&self, capability: &CapabilityResolutionResult, is_mutation: bool) -> GuardDecision;
}

/// Verified runs; Experimental runs read-only operations only.
#[derive(Debug, Default)]
pub struct DefaultExecutionGuard;

impl ExecutionGuard for DefaultExecutionGuard {
    fn evaluate(&self, capability: &CapabilityResolutionResult, is_mutation: bool) -> GuardDecision {
        match capability.state {
            CapabilityState::Verified => GuardDecision {
                allowed: true,
                reason_code: capability.reason_code,
            },
            CapabilityState::Experimental if !is_mutation => GuardDecision {
                allowed: true,
                reason_code: capability.reason_code,
            },
            CapabilityState::Experimental => GuardDecision {
                allowed: false,
                reason_code: SdkReasonCode::SafetyMutationBlocked,
            },
            CapabilityState::Unknown | CapabilityState::Unavailable => GuardDecision {
                allowed: false,
                reason_code: capability.reason_code,
            },
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
