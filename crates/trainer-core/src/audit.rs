//! Audit records and sinks.
//!
//! Sinks are written permissively: a failed write is logged and swallowed so
//! it can never mask the result of the action being audited.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::types::SymbolSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionAuditRecord {
    pub timestamp: DateTime<Utc>,
    pub profile_id: String,
    pub process_id: u32,
    pub action_id: String,
    pub address_source: SymbolSource,
    pub succeeded: bool,
    pub message: String,
    #[serde(default)]
    pub diagnostics: Diagnostics,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, record: &ActionAuditRecord) -> Result<()>;
}

/// Emits each record as a structured log event.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn write(&self, record: &ActionAuditRecord) -> Result<()> {
        tracing::info!(
            target: "trainer::audit",
            profile_id = %record.profile_id,
            process_id = record.process_id,
            action_id = %record.action_id,
            address_source = %record.address_source,
            succeeded = record.succeeded,
            message = %record.message,
            "action audited"
        );
        Ok(())
    }
}

/// Keeps records in memory, in write order.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<ActionAuditRecord>>,
}

impl MemoryAuditSink {
    pub fn records(&self) -> Vec<ActionAuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, record: &ActionAuditRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.clone());
        Ok(())
    }
}
