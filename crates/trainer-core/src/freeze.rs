use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::Result;
use crate::payload::ScalarValue;

/// Pins symbol values until explicitly released.
///
/// The pulse loop that keeps re-writing pinned values lives outside this
/// crate; it polls [`FreezeRegistry::pinned`].
#[async_trait]
pub trait FreezeService: Send + Sync {
    async fn freeze(&self, symbol: &str, value: ScalarValue) -> Result<()>;

    /// Returns whether a pin existed.
    async fn unfreeze(&self, symbol: &str) -> Result<bool>;

    /// Returns how many pins were released.
    async fn unfreeze_all(&self) -> Result<usize>;
}

#[derive(Debug, Default)]
pub struct FreezeRegistry {
    pins: Mutex<BTreeMap<String, ScalarValue>>,
}

impl FreezeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pinned(&self, symbol: &str) -> Option<ScalarValue> {
        self.pins
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(symbol)
            .copied()
    }

    /// Pinned symbols in name order.
    pub fn pinned_symbols(&self) -> Vec<(String, ScalarValue)> {
        self.pins
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}

#[async_trait]
impl FreezeService for FreezeRegistry {
    async fn freeze(&self, symbol: &str, value: ScalarValue) -> Result<()> {
        self.pins
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(symbol.to_string(), value);
        tracing::debug!(symbol, %value, "symbol pinned");
        Ok(())
    }

    async fn unfreeze(&self, symbol: &str) -> Result<bool> {
        let removed = self
            .pins
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(symbol)
            .is_some();
        Ok(removed)
    }

    async fn unfreeze_all(&self) -> Result<usize> {
        let mut pins = self
            .pins
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = pins.len();
        pins.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn freeze_replaces_previous_pin() {
        let registry = FreezeRegistry::new();
        registry.freeze("credits", ScalarValue::Int(100)).await.unwrap();
        registry.freeze("credits", ScalarValue::Int(500)).await.unwrap();
        assert_eq!(registry.pinned("credits"), Some(ScalarValue::Int(500)));
    }

    #[tokio::test]
    async fn unfreeze_reports_whether_pin_existed() {
        let registry = FreezeRegistry::new();
        assert!(!registry.unfreeze("credits").await.unwrap());
        registry.freeze("credits", ScalarValue::Int(1)).await.unwrap();
        assert!(registry.unfreeze("credits").await.unwrap());
        assert_eq!(registry.pinned("credits"), None);
    }

    #[tokio::test]
    async fn unfreeze_all_clears_everything() {
        let registry = FreezeRegistry::new();
        registry.freeze("credits", ScalarValue::Int(1)).await.unwrap();
        registry.freeze("fog_reveal", ScalarValue::Bool(true)).await.unwrap();
        assert_eq!(registry.unfreeze_all().await.unwrap(), 2);
        assert!(registry.pinned_symbols().is_empty());
    }
}
