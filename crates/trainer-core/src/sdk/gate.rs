/// Process-wide opt-in for the SDK path.
pub trait SdkFeatureGate: Send + Sync {
    fn is_enabled(&self) -> bool;
}

/// Enabled only when the named environment variable is exactly `"1"`.
#[derive(Debug, Clone)]
pub struct EnvFeatureGate {
    var: String,
}

impl EnvFeatureGate {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl SdkFeatureGate for EnvFeatureGate {
    fn is_enabled(&self) -> bool {
        std::env::var(&self.var).is_ok_and(|v| v == "1")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StaticFeatureGate(pub bool);

impl SdkFeatureGate for StaticFeatureGate {
    fn is_enabled(&self) -> bool {
        self.0
    }
}
