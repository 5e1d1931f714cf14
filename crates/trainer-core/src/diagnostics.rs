//! Open string-keyed maps used only at the I/O boundary.

use serde_json::Value;
use std::collections::BTreeMap;

/// Additive key/value bag returned to callers. Keys are never exhaustive.
pub type Diagnostics = BTreeMap<String, Value>;

/// Overlay `context` on top of `diagnostics`; context wins on collision.
pub fn merge_context(diagnostics: &Diagnostics, context: &Diagnostics) -> Diagnostics {
    let mut merged = diagnostics.clone();
    for (key, value) in context {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Read a string entry, treating empty strings as absent.
pub fn context_str<'a>(map: &'a Diagnostics, key: &str) -> Option<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn context_u32(map: &Diagnostics, key: &str) -> Option<u32> {
    match map.get(key)? {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_wins_on_collision() {
        let mut diag = Diagnostics::new();
        diag.insert("symbol".into(), json!("credits"));
        diag.insert("backend".into(), json!("memory"));
        let mut ctx = Diagnostics::new();
        ctx.insert("backend".into(), json!("ui"));
        let merged = merge_context(&diag, &ctx);
        assert_eq!(merged["backend"], json!("ui"));
        assert_eq!(merged["symbol"], json!("credits"));
    }

    #[test]
    fn context_str_ignores_blank() {
        let mut ctx = Diagnostics::new();
        ctx.insert("processPath".into(), json!("  "));
        assert_eq!(context_str(&ctx, "processPath"), None);
        ctx.insert("processPath".into(), json!("C:/game.exe"));
        assert_eq!(context_str(&ctx, "processPath"), Some("C:/game.exe"));
    }

    #[test]
    fn context_u32_accepts_strings() {
        let mut ctx = Diagnostics::new();
        ctx.insert("processId".into(), json!("4242"));
        assert_eq!(context_u32(&ctx, "processId"), Some(4242));
        ctx.insert("processId".into(), json!(17));
        assert_eq!(context_u32(&ctx, "processId"), Some(17));
        ctx.insert("processId".into(), json!(-1));
        assert_eq!(context_u32(&ctx, "processId"), None);
    }
}
