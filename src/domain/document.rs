//! Navigation over schema-less dashboard JSON.
//!
//! Dashboard documents differ by schema version and by datasource plugin, so
//! every reader here is lenient: a missing key or a value of the wrong type
//! reads as the zero value instead of failing.

use serde_json::Value;

use super::DomainError;

pub trait JsonExt {
    /// Follows `keys` through nested objects.
    fn path(&self, keys: &[&str]) -> Option<&Value>;
    fn path_mut(&mut self, keys: &[&str]) -> Option<&mut Value>;
    fn str_at(&self, key: &str) -> &str;
    fn bool_at(&self, key: &str) -> bool;
    fn i64_at(&self, key: &str) -> i64;
    fn array_at(&self, key: &str) -> &[Value];
    /// True when `key` is present and not null.
    fn has(&self, key: &str) -> bool;
}

impl JsonExt for Value {
    fn path(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter().try_fold(self, |node, key| node.get(*key))
    }

    fn path_mut(&mut self, keys: &[&str]) -> Option<&mut Value> {
        keys.iter().try_fold(self, |node, key| node.get_mut(*key))
    }

    fn str_at(&self, key: &str) -> &str {
        self.get(key).and_then(Value::as_str).unwrap_or_default()
    }

    fn bool_at(&self, key: &str) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or_default()
    }

    fn i64_at(&self, key: &str) -> i64 {
        self.get(key).map(as_i64_lenient).unwrap_or_default()
    }

    fn array_at(&self, key: &str) -> &[Value] {
        self.get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn has(&self, key: &str) -> bool {
        self.get(key).map_or(false, |v| !v.is_null())
    }
}

/// Integral numbers stored as floats (`1.0`) still identify panels.
pub fn as_i64_lenient(value: &Value) -> i64 {
    if let Some(n) = value.as_i64() {
        return n;
    }
    match value.as_f64() {
        Some(f) if f.fract() == 0.0 && f.is_finite() => f as i64,
        _ => 0,
    }
}

/// Replaces the string at `key` with `f(current)`. Non-string values are
/// left untouched.
pub fn rewrite_str(node: &mut Value, key: &str, f: impl FnOnce(&str) -> String) {
    if let Some(slot) = node.get_mut(key) {
        if let Some(current) = slot.as_str() {
            let rewritten = f(current);
            *slot = Value::String(rewritten);
        }
    }
}

/// Structural copy through the serialized form.
///
/// Re-parsing enforces serde_json's nesting limit, so documents nested deeper
/// than that cannot be copied and surface as `InternalServerError`.
pub fn deep_copy(value: &Value) -> Result<Value, DomainError> {
    let encoded = serde_json::to_vec(value).map_err(|e| {
        DomainError::InternalServerError(format!("failed to encode dashboard: {}", e))
    })?;
    serde_json::from_slice(&encoded).map_err(|e| {
        DomainError::InternalServerError(format!("failed to copy dashboard: {}", e))
    })
}

/// Result of a best-effort transformation. `Degraded` carries the untouched
/// input together with the reason the transformation was skipped.
#[derive(Debug)]
pub enum Outcome<T> {
    Ok(T),
    Degraded(T, DomainError),
}

impl<T> Outcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            Outcome::Ok(value) | Outcome::Degraded(value, _) => value,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded(..))
    }

    pub fn cause(&self) -> Option<&DomainError> {
        match self {
            Outcome::Ok(_) => None,
            Outcome::Degraded(_, cause) => Some(cause),
        }
    }
}
