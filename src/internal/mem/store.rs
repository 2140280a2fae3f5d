use std::collections::BTreeMap;
use std::fmt;

// Credential value. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("__REDACTED__")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SecretKey {
    pub security_id: String,
    pub path: String,
}

// In-memory credential table keyed by (security id, path). Nothing is
// persisted.
#[derive(Debug, Default)]
pub struct SecretStore {
    entries: BTreeMap<SecretKey, SecretValue>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Insert or overwrite the value for `(security_id, path)`.
    pub fn add(&mut self, security_id: &str, path: &str, value: &str) {
        let key = SecretKey {
            security_id: security_id.to_string(),
            path: path.to_string(),
        };
        self.entries.insert(key, SecretValue::new(value));
        tracing::debug!("{}: secret for {} updated", security_id, path);
    }

    pub fn get(&self, security_id: &str, path: &str) -> Option<&SecretValue> {
        let key = SecretKey {
            security_id: security_id.to_string(),
            path: path.to_string(),
        };
        self.entries.get(&key)
    }

    // Remove every entry matching both filters; `None` matches anything.
    // Returns the number of removed entries.
    pub fn clear(&mut self, security_id: Option<&str>, path: Option<&str>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| {
            let id_matches = security_id.map_or(true, |id| key.security_id == id);
            let path_matches = path.map_or(true, |p| key.path == p);
            !(id_matches && path_matches)
        });
        let removed = before - self.entries.len();
        tracing::debug!("cleared {} secrets ({:?}, {:?})", removed, security_id, path);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_value_is_redacted() {
        let value = SecretValue::new("hunter2");
        assert_eq!(format!("{:?}", value), "__REDACTED__");
        assert_eq!(value.expose(), "hunter2");
    }

    #[test]
    fn test_clear_by_path_only() {
        let mut store = SecretStore::new();
        store.add("a", "/modem/pin", "1");
        store.add("b", "/modem/pin", "2");
        store.add("b", "/modem/puk", "3");

        assert_eq!(store.clear(None, Some("/modem/pin")), 2);
        assert_eq!(store.len(), 1);
        assert!(store.get("b", "/modem/puk").is_some());
    }
}
