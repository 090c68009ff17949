//! Set-once, read-many stores for values shared across the process.
//!
//! A [`Safe`] is owned by the application context and handed to whoever reads
//! it; nothing here is global. Values are written during startup and only read
//! afterwards.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{OnceLock, RwLock};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SafeError {
    #[error("safe entry {0} is already set")]
    AlreadySet(String),
    #[error("safe entry {0} is missing")]
    Missing(String),
    #[error("safe entry {0} rejected: {1}")]
    Invalid(String, String),
}

type Validator<K, V> = Box<dyn Fn(&K, &V) -> Result<(), String> + Send + Sync>;

/// Keyed store where every key is written once.
pub struct Safe<K, V> {
    entries: RwLock<HashMap<K, V>>,
    validator: Option<Validator<K, V>>,
}

impl<K, V> Default for Safe<K, V>
where
    K: Eq + Hash + Debug,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Safe<K, V>
where
    K: Eq + Hash + Debug,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            validator: None,
        }
    }

    /// Every value is checked by `validator` before it is stored.
    pub fn with_validator<F>(validator: F) -> Self
    where
        F: Fn(&K, &V) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            entries: RwLock::new(HashMap::new()),
            validator: Some(Box::new(validator)),
        }
    }

    pub fn set(&self, key: K, value: V) -> Result<(), SafeError> {
        if let Some(validator) = &self.validator {
            validator(&key, &value).map_err(|reason| SafeError::Invalid(format!("{key:?}"), reason))?;
        }
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(&key) {
            return Err(SafeError::AlreadySet(format!("{key:?}")));
        }
        entries.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &K) -> Result<V, SafeError> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .ok_or_else(|| SafeError::Missing(format!("{key:?}")))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Single-value specialization of [`Safe`] for scalar configuration.
pub struct SafeValue<T> {
    name: &'static str,
    value: OnceLock<T>,
    validator: Option<Box<dyn Fn(&T) -> Result<(), String> + Send + Sync>>,
}

impl<T> SafeValue<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            value: OnceLock::new(),
            validator: None,
        }
    }

    pub fn with_validator<F>(name: &'static str, validator: F) -> Self
    where
        F: Fn(&T) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            name,
            value: OnceLock::new(),
            validator: Some(Box::new(validator)),
        }
    }

    pub fn set(&self, value: T) -> Result<(), SafeError> {
        if let Some(validator) = &self.validator {
            validator(&value).map_err(|reason| SafeError::Invalid(self.name.to_string(), reason))?;
        }
        self.value
            .set(value)
            .map_err(|_| SafeError::AlreadySet(self.name.to_string()))
    }

    pub fn get(&self) -> Result<&T, SafeError> {
        self.value
            .get()
            .ok_or_else(|| SafeError::Missing(self.name.to_string()))
    }

    pub fn is_set(&self) -> bool {
        self.value.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_set_once_get_many() {
        let safe: Safe<String, String> = Safe::new();
        safe.set("en.not_found".to_string(), "Not found".to_string())
            .unwrap();
        assert_eq!(safe.get(&"en.not_found".to_string()).unwrap(), "Not found");
        assert_eq!(safe.get(&"en.not_found".to_string()).unwrap(), "Not found");
        assert_eq!(safe.len(), 1);
    }

    #[test]
    fn test_second_set_rejected() {
        let safe: Safe<&str, u32> = Safe::new();
        safe.set("port", 8080).unwrap();
        assert!(matches!(safe.set("port", 9090), Err(SafeError::AlreadySet(_))));
        assert_eq!(safe.get(&"port").unwrap(), 8080);
        assert_eq!(safe.keys(), vec!["port"]);
    }

    #[test]
    fn test_missing_key() {
        let safe: Safe<&str, u32> = Safe::new();
        assert!(matches!(safe.get(&"port"), Err(SafeError::Missing(_))));
        assert!(!safe.contains(&"port"));
    }

    #[test]
    fn test_validator_blocks_value() {
        let safe: Safe<&str, String> = Safe::with_validator(|_, value: &String| {
            if value.is_empty() {
                Err("empty message".to_string())
            } else {
                Ok(())
            }
        });
        assert!(matches!(safe.set("x", String::new()), Err(SafeError::Invalid(..))));
        assert!(safe.is_empty());
        safe.set("x", "ok".to_string()).unwrap();
    }

    #[test]
    fn test_safe_value_lifecycle() {
        let languages: SafeValue<Vec<String>> =
            SafeValue::with_validator("languages", |v: &Vec<String>| {
                if v.is_empty() {
                    Err("at least one language".to_string())
                } else {
                    Ok(())
                }
            });
        assert!(matches!(languages.get(), Err(SafeError::Missing(_))));
        assert!(languages.set(vec![]).is_err());
        languages.set(vec!["en".to_string()]).unwrap();
        assert!(matches!(
            languages.set(vec!["de".to_string()]),
            Err(SafeError::AlreadySet(_))
        ));
        assert_eq!(languages.get().unwrap(), &vec!["en".to_string()]);
    }

    #[test]
    fn test_concurrent_readers() {
        let safe = Arc::new(Safe::<u32, u32>::new());
        safe.set(1, 10).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let safe = Arc::clone(&safe);
                std::thread::spawn(move || safe.get(&1).unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 10);
        }
    }
}
