//! Startup-time registry that builds and memoizes shared instances.
//!
//! Constructors are declared by name; a resolve with argument values that are
//! structurally equal to an earlier resolve returns the same instance.

use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Instance = Arc<dyn Any + Send + Sync>;
type Constructor = Arc<dyn Fn(Value) -> Result<Instance, InjectorError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InjectorError {
    #[error("no constructor registered as '{0}'")]
    Unknown(String),
    #[error("a constructor is already registered as '{0}'")]
    Duplicate(String),
    #[error("constructor '{0}' does not build the requested type")]
    TypeMismatch(String),
    #[error("arguments for '{0}' are invalid: {1}")]
    InvalidArguments(String, String),
}

#[derive(Default)]
pub struct Injector {
    constructors: Mutex<HashMap<String, Constructor>>,
    instances: Mutex<HashMap<String, Vec<(Value, Instance)>>>,
}

impl Injector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T, A, F>(&self, name: &str, constructor: F) -> Result<(), InjectorError>
    where
        T: Send + Sync + 'static,
        A: DeserializeOwned,
        F: Fn(A) -> T + Send + Sync + 'static,
    {
        let owner = name.to_string();
        let build: Constructor = Arc::new(move |args: Value| {
            let args: A = serde_json::from_value(args)
                .map_err(|e| InjectorError::InvalidArguments(owner.clone(), e.to_string()))?;
            Ok(Arc::new(constructor(args)) as Instance)
        });
        let mut constructors = self.constructors.lock().unwrap_or_else(|e| e.into_inner());
        if constructors.contains_key(name) {
            return Err(InjectorError::Duplicate(name.to_string()));
        }
        constructors.insert(name.to_string(), build);
        Ok(())
    }

    pub fn resolve<T, A>(&self, name: &str, args: &A) -> Result<Arc<T>, InjectorError>
    where
        T: Send + Sync + 'static,
        A: Serialize,
    {
        let key = serde_json::to_value(args)
            .map_err(|e| InjectorError::InvalidArguments(name.to_string(), e.to_string()))?;

        let mut instances = self.instances.lock().unwrap_or_else(|e| e.into_inner());
        let memoized = instances
            .get(name)
            .and_then(|built| built.iter().find(|(args, _)| *args == key))
            .map(|(_, instance)| Arc::clone(instance));

        let instance = match memoized {
            Some(instance) => instance,
            None => {
                let constructor = self
                    .constructors
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .get(name)
                    .cloned()
                    .ok_or_else(|| InjectorError::Unknown(name.to_string()))?;
                let instance = constructor(key.clone())?;
                debug!("injector: built '{}' for {}", name, key);
                instances
                    .entry(name.to_string())
                    .or_default()
                    .push((key, Arc::clone(&instance)));
                instance
            }
        };

        instance
            .downcast::<T>()
            .map_err(|_| InjectorError::TypeMismatch(name.to_string()))
    }

    /// Number of memoized instances across all names.
    pub fn len(&self) -> usize {
        self.instances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug)]
    struct Repository {
        collection: String,
        options: Value,
    }

    #[derive(Serialize, Deserialize)]
    struct RepositoryArgs {
        collection: String,
        options: Value,
    }

    fn injector() -> Injector {
        let injector = Injector::new();
        injector
            .register("repository", |args: RepositoryArgs| Repository {
                collection: args.collection,
                options: args.options,
            })
            .unwrap();
        injector
    }

    #[test]
    fn test_equal_arguments_share_instance() {
        let injector = injector();
        let a: Arc<Repository> = injector
            .resolve(
                "repository",
                &json!({"collection": "accounts", "options": {"a": 1, "b": [1, 2]}}),
            )
            .unwrap();
        let b: Arc<Repository> = injector
            .resolve(
                "repository",
                &json!({"options": {"b": [1, 2], "a": 1}, "collection": "accounts"}),
            )
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(injector.len(), 1);
        assert_eq!(a.collection, "accounts");
        assert_eq!(a.options["a"], json!(1));
    }

    #[test]
    fn test_different_arguments_build_new_instance() {
        let injector = injector();
        let a: Arc<Repository> = injector
            .resolve(
                "repository",
                &RepositoryArgs {
                    collection: "accounts".to_string(),
                    options: Value::Null,
                },
            )
            .unwrap();
        let b: Arc<Repository> = injector
            .resolve(
                "repository",
                &RepositoryArgs {
                    collection: "orders".to_string(),
                    options: Value::Null,
                },
            )
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(injector.len(), 2);
    }

    #[test]
    fn test_unknown_name() {
        let injector = injector();
        let result = injector.resolve::<Repository, _>("cache", &json!({}));
        assert_eq!(result.unwrap_err(), InjectorError::Unknown("cache".to_string()));
    }

    #[test]
    fn test_wrong_type_requested() {
        let injector = injector();
        let result = injector.resolve::<String, _>(
            "repository",
            &json!({"collection": "accounts", "options": null}),
        );
        assert_eq!(
            result.unwrap_err(),
            InjectorError::TypeMismatch("repository".to_string())
        );
    }

    #[test]
    fn test_invalid_arguments() {
        let injector = injector();
        let result = injector.resolve::<Repository, _>("repository", &json!({"collection": 5}));
        assert!(matches!(result, Err(InjectorError::InvalidArguments(..))));
        assert!(injector.is_empty());
    }

    #[test]
    fn test_duplicate_registration() {
        let injector = injector();
        let result = injector.register("repository", |_: Value| 1u8);
        assert_eq!(result, Err(InjectorError::Duplicate("repository".to_string())));
    }
}
