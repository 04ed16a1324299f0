//! Host-service abstractions for the sync engine.
//!
//! The engine needs two things from its host: a persistent key-value
//! store (read watermarks, badge total) and a local notification sink.
//! Both are traits so the runtime stays testable with in-memory fakes.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use thiserror::Error;

/// Local notification sink.
pub mod notify;

pub use notify::{NoopNotifier, Notifier, NotifyError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KvStoreError {
    #[error("key not found")]
    NotFound,
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
    #[error("key-value store backend failure: {0}")]
    Backend(String),
}

/// Persistent string key-value store surviving process restart.
///
/// Writes are last-writer-wins per key; no cross-key transactionality
/// is offered or required.
pub trait KvStore: Send + Sync {
    fn set_value(&self, scope: &str, key: &str, value: &str) -> Result<(), KvStoreError>;

    fn get_value(&self, scope: &str, key: &str) -> Result<String, KvStoreError>;

    fn delete_value(&self, scope: &str, key: &str) -> Result<(), KvStoreError>;
}

impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    fn set_value(&self, scope: &str, key: &str, value: &str) -> Result<(), KvStoreError> {
        (**self).set_value(scope, key, value)
    }

    fn get_value(&self, scope: &str, key: &str) -> Result<String, KvStoreError> {
        (**self).get_value(scope, key)
    }

    fn delete_value(&self, scope: &str, key: &str) -> Result<(), KvStoreError> {
        (**self).delete_value(scope, key)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryKvStore {
    data: Arc<RwLock<HashMap<(String, String), String>>>,
}

impl KvStore for InMemoryKvStore {
    fn set_value(&self, scope: &str, key: &str, value: &str) -> Result<(), KvStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| KvStoreError::Backend("poisoned lock".to_owned()))?;
        data.insert((scope.to_owned(), key.to_owned()), value.to_owned());
        Ok(())
    }

    fn get_value(&self, scope: &str, key: &str) -> Result<String, KvStoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| KvStoreError::Backend("poisoned lock".to_owned()))?;
        data.get(&(scope.to_owned(), key.to_owned()))
            .cloned()
            .ok_or(KvStoreError::NotFound)
    }

    fn delete_value(&self, scope: &str, key: &str) -> Result<(), KvStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| KvStoreError::Backend("poisoned lock".to_owned()))?;
        if data.remove(&(scope.to_owned(), key.to_owned())).is_none() {
            return Err(KvStoreError::NotFound);
        }
        Ok(())
    }
}

/// JSON-file-backed store for hosts without a native key-value service.
///
/// The whole map is rewritten on every mutation; fine for the handful
/// of watermark keys this engine persists.
#[cfg(feature = "json-file")]
pub struct JsonFileKvStore {
    path: std::path::PathBuf,
    data: RwLock<HashMap<String, String>>,
}

#[cfg(feature = "json-file")]
impl JsonFileKvStore {
    /// Open (or create) the store file at `path`.
    pub fn open(path: impl Into<std::path::PathBuf>) -> Result<Self, KvStoreError> {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|err| KvStoreError::Backend(format!("corrupt store file: {err}")))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(KvStoreError::Unavailable(err.to_string())),
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    fn flatten(scope: &str, key: &str) -> String {
        format!("{scope}/{key}")
    }

    fn persist(&self, data: &HashMap<String, String>) -> Result<(), KvStoreError> {
        let raw = serde_json::to_string_pretty(data)
            .map_err(|err| KvStoreError::Backend(err.to_string()))?;
        std::fs::write(&self.path, raw).map_err(|err| KvStoreError::Unavailable(err.to_string()))
    }
}

#[cfg(feature = "json-file")]
impl KvStore for JsonFileKvStore {
    fn set_value(&self, scope: &str, key: &str, value: &str) -> Result<(), KvStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| KvStoreError::Backend("poisoned lock".to_owned()))?;
        data.insert(Self::flatten(scope, key), value.to_owned());
        self.persist(&data)
    }

    fn get_value(&self, scope: &str, key: &str) -> Result<String, KvStoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| KvStoreError::Backend("poisoned lock".to_owned()))?;
        data.get(&Self::flatten(scope, key))
            .cloned()
            .ok_or(KvStoreError::NotFound)
    }

    fn delete_value(&self, scope: &str, key: &str) -> Result<(), KvStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| KvStoreError::Backend("poisoned lock".to_owned()))?;
        if data.remove(&Self::flatten(scope, key)).is_none() {
            return Err(KvStoreError::NotFound);
        }
        self.persist(&data)
    }
}

/// Store view fixed to one application scope.
#[derive(Clone)]
pub struct ScopedKvStore<S: KvStore> {
    inner: S,
    scope: String,
}

impl<S: KvStore> ScopedKvStore<S> {
    pub fn new(inner: S, scope: impl Into<String>) -> Self {
        Self {
            inner,
            scope: scope.into(),
        }
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), KvStoreError> {
        self.inner.set_value(&self.scope, key, value)
    }

    pub fn get(&self, key: &str) -> Result<String, KvStoreError> {
        self.inner.get_value(&self.scope, key)
    }

    pub fn delete(&self, key: &str) -> Result<(), KvStoreError> {
        self.inner.delete_value(&self.scope, key)
    }
}
