use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{document_id, Database, DbError, DbSession, Document, Filter, FindOptions, Update};
use crate::constants::ID_FIELD;
use crate::validate::validate_collection_name;

type Collections = HashMap<String, Vec<Document>>;

/// In-process document store.
///
/// A session holds the store lock for its whole lifetime and works on a
/// private copy, so sessions are serializable. A task must not open a second
/// session while it still holds one.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<Collections>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn start_session(&self) -> Result<Box<dyn DbSession>, DbError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemorySession { guard, working }))
    }

    async fn ping(&self) -> Result<(), DbError> {
        Ok(())
    }

    async fn ensure_collection(&self, name: &str) -> Result<(), DbError> {
        validate_collection_name(name).map_err(DbError::InvalidCollection)?;
        self.state
            .lock()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }
}

struct MemorySession {
    guard: OwnedMutexGuard<Collections>,
    working: Collections,
}

impl MemorySession {
    fn collection(&mut self, name: &str) -> Result<&mut Vec<Document>, DbError> {
        validate_collection_name(name).map_err(DbError::InvalidCollection)?;
        Ok(self.working.entry(name.to_string()).or_default())
    }

    fn position(&mut self, collection: &str, filter: &Filter) -> Result<Option<usize>, DbError> {
        Ok(self
            .collection(collection)?
            .iter()
            .position(|document| filter.matches(document)))
    }
}

#[async_trait]
impl DbSession for MemorySession {
    async fn find(
        &mut self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, DbError> {
        let mut matches: Vec<Document> = self
            .collection(collection)?
            .iter()
            .filter(|document| filter.matches(document))
            .cloned()
            .collect();
        if let Some(sort) = &options.sort {
            matches.sort_by(|a, b| sort.compare(a, b));
        }
        let skip = options.skip.unwrap_or(0) as usize;
        let limit = options.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(matches.into_iter().skip(skip).take(limit).collect())
    }

    async fn find_one(
        &mut self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, DbError> {
        Ok(self
            .collection(collection)?
            .iter()
            .find(|document| filter.matches(document))
            .cloned())
    }

    async fn count(&mut self, collection: &str, filter: &Filter) -> Result<u64, DbError> {
        Ok(self
            .collection(collection)?
            .iter()
            .filter(|document| filter.matches(document))
            .count() as u64)
    }

    async fn insert_one(
        &mut self,
        collection: &str,
        document: Document,
    ) -> Result<Document, DbError> {
        let id = document_id(&document)
            .ok_or(DbError::MissingId)?
            .to_string();
        let documents = self.collection(collection)?;
        if documents
            .iter()
            .any(|existing| document_id(existing) == Some(id.as_str()))
        {
            return Err(DbError::Duplicate(id));
        }
        documents.push(document.clone());
        Ok(document)
    }

    async fn update_one(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<Option<Document>, DbError> {
        let Some(index) = self.position(collection, filter)? else {
            return Ok(None);
        };
        let documents = self.collection(collection)?;
        let mut updated = documents[index].clone();
        update.apply(&mut updated)?;
        documents[index] = updated.clone();
        Ok(Some(updated))
    }

    async fn replace_one(
        &mut self,
        collection: &str,
        filter: &Filter,
        mut replacement: Document,
    ) -> Result<Option<Document>, DbError> {
        let Some(index) = self.position(collection, filter)? else {
            return Ok(None);
        };
        let documents = self.collection(collection)?;
        let id = documents[index].get(ID_FIELD).cloned().unwrap_or(Value::Null);
        replacement.insert(ID_FIELD.to_string(), id);
        documents[index] = replacement.clone();
        Ok(Some(replacement))
    }

    async fn delete_one(
        &mut self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, DbError> {
        let Some(index) = self.position(collection, filter)? else {
            return Ok(None);
        };
        Ok(Some(self.collection(collection)?.remove(index)))
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        let MemorySession { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<(), DbError> {
        Ok(())
    }
}
