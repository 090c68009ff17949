//! Persistence for one collection, run inside a caller-owned session.
//!
//! Every method has a default implementation on top of [`DbSession`]; a
//! domain service overrides only what it needs to change.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::constants::{
    CREATED_AT_FIELD, DELETED_AT_FIELD, ID_FIELD, IS_DELETED_FIELD, UPDATED_AT_FIELD,
    VERSION_FIELD,
};
use crate::db::{DbSession, Document, Filter, FindOptions, Update};
use crate::error::AppError;
use crate::models::now_timestamp;

/// Documents that have not been soft-deleted.
pub fn live() -> Filter {
    Filter::new().ne(IS_DELETED_FIELD, true)
}

fn live_with(filter: &Filter) -> Filter {
    filter
        .conditions()
        .iter()
        .fold(live(), |acc, (path, condition)| match condition {
            crate::db::Condition::Eq(value) => acc.eq(path.clone(), value.clone()),
            crate::db::Condition::Ne(value) => acc.ne(path.clone(), value.clone()),
        })
}

fn versioned(id: &str, version: i64) -> Filter {
    live().eq(ID_FIELD, id).eq(VERSION_FIELD, version)
}

#[async_trait]
pub trait Service: Send + Sync {
    fn collection(&self) -> &str;

    /// Live documents matching `filter`, paged by `options`, with the total
    /// number of matches before paging.
    async fn read(
        &self,
        session: &mut dyn DbSession,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<(Vec<Document>, u64), AppError> {
        let filter = live_with(filter);
        let count = session.count(self.collection(), &filter).await?;
        let documents = session.find(self.collection(), &filter, options).await?;
        Ok((documents, count))
    }

    async fn read_one_by_id(
        &self,
        session: &mut dyn DbSession,
        id: &str,
    ) -> Result<Document, AppError> {
        session
            .find_one(self.collection(), &live().eq(ID_FIELD, id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No document with _id '{id}'")))
    }

    /// First live document matching `filter`.
    async fn find_one(
        &self,
        session: &mut dyn DbSession,
        filter: &Filter,
    ) -> Result<Option<Document>, AppError> {
        Ok(session
            .find_one(self.collection(), &live_with(filter))
            .await?)
    }

    /// Store `document` as a new version-1 document with a generated `_id`.
    async fn create_one(
        &self,
        session: &mut dyn DbSession,
        mut document: Document,
    ) -> Result<Document, AppError> {
        let now = now_timestamp();
        document.insert(ID_FIELD.to_string(), Value::from(Uuid::new_v4().to_string()));
        document.insert(VERSION_FIELD.to_string(), Value::from(1));
        document.insert(CREATED_AT_FIELD.to_string(), Value::from(now.clone()));
        document.insert(UPDATED_AT_FIELD.to_string(), Value::from(now));
        Ok(session.insert_one(self.collection(), document).await?)
    }

    async fn update_one_by_id_and_version(
        &self,
        session: &mut dyn DbSession,
        id: &str,
        version: i64,
        update: Update,
    ) -> Result<Document, AppError> {
        let update = update
            .inc(VERSION_FIELD, 1)
            .set(UPDATED_AT_FIELD, now_timestamp());
        match session
            .update_one(self.collection(), &versioned(id, version), &update)
            .await?
        {
            Some(document) => Ok(document),
            None => Err(self.version_miss(session, id).await),
        }
    }

    /// Replace the body of a document, keeping `_id` and `createdAt`.
    async fn replace_one_by_id_and_version(
        &self,
        session: &mut dyn DbSession,
        id: &str,
        version: i64,
        mut replacement: Document,
    ) -> Result<Document, AppError> {
        let filter = versioned(id, version);
        let current = match session.find_one(self.collection(), &filter).await? {
            Some(current) => current,
            None => return Err(self.version_miss(session, id).await),
        };
        replacement.insert(ID_FIELD.to_string(), Value::from(id));
        replacement.insert(VERSION_FIELD.to_string(), Value::from(version + 1));
        if let Some(created_at) = current.get(CREATED_AT_FIELD) {
            replacement.insert(CREATED_AT_FIELD.to_string(), created_at.clone());
        }
        replacement.insert(UPDATED_AT_FIELD.to_string(), Value::from(now_timestamp()));
        match session
            .replace_one(self.collection(), &filter, replacement)
            .await?
        {
            Some(document) => Ok(document),
            None => Err(self.version_miss(session, id).await),
        }
    }

    async fn soft_delete_one_by_id_and_version(
        &self,
        session: &mut dyn DbSession,
        id: &str,
        version: i64,
    ) -> Result<Document, AppError> {
        let now = now_timestamp();
        let update = Update::new()
            .set(IS_DELETED_FIELD, true)
            .set(DELETED_AT_FIELD, now.clone())
            .set(UPDATED_AT_FIELD, now)
            .inc(VERSION_FIELD, 1);
        match session
            .update_one(self.collection(), &versioned(id, version), &update)
            .await?
        {
            Some(document) => Ok(document),
            None => Err(self.version_miss(session, id).await),
        }
    }

    async fn delete_one_by_id_and_version(
        &self,
        session: &mut dyn DbSession,
        id: &str,
        version: i64,
    ) -> Result<Document, AppError> {
        match session
            .delete_one(self.collection(), &versioned(id, version))
            .await?
        {
            Some(document) => Ok(document),
            None => Err(self.version_miss(session, id).await),
        }
    }

    /// Explain why a `{_id, version}` match failed.
    async fn version_miss(&self, session: &mut dyn DbSession, id: &str) -> AppError {
        match session
            .find_one(self.collection(), &live().eq(ID_FIELD, id))
            .await
        {
            Ok(Some(current)) => AppError::Conflict(format!(
                "Document '{}' is at version {}",
                id,
                current
                    .get(VERSION_FIELD)
                    .cloned()
                    .unwrap_or(Value::Null)
            )),
            Ok(None) => AppError::NotFound(format!("No document with _id '{id}'")),
            Err(e) => e.into(),
        }
    }
}

/// The stock service: default persistence for a named collection.
#[derive(Debug, Clone)]
pub struct DocumentService {
    collection: String,
}

impl DocumentService {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
        }
    }
}

impl Service for DocumentService {
    fn collection(&self) -> &str {
        &self.collection
    }
}
