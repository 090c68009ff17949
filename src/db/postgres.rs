use async_trait::async_trait;
use log::debug;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Transaction};

use super::{
    document_id, Database, DbError, DbSession, Document, Filter, FindOptions, SortDirection,
    Update,
};
use crate::constants::ID_FIELD;
use crate::validate::validate_collection_name;

/// Postgres-backed document store: one `(id TEXT, data JSONB)` table per collection.
#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub async fn connect(uri: &str, max_connections: u32) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(uri)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Database for PgDatabase {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn start_session(&self) -> Result<Box<dyn DbSession>, DbError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgSession { tx }))
    }

    async fn ping(&self) -> Result<(), DbError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    async fn ensure_collection(&self, name: &str) -> Result<(), DbError> {
        let table = table(name)?;
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {table} (id TEXT PRIMARY KEY, data JSONB NOT NULL)"
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        debug!("ensure_collection: collection={} ready", name);
        Ok(())
    }
}

struct PgSession {
    tx: Transaction<'static, Postgres>,
}

/// Quoted table identifier for a validated collection name.
fn table(collection: &str) -> Result<String, DbError> {
    validate_collection_name(collection).map_err(DbError::InvalidCollection)?;
    Ok(format!("\"{collection}\""))
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    builder.push(" WHERE data @> ");
    builder.push_bind(Json(filter.eq_pattern()));
    for pattern in filter.ne_patterns() {
        builder.push(" AND NOT (data @> ");
        builder.push_bind(Json(pattern));
        builder.push(")");
    }
}

fn map_insert_error(err: sqlx::Error, id: &str) -> DbError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            DbError::Duplicate(id.to_string())
        }
        _ => err.into(),
    }
}

impl PgSession {
    /// Locks and returns the first match.
    async fn select_for_update(
        &mut self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<(String, Document)>, DbError> {
        let mut builder = QueryBuilder::new(format!("SELECT id, data FROM {}", table(collection)?));
        push_filter(&mut builder, filter);
        builder.push(" LIMIT 1 FOR UPDATE");
        let row = builder
            .build_query_as::<(String, Json<Document>)>()
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(|(id, Json(data))| (id, data)))
    }

    async fn write(&mut self, collection: &str, id: &str, data: &Document) -> Result<(), DbError> {
        let sql = format!("UPDATE {} SET data = $1 WHERE id = $2", table(collection)?);
        sqlx::query(&sql)
            .bind(Json(data))
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DbSession for PgSession {
    async fn find(
        &mut self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, DbError> {
        let mut builder = QueryBuilder::new(format!("SELECT data FROM {}", table(collection)?));
        push_filter(&mut builder, filter);
        if let Some(sort) = &options.sort {
            let path: Vec<String> = sort.field.split('.').map(str::to_string).collect();
            builder.push(" ORDER BY data #> ");
            builder.push_bind(path);
            builder.push(match sort.direction {
                SortDirection::Ascending => " ASC",
                SortDirection::Descending => " DESC",
            });
        }
        if let Some(limit) = options.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit as i64);
        }
        if let Some(skip) = options.skip {
            builder.push(" OFFSET ");
            builder.push_bind(skip as i64);
        }
        let rows = builder
            .build_query_scalar::<Json<Document>>()
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.into_iter().map(|Json(data)| data).collect())
    }

    async fn find_one(
        &mut self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, DbError> {
        let mut builder = QueryBuilder::new(format!("SELECT data FROM {}", table(collection)?));
        push_filter(&mut builder, filter);
        builder.push(" LIMIT 1");
        let row = builder
            .build_query_scalar::<Json<Document>>()
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(|Json(data)| data))
    }

    async fn count(&mut self, collection: &str, filter: &Filter) -> Result<u64, DbError> {
        let mut builder =
            QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", table(collection)?));
        push_filter(&mut builder, filter);
        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn insert_one(
        &mut self,
        collection: &str,
        document: Document,
    ) -> Result<Document, DbError> {
        let id = document_id(&document)
            .ok_or(DbError::MissingId)?
            .to_string();
        let sql = format!("INSERT INTO {} (id, data) VALUES ($1, $2)", table(collection)?);
        sqlx::query(&sql)
            .bind(&id)
            .bind(Json(&document))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_insert_error(e, &id))?;
        Ok(document)
    }

    async fn update_one(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<Option<Document>, DbError> {
        let Some((id, mut data)) = self.select_for_update(collection, filter).await? else {
            return Ok(None);
        };
        update.apply(&mut data)?;
        self.write(collection, &id, &data).await?;
        Ok(Some(data))
    }

    async fn replace_one(
        &mut self,
        collection: &str,
        filter: &Filter,
        mut replacement: Document,
    ) -> Result<Option<Document>, DbError> {
        let Some((id, _)) = self.select_for_update(collection, filter).await? else {
            return Ok(None);
        };
        replacement.insert(ID_FIELD.to_string(), id.clone().into());
        self.write(collection, &id, &replacement).await?;
        Ok(Some(replacement))
    }

    async fn delete_one(
        &mut self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, DbError> {
        let Some((id, data)) = self.select_for_update(collection, filter).await? else {
            return Ok(None);
        };
        let sql = format!("DELETE FROM {} WHERE id = $1", table(collection)?);
        sqlx::query(&sql).bind(&id).execute(&mut *self.tx).await?;
        Ok(Some(data))
    }

    async fn lock(&mut self, key: &str) -> Result<(), DbError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(key)
            .execute(&mut *self.tx)
            .await?;
        debug!("lock: key={}", key);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<(), DbError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
