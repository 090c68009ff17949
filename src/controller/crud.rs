use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::Response;
use log::info;
use serde_json::Value;
use std::sync::Arc;

use super::{reject_reserved, Controller, Extracted, Reply, RequestInput, Rule, Schema};
use crate::constants::{
    DEFAULT_READ_LIMIT, ID_FIELD, MAX_READ_LIMIT, QUERY_LIMIT, QUERY_SKIP, QUERY_SORT,
    VERSION_FIELD,
};
use crate::db::{DbSession, Document, Filter, FindOptions, Sort, Update};
use crate::error::AppError;
use crate::router::CrudRoute;
use crate::service::Service;
use crate::session::SessionManager;
use crate::validate::validate_field_path;

/// Typed callbacks around each CRUD operation, run inside its session.
///
/// `before_*` hooks may rewrite the operands, `after_*` hooks may rewrite the
/// result. Any error aborts the session.
#[allow(unused_variables)]
#[async_trait]
pub trait CrudHooks: Send + Sync {
    async fn before_read(
        &self,
        session: &mut dyn DbSession,
        input: &Extracted,
        filter: &mut Filter,
        options: &mut FindOptions,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn after_read(
        &self,
        session: &mut dyn DbSession,
        input: &Extracted,
        documents: &mut Vec<Document>,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn before_read_one_by_id(
        &self,
        session: &mut dyn DbSession,
        input: &Extracted,
        id: &mut String,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn after_read_one_by_id(
        &self,
        session: &mut dyn DbSession,
        input: &Extracted,
        document: &mut Document,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn before_create_one(
        &self,
        session: &mut dyn DbSession,
        input: &Extracted,
        document: &mut Document,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn after_create_one(
        &self,
        session: &mut dyn DbSession,
        input: &Extracted,
        document: &mut Document,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn before_update_one_by_id_and_version(
        &self,
        session: &mut dyn DbSession,
        input: &Extracted,
        id: &str,
        version: i64,
        update: &mut Update,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn after_update_one_by_id_and_version(
        &self,
        session: &mut dyn DbSession,
        input: &Extracted,
        document: &mut Document,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn before_replace_one_by_id_and_version(
        &self,
        session: &mut dyn DbSession,
        input: &Extracted,
        id: &str,
        version: i64,
        replacement: &mut Document,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn after_replace_one_by_id_and_version(
        &self,
        session: &mut dyn DbSession,
        input: &Extracted,
        document: &mut Document,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn before_soft_delete_one_by_id_and_version(
        &self,
        session: &mut dyn DbSession,
        input: &Extracted,
        id: &str,
        version: i64,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn after_soft_delete_one_by_id_and_version(
        &self,
        session: &mut dyn DbSession,
        input: &Extracted,
        document: &mut Document,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn before_delete_one_by_id_and_version(
        &self,
        session: &mut dyn DbSession,
        input: &Extracted,
        id: &str,
        version: i64,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn after_delete_one_by_id_and_version(
        &self,
        session: &mut dyn DbSession,
        input: &Extracted,
        document: &mut Document,
    ) -> Result<(), AppError> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl CrudHooks for NoHooks {}

/// Input schema of every CRUD operation.
#[derive(Debug, Clone)]
pub struct CrudSchemas {
    pub read: Schema,
    pub read_one_by_id: Schema,
    pub create_one: Schema,
    pub update_one_by_id_and_version: Schema,
    pub replace_one_by_id_and_version: Schema,
    pub soft_delete_one_by_id_and_version: Schema,
    pub delete_one_by_id_and_version: Schema,
}

impl Default for CrudSchemas {
    /// Any document field is accepted; only identity and version are enforced.
    fn default() -> Self {
        Self::with_fields(Rule::any(), Rule::any())
    }
}

impl CrudSchemas {
    /// Restrict query filters and body fields to `fields`.
    pub fn for_fields(fields: &[&str]) -> Self {
        let mut query: Vec<&str> = fields.to_vec();
        query.extend([QUERY_LIMIT, QUERY_SKIP, QUERY_SORT]);
        Self::with_fields(Rule::permit(&query), Rule::permit(fields))
    }

    fn with_fields(query: Rule, body: Rule) -> Self {
        let by_id = || Rule::none().require(&[ID_FIELD]);
        let versioned_body = body.clone().require(&[VERSION_FIELD]);
        Self {
            read: Schema::new().query(query),
            read_one_by_id: Schema::new().path(by_id()),
            create_one: Schema::new().body(body),
            update_one_by_id_and_version: Schema::new()
                .path(by_id())
                .body(versioned_body.clone()),
            replace_one_by_id_and_version: Schema::new().path(by_id()).body(versioned_body),
            soft_delete_one_by_id_and_version: Schema::new()
                .path(by_id())
                .query(Rule::none().require(&[VERSION_FIELD])),
            delete_one_by_id_and_version: Schema::new()
                .path(by_id())
                .query(Rule::none().require(&[VERSION_FIELD])),
        }
    }
}

/// CRUD endpoints for one collection.
#[derive(Clone)]
pub struct CrudController {
    controller: Controller,
    sessions: SessionManager,
    service: Arc<dyn Service>,
    hooks: Arc<dyn CrudHooks>,
    schemas: Arc<CrudSchemas>,
}

impl CrudController {
    pub fn new(controller: Controller, sessions: SessionManager, service: Arc<dyn Service>) -> Self {
        Self {
            controller,
            sessions,
            service,
            hooks: Arc::new(NoHooks),
            schemas: Arc::new(CrudSchemas::default()),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn CrudHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_schemas(mut self, schemas: CrudSchemas) -> Self {
        self.schemas = Arc::new(schemas);
        self
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn collection(&self) -> &str {
        self.service.collection()
    }

    pub async fn dispatch(&self, route: CrudRoute, input: RequestInput) -> Response {
        let language = self.controller.language(&input);
        let authorization = input.auth.token.clone();
        let result = match route {
            CrudRoute::Read => self.read(input).await,
            CrudRoute::ReadOneById => self.read_one_by_id(input).await,
            CrudRoute::CreateOne => self.create_one(input).await,
            CrudRoute::UpdateOneByIdAndVersion => self.update_one_by_id_and_version(input).await,
            CrudRoute::ReplaceOneByIdAndVersion => {
                self.replace_one_by_id_and_version(input).await
            }
            CrudRoute::SoftDeleteOneByIdAndVersion => {
                self.soft_delete_one_by_id_and_version(input).await
            }
            CrudRoute::DeleteOneByIdAndVersion => self.delete_one_by_id_and_version(input).await,
        };
        let result = result.map(|reply| reply.with_authorization(authorization));
        self.controller.respond(language.as_deref(), result)
    }

    pub async fn read(&self, input: RequestInput) -> Result<Reply, AppError> {
        let extracted = Controller::extract(&input, &self.schemas.read)?;
        let (mut filter, mut options) = read_query(&extracted.query)?;
        let service = Arc::clone(&self.service);
        let hooks = Arc::clone(&self.hooks);
        self.sessions
            .run(move |session| {
                Box::pin(async move {
                    hooks
                        .before_read(session, &extracted, &mut filter, &mut options)
                        .await?;
                    let (mut documents, count) = service.read(session, &filter, &options).await?;
                    hooks.after_read(session, &extracted, &mut documents).await?;
                    Ok::<_, AppError>(Reply::many(documents, count))
                })
            })
            .await
    }

    pub async fn read_one_by_id(&self, input: RequestInput) -> Result<Reply, AppError> {
        let extracted = Controller::extract(&input, &self.schemas.read_one_by_id)?;
        let mut id = extracted.path_str(ID_FIELD)?.to_string();
        let service = Arc::clone(&self.service);
        let hooks = Arc::clone(&self.hooks);
        self.sessions
            .run(move |session| {
                Box::pin(async move {
                    hooks
                        .before_read_one_by_id(session, &extracted, &mut id)
                        .await?;
                    let mut document = service.read_one_by_id(session, &id).await?;
                    hooks
                        .after_read_one_by_id(session, &extracted, &mut document)
                        .await?;
                    Ok::<_, AppError>(Reply::one(document))
                })
            })
            .await
    }

    pub async fn create_one(&self, input: RequestInput) -> Result<Reply, AppError> {
        let extracted = Controller::extract(&input, &self.schemas.create_one)?;
        reject_reserved(&extracted.body, &[])?;
        let mut document = extracted.body.clone();
        let service = Arc::clone(&self.service);
        let hooks = Arc::clone(&self.hooks);
        let collection = self.collection().to_string();
        let reply = self
            .sessions
            .run(move |session| {
                Box::pin(async move {
                    hooks
                        .before_create_one(session, &extracted, &mut document)
                        .await?;
                    let mut created = service.create_one(session, document).await?;
                    hooks
                        .after_create_one(session, &extracted, &mut created)
                        .await?;
                    Ok::<_, AppError>(Reply::one(created).with_status(StatusCode::CREATED))
                })
            })
            .await?;
        info!(
            "create_one: collection={} _id={}",
            collection,
            reply
                .document()
                .and_then(crate::db::document_id)
                .unwrap_or_default()
        );
        Ok(reply)
    }

    pub async fn update_one_by_id_and_version(
        &self,
        input: RequestInput,
    ) -> Result<Reply, AppError> {
        let extracted = Controller::extract(&input, &self.schemas.update_one_by_id_and_version)?;
        let (id, version) = id_and_version(&extracted, &extracted.body)?;
        reject_reserved(&extracted.body, &[VERSION_FIELD])?;
        let mut update = Update::new();
        for (field, value) in &extracted.body {
            if field != VERSION_FIELD {
                validate_field_path(field)?;
                update = update.set(field.clone(), value.clone());
            }
        }
        let service = Arc::clone(&self.service);
        let hooks = Arc::clone(&self.hooks);
        self.sessions
            .run(move |session| {
                Box::pin(async move {
                    hooks
                        .before_update_one_by_id_and_version(
                            session,
                            &extracted,
                            &id,
                            version,
                            &mut update,
                        )
                        .await?;
                    let mut document = service
                        .update_one_by_id_and_version(session, &id, version, update)
                        .await?;
                    hooks
                        .after_update_one_by_id_and_version(session, &extracted, &mut document)
                        .await?;
                    Ok::<_, AppError>(Reply::one(document))
                })
            })
            .await
    }

    pub async fn replace_one_by_id_and_version(
        &self,
        input: RequestInput,
    ) -> Result<Reply, AppError> {
        let extracted =
            Controller::extract(&input, &self.schemas.replace_one_by_id_and_version)?;
        let (id, version) = id_and_version(&extracted, &extracted.body)?;
        reject_reserved(&extracted.body, &[VERSION_FIELD])?;
        let mut replacement = extracted.body.clone();
        replacement.remove(VERSION_FIELD);
        let service = Arc::clone(&self.service);
        let hooks = Arc::clone(&self.hooks);
        self.sessions
            .run(move |session| {
                Box::pin(async move {
                    hooks
                        .before_replace_one_by_id_and_version(
                            session,
                            &extracted,
                            &id,
                            version,
                            &mut replacement,
                        )
                        .await?;
                    let mut document = service
                        .replace_one_by_id_and_version(session, &id, version, replacement)
                        .await?;
                    hooks
                        .after_replace_one_by_id_and_version(session, &extracted, &mut document)
                        .await?;
                    Ok::<_, AppError>(Reply::one(document))
                })
            })
            .await
    }

    pub async fn soft_delete_one_by_id_and_version(
        &self,
        input: RequestInput,
    ) -> Result<Reply, AppError> {
        let extracted =
            Controller::extract(&input, &self.schemas.soft_delete_one_by_id_and_version)?;
        let (id, version) = id_and_version(&extracted, &extracted.query)?;
        let service = Arc::clone(&self.service);
        let hooks = Arc::clone(&self.hooks);
        self.sessions
            .run(move |session| {
                Box::pin(async move {
                    hooks
                        .before_soft_delete_one_by_id_and_version(session, &extracted, &id, version)
                        .await?;
                    let mut document = service
                        .soft_delete_one_by_id_and_version(session, &id, version)
                        .await?;
                    hooks
                        .after_soft_delete_one_by_id_and_version(session, &extracted, &mut document)
                        .await?;
                    Ok::<_, AppError>(Reply::one(document))
                })
            })
            .await
    }

    pub async fn delete_one_by_id_and_version(
        &self,
        input: RequestInput,
    ) -> Result<Reply, AppError> {
        let extracted = Controller::extract(&input, &self.schemas.delete_one_by_id_and_version)?;
        let (id, version) = id_and_version(&extracted, &extracted.query)?;
        let service = Arc::clone(&self.service);
        let hooks = Arc::clone(&self.hooks);
        let collection = self.collection().to_string();
        let reply = self
            .sessions
            .run(move |session| {
                Box::pin(async move {
                    hooks
                        .before_delete_one_by_id_and_version(session, &extracted, &id, version)
                        .await?;
                    let mut document = service
                        .delete_one_by_id_and_version(session, &id, version)
                        .await?;
                    hooks
                        .after_delete_one_by_id_and_version(session, &extracted, &mut document)
                        .await?;
                    Ok::<_, AppError>(Reply::one(document))
                })
            })
            .await?;
        info!("delete_one_by_id_and_version: collection={}", collection);
        Ok(reply)
    }
}

fn id_and_version(extracted: &Extracted, source: &Document) -> Result<(String, i64), AppError> {
    let id = extracted.path_str(ID_FIELD)?.to_string();
    let version = source
        .get(VERSION_FIELD)
        .and_then(Value::as_i64)
        .filter(|v| *v >= 1)
        .ok_or_else(|| AppError::BadRequest("'version' must be a positive integer".to_string()))?;
    Ok((id, version))
}

/// Split read query parameters into an equality filter and paging options.
fn read_query(query: &Document) -> Result<(Filter, FindOptions), AppError> {
    let mut filter = Filter::new();
    let mut options = FindOptions {
        limit: Some(DEFAULT_READ_LIMIT),
        ..FindOptions::default()
    };
    for (key, value) in query {
        match key.as_str() {
            QUERY_LIMIT => {
                let limit = value.as_u64().ok_or_else(|| {
                    AppError::BadRequest("'limit' must be a non-negative integer".to_string())
                })?;
                options.limit = Some(limit.min(MAX_READ_LIMIT));
            }
            QUERY_SKIP => {
                let skip = value
                    .as_u64()
                    .filter(|skip| i64::try_from(*skip).is_ok())
                    .ok_or_else(|| {
                        AppError::BadRequest("'skip' must be a non-negative integer".to_string())
                    })?;
                options.skip = Some(skip);
            }
            QUERY_SORT => {
                let spec = value
                    .as_str()
                    .ok_or_else(|| AppError::BadRequest("'sort' must be a field name".to_string()))?;
                let sort = Sort::parse(spec);
                validate_field_path(&sort.field)?;
                options.sort = Some(sort);
            }
            field => {
                validate_field_path(field)?;
                filter = filter.eq(field, value.clone());
            }
        }
    }
    Ok((filter, options))
}
