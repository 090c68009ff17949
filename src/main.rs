use async_trait::async_trait;
use axum::Router;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use cell::config::{load_config, Config};
use cell::db::{DbSession, Document};
use cell::{
    generate_auth_routes, generate_routes, logger, AppError, Cell, CrudHooks, CrudRoute,
    CrudSchemas, DocumentService, Extracted, RouteOptions, Server,
};

const ACCOUNTS: &str = "accounts";

#[derive(Serialize, Deserialize)]
struct ServiceArgs {
    collection: String,
}

/// Accounts may only be changed by their owner, and never expose the hash.
struct AccountHooks {
    password_field: String,
}

impl AccountHooks {
    fn hide(&self, document: &mut Document) {
        document.remove(&self.password_field);
    }

    fn owner_only(&self, input: &Extracted, id: &str) -> Result<(), AppError> {
        match input.auth.account_id() {
            Some(account) if account == id => Ok(()),
            Some(_) => Err(AppError::Forbidden),
            None => Err(AppError::Unauthorized),
        }
    }
}

#[async_trait]
impl CrudHooks for AccountHooks {
    async fn after_read(
        &self,
        _session: &mut dyn DbSession,
        _input: &Extracted,
        documents: &mut Vec<Document>,
    ) -> Result<(), AppError> {
        documents.iter_mut().for_each(|document| self.hide(document));
        Ok(())
    }

    async fn after_read_one_by_id(
        &self,
        _session: &mut dyn DbSession,
        _input: &Extracted,
        document: &mut Document,
    ) -> Result<(), AppError> {
        self.hide(document);
        Ok(())
    }

    async fn before_update_one_by_id_and_version(
        &self,
        _session: &mut dyn DbSession,
        input: &Extracted,
        id: &str,
        _version: i64,
        _update: &mut cell::db::Update,
    ) -> Result<(), AppError> {
        self.owner_only(input, id)
    }

    async fn after_update_one_by_id_and_version(
        &self,
        _session: &mut dyn DbSession,
        _input: &Extracted,
        document: &mut Document,
    ) -> Result<(), AppError> {
        self.hide(document);
        Ok(())
    }

    async fn before_soft_delete_one_by_id_and_version(
        &self,
        _session: &mut dyn DbSession,
        input: &Extracted,
        id: &str,
        _version: i64,
    ) -> Result<(), AppError> {
        self.owner_only(input, id)
    }

    async fn after_soft_delete_one_by_id_and_version(
        &self,
        _session: &mut dyn DbSession,
        _input: &Extracted,
        document: &mut Document,
    ) -> Result<(), AppError> {
        self.hide(document);
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let config = load_config();
    logger::init(
        env!("CARGO_PKG_NAME"),
        config.server.debug_mode,
        config.server.log_to_syslog,
    );

    info!("cell starting up");
    debug!("Config: {:?}", config);

    if let Err(e) = run(config).await {
        error!("Fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let cell = Cell::connect(config).await?;
    cell.database().ensure_collection(ACCOUNTS).await?;

    cell.injector()
        .register("document_service", |args: ServiceArgs| {
            DocumentService::new(args.collection)
        })?;
    let accounts: Arc<DocumentService> = cell.injector().resolve(
        "document_service",
        &ServiceArgs {
            collection: ACCOUNTS.to_string(),
        },
    )?;

    let auth = cell.auth_controller(accounts.clone())?;
    let crud = cell
        .crud_controller(accounts)
        .with_schemas(CrudSchemas::for_fields(&["name"]))
        .with_hooks(Arc::new(AccountHooks {
            password_field: cell.config().auth.password_field.clone(),
        }));

    let api = Router::new()
        .merge(generate_auth_routes(auth.clone(), "/auth"))
        .merge(generate_routes(
            crud,
            RouteOptions::new("/accounts")
                .routes(&[
                    CrudRoute::Read,
                    CrudRoute::ReadOneById,
                    CrudRoute::UpdateOneByIdAndVersion,
                    CrudRoute::SoftDeleteOneByIdAndVersion,
                ])
                .private(auth),
        )?);

    Server::serve(&cell, api).await
}
