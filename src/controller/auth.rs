//! Account registration, login, password change and request verification.
//!
//! Failed login and password-change attempts are counted on the account's
//! `auth` sub-document. The counter update is committed before the failure
//! is reported, so lockout survives the error response.

use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::Response;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;

use super::{reject_reserved, AuthContext, Controller, Reply, RequestInput, Rule, Schema};
use crate::config::AuthConfig;
use crate::constants::{AUTH_FIELD, NEW_PASSWORD_FIELD};
use crate::db::{document_id, document_version, lookup, DbSession, Document, Filter, Update};
use crate::error::AppError;
use crate::models::{now_timestamp, AccountAuth};
use crate::password::PasswordHasher;
use crate::router::AuthRoute;
use crate::service::Service;
use crate::session::SessionManager;
use crate::token::TokenService;
use crate::validate::{validate_email, validate_password};

#[derive(Debug, Clone)]
pub struct AuthOptions {
    pub identifier_field: String,
    pub password_field: String,
    pub activation_required: bool,
    pub max_invalid_login_attempts: u32,
    pub max_invalid_change_password_attempts: u32,
    pub password_hash_cost: u32,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self::from_config(&AuthConfig::default())
    }
}

impl AuthOptions {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            identifier_field: config.identifier_field.clone(),
            password_field: config.password_field.clone(),
            activation_required: config.activation_required,
            max_invalid_login_attempts: config.max_invalid_login_attempts,
            max_invalid_change_password_attempts: config.max_invalid_change_password_attempts,
            password_hash_cost: config.password_hash_cost,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthSchemas {
    pub register: Schema,
    pub login: Schema,
    pub change_password: Schema,
}

impl AuthSchemas {
    /// Registration accepts any extra profile field.
    pub fn for_options(options: &AuthOptions) -> Self {
        Self::build(options, Rule::any())
    }

    /// Registration accepts only `fields` besides the credentials.
    pub fn with_profile_fields(options: &AuthOptions, fields: &[&str]) -> Self {
        Self::build(options, Rule::permit(fields))
    }

    fn build(options: &AuthOptions, profile: Rule) -> Self {
        let identifier = options.identifier_field.as_str();
        let password = options.password_field.as_str();
        Self {
            register: Schema::new().body(profile.require(&[identifier, password])),
            login: Schema::new().body(Rule::none().require(&[identifier, password])),
            change_password: Schema::new()
                .body(Rule::none().require(&[password, NEW_PASSWORD_FIELD])),
        }
    }
}

/// Which counter a failed password check lands on.
#[derive(Debug, Clone, Copy)]
enum Attempt {
    Login,
    ChangePassword,
}

/// Account work that runs inside one session.
#[derive(Clone)]
struct Accounts {
    service: Arc<dyn Service>,
    hasher: PasswordHasher,
    options: Arc<AuthOptions>,
}

impl Accounts {
    async fn register(
        &self,
        session: &mut dyn DbSession,
        identifier: &str,
        document: Document,
    ) -> Result<Document, AppError> {
        session
            .lock(&registration_lock(self.service.collection(), identifier))
            .await?;
        let existing = session
            .find_one(
                self.service.collection(),
                &Filter::new().eq(self.options.identifier_field.as_str(), identifier),
            )
            .await?;
        if existing.is_some() {
            return Err(AppError::AccountAlreadyExists);
        }
        self.service.create_one(session, document).await
    }

    /// Outer error: the session must abort. Inner error: persist, then report.
    async fn login(
        &self,
        session: &mut dyn DbSession,
        identifier: &str,
        password: &str,
    ) -> Result<Result<Document, AppError>, AppError> {
        let filter = Filter::new().eq(self.options.identifier_field.as_str(), identifier);
        let account = match self.service.find_one(session, &filter).await? {
            Some(account) => account,
            None => {
                self.hasher.dummy_verify().await?;
                debug!("login: unknown identifier (generic error returned)");
                return Ok(Err(AppError::InvalidCredentials));
            }
        };
        let mut auth = account_auth(&account)?;

        if !self.password_matches(&account, password).await? {
            return self
                .record_failure(session, &account, auth, Attempt::Login)
                .await
                .map(Err);
        }
        if self.options.activation_required && !auth.is_active {
            return Ok(Err(AppError::AccountInactive));
        }
        if auth.is_blocked {
            return Ok(Err(AppError::AccountBlocked));
        }

        auth.number_of_failed_login_attempts = 0;
        auth.last_successful_login = Some(now_timestamp());
        let (id, version) = identity(&account)?;
        let updated = self
            .service
            .update_one_by_id_and_version(session, id, version, auth_update(&auth)?)
            .await?;
        Ok(Ok(updated))
    }

    async fn change_password(
        &self,
        session: &mut dyn DbSession,
        account_id: &str,
        current: &str,
        replacement: &str,
    ) -> Result<Result<Document, AppError>, AppError> {
        let account = match self.service.read_one_by_id(session, account_id).await {
            Ok(account) => account,
            Err(AppError::NotFound(_)) => return Err(AppError::Unauthorized),
            Err(e) => return Err(e),
        };
        let mut auth = account_auth(&account)?;

        if !self.password_matches(&account, current).await? {
            return self
                .record_failure(session, &account, auth, Attempt::ChangePassword)
                .await
                .map(Err);
        }
        if auth.is_blocked {
            return Ok(Err(AppError::AccountBlocked));
        }

        let hash = self.hasher.hash(replacement).await?;
        auth.number_of_failed_change_password_attempts = 0;
        auth.last_successful_change_password = Some(now_timestamp());
        let (id, version) = identity(&account)?;
        let update = auth_update(&auth)?.set(self.options.password_field.as_str(), hash);
        let updated = self
            .service
            .update_one_by_id_and_version(session, id, version, update)
            .await?;
        Ok(Ok(updated))
    }

    /// Load and check the account a token points at.
    async fn verified_account(
        &self,
        session: &mut dyn DbSession,
        account_id: &str,
    ) -> Result<Document, AppError> {
        let account = match self.service.read_one_by_id(session, account_id).await {
            Ok(account) => account,
            Err(AppError::NotFound(_)) => return Err(AppError::Unauthorized),
            Err(e) => return Err(e),
        };
        let auth = account_auth(&account)?;
        if self.options.activation_required && !auth.is_active {
            return Err(AppError::AccountInactive);
        }
        if auth.is_blocked {
            return Err(AppError::AccountBlocked);
        }
        Ok(account)
    }

    async fn password_matches(&self, account: &Document, password: &str) -> Result<bool, AppError> {
        match lookup(account, &self.options.password_field).and_then(Value::as_str) {
            Some(hash) => self.hasher.verify(password, hash).await,
            None => {
                warn!("auth: account has no password hash");
                Ok(false)
            }
        }
    }

    /// Count a failed attempt and return the error to report once committed.
    async fn record_failure(
        &self,
        session: &mut dyn DbSession,
        account: &Document,
        mut auth: AccountAuth,
        attempt: Attempt,
    ) -> Result<AppError, AppError> {
        let now = Some(now_timestamp());
        let (attempts, max) = match attempt {
            Attempt::Login => {
                auth.number_of_failed_login_attempts =
                    auth.number_of_failed_login_attempts.saturating_add(1);
                auth.last_failed_login_attempt = now;
                (
                    auth.number_of_failed_login_attempts,
                    self.options.max_invalid_login_attempts,
                )
            }
            Attempt::ChangePassword => {
                auth.number_of_failed_change_password_attempts =
                    auth.number_of_failed_change_password_attempts.saturating_add(1);
                auth.last_failed_change_password_attempt = now;
                (
                    auth.number_of_failed_change_password_attempts,
                    self.options.max_invalid_change_password_attempts,
                )
            }
        };
        if attempts >= max {
            auth.is_blocked = true;
        }

        let (id, version) = identity(account)?;
        self.service
            .update_one_by_id_and_version(session, id, version, auth_update(&auth)?)
            .await?;
        if auth.is_blocked {
            warn!("{:?}: account {} blocked after {} failed attempts", attempt, id, attempts);
            Ok(AppError::AccountBlocked)
        } else {
            Ok(AppError::InvalidCredentials)
        }
    }
}

/// Concurrent registrations of one identifier queue on this key.
fn registration_lock(collection: &str, identifier: &str) -> String {
    format!("{collection}:register:{identifier}")
}

fn account_auth(account: &Document) -> Result<AccountAuth, AppError> {
    match account.get(AUTH_FIELD) {
        None | Some(Value::Null) => Ok(AccountAuth::default()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| AppError::InternalError(format!("malformed auth state: {e}"))),
    }
}

fn auth_update(auth: &AccountAuth) -> Result<Update, AppError> {
    let value = serde_json::to_value(auth)
        .map_err(|e| AppError::InternalError(format!("auth state encoding: {e}")))?;
    Ok(Update::new().set(AUTH_FIELD, value))
}

fn identity(account: &Document) -> Result<(&str, i64), AppError> {
    match (document_id(account), document_version(account)) {
        (Some(id), Some(version)) => Ok((id, version)),
        _ => Err(AppError::InternalError(
            "account is missing _id or version".to_string(),
        )),
    }
}

/// Remove the value at a dotted path.
fn remove_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(inner)) = document.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

#[derive(Clone)]
pub struct AuthController {
    controller: Controller,
    sessions: SessionManager,
    tokens: Arc<TokenService>,
    accounts: Accounts,
    schemas: Arc<AuthSchemas>,
}

impl AuthController {
    pub fn new(
        controller: Controller,
        sessions: SessionManager,
        service: Arc<dyn Service>,
        tokens: Arc<TokenService>,
        options: AuthOptions,
    ) -> Self {
        let schemas = AuthSchemas::for_options(&options);
        Self {
            controller,
            sessions,
            tokens,
            accounts: Accounts {
                service,
                hasher: PasswordHasher::new(options.password_hash_cost),
                options: Arc::new(options),
            },
            schemas: Arc::new(schemas),
        }
    }

    pub fn with_schemas(mut self, schemas: AuthSchemas) -> Self {
        self.schemas = Arc::new(schemas);
        self
    }

    pub fn options(&self) -> &AuthOptions {
        &self.accounts.options
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Strip the password hash from an account before it leaves the server.
    pub fn sanitize(&self, mut account: Document) -> Document {
        remove_path(&mut account, &self.accounts.options.password_field);
        account
    }

    pub async fn dispatch(&self, route: AuthRoute, input: RequestInput) -> Response {
        let language = self.controller.language(&input);
        let authorization = input.auth.token.clone();
        let result = match route {
            AuthRoute::Register => self.register(input).await,
            AuthRoute::Login => self.login(input).await,
            AuthRoute::ChangePassword => self
                .change_password(input)
                .await
                .map(|reply| reply.with_authorization(authorization)),
        };
        self.controller.respond(language.as_deref(), result)
    }

    pub async fn register(&self, input: RequestInput) -> Result<Reply, AppError> {
        let options = &self.accounts.options;
        let extracted = Controller::extract(&input, &self.schemas.register)?;
        reject_reserved(&extracted.body, &[])?;
        let identifier = extracted.body_str(&options.identifier_field)?.to_string();
        let password = extracted.body_str(&options.password_field)?;
        if options.identifier_field == "email" {
            validate_email(&identifier)?;
        }
        validate_password(password)?;

        let hash = self.accounts.hasher.hash(password).await?;
        let mut document = extracted.body.clone();
        document.insert(options.password_field.clone(), Value::from(hash));
        let auth = serde_json::to_value(AccountAuth::registered(options.activation_required))
            .map_err(|e| AppError::InternalError(format!("auth state encoding: {e}")))?;
        document.insert(AUTH_FIELD.to_string(), auth);

        let accounts = self.accounts.clone();
        let created = self
            .sessions
            .run(move |session| {
                Box::pin(async move { accounts.register(session, &identifier, document).await })
            })
            .await?;
        let id = document_id(&created).unwrap_or_default().to_string();
        info!("register: created account {}", id);

        let token = if options.activation_required {
            None
        } else {
            Some(self.tokens.issue(&id)?)
        };
        Ok(Reply::one(self.sanitize(created))
            .with_status(StatusCode::CREATED)
            .with_token(token))
    }

    pub async fn login(&self, input: RequestInput) -> Result<Reply, AppError> {
        let options = &self.accounts.options;
        let extracted = Controller::extract(&input, &self.schemas.login)?;
        let identifier = extracted.body_str(&options.identifier_field)?.to_string();
        let password = extracted.body_str(&options.password_field)?.to_string();

        let accounts = self.accounts.clone();
        let account = self
            .sessions
            .run(move |session| {
                Box::pin(async move { accounts.login(session, &identifier, &password).await })
            })
            .await??;
        let id = document_id(&account).unwrap_or_default();
        let token = self.tokens.issue(id)?;
        info!("login: account {} authenticated", id);
        Ok(Reply::one(self.sanitize(account)).with_token(Some(token)))
    }

    pub async fn change_password(&self, input: RequestInput) -> Result<Reply, AppError> {
        let options = &self.accounts.options;
        let account_id = input
            .auth
            .account_id()
            .ok_or(AppError::Unauthorized)?
            .to_string();
        let extracted = Controller::extract(&input, &self.schemas.change_password)?;
        let current = extracted.body_str(&options.password_field)?.to_string();
        let replacement = extracted.body_str(NEW_PASSWORD_FIELD)?.to_string();
        validate_password(&replacement)?;

        let accounts = self.accounts.clone();
        let id = account_id.clone();
        let account = self
            .sessions
            .run(move |session| {
                Box::pin(async move {
                    accounts
                        .change_password(session, &id, &current, &replacement)
                        .await
                })
            })
            .await??;
        let token = self.tokens.issue(&account_id)?;
        info!("change_password: account {} updated", account_id);
        Ok(Reply::one(self.sanitize(account)).with_token(Some(token)))
    }

    /// Verifier for public routes: publishes an empty auth context.
    pub fn verify_public(parts: &mut Parts) {
        if parts.extensions.get::<AuthContext>().is_none() {
            parts.extensions.insert(AuthContext::default());
        }
    }

    /// Verifier for private routes: checks the bearer token and publishes
    /// the account together with a freshly issued token.
    pub async fn verify_private(&self, parts: &mut Parts) -> Result<(), AppError> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::Unauthorized)?;
        let account_id = self.tokens.verify(token)?;

        let accounts = self.accounts.clone();
        let id = account_id.clone();
        let account = self
            .sessions
            .run(move |session| {
                Box::pin(async move { accounts.verified_account(session, &id).await })
            })
            .await?;

        let fresh = self.tokens.issue(&account_id)?;
        debug!("verify_private: account {} verified", account_id);
        parts.extensions.insert(AuthContext {
            account: Some(self.sanitize(account)),
            token: Some(fresh),
        });
        Ok(())
    }
}
