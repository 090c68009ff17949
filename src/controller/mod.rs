//! Request extraction, validation and uniform responses.

pub mod auth;
pub mod crud;

use async_trait::async_trait;
use axum::body::to_bytes;
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request};
use axum::http::header::{ACCEPT_LANGUAGE, AUTHORIZATION};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{debug, error};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::constants::{MAX_BODY_BYTES, RESERVED_FIELDS};
use crate::db::Document;
use crate::error::AppError;
use crate::models::{DocumentEnvelope, DocumentsEnvelope};
use crate::safe::{Safe, SafeValue};

pub use auth::{AuthController, AuthOptions, AuthSchemas};
pub use crud::{CrudController, CrudHooks, CrudSchemas, NoHooks};

/// Allow-list for the keys of one request part.
#[derive(Debug, Clone, Default)]
pub struct Rule {
    /// `None` permits every key.
    permitted: Option<HashSet<String>>,
    required: Vec<String>,
}

impl Rule {
    /// Permits nothing.
    pub fn none() -> Self {
        Self {
            permitted: Some(HashSet::new()),
            required: Vec::new(),
        }
    }

    pub fn any() -> Self {
        Self {
            permitted: None,
            required: Vec::new(),
        }
    }

    pub fn permit(keys: &[&str]) -> Self {
        Self {
            permitted: Some(keys.iter().map(|k| k.to_string()).collect()),
            required: Vec::new(),
        }
    }

    /// Required keys are permitted too.
    pub fn require(mut self, keys: &[&str]) -> Self {
        for key in keys {
            if let Some(permitted) = self.permitted.as_mut() {
                permitted.insert(key.to_string());
            }
            self.required.push(key.to_string());
        }
        self
    }

    pub fn permits(&self, key: &str) -> bool {
        self.permitted
            .as_ref()
            .map_or(true, |permitted| permitted.contains(key))
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    fn lowercased(&self) -> Self {
        Self {
            permitted: self
                .permitted
                .as_ref()
                .map(|keys| keys.iter().map(|k| k.to_ascii_lowercase()).collect()),
            required: self
                .required
                .iter()
                .map(|k| k.to_ascii_lowercase())
                .collect(),
        }
    }
}

/// One rule per request part. The default permits no keys anywhere.
#[derive(Debug, Clone)]
pub struct Schema {
    pub headers: Rule,
    pub path: Rule,
    pub query: Rule,
    pub body: Rule,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            headers: Rule::none(),
            path: Rule::none(),
            query: Rule::none(),
            body: Rule::none(),
        }
    }
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headers(mut self, rule: Rule) -> Self {
        self.headers = rule;
        self
    }

    pub fn path(mut self, rule: Rule) -> Self {
        self.path = rule;
        self
    }

    pub fn query(mut self, rule: Rule) -> Self {
        self.query = rule;
        self
    }

    pub fn body(mut self, rule: Rule) -> Self {
        self.body = rule;
        self
    }
}

/// What middleware learned about the caller.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    /// The verified account, on private routes.
    pub account: Option<Document>,
    /// A freshly issued token for the verified account.
    pub token: Option<String>,
}

impl AuthContext {
    pub fn account_id(&self) -> Option<&str> {
        self.account.as_ref().and_then(crate::db::document_id)
    }
}

/// Raw request parts gathered by the extractor.
#[derive(Debug, Clone, Default)]
pub struct RequestInput {
    pub headers: HeaderMap,
    pub path: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Option<Value>,
    pub auth: AuthContext,
}

impl RequestInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_path(mut self, key: &str, value: &str) -> Self {
        self.path.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_auth(mut self, auth: AuthContext) -> Self {
        self.auth = auth;
        self
    }

    /// Primary subtags from `Accept-Language`, in the order sent.
    pub fn accepted_languages(&self) -> Vec<String> {
        accepted_languages(&self.headers)
    }
}

#[async_trait]
impl<S> FromRequest<S> for RequestInput
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let (mut parts, body) = req.into_parts();

        let path = Path::<HashMap<String, String>>::from_request_parts(&mut parts, state)
            .await
            .map(|Path(params)| params)
            .unwrap_or_default();
        let Query(query) = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .map_err(|e| AppError::BadRequest(format!("Malformed query string: {e}")))?;
        let auth = parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .unwrap_or_default();

        let bytes = to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|_| AppError::BadRequest("Request body too large".to_string()))?;
        let body = if bytes.is_empty() {
            None
        } else {
            Some(
                serde_json::from_slice(&bytes)
                    .map_err(|_| AppError::BadRequest("Body is not valid JSON".to_string()))?,
            )
        };

        Ok(RequestInput {
            headers: parts.headers,
            path,
            query,
            body,
            auth,
        })
    }
}

fn accepted_languages(headers: &HeaderMap) -> Vec<String> {
    headers
        .get(ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
        .map(|header| {
            header
                .split(',')
                .filter_map(|tag| {
                    let tag = tag.split(';').next()?.trim();
                    let primary = tag.split('-').next()?.to_ascii_lowercase();
                    (!primary.is_empty() && primary != "*").then_some(primary)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Request parts that passed a [`Schema`].
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
    pub path: Document,
    pub query: Document,
    pub body: Document,
    pub auth: AuthContext,
}

impl Extracted {
    pub fn path_str(&self, key: &str) -> Result<&str, AppError> {
        self.path
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::BadRequest(format!("Path parameter '{key}' is required")))
    }

    pub fn body_str(&self, key: &str) -> Result<&str, AppError> {
        self.body
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::BadRequest(format!("Body field '{key}' must be a string")))
    }
}

/// A successful controller result.
#[derive(Debug)]
pub struct Reply {
    status: StatusCode,
    payload: Payload,
    authorization: Option<String>,
}

#[derive(Debug)]
enum Payload {
    One(DocumentEnvelope),
    Many(DocumentsEnvelope),
}

impl Reply {
    pub fn one(document: Document) -> Self {
        Self {
            status: StatusCode::OK,
            payload: Payload::One(DocumentEnvelope {
                document,
                token: None,
            }),
            authorization: None,
        }
    }

    pub fn many(documents: Vec<Document>, count: u64) -> Self {
        Self {
            status: StatusCode::OK,
            payload: Payload::Many(DocumentsEnvelope { documents, count }),
            authorization: None,
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Put `token` in the body envelope. No effect on list replies.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        if let Payload::One(envelope) = &mut self.payload {
            envelope.token = token;
        }
        self
    }

    /// Send `token` back in the `authorization` response header.
    pub fn with_authorization(mut self, token: Option<String>) -> Self {
        self.authorization = token;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn document(&self) -> Option<&Document> {
        match &self.payload {
            Payload::One(envelope) => Some(&envelope.document),
            Payload::Many(_) => None,
        }
    }

    pub fn documents(&self) -> Option<(&[Document], u64)> {
        match &self.payload {
            Payload::Many(envelope) => Some((&envelope.documents, envelope.count)),
            Payload::One(_) => None,
        }
    }

    pub fn token(&self) -> Option<&str> {
        match &self.payload {
            Payload::One(envelope) => envelope.token.as_deref(),
            Payload::Many(_) => None,
        }
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let mut response = match self.payload {
            Payload::One(envelope) => (self.status, Json(envelope)).into_response(),
            Payload::Many(envelope) => (self.status, Json(envelope)).into_response(),
        };
        if let Some(token) = self.authorization {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                response.headers_mut().insert(AUTHORIZATION, value);
            }
        }
        response
    }
}

/// Extra per-route check run by middleware after authentication.
///
/// A verifier may inspect and extend the request parts (for example by
/// reading the [`AuthContext`] extension) and rejects the request by
/// returning an error.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, parts: &mut Parts) -> Result<(), AppError>;
}

/// Shared base of every controller: schema extraction plus localized replies.
#[derive(Clone)]
pub struct Controller {
    messages: Arc<Safe<String, String>>,
    languages: Arc<SafeValue<Vec<String>>>,
}

impl Controller {
    pub fn new(messages: Arc<Safe<String, String>>, languages: Arc<SafeValue<Vec<String>>>) -> Self {
        Self {
            messages,
            languages,
        }
    }

    /// Validate `input` against `schema`.
    ///
    /// Unknown path, query and body keys are rejected; headers are filtered
    /// down to the permitted names.
    pub fn extract(input: &RequestInput, schema: &Schema) -> Result<Extracted, AppError> {
        let header_rule = schema.headers.lowercased();
        let mut headers = HashMap::new();
        for (name, value) in &input.headers {
            let name = name.as_str().to_ascii_lowercase();
            if header_rule.permits(&name) {
                if let Ok(value) = value.to_str() {
                    headers.insert(name, value.to_string());
                }
            }
        }
        for required in header_rule.required() {
            if !headers.contains_key(required) {
                return Err(AppError::BadRequest(format!(
                    "Header '{required}' is required"
                )));
            }
        }

        let path = check_part(
            "path parameter",
            &schema.path,
            input
                .path
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
                .collect(),
        )?;
        let query = check_part(
            "query parameter",
            &schema.query,
            input
                .query
                .iter()
                .map(|(k, v)| (k.clone(), decode_scalar(v)))
                .collect(),
        )?;
        let body = match &input.body {
            None => Document::new(),
            Some(Value::Object(body)) => body.clone(),
            Some(_) => return Err(AppError::BadRequest("Body must be a JSON object".to_string())),
        };
        let body = check_part("body field", &schema.body, body)?;

        Ok(Extracted {
            headers,
            path,
            query,
            body,
            auth: input.auth.clone(),
        })
    }

    /// Pick the response language: the first accepted language that is
    /// configured, otherwise the first configured one.
    pub fn language(&self, input: &RequestInput) -> Option<String> {
        self.language_for(&input.headers)
    }

    pub fn language_for(&self, headers: &HeaderMap) -> Option<String> {
        let configured = self.languages.get().ok()?;
        accepted_languages(headers)
            .into_iter()
            .find(|accepted| configured.contains(accepted))
            .or_else(|| configured.first().cloned())
    }

    pub fn message(&self, language: Option<&str>, err: &AppError) -> Option<String> {
        let key = format!("{}.{}", language?, err.code());
        self.messages.get(&key).ok()
    }

    pub fn error_response(&self, language: Option<&str>, err: AppError) -> Response {
        if err.status().is_server_error() {
            error!("controller: {}", err);
        } else {
            debug!("controller: rejected: {}", err);
        }
        let message = self.message(language, &err);
        err.into_response_with(message)
    }

    pub fn respond(&self, language: Option<&str>, result: Result<Reply, AppError>) -> Response {
        match result {
            Ok(reply) => reply.into_response(),
            Err(err) => self.error_response(language, err),
        }
    }
}

fn check_part(part: &str, rule: &Rule, values: Document) -> Result<Document, AppError> {
    if let Some(key) = values.keys().find(|key| !rule.permits(key)) {
        return Err(AppError::BadRequest(format!("Unexpected {part} '{key}'")));
    }
    if let Some(key) = rule.required().iter().find(|key| !values.contains_key(*key)) {
        return Err(AppError::BadRequest(format!("Missing {part} '{key}'")));
    }
    Ok(values)
}

/// Fields the server maintains may not be written by clients, neither
/// directly nor through a dotted path into them.
pub(crate) fn reject_reserved(body: &Document, allowed: &[&str]) -> Result<(), AppError> {
    let reserved = body.keys().find(|key| {
        let root = key.split('.').next().unwrap_or_default();
        RESERVED_FIELDS.contains(&root) && !allowed.contains(&key.as_str())
    });
    match reserved {
        Some(key) => Err(AppError::BadRequest(format!(
            "Field '{key}' is maintained by the server"
        ))),
        None => Ok(()),
    }
}

/// `"5"` → `5`, `"true"` → `true`; anything that is not a JSON scalar stays a string.
fn decode_scalar(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Number(_) | Value::Bool(_) | Value::Null | Value::String(_))) => value,
        _ => Value::from(raw),
    }
}
