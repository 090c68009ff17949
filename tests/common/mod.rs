#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::header::{ACCEPT_LANGUAGE, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

use cell::config::{AuthConfig, Config, ServerConfig};
use cell::db::{Document, Filter, MemoryDatabase};
use cell::{AppError, Cell};

pub const PASSWORD: &str = "correct-horse";

pub fn config() -> Config {
    let mut messages = HashMap::new();
    messages.insert(
        "de".to_string(),
        HashMap::from([("not_found".to_string(), "Nicht gefunden".to_string())]),
    );
    Config {
        server: ServerConfig {
            languages: vec!["en".to_string(), "de".to_string()],
            ..ServerConfig::default()
        },
        auth: AuthConfig {
            token_secret: "integration-test-secret".to_string(),
            encryption_key: "0123456789abcdef0123456789abcdef".to_string(),
            encryption_iv: "integration-iv".to_string(),
            password_hash_cost: 4,
            ..AuthConfig::default()
        },
        messages,
        ..Config::default()
    }
}

pub fn cell() -> Cell {
    Cell::with_database(config(), Arc::new(MemoryDatabase::new())).unwrap()
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn error_code(&self) -> &str {
        self.body["error"]["code"].as_str().unwrap_or_default()
    }

    pub fn document(&self) -> &Value {
        &self.body["document"]
    }

    pub fn token(&self) -> &str {
        self.body["token"].as_str().unwrap_or_default()
    }
}

pub struct TestRequest {
    method: Method,
    uri: String,
    token: Option<String>,
    language: Option<String>,
    body: Option<Value>,
}

impl TestRequest {
    pub fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_string(),
            token: None,
            language: None,
            body: None,
        }
    }

    pub fn token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub async fn send(self, app: &Router) -> TestResponse {
        let mut builder = Request::builder().method(self.method).uri(self.uri);
        if let Some(token) = self.token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(language) = self.language {
            builder = builder.header(ACCEPT_LANGUAGE, language);
        }
        let body = match self.body {
            Some(body) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }
}

/// Read a stored document directly, bypassing controllers.
pub async fn stored(cell: &Cell, collection: &str, field: &str, value: &str) -> Option<Document> {
    let collection = collection.to_string();
    let filter = Filter::new().eq(field, value);
    cell.sessions()
        .run(move |session| {
            Box::pin(async move {
                let document = session.find_one(&collection, &filter).await?;
                Ok::<_, AppError>(document)
            })
        })
        .await
        .unwrap()
}
