mod common;

use axum::http::header::AUTHORIZATION;
use axum::http::{Method, StatusCode};
use axum::Router;
use serde_json::json;
use std::sync::Arc;

use cell::token::TokenService;
use cell::{
    generate_auth_routes, generate_routes, Cell, CrudRoute, DocumentService, RouteOptions, Server,
};
use common::{cell, config, stored, TestRequest, PASSWORD};

const EMAIL: &str = "ada@example.com";

fn accounts_app(cell: &Cell) -> Router {
    let accounts = Arc::new(DocumentService::new("accounts"));
    let auth = cell.auth_controller(accounts.clone()).unwrap();
    let crud = cell.crud_controller(accounts);
    let api = generate_auth_routes(auth.clone(), "/auth").merge(
        generate_routes(
            crud,
            RouteOptions::new("/accounts")
                .routes(&[CrudRoute::Read])
                .private(auth),
        )
        .unwrap(),
    );
    Server::app(cell, api)
}

async fn register(app: &Router) -> String {
    let response = TestRequest::new(Method::POST, "/auth/register")
        .json(json!({"email": EMAIL, "password": PASSWORD, "name": "Ada"}))
        .send(app)
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    response.token().to_string()
}

async fn login(app: &Router, password: &str) -> common::TestResponse {
    TestRequest::new(Method::POST, "/auth/login")
        .json(json!({"email": EMAIL, "password": password}))
        .send(app)
        .await
}

#[tokio::test]
async fn test_register_returns_token_without_hash() {
    let cell = cell();
    let app = accounts_app(&cell);
    let response = TestRequest::new(Method::POST, "/auth/register")
        .json(json!({"email": EMAIL, "password": PASSWORD, "name": "Ada"}))
        .send(&app)
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert!(!response.token().is_empty());
    assert_eq!(response.document()["name"], json!("Ada"));
    assert!(response.document().get("password").is_none());
    assert_eq!(response.document()["auth"]["isActive"], json!(true));

    let account = stored(&cell, "accounts", "email", EMAIL).await.unwrap();
    assert!(account["password"].as_str().unwrap().starts_with("$2"));
}

#[tokio::test]
async fn test_register_rejects_invalid_input() {
    let cell = cell();
    let app = accounts_app(&cell);
    let short = TestRequest::new(Method::POST, "/auth/register")
        .json(json!({"email": EMAIL, "password": "short"}))
        .send(&app)
        .await;
    assert_eq!(short.status, StatusCode::BAD_REQUEST);

    let reserved = TestRequest::new(Method::POST, "/auth/register")
        .json(json!({"email": EMAIL, "password": PASSWORD, "auth": {"isActive": true}}))
        .send(&app)
        .await;
    assert_eq!(reserved.status, StatusCode::BAD_REQUEST);
    assert!(stored(&cell, "accounts", "email", EMAIL).await.is_none());
}

#[tokio::test]
async fn test_duplicate_registration() {
    let cell = cell();
    let app = accounts_app(&cell);
    register(&app).await;
    let duplicate = TestRequest::new(Method::POST, "/auth/register")
        .json(json!({"email": EMAIL, "password": "another-password"}))
        .send(&app)
        .await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);
    assert_eq!(duplicate.error_code(), "account_already_exists");

    let token = login(&app, PASSWORD).await.token().to_string();
    let listed = TestRequest::new(Method::GET, "/accounts")
        .token(&token)
        .send(&app)
        .await;
    assert_eq!(listed.body["count"], json!(1));
}

#[tokio::test]
async fn test_failed_logins_block_account() {
    let cell = cell();
    let app = accounts_app(&cell);
    register(&app).await;

    for _ in 0..4 {
        let failed = login(&app, "wrong-password").await;
        assert_eq!(failed.status, StatusCode::UNAUTHORIZED);
        assert_eq!(failed.error_code(), "invalid_credentials");
    }
    let blocked = login(&app, "wrong-password").await;
    assert_eq!(blocked.status, StatusCode::FORBIDDEN);
    assert_eq!(blocked.error_code(), "account_blocked");

    let account = stored(&cell, "accounts", "email", EMAIL).await.unwrap();
    assert_eq!(account["auth"]["numberOfFailedLoginAttempts"], json!(5));
    assert_eq!(account["auth"]["isBlocked"], json!(true));

    let correct = login(&app, PASSWORD).await;
    assert_eq!(correct.status, StatusCode::FORBIDDEN);
    assert_eq!(correct.error_code(), "account_blocked");
}

#[tokio::test]
async fn test_unknown_identifier_is_generic() {
    let cell = cell();
    let app = accounts_app(&cell);
    let response = TestRequest::new(Method::POST, "/auth/login")
        .json(json!({"email": "nobody@example.com", "password": PASSWORD}))
        .send(&app)
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.error_code(), "invalid_credentials");
}

#[tokio::test]
async fn test_successful_login_resets_counter() {
    let cell = cell();
    let app = accounts_app(&cell);
    register(&app).await;
    login(&app, "wrong-password").await;
    login(&app, "wrong-password").await;

    let response = login(&app, PASSWORD).await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(!response.token().is_empty());
    assert!(response.document().get("password").is_none());

    let account = stored(&cell, "accounts", "email", EMAIL).await.unwrap();
    assert_eq!(account["auth"]["numberOfFailedLoginAttempts"], json!(0));
    assert!(account["auth"]["lastSuccessfulLogin"].is_string());
}

#[tokio::test]
async fn test_private_route_requires_token() {
    let cell = cell();
    let app = accounts_app(&cell);
    let token = register(&app).await;

    let anonymous = TestRequest::new(Method::GET, "/accounts").send(&app).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
    assert_eq!(anonymous.error_code(), "unauthorized");

    let listed = TestRequest::new(Method::GET, "/accounts")
        .token(&token)
        .send(&app)
        .await;
    assert_eq!(listed.status, StatusCode::OK);
    let refreshed = listed.headers[AUTHORIZATION].to_str().unwrap();
    assert!(refreshed.starts_with("Bearer "));

    let again = TestRequest::new(Method::GET, "/accounts")
        .token(refreshed.trim_start_matches("Bearer "))
        .send(&app)
        .await;
    assert_eq!(again.status, StatusCode::OK);
}

#[tokio::test]
async fn test_change_password() {
    let cell = cell();
    let app = accounts_app(&cell);
    let token = register(&app).await;

    let anonymous = TestRequest::new(Method::PATCH, "/auth/password")
        .json(json!({"password": PASSWORD, "newPassword": "battery-staple"}))
        .send(&app)
        .await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    let wrong = TestRequest::new(Method::PATCH, "/auth/password")
        .token(&token)
        .json(json!({"password": "wrong-password", "newPassword": "battery-staple"}))
        .send(&app)
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.error_code(), "invalid_credentials");

    let changed = TestRequest::new(Method::PATCH, "/auth/password")
        .token(&token)
        .json(json!({"password": PASSWORD, "newPassword": "battery-staple"}))
        .send(&app)
        .await;
    assert_eq!(changed.status, StatusCode::OK);
    assert!(!changed.token().is_empty());
    assert!(changed.headers.contains_key(AUTHORIZATION));

    let account = stored(&cell, "accounts", "email", EMAIL).await.unwrap();
    assert_eq!(
        account["auth"]["numberOfFailedChangePasswordAttempts"],
        json!(0)
    );
    assert_eq!(login(&app, PASSWORD).await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(login(&app, "battery-staple").await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_failed_password_changes_block_account() {
    let cell = cell();
    let app = accounts_app(&cell);
    let token = register(&app).await;
    let change = || {
        TestRequest::new(Method::PATCH, "/auth/password")
            .token(&token)
            .json(json!({"password": "wrong-password", "newPassword": "battery-staple"}))
    };

    for _ in 0..4 {
        let failed = change().send(&app).await;
        assert_eq!(failed.status, StatusCode::UNAUTHORIZED);
        assert_eq!(failed.error_code(), "invalid_credentials");
    }
    let blocked = change().send(&app).await;
    assert_eq!(blocked.status, StatusCode::FORBIDDEN);
    assert_eq!(blocked.error_code(), "account_blocked");

    let account = stored(&cell, "accounts", "email", EMAIL).await.unwrap();
    assert_eq!(
        account["auth"]["numberOfFailedChangePasswordAttempts"],
        json!(5)
    );
    assert_eq!(account["auth"]["isBlocked"], json!(true));

    let listed = TestRequest::new(Method::GET, "/accounts")
        .token(&token)
        .send(&app)
        .await;
    assert_eq!(listed.status, StatusCode::FORBIDDEN);
    assert_eq!(listed.error_code(), "account_blocked");
}

#[tokio::test]
async fn test_expired_token() {
    let cell = cell();
    let app = accounts_app(&cell);
    register(&app).await;
    let account = stored(&cell, "accounts", "email", EMAIL).await.unwrap();
    let id = account["_id"].as_str().unwrap();

    let tokens = TokenService::new(&config().auth).unwrap();
    let expired = tokens
        .issue_at(id, chrono::Utc::now().timestamp() - 7200)
        .unwrap();
    let response = TestRequest::new(Method::GET, "/accounts")
        .token(&expired)
        .send(&app)
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.error_code(), "token_expired");
}

#[tokio::test]
async fn test_tampered_token() {
    let cell = cell();
    let app = accounts_app(&cell);
    let token = register(&app).await;

    let middle = token.len() / 2;
    let replacement = if &token[middle..middle + 1] == "A" { "B" } else { "A" };
    let tampered = format!("{}{}{}", &token[..middle], replacement, &token[middle + 1..]);
    let response = TestRequest::new(Method::GET, "/accounts")
        .token(&tampered)
        .send(&app)
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.error_code(), "invalid_token");
}
