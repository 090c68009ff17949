//! Cell: backend scaffolding over axum and a document store.
//!
//! Startup builds a [`server::Cell`] from configuration, registers domain
//! services with its [`injector::Injector`], creates CRUD and auth
//! controllers, and mounts them with [`router::generate_routes`] and
//! [`router::generate_auth_routes`].

pub mod config;
pub mod constants;
pub mod controller;
pub mod db;
pub mod error;
pub mod handlers;
pub mod injector;
pub mod logger;
pub mod models;
pub mod password;
pub mod router;
pub mod safe;
pub mod server;
pub mod service;
pub mod session;
pub mod token;
pub mod validate;

pub use controller::{
    AuthContext, AuthController, AuthOptions, Controller, CrudController, CrudHooks,
    CrudSchemas, Extracted, Reply, RequestInput, Rule, Schema, Verifier,
};
pub use error::AppError;
pub use router::{generate_auth_routes, generate_routes, AuthRoute, CrudRoute, RouteOptions};
pub use server::{Cell, Server};
pub use service::{DocumentService, Service};
pub use session::SessionManager;
