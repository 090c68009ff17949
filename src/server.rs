//! Application context and HTTP server.

use anyhow::Context;
use axum::body::Body;
use axum::extract::Extension;
use axum::http::{HeaderValue, Request};
use axum::routing::get;
use axum::Router;
use log::{debug, info};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug_span, Span};

use crate::config::Config;
use crate::controller::{AuthController, AuthOptions, Controller, CrudController};
use crate::db::{self, Database};
use crate::error::AppError;
use crate::handlers::health;
use crate::injector::Injector;
use crate::safe::{Safe, SafeValue};
use crate::service::Service;
use crate::session::SessionManager;
use crate::token::TokenService;

/// Everything a controller needs, created once at startup and shared.
pub struct Cell {
    config: Arc<Config>,
    database: Arc<dyn Database>,
    sessions: SessionManager,
    injector: Arc<Injector>,
    messages: Arc<Safe<String, String>>,
    languages: Arc<SafeValue<Vec<String>>>,
}

impl Cell {
    /// Validate `config` and open the configured database.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        config.validate().context("Invalid configuration")?;
        let database = db::connect(&config.database)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::with_database(config, database)?)
    }

    /// Build a context over an already opened database.
    pub fn with_database(config: Config, database: Arc<dyn Database>) -> Result<Self, AppError> {
        let messages = Arc::new(Safe::with_validator(|_: &String, message: &String| {
            if message.trim().is_empty() {
                Err("message is empty".to_string())
            } else {
                Ok(())
            }
        }));
        for (language, codes) in &config.messages {
            for (code, message) in codes {
                messages.set(format!("{language}.{code}"), message.clone())?;
            }
        }

        let languages = Arc::new(SafeValue::with_validator("languages", |languages: &Vec<String>| {
            if languages.is_empty() {
                Err("at least one language is required".to_string())
            } else {
                Ok(())
            }
        }));
        languages.set(config.server.languages.clone())?;
        debug!("cell: {} localized messages loaded", messages.len());

        Ok(Self {
            config: Arc::new(config),
            sessions: SessionManager::new(Arc::clone(&database)),
            database,
            injector: Arc::new(Injector::new()),
            messages,
            languages,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn injector(&self) -> &Arc<Injector> {
        &self.injector
    }

    pub fn messages(&self) -> &Arc<Safe<String, String>> {
        &self.messages
    }

    pub fn languages(&self) -> &Arc<SafeValue<Vec<String>>> {
        &self.languages
    }

    pub fn controller(&self) -> Controller {
        Controller::new(Arc::clone(&self.messages), Arc::clone(&self.languages))
    }

    pub fn crud_controller(&self, service: Arc<dyn Service>) -> CrudController {
        CrudController::new(self.controller(), self.sessions.clone(), service)
    }

    pub fn auth_controller(&self, service: Arc<dyn Service>) -> Result<AuthController, AppError> {
        let tokens = TokenService::new(&self.config.auth)?;
        Ok(AuthController::new(
            self.controller(),
            self.sessions.clone(),
            service,
            Arc::new(tokens),
            AuthOptions::from_config(&self.config.auth),
        ))
    }
}

pub struct Server;

impl Server {
    /// Wrap `api` with health and version endpoints, CORS and request tracing.
    pub fn app(cell: &Cell, api: Router) -> Router {
        api.route("/health", get(health::health_check))
            .route("/version", get(health::get_version))
            .layer(cors(&cell.config.server.cors_allowed_origins))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(Extension(Arc::clone(&cell.database)))
    }

    /// Serve `api` on the configured address until Ctrl+C or SIGTERM.
    pub async fn serve(cell: &Cell, api: Router) -> anyhow::Result<()> {
        let address = cell.config.server.service_address.clone();
        let app = Self::app(cell, api);
        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .with_context(|| format!("Failed to bind {address}"))?;

        info!("Server listening on {}", address);
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;
        info!("Server stopped");
        Ok(())
    }
}

fn cors(allowed_origins: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.trim() == "*" {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

fn make_span(request: &Request<Body>) -> Span {
    let method = request.method().as_str();
    let path = request.uri().path();
    debug_span!("http-request", method, path)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        let sigterm = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    log::error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::select! {
            _ = ctrl_c => { info!("Received Ctrl+C, shutting down"); }
            _ = sigterm => { info!("Received SIGTERM, shutting down"); }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        info!("Received Ctrl+C, shutting down");
    }
}
