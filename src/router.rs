//! Route generation for CRUD and account endpoints.
//!
//! Every generated route runs its middleware in a fixed order: authentication
//! (private when an auth controller is supplied, public otherwise), then the
//! caller's verifiers in the order given, then the controller method.

use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{on, MethodFilter, MethodRouter};
use axum::Router;
use log::debug;
use std::sync::Arc;

use crate::controller::{AuthController, Controller, CrudController, RequestInput, Verifier};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrudRoute {
    Read,
    ReadOneById,
    CreateOne,
    UpdateOneByIdAndVersion,
    ReplaceOneByIdAndVersion,
    SoftDeleteOneByIdAndVersion,
    DeleteOneByIdAndVersion,
}

impl CrudRoute {
    pub const ALL: [CrudRoute; 7] = [
        CrudRoute::Read,
        CrudRoute::ReadOneById,
        CrudRoute::CreateOne,
        CrudRoute::UpdateOneByIdAndVersion,
        CrudRoute::ReplaceOneByIdAndVersion,
        CrudRoute::SoftDeleteOneByIdAndVersion,
        CrudRoute::DeleteOneByIdAndVersion,
    ];

    /// Every route except the hard delete, which shares its verb and path
    /// with the soft delete.
    pub fn standard() -> Vec<CrudRoute> {
        Self::ALL
            .into_iter()
            .filter(|route| *route != CrudRoute::DeleteOneByIdAndVersion)
            .collect()
    }

    pub fn method(&self) -> Method {
        match self {
            CrudRoute::Read | CrudRoute::ReadOneById => Method::GET,
            CrudRoute::CreateOne => Method::POST,
            CrudRoute::UpdateOneByIdAndVersion => Method::PATCH,
            CrudRoute::ReplaceOneByIdAndVersion => Method::PUT,
            CrudRoute::SoftDeleteOneByIdAndVersion | CrudRoute::DeleteOneByIdAndVersion => {
                Method::DELETE
            }
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            CrudRoute::Read | CrudRoute::CreateOne => "",
            _ => "/:_id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthRoute {
    Register,
    Login,
    ChangePassword,
}

impl AuthRoute {
    pub const ALL: [AuthRoute; 3] = [
        AuthRoute::Register,
        AuthRoute::Login,
        AuthRoute::ChangePassword,
    ];

    pub fn method(&self) -> Method {
        match self {
            AuthRoute::Register | AuthRoute::Login => Method::POST,
            AuthRoute::ChangePassword => Method::PATCH,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            AuthRoute::Register => "/register",
            AuthRoute::Login => "/login",
            AuthRoute::ChangePassword => "/password",
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, AuthRoute::ChangePassword)
    }
}

/// What [`generate_routes`] mounts and how it guards it.
#[derive(Clone, Default)]
pub struct RouteOptions {
    /// Mount point such as `/orders`.
    pub prefix: String,
    pub routes: Vec<CrudRoute>,
    /// Makes every route private.
    pub auth: Option<AuthController>,
    /// Run after authentication, in order.
    pub verifiers: Vec<Arc<dyn Verifier>>,
}

impl RouteOptions {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            routes: CrudRoute::standard(),
            auth: None,
            verifiers: Vec::new(),
        }
    }

    pub fn routes(mut self, routes: &[CrudRoute]) -> Self {
        self.routes = routes.to_vec();
        self
    }

    pub fn private(mut self, auth: AuthController) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifiers.push(verifier);
        self
    }
}

/// Build the router for the enabled CRUD routes of `crud`.
pub fn generate_routes(crud: CrudController, options: RouteOptions) -> Result<Router, AppError> {
    for (i, first) in options.routes.iter().enumerate() {
        if let Some(second) = options.routes[i + 1..]
            .iter()
            .find(|other| other.method() == first.method() && other.path() == first.path())
        {
            return Err(AppError::InvalidArguments(format!(
                "routes {:?} and {:?} both map to {} {}{}",
                first,
                second,
                first.method(),
                options.prefix,
                first.path()
            )));
        }
    }

    let mut router = Router::new();
    for route in &options.routes {
        let route = *route;
        let path = mount_path(&options.prefix, route.path());
        let controller = crud.clone();
        let handler = on(method_filter(&route.method()), move |input: RequestInput| {
            let controller = controller.clone();
            async move { controller.dispatch(route, input).await }
        });
        let handler = guard(
            handler,
            options.auth.as_ref(),
            &options.verifiers,
            crud.controller(),
        );
        debug!("router: {} {} -> {:?}", route.method(), path, route);
        router = router.route(&path, handler);
    }
    Ok(router)
}

/// Build the router for account registration, login and password change.
pub fn generate_auth_routes(auth: AuthController, prefix: &str) -> Router {
    let mut router = Router::new();
    for route in AuthRoute::ALL {
        let path = mount_path(prefix, route.path());
        let controller = auth.clone();
        let handler = on(method_filter(&route.method()), move |input: RequestInput| {
            let controller = controller.clone();
            async move { controller.dispatch(route, input).await }
        });
        let private = route.is_private().then_some(&auth);
        let handler = guard(handler, private, &[], auth.controller());
        debug!("router: {} {} -> {:?}", route.method(), path, route);
        router = router.route(&path, handler);
    }
    router
}

/// Layer authentication and verifiers onto one route. The layer added last
/// runs first.
fn guard(
    handler: MethodRouter,
    auth: Option<&AuthController>,
    verifiers: &[Arc<dyn Verifier>],
    controller: &Controller,
) -> MethodRouter {
    let mut handler = handler;
    for verifier in verifiers.iter().rev() {
        handler = handler.route_layer(middleware::from_fn_with_state(
            VerifierState {
                verifier: Arc::clone(verifier),
                controller: controller.clone(),
            },
            verifier_middleware,
        ));
    }
    match auth {
        Some(auth) => handler.route_layer(middleware::from_fn_with_state(
            auth.clone(),
            private_middleware,
        )),
        None => handler.route_layer(middleware::from_fn(public_middleware)),
    }
}

fn mount_path(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let full = format!("{prefix}{path}");
    if full.is_empty() {
        "/".to_string()
    } else if full.starts_with('/') {
        full
    } else {
        format!("/{full}")
    }
}

fn method_filter(method: &Method) -> MethodFilter {
    match *method {
        Method::POST => MethodFilter::POST,
        Method::PATCH => MethodFilter::PATCH,
        Method::PUT => MethodFilter::PUT,
        Method::DELETE => MethodFilter::DELETE,
        _ => MethodFilter::GET,
    }
}

async fn public_middleware(request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();
    AuthController::verify_public(&mut parts);
    next.run(Request::from_parts(parts, body)).await
}

async fn private_middleware(
    State(auth): State<AuthController>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    if let Err(err) = auth.verify_private(&mut parts).await {
        let language = auth.controller().language_for(&parts.headers);
        return auth.controller().error_response(language.as_deref(), err);
    }
    next.run(Request::from_parts(parts, body)).await
}

#[derive(Clone)]
struct VerifierState {
    verifier: Arc<dyn Verifier>,
    controller: Controller,
}

async fn verifier_middleware(
    State(state): State<VerifierState>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    if let Err(err) = state.verifier.verify(&mut parts).await {
        let language = state.controller.language_for(&parts.headers);
        return state.controller.error_response(language.as_deref(), err);
    }
    next.run(Request::from_parts(parts, body)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_path() {
        assert_eq!(mount_path("/orders", ""), "/orders");
        assert_eq!(mount_path("/orders/", "/:_id"), "/orders/:_id");
        assert_eq!(mount_path("", ""), "/");
        assert_eq!(mount_path("orders", "/:_id"), "/orders/:_id");
    }

    #[test]
    fn test_route_table() {
        assert_eq!(CrudRoute::Read.method(), Method::GET);
        assert_eq!(CrudRoute::Read.path(), "");
        assert_eq!(CrudRoute::UpdateOneByIdAndVersion.method(), Method::PATCH);
        assert_eq!(CrudRoute::ReplaceOneByIdAndVersion.method(), Method::PUT);
        assert_eq!(
            CrudRoute::SoftDeleteOneByIdAndVersion.path(),
            CrudRoute::DeleteOneByIdAndVersion.path()
        );
        assert!(!CrudRoute::standard().contains(&CrudRoute::DeleteOneByIdAndVersion));
        assert!(AuthRoute::ChangePassword.is_private());
        assert!(!AuthRoute::Login.is_private());
    }
}
