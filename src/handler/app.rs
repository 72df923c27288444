use std::sync::Arc;

use axum::{
    Extension,
    extract::{Request, State},
    response::{IntoResponse, Redirect, Response},
};

use crate::provider::Provider;
use crate::session::LaunchSession;

/// The in-tool landing page. The launch middleware has already
/// authenticated the request (or handled the callback), so this only
/// dispatches to the registered callbacks.
pub async fn any(
    State(provider): State<Arc<Provider>>,
    session: Option<Extension<LaunchSession>>,
    request: Request,
) -> Response {
    let Some(Extension(session)) = session else {
        // reachable only when the app route itself was whitelisted
        return Redirect::to(&provider.config.invalid_token_route).into_response();
    };

    if session.context.is_deep_linking() {
        provider.callbacks.on_deep_linking(session, request).await
    } else {
        provider.callbacks.on_connect(session, request).await
    }
}
