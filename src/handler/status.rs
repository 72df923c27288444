use std::sync::Arc;

use axum::{
    extract::{Request, State},
    response::Response,
};

use crate::provider::Provider;

pub async fn session_timeout(State(provider): State<Arc<Provider>>, request: Request) -> Response {
    provider.callbacks.on_session_timeout(request).await
}

pub async fn invalid_token(State(provider): State<Arc<Provider>>, request: Request) -> Response {
    provider.callbacks.on_invalid_token(request).await
}
