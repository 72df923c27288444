use std::sync::Arc;

use axum::{Json, extract::State};

use crate::error::AppError;
use crate::keyring::JwksResponse;
use crate::provider::Provider;

/// Public JWKS. The one endpoint where infrastructure failures surface
/// as a 500 instead of degrading to a redirect.
pub async fn get(State(provider): State<Arc<Provider>>) -> Result<Json<JwksResponse>, AppError> {
    Ok(Json(provider.keyring.jwks().await?))
}
