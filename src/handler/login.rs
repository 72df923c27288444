use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::SignedCookieJar;
use tracing::info;
use url::form_urlencoded;

use crate::error::{AppError, OptionExt};
use crate::provider::Provider;
use crate::session;
use crate::util;

const LOGIN_BODY_LIMIT: usize = 64 * 1024;

/// OIDC third-party-initiated login. Any method; parameters are the
/// union of query string and form body. An unknown issuer answers 401,
/// anything else wrong answers 400 without setting cookies.
pub async fn any(State(provider): State<Arc<Provider>>, request: Request) -> Response {
    match handle(&provider, request).await {
        Ok(response) => response,
        Err(err @ AppError::UnregisteredPlatform(_)) => err.into_response(),
        Err(err) => {
            tracing::debug!(error = ?err, "login request rejected");
            AppError::bad_request("Invalid login request").into_response()
        }
    }
}

async fn handle(provider: &Provider, request: Request) -> Result<Response, AppError> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, LOGIN_BODY_LIMIT)
        .await
        .map_err(|_| AppError::bad_request("Request body too large"))?;
    let params = login_params(&parts, &bytes);

    let iss = params.get("iss").or_missing_argument("Missing iss parameter")?;
    let login_hint = params.get("login_hint").or_missing_argument("Missing login_hint parameter")?;
    let target_link_uri = params
        .get("target_link_uri")
        .or_missing_argument("Missing target_link_uri parameter")?;

    let platform = provider
        .registry
        .get(iss)
        .await?
        .ok_or_else(|| AppError::unregistered_platform(iss))?;

    let state = util::random_base36(20);
    let nonce = util::random_base36(20);

    let mut url = url::Url::parse(&platform.auth_endpoint)
        .map_err(|_| AppError::bad_request("Platform auth endpoint is not a valid URL"))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("response_type", "id_token");
        query.append_pair("response_mode", "form_post");
        query.append_pair("scope", "openid");
        query.append_pair("prompt", "none");
        query.append_pair("client_id", &platform.client_id);
        query.append_pair("redirect_uri", target_link_uri);
        query.append_pair("login_hint", login_hint);
        query.append_pair("nonce", &nonce);
        query.append_pair("state", &state);
        if let Some(hint) = params.get("lti_message_hint") {
            query.append_pair("lti_message_hint", hint);
        }
        if let Some(deployment_id) = params.get("lti_deployment_id") {
            query.append_pair("lti_deployment_id", deployment_id);
        }
    }

    // bind the issuer to this login attempt until the platform calls back
    let jar = SignedCookieJar::from_headers(&parts.headers, provider.cookie_key.clone());
    let jar = jar.add(session::build_cookie(
        &provider.config.cookies,
        session::state_cookie_name(&state),
        iss.clone(),
        Some(session::STATE_COOKIE_MAX_AGE),
    ));

    info!(iss = %iss, "login redirecting to platform");
    Ok((jar, Redirect::to(url.as_str())).into_response())
}

fn login_params(parts: &Parts, bytes: &[u8]) -> HashMap<String, String> {
    let mut params: HashMap<String, String> = parts
        .uri
        .query()
        .map(|query| form_urlencoded::parse(query.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let is_form = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));
    if is_form {
        params.extend(form_urlencoded::parse(bytes).into_owned());
    }
    params
}
