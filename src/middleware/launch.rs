use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, SignedCookieJar};
use chrono::Utc;
use url::form_urlencoded;

use crate::entity::token;
use crate::error::{AppError, OptionExt};
use crate::ltik::LtikClaims;
use crate::provider::Provider;
use crate::session::{self, LaunchSession};
use crate::validator::LtiClaims;

const FORM_BODY_LIMIT: usize = 1024 * 1024;

/// The launch state machine, applied to every non-reserved route.
///
/// A request whose form body carries an `id_token` is an authentication
/// response from a platform and materializes a session. Everything else
/// is a steady-state request: the LTIK and session cookie are checked
/// and the stored launch state is attached to the request, or the
/// request is redirected to the configured failure route.
pub async fn authenticate(
    State(provider): State<Arc<Provider>>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, FORM_BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => return AppError::bad_request("Request body too large").into_response(),
    };

    let form = parse_form(&parts, &bytes);
    if let Some(id_token) = form.get("id_token") {
        return materialize_session(&provider, &parts, id_token, form.get("state").map(String::as_str))
            .await;
    }

    match steady_state(&provider, &parts).await {
        Ok(Some(launch)) => {
            let mut request = Request::from_parts(parts, Body::from(bytes));
            request.extensions_mut().insert(launch);
            next.run(request).await
        }
        // whitelisted: pass through unauthenticated
        Ok(None) => next.run(Request::from_parts(parts, Body::from(bytes))).await,
        Err(err) => trust_redirect(&provider, err),
    }
}

/// Trust failures never surface as 5xx; they land on the configured
/// handler routes so the browser can re-initiate the launch.
pub(crate) fn trust_redirect(provider: &Provider, err: AppError) -> Response {
    let route = if err.is_session_error() {
        &provider.config.session_timeout_route
    } else {
        &provider.config.invalid_token_route
    };
    tracing::debug!(error = ?err, "launch rejected");
    Redirect::to(route).into_response()
}

fn parse_form(parts: &Parts, bytes: &Bytes) -> HashMap<String, String> {
    let is_form = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));
    if !is_form {
        return HashMap::new();
    }
    form_urlencoded::parse(bytes).into_owned().collect()
}

/// Handles the platform's authentication response: validates the ID
/// token against the issuer bound at login, persists the launch state
/// and re-enters the tool with a fresh LTIK.
async fn materialize_session(
    provider: &Provider,
    parts: &Parts,
    id_token: &str,
    state: Option<&str>,
) -> Response {
    let jar = SignedCookieJar::from_headers(&parts.headers, provider.cookie_key.clone());

    let state = state.unwrap_or_default();
    let cookie_name = session::state_cookie_name(state);
    let expected_iss = jar.get(&cookie_name).map(|cookie| cookie.value().to_string());

    let result = provider.validator.validate(id_token, expected_iss.as_deref()).await;
    // the state cookie is one-shot; clear it whether or not validation held
    let jar = jar.remove(session::removal_cookie(cookie_name));

    let claims = match result {
        Ok((_platform, claims)) => claims,
        Err(err) => return (jar, trust_redirect(provider, err)).into_response(),
    };

    match commit_launch(provider, parts, &claims, state).await {
        Ok((session_cookie, location)) => {
            tracing::info!(iss = %claims.iss, user = %claims.sub, "launch established");
            (jar.add(session_cookie), Redirect::to(&location)).into_response()
        }
        Err(err) => (jar, trust_redirect(provider, err)).into_response(),
    }
}

/// Writes the launch rows and mints the continuation state. The write
/// order is fixed: ID token, context token, session cookie, LTIK; only
/// then is the redirect emitted.
async fn commit_launch(
    provider: &Provider,
    parts: &Parts,
    claims: &LtiClaims,
    state: &str,
) -> Result<(Cookie<'static>, String), AppError> {
    // presence was enforced during validation
    let deployment_id = claims.deployment_id.clone().unwrap_or_default();
    let course = claims
        .context
        .as_ref()
        .filter(|context| !context.id.is_empty())
        .map(|context| context.id.as_str());
    let resource = claims
        .resource_link
        .as_ref()
        .filter(|link| !link.id.is_empty())
        .map(|link| link.id.as_str());

    let context_id = session::context_id(&claims.iss, &deployment_id, course, resource);
    let platform_code = session::platform_code(&claims.iss, &deployment_id);
    let now = Utc::now();

    let user_info = token::id::UserInfo {
        given_name: claims.given_name.clone(),
        family_name: claims.family_name.clone(),
        name: claims.name.clone(),
        email: claims.email.clone(),
    };
    let id_row = token::id::Model {
        iss: claims.iss.clone(),
        deployment_id: deployment_id.clone(),
        user: claims.sub.clone(),
        roles: to_json(&claims.roles)?,
        user_info: to_json(&user_info)?,
        platform_info: to_json(&claims.platform_info)?,
        lis: to_json(&claims.lis)?,
        endpoint: to_json(&claims.endpoint)?,
        names_roles: to_json(&claims.names_roles)?,
        last_launch_at: now,
    };
    let context_row = token::context::Model {
        context_id: context_id.clone(),
        user: claims.sub.clone(),
        path: parts.uri.path().to_string(),
        target_link_uri: claims.target_link_uri.clone().unwrap_or_default(),
        message_type: claims.message_type.clone().unwrap_or_default(),
        version: claims.version.clone().unwrap_or_default(),
        context: to_json(&claims.context)?,
        resource: to_json(&claims.resource_link)?,
        custom: to_json(&claims.custom)?,
        launch_presentation: to_json(&claims.launch_presentation)?,
        deep_linking_settings: to_json(&claims.deep_linking_settings)?,
        last_launch_at: now,
    };

    provider.store.upsert_id_token(id_row).await.map_err(AppError::Store)?;
    provider.store.upsert_context_token(context_row).await.map_err(AppError::Store)?;

    let session_cookie = session::build_cookie(
        &provider.config.cookies,
        platform_code.clone(),
        claims.sub.clone(),
        None,
    );
    let ltik = provider.ltik.encode(LtikClaims {
        platform_url: claims.iss.clone(),
        deployment_id,
        platform_code,
        context_id,
        user: claims.sub.clone(),
        s: state.to_string(),
        exp: None,
    })?;

    // re-enter the tool on the original path so deep links keep working
    let mut pairs: Vec<(String, String)> = parts
        .uri
        .query()
        .map(|query| form_urlencoded::parse(query.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    pairs.push(("ltik".to_string(), ltik));
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    let location = format!("{}?{}", parts.uri.path(), query);

    Ok((session_cookie, location))
}

/// Steady-state authentication: `Ok(Some(_))` carries the loaded launch
/// state, `Ok(None)` means a whitelisted pass-through.
async fn steady_state(provider: &Provider, parts: &Parts) -> Result<Option<LaunchSession>, AppError> {
    let Some(raw_ltik) = extract_ltik(parts) else {
        if is_whitelisted(provider, parts) {
            return Ok(None);
        }
        return Err(AppError::malformed_token("request carries no ltik"));
    };

    let ltik = match provider.ltik.decode(&raw_ltik) {
        Ok(claims) => claims,
        Err(err) => {
            if is_whitelisted(provider, parts) {
                return Ok(None);
            }
            return Err(err);
        }
    };

    let jar = SignedCookieJar::from_headers(&parts.headers, provider.cookie_key.clone());
    match jar.get(&ltik.platform_code) {
        Some(cookie) if cookie.value() == ltik.user => {}
        Some(_) => return Err(AppError::missing_session("session does not belong to this user")),
        None if provider.config.dev_mode => {}
        None => return Err(AppError::missing_session("no session cookie for this deployment")),
    }

    let token = provider
        .store
        .find_id_token(&ltik.platform_url, &ltik.deployment_id, &ltik.user)
        .await
        .map_err(AppError::Store)?
        .or_missing_session("no launch recorded for this deployment")?;
    let context = provider
        .store
        .find_context_token(&ltik.context_id, &ltik.user)
        .await
        .map_err(AppError::Store)?
        .or_missing_session("no context recorded for this launch")?;

    Ok(Some(LaunchSession {
        token,
        context,
        ltik: raw_ltik,
    }))
}

fn extract_ltik(parts: &Parts) -> Option<String> {
    if let Some(token) = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    {
        return Some(token.to_string());
    }
    parts.uri.query().and_then(|query| {
        form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .find(|(name, _)| name == "ltik")
            .map(|(_, value)| value)
    })
}

fn is_whitelisted(provider: &Provider, parts: &Parts) -> bool {
    provider.config.is_whitelisted(parts.uri.path(), parts.method.as_str())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, AppError> {
    serde_json::to_string(value).map_err(|e| AppError::Store(e.into()))
}
