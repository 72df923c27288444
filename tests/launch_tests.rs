//! End-to-end launch flow tests: login redirect, authentication response,
//! session materialization and steady-state request auth.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    extract::Request,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use serde_json::{Value, json};
use tower::ServiceExt;

use lti_provider::{
    AuthConfig, Config, LaunchCallbacks, LaunchSession, MemoryStore, PlatformRegistration,
    Provider, Store,
};

const ISS: &str = "https://lms.example/";
const CLIENT_ID: &str = "C";

#[derive(Default)]
struct RecordingCallbacks {
    connects: AtomicUsize,
    deep_links: AtomicUsize,
}

#[async_trait]
impl LaunchCallbacks for RecordingCallbacks {
    async fn on_connect(&self, session: LaunchSession, _request: Request) -> Response {
        self.connects.fetch_add(1, Ordering::SeqCst);
        (StatusCode::OK, format!("connect:{}", session.token.user)).into_response()
    }

    async fn on_deep_linking(&self, session: LaunchSession, _request: Request) -> Response {
        self.deep_links.fetch_add(1, Ordering::SeqCst);
        (StatusCode::OK, format!("deeplink:{}", session.token.user)).into_response()
    }
}

struct TestTool {
    router: Router,
    store: Arc<MemoryStore>,
    callbacks: Arc<RecordingCallbacks>,
    signing_pem: String,
    platform_kid: String,
}

async fn test_tool(configure: impl FnOnce(&mut Config)) -> TestTool {
    let signing_key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("platform key");
    let signing_pem = signing_key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string();
    let public_pem = signing_key
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .unwrap();

    let mut config = Config::new("integration-test-secret");
    configure(&mut config);

    let store = Arc::new(MemoryStore::new());
    let callbacks = Arc::new(RecordingCallbacks::default());
    let provider = Provider::new(config, store.clone(), callbacks.clone()).expect("provider");
    provider.setup().await.expect("setup");

    let platform = provider
        .registry()
        .register(PlatformRegistration {
            platform_url: ISS.to_string(),
            name: Some("Example LMS".to_string()),
            client_id: Some(CLIENT_ID.to_string()),
            auth_endpoint: Some(format!("{ISS}auth")),
            accesstoken_endpoint: Some(format!("{ISS}token")),
            auth_config: Some(AuthConfig::RsaKey(public_pem)),
        })
        .await
        .expect("register platform");

    TestTool {
        router: provider.router(Router::new()),
        store,
        callbacks,
        signing_pem,
        platform_kid: platform.kid,
    }
}

fn launch_claims(nonce: &str) -> Value {
    let now = Utc::now().timestamp();
    json!({
        "iss": ISS,
        "sub": "u1",
        "aud": CLIENT_ID,
        "exp": now + 300,
        "iat": now,
        "nonce": nonce,
        "name": "Ada Lovelace",
        "https://purl.imsglobal.org/spec/lti/claim/message_type": "LtiResourceLinkRequest",
        "https://purl.imsglobal.org/spec/lti/claim/version": "1.3.0",
        "https://purl.imsglobal.org/spec/lti/claim/deployment_id": "d",
        "https://purl.imsglobal.org/spec/lti/claim/target_link_uri": "https://tool.example/",
        "https://purl.imsglobal.org/spec/lti/claim/resource_link": { "id": "r" },
        "https://purl.imsglobal.org/spec/lti/claim/context": { "id": "c", "label": "Course C" },
        "https://purl.imsglobal.org/spec/lti/claim/roles": ["Learner"],
    })
}

fn mint(signing_pem: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("platform-kid".to_string());
    let key = EncodingKey::from_rsa_pem(signing_pem.as_bytes()).expect("signing key");
    encode(&header, claims, &key).expect("token")
}

fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .collect()
}

/// Cookie pairs (`name=value`) usable in a request `Cookie` header.
fn cookie_pairs(cookies: &[String]) -> Vec<String> {
    cookies
        .iter()
        .filter_map(|cookie| cookie.split(';').next())
        .map(|pair| pair.to_string())
        .collect()
}

fn location(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Runs the login phase and returns `(state, login cookie pair)`.
async fn login(tool: &TestTool) -> (String, String) {
    let request = Request::builder()
        .method("GET")
        .uri(format!(
            "/login?iss={}&login_hint=u1&target_link_uri=https://tool.example/",
            urlencoding::encode(ISS)
        ))
        .body(Body::empty())
        .unwrap();
    let response = tool.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let redirect = location(&response);
    assert!(redirect.starts_with(&format!("{ISS}auth?")), "unexpected redirect: {redirect}");
    let url = url::Url::parse(&redirect).unwrap();
    let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
    assert_eq!(query.get("scope").map(String::as_str), Some("openid"));
    assert_eq!(query.get("response_type").map(String::as_str), Some("id_token"));
    assert_eq!(query.get("response_mode").map(String::as_str), Some("form_post"));
    assert_eq!(query.get("prompt").map(String::as_str), Some("none"));
    assert_eq!(query.get("client_id").map(String::as_str), Some(CLIENT_ID));
    let state = query.get("state").cloned().expect("state parameter");

    let cookies = set_cookies(&response);
    let pair = cookie_pairs(&cookies)
        .into_iter()
        .find(|pair| pair.starts_with(&format!("state{state}=")))
        .expect("state cookie");
    (state, pair)
}

/// Replays the platform's authentication response and returns the raw
/// response.
async fn auth_response(tool: &TestTool, id_token: &str, state: &str, cookies: &str) -> Response {
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header(header::COOKIE, cookies)
        .body(Body::from(format!("id_token={id_token}&state={state}")))
        .unwrap();
    tool.router.clone().oneshot(request).await.unwrap()
}

/// Runs login + callback for the given claims and returns
/// `(ltik, session cookie pair)`.
async fn launch(tool: &TestTool, claims: &Value) -> (String, String) {
    let (state, state_cookie) = login(tool).await;
    let id_token = mint(&tool.signing_pem, claims);
    let response = auth_response(tool, &id_token, &state, &state_cookie).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER, "launch did not redirect");

    let redirect = location(&response);
    assert!(redirect.starts_with("/?"), "unexpected landing redirect: {redirect}");
    let ltik = redirect.split("ltik=").nth(1).expect("ltik in redirect").to_string();

    let cookies = set_cookies(&response);
    let session_cookie = cookie_pairs(&cookies)
        .into_iter()
        .find(|pair| pair.starts_with("lti") && !pair.starts_with("state"))
        .expect("session cookie");
    // the one-shot state cookie is cleared on the way out
    assert!(
        cookies.iter().any(|cookie| cookie.starts_with(&format!("state{state}=")) && cookie.contains("Max-Age=0")),
        "state cookie was not cleared: {cookies:?}"
    );

    (ltik, session_cookie)
}

#[tokio::test]
async fn happy_path_launch_materializes_a_session() {
    let tool = test_tool(|_| {}).await;
    let (ltik, session_cookie) = launch(&tool, &launch_claims("n-happy")).await;

    // one ID token row under the deployment key
    let id_token = tool.store.find_id_token(ISS, "d", "u1").await.unwrap().expect("id token row");
    assert_eq!(id_token.roles().unwrap(), vec!["Learner".to_string()]);
    assert_eq!(id_token.user_info().unwrap().name.as_deref(), Some("Ada Lovelace"));

    // one context row under the derived key
    let context_id = urlencoding::encode(&format!("{ISS}dc_r")).into_owned();
    let context = tool
        .store
        .find_context_token(&context_id, "u1")
        .await
        .unwrap()
        .expect("context token row");
    assert_eq!(context.message_type, "LtiResourceLinkRequest");

    // following the LTIK with the session cookie reaches on_connect
    let request = Request::builder()
        .method("GET")
        .uri(format!("/?ltik={ltik}"))
        .header(header::COOKIE, &session_cookie)
        .body(Body::empty())
        .unwrap();
    let response = tool.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "connect:u1");
    assert_eq!(tool.callbacks.connects.load(Ordering::SeqCst), 1);
    assert_eq!(tool.callbacks.deep_links.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn tampered_ltik_redirects_to_invalid_token() {
    let tool = test_tool(|_| {}).await;
    let (ltik, session_cookie) = launch(&tool, &launch_claims("n-tamper")).await;

    let mut tampered = ltik.into_bytes();
    let last = tampered.len() - 1;
    tampered[last] = if tampered[last] == b'A' { b'B' } else { b'A' };
    let tampered = String::from_utf8(tampered).unwrap();

    let request = Request::builder()
        .method("GET")
        .uri(format!("/?ltik={tampered}"))
        .header(header::COOKIE, &session_cookie)
        .body(Body::empty())
        .unwrap();
    let response = tool.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/invalidToken");
    assert_eq!(tool.callbacks.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn expired_id_token_persists_nothing() {
    let tool = test_tool(|config| config.token_max_age = Some(10)).await;
    let (state, state_cookie) = login(&tool).await;

    let mut claims = launch_claims("n-expired");
    claims["iat"] = json!(Utc::now().timestamp() - 60);
    let id_token = mint(&tool.signing_pem, &claims);

    let response = auth_response(&tool, &id_token, &state, &state_cookie).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/invalidToken");
    assert!(tool.store.find_id_token(ISS, "d", "u1").await.unwrap().is_none());
}

#[tokio::test]
async fn wrong_audience_redirects_to_invalid_token() {
    let tool = test_tool(|_| {}).await;
    let (state, state_cookie) = login(&tool).await;

    let mut claims = launch_claims("n-aud");
    claims["aud"] = json!(["D"]);
    let id_token = mint(&tool.signing_pem, &claims);

    let response = auth_response(&tool, &id_token, &state, &state_cookie).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/invalidToken");
}

#[tokio::test]
async fn missing_session_cookie_redirects_to_session_timeout() {
    let tool = test_tool(|_| {}).await;
    let (ltik, _session_cookie) = launch(&tool, &launch_claims("n-timeout")).await;

    let request = Request::builder()
        .method("GET")
        .uri(format!("/?ltik={ltik}"))
        .body(Body::empty())
        .unwrap();
    let response = tool.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/sessionTimeout");
}

#[tokio::test]
async fn deep_linking_launch_dispatches_to_on_deep_linking() {
    let tool = test_tool(|_| {}).await;

    let mut claims = launch_claims("n-deeplink");
    claims["https://purl.imsglobal.org/spec/lti/claim/message_type"] = json!("LtiDeepLinkingRequest");
    claims["https://purl.imsglobal.org/spec/lti-dl/claim/deep_linking_settings"] =
        json!({ "deep_link_return_url": format!("{ISS}return") });

    let (ltik, session_cookie) = launch(&tool, &claims).await;
    let request = Request::builder()
        .method("GET")
        .uri(format!("/?ltik={ltik}"))
        .header(header::COOKIE, &session_cookie)
        .body(Body::empty())
        .unwrap();
    let response = tool.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "deeplink:u1");
    assert_eq!(tool.callbacks.deep_links.load(Ordering::SeqCst), 1);
    assert_eq!(tool.callbacks.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn relaunch_overwrites_the_same_rows() {
    let tool = test_tool(|_| {}).await;
    launch(&tool, &launch_claims("n-first")).await;
    launch(&tool, &launch_claims("n-second")).await;

    // still exactly one row pair for the deployment and context
    assert!(tool.store.find_id_token(ISS, "d", "u1").await.unwrap().is_some());
    let context_id = urlencoding::encode(&format!("{ISS}dc_r")).into_owned();
    assert!(tool.store.find_context_token(&context_id, "u1").await.unwrap().is_some());
}

#[tokio::test]
async fn unknown_issuer_login_is_unauthorized() {
    let tool = test_tool(|_| {}).await;
    let request = Request::builder()
        .method("GET")
        .uri("/login?iss=https://unknown.example/&login_hint=u1&target_link_uri=https://tool.example/")
        .body(Body::empty())
        .unwrap();
    let response = tool.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_without_required_parameters_is_a_bad_request() {
    let tool = test_tool(|_| {}).await;
    let request = Request::builder()
        .method("GET")
        .uri("/login?iss=https://lms.example/")
        .body(Body::empty())
        .unwrap();
    let response = tool.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(set_cookies(&response).is_empty());
}

#[tokio::test]
async fn keyset_serves_the_tool_public_keys() {
    let tool = test_tool(|_| {}).await;
    let request = Request::builder().method("GET").uri("/keys").body(Body::empty()).unwrap();
    let response = tool.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    let keys = body["keys"].as_array().expect("keys array");
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["kid"], json!(tool.platform_kid));
    assert_eq!(keys[0]["kty"], json!("RSA"));
    assert_eq!(keys[0]["use"], json!("sig"));
}

#[tokio::test]
async fn whitelisted_route_passes_through_unauthenticated() {
    let tool = {
        let signing_key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let public_pem = signing_key.to_public_key().to_public_key_pem(LineEnding::LF).unwrap();
        let signing_pem = signing_key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string();

        let config = Config::new("integration-test-secret")
            .whitelist(&[lti_provider::WhitelistEntry::Route("/health".to_string())])
            .unwrap();
        let store = Arc::new(MemoryStore::new());
        let callbacks = Arc::new(RecordingCallbacks::default());
        let provider = Provider::new(config, store.clone(), callbacks.clone()).unwrap();
        provider.setup().await.unwrap();
        provider
            .registry()
            .register(PlatformRegistration {
                platform_url: ISS.to_string(),
                name: Some("Example LMS".to_string()),
                client_id: Some(CLIENT_ID.to_string()),
                auth_endpoint: Some(format!("{ISS}auth")),
                accesstoken_endpoint: Some(format!("{ISS}token")),
                auth_config: Some(AuthConfig::RsaKey(public_pem)),
            })
            .await
            .unwrap();

        let user_routes = Router::new().route("/health", axum::routing::get(|| async { "ok" }));
        TestTool {
            router: provider.router(user_routes),
            store,
            callbacks,
            signing_pem,
            platform_kid: String::new(),
        }
    };

    let request = Request::builder().method("GET").uri("/health").body(Body::empty()).unwrap();
    let response = tool.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ok");

    // the same request against a non-whitelisted user route redirects
    let request = Request::builder().method("GET").uri("/").body(Body::empty()).unwrap();
    let response = tool.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/invalidToken");
}
