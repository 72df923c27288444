use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::Request,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lti_provider::{
    AuthConfig, Config, LaunchCallbacks, LaunchSession, PlatformRegistration, Provider,
    SeaOrmStore,
};

struct Tool;

#[async_trait]
impl LaunchCallbacks for Tool {
    async fn on_connect(&self, session: LaunchSession, _request: Request) -> Response {
        Json(json!({
            "user": session.token.user,
            "roles": session.token.roles().unwrap_or_default(),
            "user_info": session.token.user_info().ok(),
            "context": session.context.context().ok(),
            "resource": session.context.resource().ok(),
        }))
        .into_response()
    }

    async fn on_deep_linking(&self, session: LaunchSession, _request: Request) -> Response {
        Json(json!({
            "message": "deep linking launch",
            "user": session.token.user,
            "settings": session.context.deep_linking_settings().ok(),
        }))
        .into_response()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lti_provider=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let encryption_key = std::env::var("LTI_ENCRYPTION_KEY")
        .map_err(|_| anyhow::anyhow!("LTI_ENCRYPTION_KEY must be set"))?;
    let mut config = Config::new(encryption_key);
    if let Ok(database_url) = std::env::var("DATABASE_URL") {
        config.database_url = database_url;
    }
    config.dev_mode = std::env::var("LTI_DEV_MODE").is_ok_and(|v| v == "1" || v == "true");

    // a failed store connection is fatal before anything listens
    let store = Arc::new(
        SeaOrmStore::connect(&config.database_url)
            .await
            .map_err(|err| anyhow::anyhow!("database connection failed: {err}"))?,
    );

    let provider = Provider::new(config, store, Arc::new(Tool))
        .map_err(|err| anyhow::anyhow!("provider setup failed: {err:?}"))?;
    provider
        .setup()
        .await
        .map_err(|err| anyhow::anyhow!("store setup failed: {err:?}"))?;

    // optionally seed one platform from the environment
    if let Ok(platform_url) = std::env::var("LTI_PLATFORM_URL") {
        let registration = PlatformRegistration {
            platform_url,
            name: std::env::var("LTI_PLATFORM_NAME").ok(),
            client_id: std::env::var("LTI_CLIENT_ID").ok(),
            auth_endpoint: std::env::var("LTI_AUTH_ENDPOINT").ok(),
            accesstoken_endpoint: std::env::var("LTI_TOKEN_ENDPOINT").ok(),
            auth_config: std::env::var("LTI_PLATFORM_JWKS").ok().map(AuthConfig::JwkSet),
        };
        let platform = provider
            .registry()
            .register(registration)
            .await
            .map_err(|err| anyhow::anyhow!("platform registration failed: {err:?}"))?;
        println!("Registered platform: {}", platform.platform_url);
    }

    let port = std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("Listening on {addr}");

    provider.deploy(addr, Router::new()).await?;

    Ok(())
}
