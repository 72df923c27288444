use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    extract::Request,
    http::StatusCode,
    middleware as axum_mw,
    response::{IntoResponse, Response},
    routing::{any, get},
};
use axum_extra::extract::cookie::Key;
use tower_http::{
    limit::RequestBodyLimitLayer, services::ServeDir, timeout::TimeoutLayer, trace::TraceLayer,
};

use crate::config::Config;
use crate::error::AppError;
use crate::handler;
use crate::keyring::{KeyRing, MasterKey};
use crate::ltik::LtikCodec;
use crate::middleware;
use crate::nonce::NonceStore;
use crate::registry::PlatformRegistry;
use crate::session::LaunchSession;
use crate::store::Store;
use crate::validator::TokenValidator;

/// The tool's reaction to authenticated launches. Supplied at
/// construction; `on_connect` is the only handler without a default, so
/// an unset callback cannot exist at call time.
#[async_trait]
pub trait LaunchCallbacks: Send + Sync + 'static {
    /// An authenticated resource-link launch or steady-state request
    /// reached the app route.
    async fn on_connect(&self, session: LaunchSession, request: Request) -> Response;

    /// A deep-linking launch reached the app route.
    async fn on_deep_linking(&self, session: LaunchSession, request: Request) -> Response {
        self.on_connect(session, request).await
    }

    async fn on_session_timeout(&self, _request: Request) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            "Token invalid or expired. Please reinitiate login.",
        )
            .into_response()
    }

    async fn on_invalid_token(&self, _request: Request) -> Response {
        (StatusCode::UNAUTHORIZED, "Invalid token. Please reinitiate login.").into_response()
    }
}

/// The assembled tool provider: configuration, store, key ring, platform
/// registry, token validator and LTIK codec behind one constructed value.
pub struct Provider {
    pub(crate) config: Config,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) keyring: KeyRing,
    pub(crate) registry: PlatformRegistry,
    pub(crate) validator: TokenValidator,
    pub(crate) ltik: LtikCodec,
    pub(crate) cookie_key: Key,
    pub(crate) callbacks: Arc<dyn LaunchCallbacks>,
}

impl Provider {
    /// Validates the configuration and wires the components. Fails before
    /// anything listens when the configuration is unusable.
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        callbacks: Arc<dyn LaunchCallbacks>,
    ) -> Result<Arc<Self>, AppError> {
        config.validate()?;

        let master = MasterKey::new(config.encryption_key.clone());
        let keyring = KeyRing::new(store.clone(), master.clone());
        let registry = PlatformRegistry::new(store.clone(), keyring.clone());

        // replay window must cover at least the accepted token age
        let nonce_ttl = Duration::from_secs(config.token_max_age.unwrap_or(0).max(600));
        let validator = TokenValidator::new(
            store.clone(),
            NonceStore::new(nonce_ttl),
            config.dev_mode,
            config.token_max_age,
        );
        let ltik = LtikCodec::new(&master, config.ltik_max_age);
        let cookie_key = master.cookie_key();

        Ok(Arc::new(Self {
            config,
            store,
            keyring,
            registry,
            validator,
            ltik,
            cookie_key,
            callbacks,
        }))
    }

    /// Prepares the store (schema creation and the like). Idempotent.
    pub async fn setup(&self) -> Result<(), AppError> {
        self.store.setup().await.map_err(AppError::Store)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &PlatformRegistry {
        &self.registry
    }

    pub fn keyring(&self) -> &KeyRing {
        &self.keyring
    }

    /// Builds the full router: the user's routes and the app route behind
    /// the launch middleware, the reserved routes outside it.
    pub fn router(self: &Arc<Self>, app: Router) -> Router {
        let provider = self.clone();

        let reserved = Router::new()
            .route(&provider.config.app_route, any(handler::app::any))
            .with_state(provider.clone());
        let protected = app.merge(reserved).layer(axum_mw::from_fn_with_state(
            provider.clone(),
            middleware::launch::authenticate,
        ));

        let open = Router::new()
            .route(&provider.config.login_route, any(handler::login::any))
            .route(&provider.config.keyset_route, get(handler::keyset::get))
            .route(
                &provider.config.session_timeout_route,
                any(handler::status::session_timeout),
            )
            .route(
                &provider.config.invalid_token_route,
                any(handler::status::invalid_token),
            )
            .with_state(provider.clone());

        let mut router = protected.merge(open);
        if let Some(static_path) = &provider.config.static_path {
            router = router.fallback_service(ServeDir::new(static_path));
        }

        let mut router = router
            .layer(axum_mw::from_fn(middleware::security::headers))
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(Duration::from_secs(30)))
            .layer(RequestBodyLimitLayer::new(1024 * 1024));
        if provider.config.cors {
            router = router.layer(middleware::security::cors_layer());
        }
        router
    }

    /// Binds and serves until Ctrl-C, then shuts down gracefully and
    /// closes the store. `setup` must have run first.
    pub async fn deploy(self: &Arc<Self>, addr: SocketAddr, app: Router) -> anyhow::Result<()> {
        let router = self.router(app);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("listening on {addr}");
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        if let Err(err) = self.store.close().await {
            tracing::debug!("store close failed: {err}");
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
