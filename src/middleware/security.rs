use axum::{
    extract::Request,
    http::header,
    middleware::Next,
    response::Response,
};
use tower_http::cors::CorsLayer;

/// Launches arrive as cross-origin form posts from the platform, so the
/// policy mirrors the request origin and allows credentials.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::very_permissive()
}

pub async fn headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;

    let headers = response.headers_mut();

    headers.insert("x-content-type-options", "nosniff".parse().unwrap());
    headers.insert(
        header::REFERRER_POLICY,
        "strict-origin-when-cross-origin".parse().unwrap(),
    );
    // no frame-ancestors restriction: platforms embed the tool in iframes

    response
}
