use axum_extra::extract::cookie::Cookie;
use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::config::CookieOptions;
use crate::entity::token;

/// State cookies live for ten minutes, long enough to complete the
/// platform round trip.
pub const STATE_COOKIE_MAX_AGE: time::Duration = time::Duration::minutes(10);

/// Name of the per-deployment session cookie (also stored inside the
/// LTIK so steady-state requests know which cookie to check).
pub fn platform_code(iss: &str, deployment_id: &str) -> String {
    let encoded = STANDARD.encode(format!("{iss}{deployment_id}"));
    urlencoding::encode(&format!("lti{encoded}")).into_owned()
}

/// Key of the context row for one launch. Course and resource fall back
/// to the literal `"NF"` when the platform sent no such claim.
pub fn context_id(
    iss: &str,
    deployment_id: &str,
    course: Option<&str>,
    resource: Option<&str>,
) -> String {
    let course = course.unwrap_or("NF");
    let resource = resource.unwrap_or("NF");
    urlencoding::encode(&format!("{iss}{deployment_id}{course}_{resource}")).into_owned()
}

pub fn state_cookie_name(state: &str) -> String {
    format!("state{state}")
}

pub fn build_cookie(
    options: &CookieOptions,
    name: String,
    value: String,
    max_age: Option<time::Duration>,
) -> Cookie<'static> {
    let mut builder = Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(options.same_site)
        .secure(options.secure());
    if let Some(max_age) = max_age {
        builder = builder.max_age(max_age);
    }
    builder.build()
}

/// Cookie value used with `SignedCookieJar::remove`; the path has to
/// match the one the cookie was set with.
pub fn removal_cookie(name: String) -> Cookie<'static> {
    Cookie::build((name, "")).path("/").build()
}

/// Authenticated launch state attached to each steady-state request and
/// handed to the user callbacks.
#[derive(Debug, Clone)]
pub struct LaunchSession {
    /// The stored ID token of the most recent launch.
    pub token: token::id::Model,
    /// The context/resource state of that launch.
    pub context: token::context::Model,
    /// The continuation token that authenticated this request.
    pub ltik: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_id_defaults_missing_parts_to_nf() {
        let id = context_id("https://lms.example/", "d", Some("c"), Some("r"));
        assert_eq!(id, urlencoding::encode("https://lms.example/dc_r").into_owned());

        let id = context_id("https://lms.example/", "d", None, None);
        assert_eq!(id, urlencoding::encode("https://lms.example/dNF_NF").into_owned());
    }

    #[test]
    fn platform_code_is_prefixed_and_url_safe() {
        let code = platform_code("https://lms.example/", "d");
        assert!(code.starts_with("lti"));
        assert!(!code.contains('='));
        assert!(!code.contains('/'));
        assert!(!code.contains('+'));
    }

    #[test]
    fn same_deployment_yields_the_same_platform_code() {
        assert_eq!(
            platform_code("https://lms.example/", "d"),
            platform_code("https://lms.example/", "d")
        );
        assert_ne!(
            platform_code("https://lms.example/", "d"),
            platform_code("https://lms.example/", "d2")
        );
    }
}
