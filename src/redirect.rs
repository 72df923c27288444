use axum::response::Redirect;
use url::form_urlencoded;

use crate::error::AppError;
use crate::provider::Provider;
use crate::session::LaunchSession;

#[derive(Debug, Clone, Copy, Default)]
pub struct RedirectOptions {
    /// Bind the session's context to this location, so re-entry from the
    /// platform resolves to the same resource.
    pub new_resource: bool,
}

impl Provider {
    /// Builds an in-tool redirect that keeps the launch authenticated:
    /// the current LTIK is merged into the target's query string. With
    /// no session the result is a plain redirect.
    pub async fn redirect(
        &self,
        session: Option<&LaunchSession>,
        location: &str,
        options: RedirectOptions,
    ) -> Result<Redirect, AppError> {
        let Some(session) = session else {
            return Ok(Redirect::to(location));
        };

        if options.new_resource {
            self.store
                .update_context_path(&session.context.context_id, &session.context.user, location)
                .await
                .map_err(AppError::Store)?;
        }

        Ok(Redirect::to(&append_ltik(location, &session.ltik)?))
    }
}

fn append_ltik(location: &str, ltik: &str) -> Result<String, AppError> {
    match url::Url::parse(location) {
        // absolute target; Url re-emits scheme://host:port even when the
        // original had no path segment
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("ltik", ltik);
            Ok(url.to_string())
        }
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let (path, query) = match location.split_once('?') {
                Some((path, query)) => (path, Some(query)),
                None => (location, None),
            };
            let mut pairs: Vec<(String, String)> = query
                .map(|query| form_urlencoded::parse(query.as_bytes()).into_owned().collect())
                .unwrap_or_default();
            pairs.push(("ltik".to_string(), ltik.to_string()));
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs)
                .finish();
            Ok(format!("{path}?{query}"))
        }
        Err(err) => Err(AppError::bad_request(format!("Invalid redirect target: {err}"))),
    }
}
