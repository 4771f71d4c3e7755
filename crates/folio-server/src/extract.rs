//! Request extractors.
//!
//! [`Caller`] collects who is asking: the actor id from the trusted proxy
//! header and the `?share=` capability token. [`AppJson`] and [`AppPath`]
//! wrap axum's extractors so their rejections come out as [`ApiError`]s.

use axum::extract::{FromRequest, FromRequestParts, Query};
use axum::http::request::Parts;
use serde::Deserialize;

use crate::constants::ACTOR_HEADER;
use crate::error::ApiError;

/// JSON body extractor with [`ApiError`] rejections.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct AppJson<T>(pub T);

/// Path extractor with [`ApiError`] rejections.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct AppPath<T>(pub T);

#[derive(Deserialize, Default)]
struct ShareQuery {
    share: Option<String>,
}

/// Identity and capability presented with a request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Caller {
    actor: Option<String>,
    share: Option<String>,
}

impl Caller {
    pub fn new(actor: Option<String>, share: Option<String>) -> Self {
        let non_empty = |s: Option<String>| {
            s.map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        Self {
            actor: non_empty(actor),
            share: non_empty(share),
        }
    }

    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    pub fn share(&self) -> Option<&str> {
        self.share.as_deref()
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let actor = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let Query(query) = Query::<ShareQuery>::try_from_uri(&parts.uri)
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

        Ok(Caller::new(actor, query.share))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn caller_for(request: Request<()>) -> Caller {
        let (mut parts, _) = request.into_parts();
        Caller::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn test_reads_header_and_query() {
        let request = Request::builder()
            .uri("/api/pages/x?share=tok123&other=1")
            .header(ACTOR_HEADER, " amy ")
            .body(())
            .unwrap();
        let caller = caller_for(request).await;
        assert_eq!(caller.actor(), Some("amy"));
        assert_eq!(caller.share(), Some("tok123"));
    }

    #[tokio::test]
    async fn test_blank_values_are_absent() {
        let request = Request::builder()
            .uri("/api/pages/x?share=")
            .header(ACTOR_HEADER, "")
            .body(())
            .unwrap();
        assert_eq!(caller_for(request).await, Caller::default());

        let request = Request::builder().uri("/api/pages/x").body(()).unwrap();
        assert_eq!(caller_for(request).await, Caller::default());
    }
}
