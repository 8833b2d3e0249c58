// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractor for the request credential.
//!
//! The credential may arrive in an `Authorization: Bearer` header or in
//! the secure session cookie; the header takes precedence when both are
//! present. Absence is not a rejection — the resolver mints a fresh
//! identity for credential-less requests, so this extractor is infallible.

use std::convert::Infallible;

use axum::{
    extract::FromRequestParts,
    http::{
        header::{AUTHORIZATION, COOKIE},
        request::Parts,
    },
};

use crate::models::CREDENTIAL_COOKIE;

/// The raw request credential, if any.
pub struct Credential(pub Option<String>);

impl<S> FromRequestParts<S> for Credential
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Bearer header wins over the cookie
        if let Some(value) = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        {
            if let Some(token) = value.strip_prefix("Bearer ") {
                let token = token.trim();
                if !token.is_empty() {
                    return Ok(Credential(Some(token.to_string())));
                }
            }
        }

        let cookie_value = parts
            .headers
            .get(COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(credential_from_cookie_header);

        Ok(Credential(cookie_value))
    }
}

/// Pull the credential cookie value out of a `Cookie` header.
fn credential_from_cookie_header(header: &str) -> Option<String> {
    header
        .split(';')
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            if name == CREDENTIAL_COOKIE {
                Some(value.trim().to_string())
            } else {
                None
            }
        })
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Option<String> {
        let mut parts = request.into_parts().0;
        let Credential(value) = Credential::from_request_parts(&mut parts, &()).await.unwrap();
        value
    }

    #[tokio::test]
    async fn no_credential_yields_none() {
        let request = Request::builder().uri("/test").body(()).unwrap();
        assert_eq!(extract(request).await, None);
    }

    #[tokio::test]
    async fn bearer_header_is_extracted() {
        let request = Request::builder()
            .uri("/test")
            .header("Authorization", "Bearer my-token")
            .body(())
            .unwrap();
        assert_eq!(extract(request).await, Some("my-token".to_string()));
    }

    #[tokio::test]
    async fn cookie_is_extracted_among_others() {
        let request = Request::builder()
            .uri("/test")
            .header("Cookie", "theme=dark; tollgate_token=cookie-token; lang=en")
            .body(())
            .unwrap();
        assert_eq!(extract(request).await, Some("cookie-token".to_string()));
    }

    #[tokio::test]
    async fn header_takes_precedence_over_cookie() {
        let request = Request::builder()
            .uri("/test")
            .header("Authorization", "Bearer header-token")
            .header("Cookie", "tollgate_token=cookie-token")
            .body(())
            .unwrap();
        assert_eq!(extract(request).await, Some("header-token".to_string()));
    }

    #[tokio::test]
    async fn non_bearer_authorization_falls_back_to_cookie() {
        let request = Request::builder()
            .uri("/test")
            .header("Authorization", "Basic dXNlcjpwYXNz")
            .header("Cookie", "tollgate_token=cookie-token")
            .body(())
            .unwrap();
        assert_eq!(extract(request).await, Some("cookie-token".to_string()));
    }

    #[tokio::test]
    async fn empty_values_are_treated_as_absent() {
        let request = Request::builder()
            .uri("/test")
            .header("Authorization", "Bearer ")
            .header("Cookie", "tollgate_token=")
            .body(())
            .unwrap();
        assert_eq!(extract(request).await, None);
    }
}
