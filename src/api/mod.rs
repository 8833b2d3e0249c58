// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::{header::SET_COOKIE, HeaderValue},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::models::CookieDirective;
use crate::state::AppState;

pub mod charge;
pub mod health;
pub mod rotate;
pub mod session;
pub mod webhook;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/session", get(session::get_session))
        .route("/session/rotate", post(rotate::rotate_session))
        .route("/charge", post(charge::charge))
        .route("/webhooks/checkout", post(webhook::checkout_webhook))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health::health))
        .with_state(state)
        .nest("/v1", v1_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Attach a credential cookie directive to a response.
pub(crate) fn with_cookie(cookie: &CookieDirective, body: impl IntoResponse) -> Response {
    let mut response = body.into_response();
    if let Ok(value) = HeaderValue::from_str(&cookie.header_value()) {
        response.headers_mut().append(SET_COOKIE, value);
    }
    response
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        session::get_session,
        rotate::rotate_session,
        charge::charge,
        webhook::checkout_webhook
    ),
    components(
        schemas(
            health::HealthResponse,
            session::SessionResponse,
            rotate::RotateResponse,
            charge::ChargeRequest,
            charge::ChargeResponse,
            webhook::WebhookAck,
            crate::reconcile::ReconcileOutcome
        )
    ),
    tags(
        (name = "Health", description = "Liveness probes"),
        (name = "Session", description = "Credential resolution and rotation"),
        (name = "Ledger", description = "Balance charging"),
        (name = "Webhooks", description = "Payment provider intake")
    )
)]
struct ApiDoc;
