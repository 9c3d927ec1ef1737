use std::sync::Arc;

use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::errors::EngineError;
use crate::models::{Identity, Message};
use crate::routes::cookies::CookieIdentityStore;
use crate::service::SessionResolver;
use crate::widget::WidgetServices;

/// Identity established by the upstream auth layer. The gateway verifies the
/// user and injects `x-user-id`; anything client-supplied is stripped before
/// it reaches us.
pub fn identity_from_headers(headers: &HeaderMap) -> Identity {
    match headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(Uuid::parse_str)
    {
        Some(Ok(user_id)) => Identity::Authenticated { user_id },
        Some(Err(_)) => {
            warn!("ignoring malformed x-user-id header");
            Identity::Anonymous
        }
        None => Identity::Anonymous,
    }
}

#[derive(Debug, Serialize)]
pub struct BootResponse {
    pub session_id: Uuid,
    pub messages: Vec<Message>,
}

/// POST `/api/widget/boot` — resolve (or create) the visitor's session from
/// its cookies, return the session plus history, and refresh the cookies.
pub async fn boot_handler(
    State(services): State<WidgetServices>,
    headers: HeaderMap,
) -> Response {
    let identity = identity_from_headers(&headers);
    let store = Arc::new(CookieIdentityStore::from_headers(&headers));
    let resolver = SessionResolver::new(store.clone(), services.sessions.clone());

    let session = match resolver.resolve(&identity).await {
        Ok(session) => session,
        Err(err) => return error_response(&err),
    };

    let messages = match services.messages.find_by_session_id(session.id).await {
        Ok(messages) => messages,
        Err(err) => return error_response(&err),
    };

    let mut response =
        Json(BootResponse { session_id: session.id, messages }).into_response();
    for cookie in store.take_set_cookies() {
        match cookie.to_string().parse() {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(err) => warn!("failed to encode set-cookie header: {err}"),
        }
    }
    response
}

pub fn error_response(err: &EngineError) -> Response {
    let status = if err.is_validation() {
        StatusCode::BAD_REQUEST
    } else if err.is_fatal() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, err.to_string()).into_response()
}
