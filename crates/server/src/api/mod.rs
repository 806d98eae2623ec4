use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use relay_core::RelayError;
use shared::error::{RelayResponse, ResponseCode};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::app_state::AppState;

/// `/send` parameters. A repeated key keeps its first value.
#[derive(Debug, Default)]
pub(crate) struct SendQuery {
    token: Option<String>,
    content: Option<String>,
}

impl SendQuery {
    fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut query = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "token" => &mut query.token,
                "content" => &mut query.content,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }
        query
    }
}

type Reply = (StatusCode, Json<RelayResponse>);

pub(crate) fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(docs_redirect))
        .route("/send", get(send))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn docs_redirect(State(state): State<Arc<AppState>>) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, state.docs_url.clone())]).into_response()
}

fn reply(status: StatusCode, code: ResponseCode, message: impl Into<String>) -> Reply {
    (status, Json(RelayResponse::new(code, message)))
}

async fn send(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Reply {
    let query = SendQuery::from_pairs(pairs);
    let token = query.token.unwrap_or_default();
    if token.is_empty() {
        return reply(
            StatusCode::UNAUTHORIZED,
            ResponseCode::NoAccessToken,
            "No access token provided.",
        );
    }
    let content = query.content.unwrap_or_default();
    if content.is_empty() {
        return reply(
            StatusCode::BAD_REQUEST,
            ResponseCode::NoContent,
            "Content is required.",
        );
    }

    match state.relay.send_by_token(&token, &content).await {
        Ok(()) => {
            info!(content_len = content.len(), "relayed message");
            (StatusCode::OK, Json(RelayResponse::ok()))
        }
        Err(err) => error_reply(&err),
    }
}

fn error_reply(err: &RelayError) -> Reply {
    let code = err.response_code();
    match err {
        RelayError::TokenNotFound => reply(StatusCode::UNAUTHORIZED, code, "Invalid access token."),
        RelayError::ContentMissing => reply(StatusCode::BAD_REQUEST, code, "Content is required."),
        other => {
            warn!(error = %other, "relay send failed");
            let cause = match other {
                RelayError::MessageSendFailure(cause) => cause.clone(),
                other => other.to_string(),
            };
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                code,
                format!("Send message failed. {cause}"),
            )
        }
    }
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
