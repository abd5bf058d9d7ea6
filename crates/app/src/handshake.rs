use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use gamelog_twitch::HubMode;
use metrics::counter;
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use crate::problem::ProblemResponse;
use crate::router::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct HandshakeQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.topic")]
    topic: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
    #[serde(rename = "hub.reason")]
    reason: Option<String>,
    #[serde(rename = "hub.lease_seconds")]
    lease_seconds: Option<String>,
}

/// `GET /webhook`: answers the hub's intent verification.
pub async fn handle(
    State(state): State<AppState>,
    Query(query): Query<HandshakeQuery>,
) -> Result<Response, ProblemResponse> {
    let result = verify(&state, query);
    let (mode, outcome) = match &result {
        Ok((mode, _)) => (mode.as_str(), "ok"),
        Err((mode, problem)) => (
            mode.map(HubMode::as_str).unwrap_or("unknown"),
            problem.problem_type(),
        ),
    };
    counter!("webhook_handshakes_total", "mode" => mode, "result" => outcome).increment(1);

    result
        .map(|(_, response)| response)
        .map_err(|(_, problem)| problem)
}

type Verified = (HubMode, Response);
type Rejected = (Option<HubMode>, ProblemResponse);

fn verify(state: &AppState, query: HandshakeQuery) -> Result<Verified, Rejected> {
    let raw_mode = query
        .mode
        .ok_or_else(|| (None, ProblemResponse::missing_parameter("hub.mode")))?;
    let mode = HubMode::parse(&raw_mode).ok_or_else(|| {
        (
            None,
            ProblemResponse::new(
                StatusCode::BAD_REQUEST,
                "invalid_mode",
                format!("unsupported hub.mode '{raw_mode}'"),
            ),
        )
    })?;

    if mode == HubMode::Denied {
        warn!(
            stage = "handshake",
            topic = query.topic.as_deref().unwrap_or_default(),
            reason = query.reason.as_deref().unwrap_or("unspecified"),
            "hub denied the subscription"
        );
        return Ok((mode, plain_text("OK".to_string())));
    }

    let challenge = query
        .challenge
        .ok_or_else(|| (Some(mode), ProblemResponse::missing_parameter("hub.challenge")))?;

    let topic = query.topic.unwrap_or_default();
    let matches = Url::parse(&topic)
        .map(|parsed| &parsed == state.topic())
        .unwrap_or(false);
    if !matches {
        warn!(
            stage = "handshake",
            mode = mode.as_str(),
            received = %topic,
            expected = %state.topic(),
            "handshake topic does not match the tracked channel"
        );
        return Err((
            Some(mode),
            ProblemResponse::new(
                StatusCode::NOT_FOUND,
                "topic_mismatch",
                format!("unknown topic '{topic}'"),
            ),
        ));
    }

    info!(
        stage = "handshake",
        mode = mode.as_str(),
        lease_seconds = query.lease_seconds.as_deref().unwrap_or_default(),
        "subscription intent confirmed"
    );
    Ok((mode, plain_text(challenge)))
}

fn plain_text(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}
