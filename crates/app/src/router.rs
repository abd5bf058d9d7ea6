use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use gamelog_core::{ChannelState, NotificationDeduplicator, SignatureVerifier};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use url::Url;

use crate::events::{event_keep_alive, event_stream, parse_kind_list, EventFilter, EventHub};
use crate::webhook::WebhookDispatcher;
use crate::{handshake, telemetry, webhook};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    topic: Arc<Url>,
    verifier: SignatureVerifier,
    dedup: Arc<NotificationDeduplicator>,
    dispatcher: WebhookDispatcher,
    events: EventHub,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        topic: Url,
        verifier: SignatureVerifier,
        dispatcher: WebhookDispatcher,
        events: EventHub,
    ) -> Self {
        Self {
            metrics,
            topic: Arc::new(topic),
            verifier,
            dedup: Arc::new(NotificationDeduplicator::new()),
            dispatcher,
            events,
            clock: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    /// Topic URL the hub must confirm during handshakes.
    pub fn topic(&self) -> &Url {
        &self.topic
    }

    pub fn verifier(&self) -> &SignatureVerifier {
        &self.verifier
    }

    pub fn dedup(&self) -> &NotificationDeduplicator {
        &self.dedup
    }

    pub fn dispatcher(&self) -> &WebhookDispatcher {
        &self.dispatcher
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/state", get(channel_state))
        .route("/events", get(events))
        .route("/webhook", get(handshake::handle).post(webhook::handle))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

async fn channel_state(State(state): State<AppState>) -> Json<ChannelState> {
    Json(state.dispatcher().snapshot().await)
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(default)]
    kinds: Option<String>,
}

async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<
    Sse<impl tokio_stream::Stream<Item = Result<Event, serde_json::Error>>>,
    (StatusCode, String),
> {
    let kinds = parse_kind_list(query.kinds).map_err(|err| (StatusCode::BAD_REQUEST, err))?;
    let filter = EventFilter::from_kinds(kinds);
    let stream = event_stream(state.events().clone(), filter);

    Ok(Sse::new(stream).keep_alive(event_keep_alive()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use gamelog_core::{ChangeEvent, ChangeKind};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tokio::time::{self, Duration};
    use tower::ServiceExt;

    use crate::testing::TestApp;

    async fn get(state: AppState, uri: &str) -> axum::response::Response {
        app_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .expect("handler should respond")
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = TestApp::new(ChannelState::offline()).await;
        let response = get(app.state.clone(), "/healthz").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exports_build_info() {
        let app = TestApp::new(ChannelState::offline()).await;
        let response = get(app.state.clone(), "/metrics").await;

        assert_eq!(response.status(), StatusCode::OK);
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        let body = String::from_utf8(collected.to_bytes().to_vec()).expect("utf-8");
        assert!(body.contains("app_build_info"));
        assert!(body.contains("app_uptime_seconds"));
    }

    #[tokio::test]
    async fn state_reports_current_channel() {
        let app = TestApp::new(ChannelState::online("33214", "Fortnite", "title")).await;
        let response = get(app.state.clone(), "/state").await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let body: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(body["online"], true);
        assert_eq!(body["game_name"], "Fortnite");
        assert_eq!(body["title"], "title");
    }

    #[tokio::test]
    async fn event_stream_emits_changes() {
        let app = TestApp::new(ChannelState::offline()).await;
        let hub = app.state.events().clone();

        let publish = tokio::spawn(async move {
            time::sleep(Duration::from_millis(25)).await;
            hub.publish(ChangeEvent {
                kind: ChangeKind::TitleChanged,
                channel: "streamer".to_string(),
                game_name: "Fortnite".to_string(),
                title: "new title".to_string(),
                at: Utc::now(),
            });
        });

        let mut response = get(app.state.clone(), "/events?kinds=title").await;
        assert_eq!(response.status(), StatusCode::OK);

        let frame = time::timeout(Duration::from_secs(1), response.body_mut().frame())
            .await
            .expect("stream produced chunk")
            .expect("chunk ok")
            .expect("chunk available");
        let data = match frame.into_data() {
            Ok(data) => data,
            Err(_) => panic!("expected data frame"),
        };
        let text = String::from_utf8(data.to_vec()).expect("utf-8");
        assert!(text.contains("event: title_changed"));
        assert!(text.contains("\"title\":\"new title\""));

        publish.await.expect("publish task");
    }

    #[tokio::test]
    async fn unknown_event_kind_is_rejected() {
        let app = TestApp::new(ChannelState::offline()).await;
        let response = get(app.state.clone(), "/events?kinds=raid").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn notifications_are_stamped_with_state_clock() {
        let fixed = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .expect("time")
            .with_timezone(&Utc);
        let app = TestApp::new(ChannelState::online("33214", "Fortnite", "title")).await;
        let state = app.state.clone().with_clock(Arc::new(move || fixed));
        let mut receiver = state.events().subscribe();

        let response = app_router(state)
            .oneshot(app.signed_post("delivery-1", br#"{"data":[]}"#))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let event = time::timeout(Duration::from_secs(2), receiver.recv())
            .await
            .expect("event in time")
            .expect("event");
        assert_eq!(event.kind, ChangeKind::WentOffline);
        assert_eq!(event.at, fixed);
    }
}
