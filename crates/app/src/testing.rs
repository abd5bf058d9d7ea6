//! Shared fixture for handler tests: an `AppState` wired to a mock Helix/hub
//! server and a scratch directory.
use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::{body::Body, http::Request};
use gamelog_core::{ChannelState, SignatureVerifier};
use gamelog_storage::GameCacheStore;
use gamelog_twitch::{HelixClient, HubClient};
use httpmock::{prelude::*, Mock};
use reqwest::Client;
use serde_json::json;
use tempfile::TempDir;
use url::Url;

use crate::events::EventHub;
use crate::resolver::GameNameResolver;
use crate::router::AppState;
use crate::sink::{EventLogFile, EventSink, EventSinks};
use crate::subscription::SubscriptionManager;
use crate::telemetry;
use crate::webhook::{WebhookDispatcher, HEADER_DELIVERY_ID, HEADER_SIGNATURE};

pub const TOPIC: &str = "https://api.twitch.tv/helix/streams?user_id=42";
pub const SECRET: &[u8] = b"payload-secret";

pub struct TestApp {
    pub server: MockServer,
    pub dir: TempDir,
    pub state: AppState,
    verifier: SignatureVerifier,
}

impl TestApp {
    pub async fn new(initial: ChannelState) -> Self {
        let metrics = telemetry::init_metrics().expect("metrics init");
        let server = MockServer::start_async().await;
        let dir = TempDir::new().expect("tempdir");
        let http = Client::new();
        let token: Arc<str> = Arc::from("token");

        let helix = HelixClient::new(
            "client-id",
            Url::parse(&server.url("/helix/")).expect("helix url"),
            http.clone(),
        );
        let store = GameCacheStore::new(dir.path().join("cache.json"));
        let resolver = GameNameResolver::load(helix, token.clone(), store).expect("resolver");

        let hub = HubClient::new(
            "client-id",
            Url::parse(&server.url("/helix/webhooks/hub")).expect("hub url"),
            http,
        );
        let topic = Url::parse(TOPIC).expect("topic");
        let subscriptions = SubscriptionManager::new(
            hub,
            token,
            Url::parse("https://tracker.example/webhook").expect("callback"),
            topic.clone(),
            Duration::from_secs(600),
            Arc::from("payload-secret"),
        );

        let events = EventHub::new();
        let sinks: Vec<Arc<dyn EventSink>> = vec![
            Arc::new(EventLogFile::new(dir.path().join("logs"))),
            Arc::new(events.clone()),
        ];
        let dispatcher =
            WebhookDispatcher::new("streamer", initial, Arc::new(resolver), EventSinks::new(sinks))
                .with_subscriptions(subscriptions);

        let verifier = SignatureVerifier::new(SECRET).expect("verifier");
        let state = AppState::new(metrics, topic, verifier.clone(), dispatcher, events);

        Self {
            server,
            dir,
            state,
            verifier,
        }
    }

    /// A dispatcher sharing the mock Helix server but feeding `sinks` instead.
    pub fn dispatcher_with_sinks(
        &self,
        initial: ChannelState,
        sinks: Vec<Arc<dyn EventSink>>,
    ) -> WebhookDispatcher {
        let helix = HelixClient::new(
            "client-id",
            Url::parse(&self.server.url("/helix/")).expect("helix url"),
            Client::new(),
        );
        let store = GameCacheStore::new(self.dir.path().join("extra-cache.json"));
        let resolver =
            GameNameResolver::load(helix, Arc::from("token"), store).expect("resolver");
        WebhookDispatcher::new("streamer", initial, Arc::new(resolver), EventSinks::new(sinks))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.dir.path().join("logs")
    }

    pub async fn mock_game(&self, id: &str, name: &str) -> Mock<'_> {
        let body = json!({ "data": [{ "id": id, "name": name }] });
        let id = id.to_string();
        self.server
            .mock_async(move |when, then| {
                when.method(GET).path("/helix/games").query_param("id", id.as_str());
                then.status(200).json_body(body);
            })
            .await
    }

    pub async fn mock_hub(&self) -> Mock<'_> {
        self.server
            .mock_async(|when, then| {
                when.method(POST).path("/helix/webhooks/hub");
                then.status(202);
            })
            .await
    }

    /// Builds a notification request signed with the shared secret.
    pub fn signed_post(&self, delivery_id: &str, body: &[u8]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header(HEADER_SIGNATURE, self.verifier.sign(body))
            .header(HEADER_DELIVERY_ID, delivery_id)
            .body(Body::from(body.to_vec()))
            .expect("request")
    }
}
