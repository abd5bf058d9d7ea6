use std::{sync::Arc, time::Instant};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use chrono::{DateTime, Utc};
use gamelog_core::{
    ChangeEvent, ChangeKind, ChannelState, ChannelStateMachine, NotificationDeduplicator,
    StreamUpdate,
};
use metrics::{counter, gauge, histogram};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::problem::ProblemResponse;
use crate::resolver::GameNameResolver;
use crate::router::AppState;
use crate::sink::EventSinks;
use crate::subscription::SubscriptionManager;

pub const HEADER_SIGNATURE: &str = "X-Hub-Signature";
pub const HEADER_DELIVERY_ID: &str = "Twitch-Notification-Id";

/// Drives decoded updates through the channel state machine.
///
/// The state lock is held from transition until the event reaches every
/// sink, game lookups included, so concurrent updates are applied and
/// recorded one after another.
#[derive(Clone)]
pub struct WebhookDispatcher {
    channel_login: Arc<str>,
    machine: Arc<Mutex<ChannelStateMachine>>,
    resolver: Arc<GameNameResolver>,
    sinks: EventSinks,
    subscriptions: Option<SubscriptionManager>,
}

impl WebhookDispatcher {
    pub fn new(
        channel_login: impl Into<Arc<str>>,
        initial: ChannelState,
        resolver: Arc<GameNameResolver>,
        sinks: EventSinks,
    ) -> Self {
        Self {
            channel_login: channel_login.into(),
            machine: Arc::new(Mutex::new(ChannelStateMachine::new(initial))),
            resolver,
            sinks,
            subscriptions: None,
        }
    }

    /// Refreshes the subscription through `manager` whenever the channel goes offline.
    pub fn with_subscriptions(mut self, manager: SubscriptionManager) -> Self {
        self.subscriptions = Some(manager);
        self
    }

    pub async fn snapshot(&self) -> ChannelState {
        self.machine.lock().await.current().clone()
    }

    /// Applies one update and emits the resulting event, if any.
    pub async fn apply(&self, update: StreamUpdate, at: DateTime<Utc>) -> Option<ChangeEvent> {
        let mut machine = self.machine.lock().await;
        let transition = machine.transition(&update);
        if transition.kind() == ChangeKind::NoChange {
            debug!(stage = "channel", channel = %self.channel_login, "update carries no change");
            return None;
        }

        let transition = match transition.pending_game_id().map(str::to_owned) {
            Some(game_id) => {
                let name = self.game_name(&game_id).await;
                transition.with_game_name(name)
            }
            None => transition,
        };
        let kind = machine.commit(transition);
        let current = machine.current().clone();

        let event = ChangeEvent {
            kind,
            channel: self.channel_login.to_string(),
            game_name: current.game_name,
            title: current.title,
            at,
        };
        counter!("channel_changes_total", "kind" => kind.as_str()).increment(1);
        info!(
            stage = "channel",
            channel = %self.channel_login,
            kind = kind.as_str(),
            game_id = %current.game_id,
            game = %event.game_name,
            title = %event.title,
            "channel state changed"
        );

        // sinks see events in commit order
        self.sinks.record(&event).await;
        drop(machine);

        if kind == ChangeKind::WentOffline {
            if let Some(subscriptions) = &self.subscriptions {
                subscriptions.spawn_refresh();
            }
        }
        Some(event)
    }

    async fn game_name(&self, game_id: &str) -> String {
        match self.resolver.resolve(game_id).await {
            Ok(name) => name,
            Err(err) => {
                counter!("game_resolve_failures_total", "reason" => err.metric_label())
                    .increment(1);
                warn!(
                    stage = "resolver",
                    game_id,
                    reason = err.metric_label(),
                    error = %err,
                    "game name unavailable, continuing without it"
                );
                String::new()
            }
        }
    }
}

enum Ingress {
    Duplicate,
    InvalidSignature,
    Accepted(StreamUpdate),
}

impl Ingress {
    fn metric_label(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::InvalidSignature => "invalid_signature",
            Self::Accepted(_) => "accepted",
        }
    }
}

/// `POST /webhook`: acknowledges the delivery, then processes it in the background.
pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ProblemResponse> {
    let start = Instant::now();
    let outcome = ingest(&state, &headers, &body);
    gauge!("webhook_seen_notifications").set(state.dedup().len() as f64);

    let result = match &outcome {
        Ok(ingress) => ingress.metric_label(),
        Err(problem) => problem.problem_type(),
    };
    counter!("webhook_notifications_total", "result" => result).increment(1);

    let response = match outcome {
        Ok(Ingress::Accepted(update)) => {
            let dispatcher = state.dispatcher().clone();
            let at = state.now();
            tokio::spawn(async move {
                dispatcher.apply(update, at).await;
            });
            Ok(StatusCode::OK)
        }
        Ok(_) => Ok(StatusCode::OK),
        Err(problem) => Err(problem),
    };
    histogram!("webhook_ack_latency_seconds").record(start.elapsed().as_secs_f64());
    response
}

fn ingest(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<Ingress, ProblemResponse> {
    let signature = get_required_header(headers, HEADER_SIGNATURE)?;
    let delivery_id = get_required_header(headers, HEADER_DELIVERY_ID)?;

    let identity = NotificationDeduplicator::identity(delivery_id, signature);
    if !state.dedup().admit(&identity) {
        debug!(stage = "ingress", %delivery_id, "duplicate delivery ignored");
        return Ok(Ingress::Duplicate);
    }

    if !state.verifier().verify(body, signature) {
        counter!("webhook_invalid_signature_total").increment(1);
        warn!(
            stage = "ingress",
            %delivery_id,
            body_len = body.len(),
            "signature mismatch, discarding notification"
        );
        return Ok(Ingress::InvalidSignature);
    }

    let update = StreamUpdate::from_slice(body).map_err(|err| {
        warn!(stage = "ingress", %delivery_id, error = %err, "rejecting malformed notification");
        ProblemResponse::from(err)
    })?;
    debug!(stage = "ingress", %delivery_id, ?update, "notification accepted");
    Ok(Ingress::Accepted(update))
}

fn get_required_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ProblemResponse> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ProblemResponse::missing_header(name))
}
