use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use gamelog_twitch::{HubClient, HubError, HubMode, HubRequest};
use metrics::counter;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};
use url::Url;

/// Keeps the WebSub subscription for the tracked channel alive.
#[derive(Clone)]
pub struct SubscriptionManager {
    hub: HubClient,
    access_token: Arc<str>,
    callback: Url,
    topic: Url,
    lease: Duration,
    secret: Arc<str>,
    token_expires_at: Option<DateTime<Utc>>,
}

impl SubscriptionManager {
    pub fn new(
        hub: HubClient,
        access_token: Arc<str>,
        callback: Url,
        topic: Url,
        lease: Duration,
        secret: Arc<str>,
    ) -> Self {
        Self {
            hub,
            access_token,
            callback,
            topic,
            lease,
            secret,
            token_expires_at: None,
        }
    }

    /// Lets the renewal loop warn once the access token has lapsed.
    pub fn with_token_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.token_expires_at = Some(expires_at);
        self
    }

    fn token_expired(&self, now: DateTime<Utc>) -> bool {
        self.token_expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    /// Resubscription cadence: 90% of the lease.
    pub fn renewal_interval(&self) -> Duration {
        (self.lease / 10 * 9).max(Duration::from_secs(1))
    }

    fn request(&self) -> HubRequest<'_> {
        HubRequest {
            callback: &self.callback,
            topic: &self.topic,
            lease_seconds: self.lease.as_secs(),
            secret: &self.secret,
        }
    }

    pub async fn subscribe(&self) -> Result<(), HubError> {
        let outcome = self.hub.subscribe(&self.access_token, &self.request()).await;
        record(HubMode::Subscribe, &outcome);
        if outcome.is_ok() {
            info!(
                stage = "subscription",
                topic = %self.topic,
                callback = %self.callback,
                lease_secs = self.lease.as_secs(),
                "subscription requested"
            );
        }
        outcome
    }

    pub async fn unsubscribe(&self) -> Result<(), HubError> {
        let outcome = self
            .hub
            .unsubscribe(&self.access_token, &self.request())
            .await;
        record(HubMode::Unsubscribe, &outcome);
        outcome
    }

    /// Drops and re-establishes the subscription.
    ///
    /// An unsubscribe failure is logged and the subscribe is attempted anyway.
    pub async fn refresh(&self) -> Result<(), HubError> {
        if let Err(err) = self.unsubscribe().await {
            warn!(stage = "subscription", error = %err, "unsubscribe before refresh failed");
        }
        self.subscribe().await
    }

    pub fn spawn_refresh(&self) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(err) = manager.refresh().await {
                error!(stage = "subscription", error = %err, "subscription refresh failed");
            }
        })
    }

    /// Runs the lease renewal loop in the background.
    pub fn spawn_renewal(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop().await;
        })
    }

    async fn run_loop(self) {
        let period = self.renewal_interval();
        // the startup subscribe already covers the first period
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut expiry_reported = false;
        loop {
            ticker.tick().await;
            if !expiry_reported && self.token_expired(Utc::now()) {
                expiry_reported = true;
                warn!(
                    stage = "subscription",
                    expires_at = ?self.token_expires_at.map(|at| at.to_rfc3339()),
                    "app access token has expired, renewals may be rejected until restart"
                );
            }
            if let Err(err) = self.subscribe().await {
                error!(stage = "subscription", error = %err, "lease renewal failed");
            }
        }
    }
}

fn record(mode: HubMode, outcome: &Result<(), HubError>) {
    let result = if outcome.is_ok() { "accepted" } else { "failed" };
    counter!(
        "subscription_requests_total",
        "mode" => mode.as_str(),
        "result" => result
    )
    .increment(1);
}
