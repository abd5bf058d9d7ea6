use std::{collections::HashSet, time::Duration};

use axum::response::sse::{Event, KeepAlive};
use gamelog_core::{ChangeEvent, ChangeKind};
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::{debug, warn};

use crate::sink::{EventSink, SinkError};

const CHANNEL_CAPACITY: usize = 128;

/// Fan-out of committed channel changes to live `/events` subscribers.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<ChangeEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: ChangeEvent) {
        if self.sender.receiver_count() == 0 {
            debug!(stage = "sink", kind = event.kind.as_str(), "no event subscribers");
            return;
        }
        if let Err(err) = self.sender.send(event) {
            warn!(stage = "sink", error = %err, "failed to broadcast change event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventHub {
    fn name(&self) -> &'static str {
        "event_hub"
    }

    fn record(&self, event: &ChangeEvent) -> Result<(), SinkError> {
        self.publish(event.clone());
        Ok(())
    }
}

fn into_sse_event(event: &ChangeEvent) -> Result<Event, serde_json::Error> {
    let data = serde_json::to_string(event)?;
    Ok(Event::default().event(event.kind.as_str()).data(data))
}

/// Restricts a stream to a set of change kinds; `None` lets everything through.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    kinds: Option<HashSet<ChangeKind>>,
}

impl EventFilter {
    pub fn from_kinds(kinds: Option<HashSet<ChangeKind>>) -> Self {
        Self { kinds }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match &self.kinds {
            Some(kinds) => kinds.contains(&event.kind),
            None => true,
        }
    }
}

pub fn event_stream(
    hub: EventHub,
    filter: EventFilter,
) -> impl Stream<Item = Result<Event, serde_json::Error>> + Send + 'static {
    BroadcastStream::new(hub.subscribe()).filter_map(move |result| match result {
        Ok(event) if filter.matches(&event) => Some(into_sse_event(&event)),
        Ok(_) => None,
        // lagged receivers skip what they missed
        Err(_) => None,
    })
}

pub fn event_keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(20))
        .text("heartbeat")
}

pub fn parse_kind_list(value: Option<String>) -> Result<Option<HashSet<ChangeKind>>, String> {
    let Some(raw) = value else {
        return Ok(None);
    };
    let mut set = HashSet::new();
    for item in raw.split(',').filter(|s| !s.trim().is_empty()) {
        let kind = match item.trim().to_lowercase().as_str() {
            "went_online" | "online" => ChangeKind::WentOnline,
            "went_offline" | "offline" => ChangeKind::WentOffline,
            "game_changed" | "game" => ChangeKind::GameChanged,
            "title_changed" | "title" => ChangeKind::TitleChanged,
            other => {
                return Err(format!("unknown change kind '{other}'"));
            }
        };
        set.insert(kind);
    }

    if set.is_empty() {
        Ok(None)
    } else {
        Ok(Some(set))
    }
}
