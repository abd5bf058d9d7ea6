use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Last observed broadcast state of the tracked channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelState {
    pub online: bool,
    pub game_id: String,
    pub game_name: String,
    pub title: String,
}

impl ChannelState {
    /// State used before anything is known about the channel.
    pub fn offline() -> Self {
        Self::default()
    }

    pub fn online(
        game_id: impl Into<String>,
        game_name: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            online: true,
            game_id: game_id.into(),
            game_name: game_name.into(),
            title: title.into(),
        }
    }
}

/// Decoded notification body.
///
/// The feed sends `{"data": []}` when the channel goes offline and a single
/// stream object otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    Offline,
    Live { game_id: String, title: String },
}

impl StreamUpdate {
    pub fn live(game_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self::Live {
            game_id: game_id.into(),
            title: title.into(),
        }
    }

    /// Parses a raw notification body.
    pub fn from_slice(body: &[u8]) -> Result<Self, PayloadError> {
        let payload: StreamsPayload = serde_json::from_slice(body)?;
        Ok(payload.into())
    }
}

/// Errors produced while decoding notification bodies.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed notification payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Shape shared by webhook notifications and the `streams` Helix endpoint.
#[derive(Debug, Deserialize)]
pub struct StreamsPayload {
    pub data: Vec<StreamData>,
}

#[derive(Debug, Deserialize)]
pub struct StreamData {
    pub game_id: String,
    pub title: String,
}

impl From<StreamsPayload> for StreamUpdate {
    fn from(value: StreamsPayload) -> Self {
        match value.data.into_iter().next() {
            Some(stream) => StreamUpdate::Live {
                game_id: stream.game_id,
                title: stream.title,
            },
            None => StreamUpdate::Offline,
        }
    }
}

/// Semantic change detected between two channel states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    WentOffline,
    WentOnline,
    GameChanged,
    TitleChanged,
    NoChange,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WentOffline => "went_offline",
            Self::WentOnline => "went_online",
            Self::GameChanged => "game_changed",
            Self::TitleChanged => "title_changed",
            Self::NoChange => "no_change",
        }
    }
}

/// Change emitted to event sinks once a transition has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub channel: String,
    pub game_name: String,
    pub title: String,
    pub at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Human readable description used by the event log.
    pub fn message(&self) -> String {
        let channel = &self.channel;
        let game = &self.game_name;
        let title = &self.title;
        match self.kind {
            ChangeKind::WentOnline => {
                format!("{channel} started streaming {game} | Title: \"{title}\"")
            }
            ChangeKind::GameChanged => format!("{channel} switched to {game} | Title: \"{title}\""),
            ChangeKind::TitleChanged => {
                format!("{channel} changed stream title | Title: \"{title}\"")
            }
            ChangeKind::WentOffline => format!("{channel} went offline"),
            ChangeKind::NoChange => format!("{channel} unchanged"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_data_decodes_as_offline() {
        let update = StreamUpdate::from_slice(br#"{"data":[]}"#).expect("decode");
        assert_eq!(update, StreamUpdate::Offline);
    }

    #[test]
    fn first_stream_entry_is_used() {
        let body = json!({
            "data": [
                {
                    "id": "40078987165",
                    "user_id": "5678",
                    "user_name": "wjdtkdqhs",
                    "game_id": "21779",
                    "type": "live",
                    "title": "best stream ever",
                    "viewer_count": 417,
                    "started_at": "2017-12-01T10:09:45Z"
                },
                { "game_id": "other", "title": "ignored" }
            ]
        })
        .to_string();

        let update = StreamUpdate::from_slice(body.as_bytes()).expect("decode");
        assert_eq!(update, StreamUpdate::live("21779", "best stream ever"));
    }

    #[test]
    fn rejects_shape_mismatches() {
        for body in [
            r#"{}"#,
            r#"{"data": {}}"#,
            r#"{"data": [{"title": "missing game"}]}"#,
            r#"{"data": [{"game_id": 42, "title": "numeric id"}]}"#,
            "not json",
        ] {
            let err = StreamUpdate::from_slice(body.as_bytes()).expect_err(body);
            assert!(matches!(err, PayloadError::Malformed(_)));
        }
    }

    #[test]
    fn messages_follow_change_kind() {
        let at = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .expect("time")
            .with_timezone(&Utc);
        let mut event = ChangeEvent {
            kind: ChangeKind::WentOnline,
            channel: "streamer".to_string(),
            game_name: "Celeste".to_string(),
            title: "any%".to_string(),
            at,
        };
        assert_eq!(
            event.message(),
            "streamer started streaming Celeste | Title: \"any%\""
        );

        event.kind = ChangeKind::GameChanged;
        assert_eq!(event.message(), "streamer switched to Celeste | Title: \"any%\"");

        event.kind = ChangeKind::TitleChanged;
        assert_eq!(
            event.message(),
            "streamer changed stream title | Title: \"any%\""
        );

        event.kind = ChangeKind::WentOffline;
        assert_eq!(event.message(), "streamer went offline");
    }
}
