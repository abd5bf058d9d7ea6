use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use gamelog_core::{ChangeEvent, ChangeKind};
use thiserror::Error;
use tracing::error;

/// Receiver of committed channel changes.
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn record(&self, event: &ChangeEvent) -> Result<(), SinkError>;
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write event log: {0}")]
    Io(#[from] io::Error),
}

/// Ordered set of sinks; a failing sink is logged and skipped.
#[derive(Clone, Default)]
pub struct EventSinks {
    sinks: Arc<Vec<Arc<dyn EventSink>>>,
}

impl EventSinks {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self {
            sinks: Arc::new(sinks),
        }
    }

    /// Hands `event` to each sink in turn on the blocking pool.
    pub async fn record(&self, event: &ChangeEvent) {
        for sink in self.sinks.iter() {
            let name = sink.name();
            let task_sink = Arc::clone(sink);
            let task_event = event.clone();
            let outcome =
                tokio::task::spawn_blocking(move || task_sink.record(&task_event)).await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(
                        stage = "sink",
                        sink = name,
                        kind = event.kind.as_str(),
                        error = %err,
                        "failed to record change event"
                    );
                }
                Err(err) => {
                    error!(stage = "sink", sink = name, error = %err, "sink task failed");
                }
            }
        }
    }
}

/// Human readable event log.
///
/// Lines are appended to `<dir>/<YYYY-MM-DD_HH-MM-SS>.log`, named after the
/// first event written to it. Once the channel goes offline the next event
/// starts a new file.
pub struct EventLogFile {
    dir: PathBuf,
    current: Mutex<Option<PathBuf>>,
}

impl EventLogFile {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: Mutex::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File currently being appended to, if any event has been written.
    #[cfg(test)]
    pub fn current_file(&self) -> Option<PathBuf> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn format_line(event: &ChangeEvent) -> String {
        format!(
            "{}{}\n",
            event.at.format("[%b %-d, %Y | %H:%M:%S] "),
            event.message()
        )
    }
}

impl EventSink for EventLogFile {
    fn name(&self) -> &'static str {
        "event_log"
    }

    fn record(&self, event: &ChangeEvent) -> Result<(), SinkError> {
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let path = match current.as_ref() {
            Some(path) => path.clone(),
            None => {
                fs::create_dir_all(&self.dir)?;
                let path = self
                    .dir
                    .join(format!("{}.log", event.at.format("%Y-%m-%d_%H-%M-%S")));
                *current = Some(path.clone());
                path
            }
        };

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(Self::format_line(event).as_bytes())?;

        if event.kind == ChangeKind::WentOffline {
            *current = None;
        }
        Ok(())
    }
}
