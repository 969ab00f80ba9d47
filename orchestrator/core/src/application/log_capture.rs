// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Operation Log Capture
//!
//! Reconciliation writes free-form progress text into a [`LogSink`]; a
//! [`LogDrain`] running next to it persists every complete line as soon as it
//! arrives. The operation signals completion with [`LogSink::finish`]; the
//! drain keeps consuming until every sink handle is gone, so lines written
//! right before the marker are never lost.
//!
//! The launcher awaits the drain before finalizing the activity, which makes
//! the transcript complete by the time the activity turns terminal.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use crate::domain::activity::{ActivityId, LogLine};
use crate::domain::repository::LogRepository;

#[derive(Debug)]
enum LogMessage {
    Line(String),
    Done,
}

/// Writer half handed to the reconciliation engine.
#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::UnboundedSender<LogMessage>,
}

impl LogSink {
    /// Appends text to the transcript. Embedded newlines split it into
    /// several lines.
    pub fn line(&self, text: impl AsRef<str>) {
        for line in text.as_ref().split('\n') {
            // Receiver gone means the drain already finished
            let _ = self.tx.send(LogMessage::Line(line.to_string()));
        }
    }

    /// Completion marker. Lines already queued behind it are still persisted;
    /// once the drain reaches the marker, further lines are dropped.
    pub fn finish(&self) {
        let _ = self.tx.send(LogMessage::Done);
    }
}

/// Reader half: persists lines of one activity.
pub struct LogDrain {
    rx: mpsc::UnboundedReceiver<LogMessage>,
    repository: Arc<dyn LogRepository>,
    activity_id: ActivityId,
}

impl LogDrain {
    /// Runs until end of stream and returns the number of persisted lines.
    pub async fn run(mut self) -> usize {
        let mut persisted = 0;
        while let Some(message) = self.rx.recv().await {
            match message {
                LogMessage::Line(text) => {
                    if self.persist(&text).await {
                        persisted += 1;
                    }
                }
                LogMessage::Done => {
                    self.rx.close();
                }
            }
        }
        persisted
    }

    async fn persist(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        match self.repository.append(&LogLine::new(self.activity_id, text)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(activity_id = %self.activity_id, error = %e, "failed to persist log line");
                false
            }
        }
    }
}

/// Log pipeline for one activity.
pub fn channel(activity_id: ActivityId, repository: Arc<dyn LogRepository>) -> (LogSink, LogDrain) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        LogSink { tx },
        LogDrain {
            rx,
            repository,
            activity_id,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::InMemoryLogRepository;

    #[tokio::test]
    async fn test_lines_are_trimmed_split_and_ordered() {
        let repo = Arc::new(InMemoryLogRepository::new());
        let activity_id = ActivityId::new();
        let (sink, drain) = channel(activity_id, repo.clone());
        let handle = tokio::spawn(drain.run());

        sink.line("  Creating namespace 'ns'...  ");
        sink.line("first\n\nsecond");
        sink.line("   ");
        sink.finish();
        drop(sink);

        assert_eq!(handle.await.unwrap(), 3);
        let lines: Vec<String> = repo
            .list_by_activity(activity_id)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.log)
            .collect();
        assert_eq!(lines, vec!["Creating namespace 'ns'...", "first", "second"]);
    }

    #[tokio::test]
    async fn test_drain_consumes_lines_sent_after_marker() {
        let repo = Arc::new(InMemoryLogRepository::new());
        let activity_id = ActivityId::new();
        let (sink, drain) = channel(activity_id, repo.clone());
        let late = sink.clone();

        sink.line("before");
        sink.finish();
        late.line("after");
        drop(sink);
        drop(late);

        assert_eq!(drain.run().await, 2);
        assert_eq!(repo.list_by_activity(activity_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_lines_after_drain_reached_marker_are_dropped() {
        let repo = Arc::new(InMemoryLogRepository::new());
        let activity_id = ActivityId::new();
        let (sink, drain) = channel(activity_id, repo.clone());
        let late = sink.clone();
        let handle = tokio::spawn(drain.run());

        sink.line("before");
        sink.finish();
        while !late.tx.is_closed() {
            tokio::task::yield_now().await;
        }
        late.line("dropped");
        drop(sink);
        drop(late);

        assert_eq!(handle.await.unwrap(), 1);
        let lines = repo.list_by_activity(activity_id).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].log, "before");
    }
}
