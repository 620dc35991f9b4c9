//! Progress and log reporting.
//!
//! Orchestrations report through an [`Observer`]: one progress channel (percent plus label) and
//! one log channel (line plus level). Callbacks run on the I/O path of the running tool, so
//! implementations must be cheap and must not block.

use std::fmt;
use std::sync::Mutex;

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    /// Classifies a line the tool wrote to stderr.
    ///
    /// Database client tools emit notices and fatal errors on the same stream; only lines
    /// carrying the literal `ERROR` token count as errors.
    pub fn for_stderr(line: &str) -> Self {
        if line.contains("ERROR") {
            LogLevel::Error
        } else {
            LogLevel::Warning
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

pub trait Observer: Send + Sync {
    fn progress(&self, percent: f64, label: &str);
    fn log(&self, line: &str, level: LogLevel);
}

/// Discards everything.
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn progress(&self, _percent: f64, _label: &str) {}
    fn log(&self, _line: &str, _level: LogLevel) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Progress { percent: f64, label: String },
    Log { line: String, level: LogLevel },
}

/// Publishes every callback as an [`Event`] on an unbounded channel the caller drains.
///
/// Sends never block. Once the receiver is gone events are dropped silently.
#[derive(Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Observer for ChannelObserver {
    fn progress(&self, percent: f64, label: &str) {
        let _ = self.tx.send(Event::Progress {
            percent,
            label: label.to_string(),
        });
    }

    fn log(&self, line: &str, level: LogLevel) {
        let _ = self.tx.send(Event::Log {
            line: line.to_string(),
            level,
        });
    }
}

/// Maps a nested orchestration's 0..=100 range into `[offset, offset + span]` of the parent.
pub struct ScaledObserver<'a> {
    inner: &'a dyn Observer,
    offset: f64,
    span: f64,
    label_prefix: &'a str,
}

impl<'a> ScaledObserver<'a> {
    pub fn new(inner: &'a dyn Observer, offset: f64, span: f64, label_prefix: &'a str) -> Self {
        Self {
            inner,
            offset,
            span,
            label_prefix,
        }
    }
}

impl Observer for ScaledObserver<'_> {
    fn progress(&self, percent: f64, label: &str) {
        let mapped = self.offset + percent * self.span / 100.0;
        if self.label_prefix.is_empty() {
            self.inner.progress(mapped, label);
        } else {
            self.inner
                .progress(mapped, &format!("{}: {}", self.label_prefix, label));
        }
    }

    fn log(&self, line: &str, level: LogLevel) {
        self.inner.log(line, level);
    }
}

/// Keeps an orchestration's progress within 0..=100 and never lets it move backwards.
pub struct ProgressTracker<'a> {
    observer: &'a dyn Observer,
    last: Mutex<f64>,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(observer: &'a dyn Observer) -> Self {
        Self {
            observer,
            last: Mutex::new(0.0),
        }
    }

    /// Reports `done` of `total` units completed, mapped into `[start, 100]`.
    pub fn step(&self, start: f64, done: usize, total: usize, label: &str) {
        let fraction = if total == 0 {
            1.0
        } else {
            done as f64 / total as f64
        };
        self.report(start + fraction * (100.0 - start), label);
    }

    pub fn report(&self, percent: f64, label: &str) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let value = percent.clamp(0.0, 100.0).max(*last);
        *last = value;
        self.observer.progress(value, label);
    }
}

impl Observer for ProgressTracker<'_> {
    fn progress(&self, percent: f64, label: &str) {
        self.report(percent, label);
    }

    fn log(&self, line: &str, level: LogLevel) {
        self.observer.log(line, level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingObserver;

    #[test]
    fn stderr_classification() {
        assert_eq!(LogLevel::for_stderr("ERROR:  relation \"x\" exists"), LogLevel::Error);
        assert_eq!(LogLevel::for_stderr("psql:data.sql:12: ERROR: duplicate"), LogLevel::Error);
        assert_eq!(LogLevel::for_stderr("NOTICE: table does not exist, skipping"), LogLevel::Warning);
        assert_eq!(LogLevel::for_stderr("error: lowercase is a warning"), LogLevel::Warning);
    }

    #[test]
    fn scaled_observer_remaps_into_window() {
        let recorder = RecordingObserver::default();
        let scaled = ScaledObserver::new(&recorder, 0.0, 30.0, "safety backup");
        scaled.progress(50.0, "schema.sql");
        scaled.progress(100.0, "storage-policies.sql");

        let progress = recorder.progress();
        assert_eq!(progress[0], (15.0, "safety backup: schema.sql".to_string()));
        assert_eq!(progress[1].0, 30.0);
    }

    #[test]
    fn tracker_is_monotonic_and_clamped() {
        let recorder = RecordingObserver::default();
        let tracker = ProgressTracker::new(&recorder);
        tracker.report(40.0, "a");
        tracker.report(20.0, "b");
        tracker.report(140.0, "c");

        let values: Vec<f64> = recorder.progress().into_iter().map(|(p, _)| p).collect();
        assert_eq!(values, vec![40.0, 40.0, 100.0]);
    }

    #[test]
    fn tracker_steps_through_remaining_range() {
        let recorder = RecordingObserver::default();
        let tracker = ProgressTracker::new(&recorder);
        tracker.step(30.0, 1, 2, "schema.sql");
        tracker.step(30.0, 2, 2, "data.sql");

        let values: Vec<f64> = recorder.progress().into_iter().map(|(p, _)| p).collect();
        assert_eq!(values, vec![65.0, 100.0]);
    }

    #[tokio::test]
    async fn channel_observer_publishes_in_order() {
        let (observer, mut rx) = ChannelObserver::new();
        observer.log("starting", LogLevel::Info);
        observer.progress(25.0, "roles.sql");
        drop(observer);

        assert_eq!(
            rx.recv().await,
            Some(Event::Log {
                line: "starting".into(),
                level: LogLevel::Info
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(Event::Progress {
                percent: 25.0,
                label: "roles.sql".into()
            })
        );
        assert_eq!(rx.recv().await, None);
    }
}
