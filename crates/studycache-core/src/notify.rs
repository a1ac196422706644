//! Asynchronous events for the front end.
//!
//! Core operations never block on user interaction. Anything the user should
//! see (saved progress, unlocked badges, the welcome message, errors) is
//! emitted as an [`AppEvent`] and rendered by whoever holds the receiver.

use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// A dismissible message.
    Notify { kind: NotificationKind, message: String },
    /// Aggregate progress changed and should be re-rendered.
    ProgressChanged { completed: usize, total: usize, percent: f64 },
    /// Emitted exactly once per achievement key.
    AchievementUnlocked { key: String, title: String },
    /// First login of a new account.
    Welcome { username: String },
}

/// Sending half of the event channel. Cheap to clone.
#[derive(Clone, Default)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<AppEvent>>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A notifier that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: AppEvent) {
        if let Some(ref tx) = self.tx {
            if tx.send(event).is_err() {
                debug!("Event receiver dropped");
            }
        }
    }

    pub fn success(&self, message: impl Into<String>) {
        self.notify(NotificationKind::Success, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.notify(NotificationKind::Error, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.notify(NotificationKind::Info, message);
    }

    fn notify(&self, kind: NotificationKind, message: impl Into<String>) {
        self.emit(AppEvent::Notify {
            kind,
            message: message.into(),
        });
    }
}

/// Drain every event currently queued without waiting.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<AppEvent>) -> Vec<AppEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_queued_in_order() {
        let (notifier, mut rx) = Notifier::channel();
        notifier.info("one");
        notifier.emit(AppEvent::Welcome { username: "alice".to_string() });

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            AppEvent::Notify { kind: NotificationKind::Info, message: "one".to_string() }
        );
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_disabled_and_dropped_receiver_are_silent() {
        Notifier::disabled().error("ignored");
        let (notifier, rx) = Notifier::channel();
        drop(rx);
        notifier.success("nobody listening");
    }
}
