use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

pub const DEFAULT_NOTIFICATION_TTL: Duration = Duration::from_millis(3_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NotificationId(u64);

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Success,
    Error,
    Info,
    Warning,
}

impl Severity {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Info => "info",
            Self::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    pub severity: Severity,
    pub text: String,
}

#[derive(Debug, Clone)]
struct PendingNotification {
    notification: Notification,
    expires_at: Instant,
}

/// Ordered queue of transient messages. Entries leave either when dismissed or when a sweep
/// runs past their expiry, whichever happens first.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    ttl: Duration,
    next_id: u64,
    entries: BTreeMap<NotificationId, PendingNotification>,
}

impl Default for NotificationSink {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFICATION_TTL)
    }
}

impl NotificationSink {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            next_id: 0,
            entries: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn push(&mut self, severity: Severity, text: impl Into<String>) -> NotificationId {
        self.push_at(Instant::now(), severity, text)
    }

    pub fn success(&mut self, text: impl Into<String>) -> NotificationId {
        self.push(Severity::Success, text)
    }

    pub fn error(&mut self, text: impl Into<String>) -> NotificationId {
        self.push(Severity::Error, text)
    }

    pub fn push_at(
        &mut self,
        now: Instant,
        severity: Severity,
        text: impl Into<String>,
    ) -> NotificationId {
        self.next_id += 1;
        let id = NotificationId(self.next_id);
        let notification = Notification {
            id,
            severity,
            text: text.into(),
        };
        debug!(%id, severity = severity.label(), text = %notification.text, "notification queued");
        self.entries.insert(
            id,
            PendingNotification {
                notification,
                expires_at: now + self.ttl,
            },
        );
        id
    }

    pub fn dismiss(&mut self, id: NotificationId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Removes the newest entry, if any.
    pub fn dismiss_latest(&mut self) -> Option<NotificationId> {
        let (&id, _) = self.entries.last_key_value()?;
        self.entries.remove(&id);
        Some(id)
    }

    pub fn sweep(&mut self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, pending| pending.expires_at > now);
        before - self.entries.len()
    }

    /// Live entries, oldest first.
    pub fn active(&self) -> impl Iterator<Item = &Notification> {
        self.entries.values().map(|pending| &pending.notification)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&Notification> {
        self.entries
            .last_key_value()
            .map(|(_, pending)| &pending.notification)
    }
}
