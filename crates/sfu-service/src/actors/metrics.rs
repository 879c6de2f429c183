//! Registry mailbox monitoring.
//!
//! The actor samples its backlog each time it takes a message off the
//! queue.
//!
//! | Backlog      | Level    |
//! |--------------|----------|
//! | <= 200       | Normal   |
//! | 201-1000     | Warning  |
//! | > 1000       | Critical |

use crate::observability::metrics;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Mailbox depth thresholds for the registry actor.
pub const REGISTRY_MAILBOX_NORMAL: usize = 200;
pub const REGISTRY_MAILBOX_WARNING: usize = 1000;

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Tracks queue depth and processed count for one actor.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record one message taken off the queue with `backlog` messages still
    /// waiting behind it.
    pub fn record_received(&self, backlog: usize) {
        let previous = self.depth.swap(backlog, Ordering::Relaxed);
        self.peak_depth.fetch_max(backlog, Ordering::Relaxed);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        metrics::set_registry_mailbox_depth(backlog);

        let (was, now) = (level_for_depth(previous), level_for_depth(backlog));
        if now <= was {
            return;
        }
        match now {
            MailboxLevel::Critical => {
                warn!(
                    target: "sfu.actor.mailbox",
                    actor_id = %self.actor_id,
                    depth = backlog,
                    threshold = REGISTRY_MAILBOX_WARNING,
                    "Mailbox depth critical"
                );
            }
            MailboxLevel::Warning => {
                debug!(
                    target: "sfu.actor.mailbox",
                    actor_id = %self.actor_id,
                    depth = backlog,
                    "Mailbox depth elevated"
                );
            }
            MailboxLevel::Normal => {}
        }
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        level_for_depth(self.current_depth())
    }
}

fn level_for_depth(depth: usize) -> MailboxLevel {
    if depth > REGISTRY_MAILBOX_WARNING {
        MailboxLevel::Critical
    } else if depth > REGISTRY_MAILBOX_NORMAL {
        MailboxLevel::Warning
    } else {
        MailboxLevel::Normal
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_received_tracks_backlog_and_peak() {
        let monitor = MailboxMonitor::new("registry");
        monitor.record_received(3);
        monitor.record_received(7);
        monitor.record_received(2);

        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.peak_depth(), 7);
        assert_eq!(monitor.messages_processed(), 3);
    }

    #[test]
    fn test_levels() {
        assert_eq!(level_for_depth(0), MailboxLevel::Normal);
        assert_eq!(level_for_depth(REGISTRY_MAILBOX_NORMAL), MailboxLevel::Normal);
        assert_eq!(level_for_depth(REGISTRY_MAILBOX_NORMAL + 1), MailboxLevel::Warning);
        assert_eq!(level_for_depth(REGISTRY_MAILBOX_WARNING + 1), MailboxLevel::Critical);

        let monitor = MailboxMonitor::new("registry");
        monitor.record_received(REGISTRY_MAILBOX_NORMAL + 1);
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);
        monitor.record_received(REGISTRY_MAILBOX_WARNING + 1);
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);
        monitor.record_received(0);
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);
    }
}
