use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

/// Arrival identity of a delivered utterance. Two deliveries of the same text get
/// different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(u64);

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cmd-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub id: CommandId,
    pub raw_text: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotOccupied {
    pub pending: CommandId,
}

impl std::fmt::Display for SlotOccupied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "command {} is still awaiting acknowledgment", self.pending)
    }
}

impl std::error::Error for SlotOccupied {}

#[derive(Debug, Clone)]
pub struct CommandSlot {
    tx: Arc<watch::Sender<Option<PendingCommand>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for CommandSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Place a new utterance in the slot. Fails while a previous one is unacknowledged.
    pub fn deliver(&self, raw_text: impl Into<String>) -> Result<CommandId, SlotOccupied> {
        let raw_text = raw_text.into();
        let mut outcome = Err(SlotOccupied {
            pending: CommandId(0),
        });
        self.tx.send_if_modified(|slot| match slot {
            Some(pending) => {
                outcome = Err(SlotOccupied {
                    pending: pending.id,
                });
                false
            }
            None => {
                let id = CommandId(self.next_id.fetch_add(1, Ordering::SeqCst));
                *slot = Some(PendingCommand {
                    id,
                    raw_text: raw_text.clone(),
                    received_at: Utc::now(),
                });
                outcome = Ok(id);
                true
            }
        });
        if let Ok(id) = &outcome {
            tracing::debug!(command = %id, "command delivered");
        }
        outcome
    }

    pub fn current(&self) -> Option<PendingCommand> {
        self.tx.borrow().clone()
    }

    pub fn is_awaiting_ack(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Raw view of the slot, for hosts that wait on acknowledgment.
    pub fn watch(&self) -> watch::Receiver<Option<PendingCommand>> {
        self.tx.subscribe()
    }

    /// Stream of newly arrived commands for a controller.
    pub fn feed(&self) -> CommandFeed {
        CommandFeed {
            rx: self.tx.subscribe(),
            last_seen: None,
        }
    }

    /// Bind the acknowledgment for `command` to a guard.
    pub fn ack_guard(&self, command: &PendingCommand) -> AckGuard {
        AckGuard {
            slot: self.clone(),
            id: command.id,
            done: false,
        }
    }

    fn clear(&self, id: CommandId) -> bool {
        self.tx.send_if_modified(|slot| match slot {
            Some(pending) if pending.id == id => {
                *slot = None;
                true
            }
            _ => false,
        })
    }
}

/// Yields each delivered command once, keyed by arrival id rather than content.
pub struct CommandFeed {
    rx: watch::Receiver<Option<PendingCommand>>,
    last_seen: Option<CommandId>,
}

impl CommandFeed {
    /// Wait for a command this feed has not yielded yet. Cancel safe.
    pub async fn next(&mut self) -> Option<PendingCommand> {
        loop {
            let current = self.rx.borrow_and_update().clone();
            if let Some(command) = current
                && self.last_seen != Some(command.id)
            {
                self.last_seen = Some(command.id);
                return Some(command);
            }
            if self.rx.changed().await.is_err() {
                return None;
            }
        }
    }
}

/// Acknowledges its command exactly once: explicitly via [`AckGuard::ack`], or on drop
/// if processing was abandoned.
#[derive(Debug)]
pub struct AckGuard {
    slot: CommandSlot,
    id: CommandId,
    done: bool,
}

impl AckGuard {
    pub fn ack(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        if self.slot.clear(self.id) {
            tracing::debug!(command = %self.id, "command acknowledged");
        }
    }
}

impl Drop for AckGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::CommandSlot;

    #[test]
    fn second_delivery_is_rejected_until_ack() {
        let slot = CommandSlot::new();
        let first = slot.deliver("start recording").expect("empty slot");
        let err = slot.deliver("stop").expect_err("occupied");
        assert_eq!(err.pending, first);
        assert!(slot.is_awaiting_ack());

        let pending = slot.current().expect("pending");
        slot.ack_guard(&pending).ack();

        assert!(!slot.is_awaiting_ack());
        assert!(slot.deliver("stop").is_ok());
    }

    #[test]
    fn stale_guard_does_not_clear_newer_command() {
        let slot = CommandSlot::new();
        slot.deliver("one").expect("deliver");
        let first = slot.current().expect("pending");
        let guard = slot.ack_guard(&first);
        let stale = slot.ack_guard(&first);
        guard.ack();

        slot.deliver("two").expect("deliver");
        drop(stale);
        assert_eq!(slot.current().map(|c| c.raw_text), Some("two".to_string()));
    }

    #[tokio::test]
    async fn feed_yields_same_text_twice_when_delivered_twice() {
        let slot = CommandSlot::new();
        let mut feed = slot.feed();

        slot.deliver("like").expect("deliver");
        let first = feed.next().await.expect("first");
        slot.ack_guard(&first).ack();

        slot.deliver("like").expect("deliver");
        let second = feed.next().await.expect("second");

        assert_eq!(first.raw_text, second.raw_text);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn feed_sees_command_delivered_before_subscription() {
        let slot = CommandSlot::new();
        slot.deliver("post").expect("deliver");
        let mut feed = slot.feed();
        assert_eq!(feed.next().await.map(|c| c.raw_text), Some("post".to_string()));
    }

    #[tokio::test]
    async fn feed_does_not_replay_after_ack() {
        let slot = CommandSlot::new();
        let mut feed = slot.feed();
        slot.deliver("post").expect("deliver");
        let command = feed.next().await.expect("command");
        slot.ack_guard(&command).ack();

        let again = tokio::time::timeout(std::time::Duration::from_millis(20), feed.next()).await;
        assert!(again.is_err());
    }
}
