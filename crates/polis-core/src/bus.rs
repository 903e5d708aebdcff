//! Message bus: per-recipient FIFO inboxes and an append-only history.
//!
//! Delivery is pull-based: the message processor drains inboxes when it
//! schedules a turn. `send`/`pop` are safe under concurrency with strict
//! FIFO per recipient; there is no transactional multi-operation API.
//!
//! `wait_for_user_message` supports external callers (CLI, HTTP bridge)
//! blocking on a reply. Concurrent waiters are served first-come-first-
//! served: the earliest registered waiter whose predicate matches consumes
//! the message; later waiters keep waiting.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use polis_types::{Message, PolisError, Result};

/// Predicate over messages used by waiters.
pub type MessagePredicate = Box<dyn Fn(&Message) -> bool + Send>;

struct Waiter {
    seq: u64,
    predicate: MessagePredicate,
    tx: oneshot::Sender<Message>,
}

/// The runtime's message bus.
pub struct MessageBus {
    inboxes: Mutex<HashMap<String, VecDeque<Message>>>,
    history: Mutex<Vec<Message>>,
    waiters: Mutex<Vec<Waiter>>,
    waiter_seq: AtomicU64,
}

impl MessageBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            inboxes: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            waiters: Mutex::new(Vec::new()),
            waiter_seq: AtomicU64::new(0),
        }
    }

    /// Send a message: assign an id if absent, stamp the timestamp, append
    /// to history, then either hand it to the earliest matching waiter or
    /// push it onto the recipient's inbox.
    pub fn send(&self, mut msg: Message) -> Message {
        if msg.id.is_empty() {
            msg.id = Uuid::new_v4().to_string();
        }
        msg.timestamp = Utc::now();

        self.history
            .lock()
            .expect("history lock poisoned")
            .push(msg.clone());

        // Earliest-waiter-first consumption.
        let mut claimed = None;
        {
            let mut waiters = self.waiters.lock().expect("waiter lock poisoned");
            // Closed waiters (receiver dropped on timeout) are purged as we scan.
            waiters.retain(|w| !w.tx.is_closed());
            if let Some(pos) = waiters
                .iter()
                .enumerate()
                .filter(|(_, w)| (w.predicate)(&msg))
                .min_by_key(|(_, w)| w.seq)
                .map(|(pos, _)| pos)
            {
                claimed = Some(waiters.remove(pos));
            }
        }

        if let Some(waiter) = claimed {
            debug!(msg_id = %msg.id, to = %msg.to, "message consumed by waiter");
            if waiter.tx.send(msg.clone()).is_ok() {
                return msg;
            }
            // Waiter vanished between matching and delivery; fall through
            // to normal inbox delivery.
        }

        debug!(msg_id = %msg.id, from = %msg.from, to = %msg.to, "message queued");
        self.inboxes
            .lock()
            .expect("inbox lock poisoned")
            .entry(msg.to.clone())
            .or_default()
            .push_back(msg.clone());
        msg
    }

    /// Peek at the recipient's next message without consuming it.
    pub fn peek(&self, to: &str) -> Option<Message> {
        self.inboxes
            .lock()
            .expect("inbox lock poisoned")
            .get(to)
            .and_then(|q| q.front().cloned())
    }

    /// Pop the recipient's next message.
    pub fn pop(&self, to: &str) -> Option<Message> {
        self.inboxes
            .lock()
            .expect("inbox lock poisoned")
            .get_mut(to)
            .and_then(|q| q.pop_front())
    }

    /// Drain every queued message for the recipient, in FIFO order.
    pub fn drain(&self, to: &str) -> Vec<Message> {
        self.inboxes
            .lock()
            .expect("inbox lock poisoned")
            .get_mut(to)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    /// Push a message onto the front-of-line position it would have had:
    /// used when moving interruption-queue messages back into the inbox.
    pub fn requeue(&self, to: &str, msg: Message) {
        self.inboxes
            .lock()
            .expect("inbox lock poisoned")
            .entry(to.to_string())
            .or_default()
            .push_back(msg);
    }

    /// Number of queued messages for the recipient.
    pub fn inbox_size(&self, to: &str) -> usize {
        self.inboxes
            .lock()
            .expect("inbox lock poisoned")
            .get(to)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Full history for one task id, in send order.
    pub fn history_for_task(&self, task_id: &str) -> Vec<Message> {
        self.history
            .lock()
            .expect("history lock poisoned")
            .iter()
            .filter(|m| m.task_id.as_deref() == Some(task_id))
            .cloned()
            .collect()
    }

    /// Full history involving one agent (as sender or recipient).
    pub fn history_for_agent(&self, agent_id: &str) -> Vec<Message> {
        self.history
            .lock()
            .expect("history lock poisoned")
            .iter()
            .filter(|m| m.from == agent_id || m.to == agent_id)
            .cloned()
            .collect()
    }

    /// Pending inbox snapshots for persistence.
    pub fn snapshot_inboxes(&self) -> HashMap<String, Vec<Message>> {
        self.inboxes
            .lock()
            .expect("inbox lock poisoned")
            .iter()
            .map(|(k, q)| (k.clone(), q.iter().cloned().collect()))
            .collect()
    }

    /// Restore pending inboxes from a snapshot.
    pub fn restore_inboxes(&self, inboxes: HashMap<String, Vec<Message>>) {
        let mut guard = self.inboxes.lock().expect("inbox lock poisoned");
        for (to, msgs) in inboxes {
            guard.entry(to).or_default().extend(msgs);
        }
    }

    /// Block until a message matching `predicate` is sent, or until the
    /// timeout elapses. Queued messages addressed to `user` are checked
    /// first so a reply that raced ahead of the waiter is not missed.
    pub async fn wait_for_user_message<F>(&self, predicate: F, timeout: Duration) -> Result<Message>
    where
        F: Fn(&Message) -> bool + Send + 'static,
    {
        // Check the user inbox for an already-queued match.
        {
            let mut inboxes = self.inboxes.lock().expect("inbox lock poisoned");
            if let Some(queue) = inboxes.get_mut(polis_types::USER_SENDER_ID) {
                if let Some(pos) = queue.iter().position(|m| predicate(m)) {
                    let msg = queue.remove(pos).expect("position just found");
                    return Ok(msg);
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        let seq = self.waiter_seq.fetch_add(1, Ordering::SeqCst);
        self.waiters
            .lock()
            .expect("waiter lock poisoned")
            .push(Waiter {
                seq,
                predicate: Box::new(predicate),
                tx,
            });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(msg)) => Ok(msg),
            // Sender dropped without a message: bus is going away.
            Ok(Err(_)) => Err(PolisError::WaitTimeout {
                waited_ms: timeout.as_millis() as u64,
            }),
            Err(_) => Err(PolisError::WaitTimeout {
                waited_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
