//! UI command long-poll bridge.
//!
//! Server-side code enqueues commands for a browser client; the client
//! long-polls `/api/ui-commands/poll` and posts results back to
//! `/api/ui-commands/result`, which resolves the command's waiter.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Notify};
use tracing::debug;
use uuid::Uuid;

/// A command queued for a UI client.
#[derive(Debug, Clone)]
pub struct UiCommand {
    /// Unique command id, echoed back with the result.
    pub command_id: String,
    /// The command payload.
    pub command: Value,
}

struct ClientQueue {
    commands: VecDeque<UiCommand>,
    notify: Arc<Notify>,
}

/// Bridge state: per-client command queues plus pending result waiters.
pub struct UiCommandBridge {
    queues: Mutex<HashMap<String, ClientQueue>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Value>>>,
}

impl UiCommandBridge {
    /// Create an empty bridge.
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Enqueue a command for `client_id`. Returns the command id and a
    /// receiver that resolves when the client posts the result.
    pub fn enqueue(&self, client_id: &str, command: Value) -> (String, oneshot::Receiver<Value>) {
        let command_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .insert(command_id.clone(), tx);

        let mut queues = self.queues.lock().expect("queue lock poisoned");
        let queue = queues.entry(client_id.to_string()).or_insert_with(|| ClientQueue {
            commands: VecDeque::new(),
            notify: Arc::new(Notify::new()),
        });
        queue.commands.push_back(UiCommand {
            command_id: command_id.clone(),
            command,
        });
        queue.notify.notify_one();
        debug!(client_id, command_id = %command_id, "ui command enqueued");
        (command_id, rx)
    }

    /// Long-poll the next command for `client_id`, waiting up to
    /// `timeout`. `None` on timeout.
    pub async fn poll(&self, client_id: &str, timeout: Duration) -> Option<UiCommand> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notify = {
                let mut queues = self.queues.lock().expect("queue lock poisoned");
                let queue = queues.entry(client_id.to_string()).or_insert_with(|| ClientQueue {
                    commands: VecDeque::new(),
                    notify: Arc::new(Notify::new()),
                });
                if let Some(cmd) = queue.commands.pop_front() {
                    return Some(cmd);
                }
                queue.notify.clone()
            };

            if tokio::time::timeout_at(deadline, notify.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    /// Resolve a command with its result. `false` when no waiter exists
    /// (duplicate or unknown command id).
    pub fn resolve(&self, command_id: &str, result: Value) -> bool {
        let Some(tx) = self
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(command_id)
        else {
            return false;
        };
        tx.send(result).is_ok()
    }
}

impl Default for UiCommandBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn enqueue_then_poll_then_resolve() {
        let bridge = Arc::new(UiCommandBridge::new());
        let (command_id, rx) = bridge.enqueue("client-1", json!({"op": "open_file"}));

        let cmd = bridge
            .poll("client-1", Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(cmd.command_id, command_id);
        assert_eq!(cmd.command["op"], "open_file");

        assert!(bridge.resolve(&command_id, json!({"ok": true})));
        assert_eq!(rx.await.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn poll_times_out_without_commands() {
        let bridge = UiCommandBridge::new();
        let got = bridge.poll("client-1", Duration::from_millis(20)).await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn poll_wakes_on_enqueue() {
        let bridge = Arc::new(UiCommandBridge::new());
        let bridge2 = bridge.clone();

        let poller = tokio::spawn(async move {
            bridge2.poll("client-1", Duration::from_secs(2)).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        bridge.enqueue("client-1", json!({"op": "ping"}));

        let cmd = poller.await.unwrap().unwrap();
        assert_eq!(cmd.command["op"], "ping");
    }

    #[tokio::test]
    async fn clients_are_isolated() {
        let bridge = UiCommandBridge::new();
        bridge.enqueue("client-a", json!({"op": "a"}));
        assert!(bridge.poll("client-b", Duration::from_millis(20)).await.is_none());
        assert!(bridge.poll("client-a", Duration::from_millis(20)).await.is_some());
    }

    #[tokio::test]
    async fn resolving_unknown_command_is_false() {
        let bridge = UiCommandBridge::new();
        assert!(!bridge.resolve("ghost", json!({})));
    }
}
