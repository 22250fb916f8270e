//! Streaming session with reconnect policy
//!
//! Owns one authenticated order stream. The receive loop does I/O only: every
//! decoded hint and every connection change is forwarded over a channel to
//! whoever owns the session state.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected -> Connecting ...
//!                                    \-> Closed (manual close only)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clients::{OrderHint, StreamConnection, StreamConnector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A reconnect succeeded. The first connection is signalled through the
    /// oneshot returned by `spawn` instead.
    Reconnected,
    Hint(OrderHint),
    Disconnected { reason: String },
    ReconnectExhausted { attempts: u32, last_error: String },
}

/// Fixed-delay reconnect with a bounded attempt budget. The budget resets
/// after every successful connection.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_attempts: 3,
        }
    }
}

pub struct StreamSession {
    state: watch::Receiver<StreamState>,
    closing: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl StreamSession {
    /// Start connecting in the background. The returned oneshot fires once,
    /// on the first successful connection; it is dropped unfired if the
    /// session gives up or is closed first.
    pub fn spawn<T>(
        connector: Arc<dyn StreamConnector>,
        policy: ReconnectPolicy,
        events: mpsc::Sender<T>,
    ) -> (Self, oneshot::Receiver<()>)
    where
        T: From<StreamEvent> + Send + 'static,
    {
        let (state_tx, state_rx) = watch::channel(StreamState::Disconnected);
        let (closing_tx, closing_rx) = watch::channel(false);
        let (connected_tx, connected_rx) = oneshot::channel();

        let worker = StreamWorker {
            connector,
            policy,
            events,
            state: state_tx,
            closing: closing_rx,
        };
        let task = tokio::spawn(worker.run(connected_tx));

        (
            Self {
                state: state_rx,
                closing: closing_tx,
                task: Some(task),
            },
            connected_rx,
        )
    }

    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Manual close: raise the flag, then let the worker close the transport.
    /// No reconnect follows. Waits up to `timeout` for the worker.
    pub async fn close(&mut self, timeout: Duration) {
        let _ = self.closing.send(true);

        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                warn!("⚠️ Stream worker did not stop within {:?}; aborting", timeout);
                task.abort();
            }
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        let _ = self.closing.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct StreamWorker<T> {
    connector: Arc<dyn StreamConnector>,
    policy: ReconnectPolicy,
    events: mpsc::Sender<T>,
    state: watch::Sender<StreamState>,
    closing: watch::Receiver<bool>,
}

/// Resolves once the manual-close flag is raised or the session handle is gone
async fn closed(closing: &mut watch::Receiver<bool>) {
    loop {
        if *closing.borrow() {
            return;
        }
        if closing.changed().await.is_err() {
            return;
        }
    }
}

impl<T> StreamWorker<T>
where
    T: From<StreamEvent> + Send + 'static,
{
    fn is_closing(&self) -> bool {
        *self.closing.borrow()
    }

    fn set_state(&self, state: StreamState) {
        let _ = self.state.send(state);
    }

    /// Forward an event unless the session is being closed
    async fn forward(&mut self, event: StreamEvent) -> bool {
        let events = self.events.clone();
        tokio::select! {
            sent = events.send(T::from(event)) => sent.is_ok(),
            _ = closed(&mut self.closing) => false,
        }
    }

    async fn run(mut self, connected_tx: oneshot::Sender<()>) {
        let mut connected_tx = Some(connected_tx);
        let mut attempts: u32 = 0;
        let mut last_error = String::new();

        loop {
            if self.is_closing() {
                break;
            }

            self.set_state(StreamState::Connecting);
            let connector = Arc::clone(&self.connector);
            let result = tokio::select! {
                r = connector.connect() => r,
                _ = closed(&mut self.closing) => break,
            };

            match result {
                Ok(connection) => {
                    attempts = 0;
                    self.set_state(StreamState::Connected);

                    match connected_tx.take() {
                        Some(tx) => {
                            let _ = tx.send(());
                        }
                        None => {
                            info!("🔄 Order stream reconnected");
                            if !self.forward(StreamEvent::Reconnected).await {
                                break;
                            }
                        }
                    }

                    match self.pump(connection).await {
                        Some(reason) => {
                            warn!("⚠️ Order stream dropped: {}", reason);
                            self.set_state(StreamState::Disconnected);
                            last_error = reason.clone();
                            if !self.forward(StreamEvent::Disconnected { reason }).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                Err(e) => {
                    warn!("❌ Order stream connect failed: {}", e);
                    self.set_state(StreamState::Disconnected);
                    last_error = e.to_string();
                }
            }

            if attempts >= self.policy.max_attempts {
                warn!(
                    "❌ Order stream gave up after {} reconnect attempts",
                    attempts
                );
                self.set_state(StreamState::Disconnected);
                let _ = self
                    .forward(StreamEvent::ReconnectExhausted { attempts, last_error })
                    .await;
                return;
            }

            attempts += 1;
            debug!(
                "Reconnect attempt {}/{} in {:?}",
                attempts, self.policy.max_attempts, self.policy.delay
            );
            tokio::select! {
                _ = tokio::time::sleep(self.policy.delay) => {}
                _ = closed(&mut self.closing) => break,
            }
        }

        self.set_state(StreamState::Closed);
        debug!("Order stream worker closed");
    }

    /// Read until the connection ends. Returns the drop reason, or `None`
    /// when the session was closed manually (transport already closed).
    async fn pump(&mut self, mut connection: Box<dyn StreamConnection>) -> Option<String> {
        loop {
            let next = tokio::select! {
                biased;
                _ = closed(&mut self.closing) => {
                    connection.close().await;
                    return None;
                }
                next = connection.next_hint() => next,
            };

            match next {
                Some(Ok(hint)) => {
                    if !self.forward(StreamEvent::Hint(hint)).await {
                        connection.close().await;
                        return None;
                    }
                }
                Some(Err(e)) => return Some(e.to_string()),
                None => {
                    if self.is_closing() {
                        return None;
                    }
                    return Some("connection closed by peer".to_string());
                }
            }
        }
    }
}
